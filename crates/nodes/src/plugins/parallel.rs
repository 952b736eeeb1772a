//! `parallel` fan-out plugin — runs a target child DAG once per item in
//! `items`, bounded by `max_concurrent` in flight.
//!
//! Aggregate status can't be expressed as a plain exit code (the walker
//! needs to tell apart "all succeeded", "some succeeded", and "cancelled"),
//! so this plugin writes a JSON summary to stdout and reports one of a
//! small set of sentinel exit codes the node executor special-cases for
//! `type: parallel`, the same trick [`super::hitl`] uses for `Waiting`.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

/// All items' child runs succeeded.
pub const ALL_SUCCEEDED_EXIT_CODE: i32 = 0;
/// Some items' child runs failed; others succeeded.
pub const PARTIAL_EXIT_CODE: i32 = i32::MIN + 1;
/// Every item's child run failed.
pub const ALL_FAILED_EXIT_CODE: i32 = 1;

#[derive(Deserialize)]
struct ParallelConfig {
    dag: String,
    items: Value,
    #[serde(default = "default_max_concurrent")]
    max_concurrent: usize,
    #[serde(default)]
    worker_selector: std::collections::HashMap<String, String>,
}

fn default_max_concurrent() -> usize {
    1
}

#[derive(Serialize)]
struct ItemResult {
    item: Value,
    succeeded: bool,
    output: Option<Value>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ParallelSummary {
    succeeded: usize,
    failed: usize,
    results: Vec<ItemResult>,
}

pub struct ParallelNode;

fn resolve_items(items: &Value) -> Vec<Value> {
    match items {
        Value::Array(list) => list.clone(),
        Value::String(s) => {
            // `${VAR}` references are expanded by the templating pass before
            // this plugin ever runs; if it still looks like a JSON array,
            // parse it, otherwise treat the whole string as one item.
            serde_json::from_str::<Vec<Value>>(s).unwrap_or_else(|_| vec![Value::String(s.clone())])
        }
        other => vec![other.clone()],
    }
}

#[async_trait]
impl ExecutableNode for ParallelNode {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: ParallelConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid parallel config: {e}")))?;
        let items = resolve_items(&config.items);
        if items.is_empty() {
            let summary = ParallelSummary { succeeded: 0, failed: 0, results: vec![] };
            io.stdout.write_all(&serde_json::to_vec(&summary).unwrap_or_default()).await.ok();
            return Ok(ALL_SUCCEEDED_EXIT_CODE);
        }

        let max_concurrent = config.max_concurrent.max(1);
        let dag = config.dag.clone();
        let selector = config.worker_selector.clone();

        let runs = stream::iter(items.into_iter().map(|item| {
            let dag = dag.clone();
            let selector = selector.clone();
            let sub_runner = ctx.sub_runner.clone();
            async move {
                let result = sub_runner.run_sub_dag(&dag, item.clone(), &selector).await;
                match result {
                    Ok(output) => ItemResult { item, succeeded: true, output: Some(output), error: None },
                    Err(e) => ItemResult { item, succeeded: false, output: None, error: Some(e.to_string()) },
                }
            }
        }))
        .buffer_unordered(max_concurrent)
        .collect::<Vec<_>>();

        let results = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
            results = runs => results,
        };

        let succeeded = results.iter().filter(|r| r.succeeded).count();
        let failed = results.len() - succeeded;
        let exit_code = if failed == 0 {
            ALL_SUCCEEDED_EXIT_CODE
        } else if succeeded == 0 {
            ALL_FAILED_EXIT_CODE
        } else {
            PARTIAL_EXIT_CODE
        };

        let summary = ParallelSummary { succeeded, failed, results };
        io.stdout.write_all(&serde_json::to_vec(&summary).unwrap_or_default()).await.ok();
        Ok(exit_code)
    }
}
