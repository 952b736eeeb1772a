//! `subdag` (a.k.a. `call`) plugin — invokes another DAG by name with a
//! parameter string and reports the child run's aggregate output object.
//!
//! The `nodes` crate never depends on `engine` (the reverse is true), so
//! the actual child-run machinery is injected as `ctx.sub_runner`, a
//! [`crate::traits::DagRunner`] trait object the engine provides.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize)]
struct CallConfig {
    dag: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    worker_selector: std::collections::HashMap<String, String>,
}

pub struct SubDagNode;

#[async_trait]
impl ExecutableNode for SubDagNode {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: CallConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid call config: {e}")))?;

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
            result = ctx.sub_runner.run_sub_dag(&config.dag, config.params, &config.worker_selector) => result?,
        };

        let rendered = serde_json::to_vec(&output).unwrap_or_default();
        io.stdout.write_all(&rendered).await.ok();
        Ok(0)
    }
}
