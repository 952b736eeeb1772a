//! Graph walker: drives every step of one DAG run from `NotStarted` to a
//! terminal status.
//!
//! Each round: cascade-skip propagates failure/skip through dependents that
//! don't tolerate it (including router-gating — a step whose upstream
//! router didn't select it is skipped the same as a failed, non-tolerated
//! dependency), then every step whose dependencies are now satisfied and
//! who isn't gated out runs concurrently, bounded by `maxActiveSteps`. The
//! walker recomputes readiness after each round rather than reacting to
//! individual step completions; within one DAG run that's an acceptable
//! trade of a little concurrency for a much simpler implementation.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::models::{dependency_map, DagRunStatus, Node, NodeStatus, Status};
use crate::node_executor::{self, NodeExecutorCtx};

/// Drive `status` to completion, mutating `status.nodes` in place.
/// Returns the computed terminal [`Status`] for the run.
pub async fn walk(status: &mut DagRunStatus, ctx: &NodeExecutorCtx<'_>) -> Status {
    walk_with_progress(status, ctx, None).await
}

/// Same as [`walk`], but publishes a clone of `status` to `progress` after
/// every round (the initial snapshot, each skip-pass, and each dispatched
/// batch) so a caller — the `Agent`, via its IPC listener — can answer
/// `status` queries with a reasonably fresh view while a run is in flight,
/// rather than only once `walk` returns.
pub async fn walk_with_progress(
    status: &mut DagRunStatus,
    ctx: &NodeExecutorCtx<'_>,
    progress: Option<&tokio::sync::watch::Sender<DagRunStatus>>,
) -> Status {
    let deps = dependency_map(ctx.dag);
    let max_active = ctx.dag.max_active_steps.unwrap_or(u32::MAX).max(1) as usize;
    let publish = |status: &DagRunStatus| {
        if let Some(tx) = progress {
            let _ = tx.send(status.clone());
        }
    };

    loop {
        if ctx.cancel.is_cancelled() {
            abort_pending(status);
            break;
        }

        apply_skip_pass(status, &deps);
        publish(status);

        if all_terminal(&status.nodes) {
            break;
        }

        let ready = ready_steps(status, &deps);
        if ready.is_empty() {
            // Nothing ready, nothing left to skip: either every node has a
            // final word, or the rest are waiting behind a hitl node that
            // hasn't been resumed yet. Either way there's nothing left this
            // walk can do.
            break;
        }

        let batch: Vec<String> = ready.into_iter().take(max_active).collect();
        dispatch_batch(status, &batch, ctx).await;
        publish(status);
    }

    compute_overall_status(&status.nodes, ctx.cancel.is_cancelled())
}

fn all_terminal(nodes: &[Node]) -> bool {
    nodes.iter().all(|n| n.status.is_terminal())
}

fn abort_pending(status: &mut DagRunStatus) {
    for node in status.nodes.iter_mut() {
        if !node.status.is_terminal() {
            node.status = NodeStatus::Aborted;
            node.error = Some("run cancelled".into());
        }
    }
}

/// Whether `dep`'s outcome blocks `name` from running: the dependency
/// itself failed/skipped without tolerance, or `dep` is a router that
/// didn't select `name` as a target.
fn blocks(dep: &Node, name: &str) -> bool {
    if !dep.unblocks_downstream() {
        return true;
    }
    if dep.step.is_router() {
        if let Some(targets) = &dep.router_matched {
            return !targets.iter().any(|t| t == name);
        }
    }
    false
}

/// Propagate `Skipped` through dependents of a node whose outcome blocks
/// them, to a fixed point (skipping one node can make its own dependents
/// skippable in turn).
fn apply_skip_pass(status: &mut DagRunStatus, deps: &HashMap<String, HashSet<String>>) {
    loop {
        let mut changed = false;
        let pending: Vec<String> = status
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::NotStarted)
            .map(|n| n.name().to_string())
            .collect();

        for name in pending {
            let dep_names = &deps[&name];
            let all_terminal = dep_names.iter().all(|d| status.node(d).map(|n| n.status.is_terminal()).unwrap_or(true));
            if !all_terminal {
                continue;
            }
            let blocked = dep_names.iter().any(|d| {
                status.node(d).map(|dep| blocks(dep, &name)).unwrap_or(false)
            });
            if blocked {
                if let Some(node) = status.node_mut(&name) {
                    node.status = NodeStatus::Skipped;
                    node.error = Some("skipped: upstream dependency did not succeed".into());
                }
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
}

fn ready_steps(status: &DagRunStatus, deps: &HashMap<String, HashSet<String>>) -> Vec<String> {
    status
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::NotStarted)
        .filter(|n| {
            deps[n.name()].iter().all(|d| {
                status
                    .node(d)
                    .map(|dep| dep.status.is_terminal() && !blocks(dep, n.name()))
                    .unwrap_or(false)
            })
        })
        .map(|n| n.name().to_string())
        .collect()
}

/// Run every step named in `names` concurrently and write the finished
/// nodes back into `status`. Each task gets its own clone of the node and
/// of the currently-terminal snapshot, so there's no shared mutable state
/// across the batch.
async fn dispatch_batch(status: &mut DagRunStatus, names: &[String], ctx: &NodeExecutorCtx<'_>) {
    let completed_snapshot: Vec<Node> =
        status.nodes.iter().filter(|n| n.status.is_terminal()).cloned().collect();

    let results: Vec<Node> = stream::iter(names.iter().cloned())
        .map(|name| {
            let mut node = status.node(&name).expect("ready step must exist").clone();
            node.status = NodeStatus::Running;
            let completed = completed_snapshot.clone();
            async move {
                node_executor::execute(&mut node, &completed, ctx).await;
                node
            }
        })
        .buffer_unordered(names.len().max(1))
        .collect()
        .await;

    for node in results {
        let name = node.name().to_string();
        if let Some(slot) = status.node_mut(&name) {
            *slot = node;
        }
    }
}

/// Derive the run-level [`Status`] from every node's terminal (or
/// not-yet-terminal) state, per the precedence the spec lays out: running
/// beats waiting beats success beats partial-success beats cancellation
/// beats failure.
fn compute_overall_status(nodes: &[Node], cancelled: bool) -> Status {
    if nodes.iter().any(|n| n.status == NodeStatus::Running) {
        return Status::Running;
    }
    if nodes.iter().any(|n| n.status == NodeStatus::Waiting) {
        return Status::Waiting;
    }

    let succeeded = nodes.iter().filter(|n| n.status == NodeStatus::Succeeded).count();
    let skipped = nodes.iter().filter(|n| n.status == NodeStatus::Skipped).count();
    let partial = nodes.iter().filter(|n| n.status == NodeStatus::PartiallySucceeded).count();
    let failed_or_aborted = nodes.iter().any(|n| matches!(n.status, NodeStatus::Failed | NodeStatus::Aborted));

    if !failed_or_aborted && partial == 0 && succeeded + skipped == nodes.len() {
        // All terminal nodes are Succeeded/Skipped (including the
        // all-Skipped no-op case), or the node set is empty.
        return Status::Succeeded;
    }
    if (failed_or_aborted || partial > 0) && succeeded + partial > 0 {
        return Status::PartiallySucceeded;
    }
    if cancelled {
        return Status::Aborted;
    }
    Status::Failed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nodes::{default_registry, DagRunner, NodeError};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::models::{CommandSpec, Dag, DagRunStatus, DagType, Step};

    struct NoopSubRunner;

    #[async_trait::async_trait]
    impl DagRunner for NoopSubRunner {
        async fn run_sub_dag(
            &self,
            _dag_name: &str,
            _params: serde_json::Value,
            _worker_selector: &std::collections::HashMap<String, String>,
        ) -> Result<serde_json::Value, NodeError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn step(name: &str, cmd: &str, depends: Vec<&str>) -> Step {
        Step {
            name: name.into(),
            id: None,
            step_type: "command".into(),
            command: Some(CommandSpec::Single(cmd.into())),
            script: None,
            args: vec![],
            dir: None,
            shell: None,
            env: vec![],
            output: None,
            stdout: None,
            stderr: None,
            depends: depends.into_iter().map(String::from).collect(),
            preconditions: vec![],
            retry_policy: None,
            repeat_policy: None,
            continue_on: None,
            timeout_sec: None,
            signal_on_stop: None,
            routes: vec![],
            call: None,
            parallel: None,
            container: None,
            config: serde_json::Value::Null,
        }
    }

    fn dag(steps: Vec<Step>) -> Dag {
        Dag {
            name: "test".into(),
            id: Uuid::new_v4(),
            dag_type: DagType::Graph,
            params: Default::default(),
            env: vec![],
            preconditions: vec![],
            handler_on: Default::default(),
            defaults: Default::default(),
            max_active_runs: None,
            max_active_steps: None,
            worker_selector: Default::default(),
            steps,
        }
    }

    async fn run(dag: &Dag) -> DagRunStatus {
        let registry = default_registry();
        let tmp = tempfile::tempdir().unwrap();
        let exec_ctx = NodeExecutorCtx {
            dag,
            dag_run_id: Uuid::new_v4(),
            dag_run_log_file: tmp.path().join("run.log").to_string_lossy().into_owned(),
            log_dir: tmp.path().to_path_buf(),
            registry: &registry,
            cancel: CancellationToken::new(),
            sub_runner: Arc::new(NoopSubRunner),
            waiting_steps: None,
        };
        let mut status = DagRunStatus::new(exec_ctx.dag_run_id, dag, Default::default());
        let overall = walk(&mut status, &exec_ctx).await;
        status.status = overall;
        status
    }

    #[tokio::test]
    async fn linear_success() {
        let d = dag(vec![step("a", "true", vec![]), step("b", "true", vec!["a"])]);
        let status = run(&d).await;
        assert_eq!(status.status, Status::Succeeded);
        assert_eq!(status.node("a").unwrap().status, NodeStatus::Succeeded);
        assert_eq!(status.node("b").unwrap().status, NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn failure_cascades_to_skip() {
        let d = dag(vec![
            step("a", "false", vec![]),
            step("b", "true", vec!["a"]),
        ]);
        let status = run(&d).await;
        assert_eq!(status.node("a").unwrap().status, NodeStatus::Failed);
        assert_eq!(status.node("b").unwrap().status, NodeStatus::Skipped);
        assert_eq!(status.status, Status::Failed);
    }

    #[tokio::test]
    async fn independent_branch_still_runs_after_sibling_fails() {
        let d = dag(vec![
            step("a", "false", vec![]),
            step("b", "true", vec![]),
        ]);
        let status = run(&d).await;
        assert_eq!(status.node("a").unwrap().status, NodeStatus::Failed);
        assert_eq!(status.node("b").unwrap().status, NodeStatus::Succeeded);
    }
}
