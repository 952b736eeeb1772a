//! The `ExecutableNode` trait — the contract every executor plugin fulfils.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;

use crate::NodeError;

/// Lets a plugin (`subdag`, `parallel`) start another DAG run without the
/// `nodes` crate depending on `engine` — the engine implements this and
/// injects itself as a trait object, inverting the natural dependency.
#[async_trait]
pub trait DagRunner: Send + Sync {
    /// Run `dag_name` with `params` to completion and return its aggregate
    /// output object (`{outputs: {...}}`, per spec).
    async fn run_sub_dag(
        &self,
        dag_name: &str,
        params: Value,
        worker_selector: &HashMap<String, String>,
    ) -> Result<Value, NodeError>;
}

/// External resume/abort surface for `hitl` (human-in-the-loop) nodes.
/// `Waiting` is otherwise a dead end: nothing inside the node executor or
/// walker can move a node out of it, since it is deliberately excluded from
/// `NodeStatus::is_terminal`. The `Agent` implements this trait and the IPC
/// listener (and, transitively, the coordinator) call through it.
#[async_trait]
pub trait HitlControl: Send + Sync {
    /// Resume a specific waiting step by name, or every waiting step if
    /// `step_name` is `None`, marking it `Succeeded` so the walker can
    /// unblock its dependents on the next pass.
    async fn resume(&self, step_name: Option<&str>) -> Result<(), NodeError>;

    /// Abort a specific waiting step by name, or every waiting step if
    /// `step_name` is `None`, marking it `Aborted`.
    async fn abort(&self, step_name: Option<&str>) -> Result<(), NodeError>;
}

/// Everything a plugin needs that isn't part of the step's own fields:
/// identity, layered env, working directory, cancellation, and the signal
/// to forward on stop.
#[derive(Clone)]
pub struct ExecutionContext {
    pub dag_name: String,
    pub dag_run_id: uuid::Uuid,
    pub step_name: String,
    pub env: HashMap<String, String>,
    pub dir: Option<String>,
    /// Cancelled when the run is aborted. Plugins select on this at every
    /// suspension point instead of exposing a separate `kill` method —
    /// selecting on an already-cancelled token is a no-op, matching the
    /// "safe to call if Run hasn't started" requirement on `Kill`.
    pub cancel: CancellationToken,
    /// Signal forwarded to the running process on cancellation, before the
    /// grace-period SIGKILL escalation. Unix signal name, e.g. `"SIGTERM"`.
    pub signal_on_stop: String,
    pub sub_runner: Arc<dyn DagRunner>,
}

/// The already-expanded, ready-to-execute form of a step. Deliberately
/// decoupled from `engine::models::Step` so plugins don't pull in the
/// engine crate — the node executor builds this from a `Step` after
/// template expansion.
#[derive(Debug, Clone, Default)]
pub struct StepRequest {
    /// Command(s) to run, already template-expanded. A shell/command plugin
    /// runs these sequentially, stopping at the first non-zero exit.
    pub commands: Vec<String>,
    pub script: Option<String>,
    pub shell: Option<String>,
    /// Plugin-specific configuration: router routes, call spec, container
    /// spec, ssh/sftp connection info, sql params, http config, redis
    /// pipeline, and so on. Each plugin deserializes the shape it expects.
    pub config: Value,
}

/// Open stdout/stderr sinks a plugin streams its output into. Opened fresh
/// per attempt by the node executor; the plugin never chooses the path.
pub struct NodeIo {
    pub stdout: File,
    pub stderr: File,
}

/// The core executor-plugin trait: every concrete step kind (shell,
/// container, subdag, router, jq, http, ssh, sftp, sql, redis, hitl, mail,
/// ...) implements this.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Run the step to completion (or until `ctx.cancel` fires), streaming
    /// output into `io`, and report the exit code.
    async fn run(
        &self,
        ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError>;
}
