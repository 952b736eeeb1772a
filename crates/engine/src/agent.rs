//! The single-run supervisor (spec.md §4.1): owns the lifecycle of exactly
//! one workflow run, from Setup through Teardown, including any number of
//! `hitl` pauses in between.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nodes::{HitlControl, NodeError, NodeRegistry};
use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::env::{build_env, SpecialVars};
use crate::ipc::{IpcListener, IpcState};
use crate::loader::DagSet;
use crate::models::{Dag, DagRunStatus, Node, NodeStatus, Status, Step};
use crate::node_executor::{self, NodeExecutorCtx};
use crate::templating::TemplateContext;
use crate::walker;
use crate::EngineError;

/// Caller-supplied knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dag_run_id: Option<Uuid>,
    pub params: HashMap<String, Value>,
    pub worker_id: Option<String>,
}

/// Everything an `Agent` needs that outlives any single run: where to
/// persist state, the plugin registry, and how to resolve a `call`/
/// `parallel` step's target DAG by name.
#[derive(Clone)]
pub struct AgentConfig {
    pub store: store::StatusStore,
    pub registry: Arc<NodeRegistry>,
    pub dags: Arc<DagSet>,
}

enum HandlerKind {
    Init,
    Success,
    Failure,
    Wait,
    Cancel,
    Exit,
}

struct Shared {
    dag: Dag,
    dag_run_id: Uuid,
    config: AgentConfig,
    status: Mutex<DagRunStatus>,
    progress_tx: watch::Sender<DagRunStatus>,
    cancel: CancellationToken,
    resume_notify: Notify,
    /// Set when this `Agent` was built from a previously persisted status
    /// (`Agent::from_status`, used for `Retry` and for a process restarted
    /// while a run sat `Waiting`) rather than a fresh `NotStarted` one — the
    /// precondition gate and `init` handler only apply to a run's first
    /// attempt.
    resumed: bool,
}

/// Single-run supervisor. One `Agent` drives exactly one `dagRunId` from
/// its starting snapshot to a terminal status. A `hitl` pause doesn't end
/// `run()`: the IPC socket, the open attempt, and the run lock all stay
/// live while waiting for an external `resume`/`abort` decision, so that
/// decision can reach a running process instead of requiring a whole new
/// attempt just to flip one step's status (see DESIGN.md).
#[derive(Clone)]
pub struct Agent {
    shared: Arc<Shared>,
}

impl Agent {
    pub fn new(dag: Dag, config: AgentConfig, options: RunOptions) -> Self {
        let dag_run_id = options.dag_run_id.unwrap_or_else(Uuid::new_v4);
        let mut status = DagRunStatus::new(dag_run_id, &dag, options.params);
        status.worker_id = options.worker_id;
        let (tx, _rx) = watch::channel(status.clone());
        Self {
            shared: Arc::new(Shared {
                dag,
                dag_run_id,
                config,
                status: Mutex::new(status),
                progress_tx: tx,
                cancel: CancellationToken::new(),
                resume_notify: Notify::new(),
                resumed: false,
            }),
        }
    }

    /// Continue a previously persisted run — a `Retry`, or a process
    /// restarted while a run was `Waiting` — from `status` rather than a
    /// fresh snapshot. The caller is responsible for having already applied
    /// whatever decision prompted the resume (flipping a `Waiting` node to
    /// `Succeeded`/`Aborted`, or resetting a manually-marked-failed node and
    /// its downstream back to `NotStarted`).
    pub fn from_status(dag: Dag, config: AgentConfig, status: DagRunStatus) -> Self {
        let dag_run_id = status.dag_run_id;
        let (tx, _rx) = watch::channel(status.clone());
        Self {
            shared: Arc::new(Shared {
                dag,
                dag_run_id,
                config,
                status: Mutex::new(status),
                progress_tx: tx,
                cancel: CancellationToken::new(),
                resume_notify: Notify::new(),
                resumed: true,
            }),
        }
    }

    pub fn dag_run_id(&self) -> Uuid {
        self.shared.dag_run_id
    }

    pub async fn status(&self) -> DagRunStatus {
        self.shared.status.lock().await.clone()
    }

    pub fn hitl_control(&self) -> Arc<dyn HitlControl> {
        Arc::new(HitlHandle(self.shared.clone()))
    }

    /// Forward a termination signal. The first call triggers graceful
    /// cancellation (propagated to running nodes, which attempt
    /// `signalOnStop` then escalate to `SIGKILL` after a grace period); the
    /// cancellation token is idempotent, so a second call is a no-op beyond
    /// what the first already set in motion.
    pub fn signal(&self) {
        self.shared.cancel.cancel();
    }

    /// Synchronous cancellation; used by remote control and double-signal.
    pub fn abort(&self) {
        self.shared.cancel.cancel();
    }

    #[instrument(skip_all, fields(dag = %self.shared.dag.name, run_id = %self.shared.dag_run_id))]
    pub async fn run(&self) -> Result<Status, EngineError> {
        let dag_name = self.shared.dag.name.clone();
        let dag_run_id = self.shared.dag_run_id;
        let layout = self.shared.config.store.layout().clone();

        let lock = self.shared.config.store.acquire_lock(&dag_name, dag_run_id).await?;
        let mut writer = self.shared.config.store.open_attempt(&dag_name, dag_run_id).await?;

        let sock_path = layout.sock_file(&dag_name, dag_run_id);
        let ipc_listener = IpcListener::bind(sock_path).await.map_err(EngineError::Io)?;
        let ipc_state = IpcState {
            status: self.shared.progress_tx.subscribe(),
            cancel: self.shared.cancel.clone(),
            hitl: self.hitl_control(),
        };
        let serve_handle = tokio::spawn(ipc_listener.serve(ipc_state));

        self.mark_started(&mut writer).await?;

        let aborted_by_gate = if self.shared.resumed {
            false
        } else if !self.eval_dag_preconditions(writer.status_path().to_string_lossy().as_ref()).await {
            self.abort_for_precondition(&mut writer).await?;
            true
        } else {
            !self.run_init_handler(&mut writer).await?
        };

        if !aborted_by_gate {
            self.main_walk(&mut writer).await?;
        }

        if !aborted_by_gate {
            self.run_result_handler(&mut writer).await?;
        }
        self.run_exit_handler(&mut writer).await?;

        let final_status = {
            let mut status = self.shared.status.lock().await;
            status.finished_at = Some(Utc::now());
            store::append(&mut writer, &*status).await?;
            let _ = self.shared.progress_tx.send(status.clone());
            status.status
        };

        writer.close().await?;
        self.shared.cancel.cancel();
        let _ = serve_handle.await;
        drop(lock);

        info!(status = ?final_status, "run finished");
        Ok(final_status)
    }

    async fn main_walk(&self, writer: &mut store::AttemptWriter) -> Result<(), EngineError> {
        loop {
            let overall = {
                let mut status = self.shared.status.lock().await;
                let waiting = waiting_csv(&status.nodes);
                let ctx = self.executor_ctx(writer, waiting);
                let overall = walker::walk_with_progress(&mut status, &ctx, Some(&self.shared.progress_tx)).await;
                status.status = overall;
                store::append(writer, &*status).await?;
                overall
            };

            if overall != Status::Waiting || self.shared.cancel.is_cancelled() {
                break;
            }

            self.run_wait_handler(writer).await?;

            tokio::select! {
                _ = self.shared.resume_notify.notified() => {}
                _ = self.shared.cancel.cancelled() => break,
            }
        }
        Ok(())
    }

    async fn eval_dag_preconditions(&self, run_log_file: &str) -> bool {
        if self.shared.dag.preconditions.is_empty() {
            return true;
        }
        let special = SpecialVars {
            dag_name: self.shared.dag.name.clone(),
            dag_run_id: self.shared.dag_run_id.to_string(),
            dag_run_log_file: run_log_file.to_string(),
            dag_run_step_name: None,
            dag_run_step_stdout_file: None,
            dag_run_step_stderr_file: None,
            dag_waiting_steps: None,
        };
        let env = build_env(&self.shared.dag, None, &special, &[]);
        let tctx = TemplateContext::new(&env, &[]);
        for pre in &self.shared.dag.preconditions {
            if !node_executor::eval_precondition(pre, &env, &tctx).await {
                return false;
            }
        }
        true
    }

    async fn abort_for_precondition(&self, writer: &mut store::AttemptWriter) -> Result<(), EngineError> {
        let mut status = self.shared.status.lock().await;
        status.status = Status::Aborted;
        for node in status.nodes.iter_mut() {
            node.status = NodeStatus::Skipped;
            node.error = Some("skipped: dag-level precondition not satisfied".into());
        }
        store::append(writer, &*status).await?;
        let _ = self.shared.progress_tx.send(status.clone());
        Ok(())
    }

    /// Runs the `init` handler if declared. Returns `false` (caller should
    /// treat the run as gate-aborted) if it failed.
    async fn run_init_handler(&self, writer: &mut store::AttemptWriter) -> Result<bool, EngineError> {
        let Some(handler) = self.shared.dag.handler_on.init.clone() else { return Ok(true) };
        let mut status = self.shared.status.lock().await;
        self.run_handler(&handler, HandlerKind::Init, &mut status, writer).await?;
        let failed = status.on_init.as_ref().map(|n| n.status == NodeStatus::Failed).unwrap_or(false);
        if failed {
            status.status = Status::Aborted;
            for node in status.nodes.iter_mut() {
                if !node.status.is_terminal() {
                    node.status = NodeStatus::Skipped;
                    node.error = Some("skipped: init handler failed".into());
                }
            }
            store::append(writer, &*status).await?;
            let _ = self.shared.progress_tx.send(status.clone());
        }
        Ok(!failed)
    }

    async fn run_wait_handler(&self, writer: &mut store::AttemptWriter) -> Result<(), EngineError> {
        let Some(handler) = self.shared.dag.handler_on.wait.clone() else { return Ok(()) };
        let mut status = self.shared.status.lock().await;
        self.run_handler(&handler, HandlerKind::Wait, &mut status, writer).await
    }

    /// Runs exactly one of `success | failure | cancel` based on the
    /// terminal status reached by `main_walk` (the `wait` handler already
    /// ran once per pause, inside the walk loop).
    async fn run_result_handler(&self, writer: &mut store::AttemptWriter) -> Result<(), EngineError> {
        let overall = self.shared.status.lock().await.status;
        let (kind, handler) = match overall {
            Status::Succeeded | Status::PartiallySucceeded => {
                (HandlerKind::Success, self.shared.dag.handler_on.success.clone())
            }
            Status::Aborted => (HandlerKind::Cancel, self.shared.dag.handler_on.cancel.clone()),
            Status::Failed => (HandlerKind::Failure, self.shared.dag.handler_on.failure.clone()),
            Status::Waiting | Status::NotStarted | Status::Running => return Ok(()),
        };
        let Some(handler) = handler else { return Ok(()) };
        let mut status = self.shared.status.lock().await;
        self.run_handler(&handler, kind, &mut status, writer).await
    }

    async fn run_exit_handler(&self, writer: &mut store::AttemptWriter) -> Result<(), EngineError> {
        let Some(handler) = self.shared.dag.handler_on.exit.clone() else { return Ok(()) };
        let mut status = self.shared.status.lock().await;
        self.run_handler(&handler, HandlerKind::Exit, &mut status, writer).await
    }

    async fn run_handler(
        &self,
        handler_step: &Step,
        kind: HandlerKind,
        status: &mut DagRunStatus,
        writer: &mut store::AttemptWriter,
    ) -> Result<(), EngineError> {
        let mut node = Node::new(handler_step.clone());
        node.status = NodeStatus::Running;
        let completed: Vec<Node> = status.nodes.clone();
        let waiting = waiting_csv(&status.nodes);
        let ctx = self.executor_ctx(writer, waiting);
        node_executor::execute(&mut node, &completed, &ctx).await;

        match kind {
            HandlerKind::Init => status.on_init = Some(node),
            HandlerKind::Success => status.on_success = Some(node),
            HandlerKind::Failure => status.on_failure = Some(node),
            HandlerKind::Wait => status.on_wait = Some(node),
            HandlerKind::Cancel => status.on_cancel = Some(node),
            HandlerKind::Exit => status.on_exit = Some(node),
        }
        store::append(writer, &*status).await?;
        let _ = self.shared.progress_tx.send(status.clone());
        Ok(())
    }

    async fn mark_started(&self, writer: &mut store::AttemptWriter) -> Result<(), EngineError> {
        let mut status = self.shared.status.lock().await;
        status.started_at = Some(Utc::now());
        store::append(writer, &*status).await?;
        let _ = self.shared.progress_tx.send(status.clone());
        Ok(())
    }

    fn executor_ctx<'a>(&'a self, writer: &'a store::AttemptWriter, waiting_steps: Option<String>) -> NodeExecutorCtx<'a> {
        NodeExecutorCtx {
            dag: &self.shared.dag,
            dag_run_id: self.shared.dag_run_id,
            dag_run_log_file: writer.status_path().to_string_lossy().into_owned(),
            log_dir: writer.log_dir().to_path_buf(),
            registry: self.shared.config.registry.as_ref(),
            cancel: self.shared.cancel.clone(),
            sub_runner: Arc::new(SubDagRunner { config: self.shared.config.clone() }),
            waiting_steps,
        }
    }
}

fn waiting_csv(nodes: &[Node]) -> Option<String> {
    let names: Vec<&str> = nodes.iter().filter(|n| n.status == NodeStatus::Waiting).map(|n| n.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(","))
    }
}

/// The external resume/abort surface, handed to the IPC listener and to any
/// direct embedder. Mutates the shared status and wakes `main_walk`'s
/// `resume_notify` wait — the walk loop picks the new status up on its next
/// pass rather than this handle re-entering the walker itself.
struct HitlHandle(Arc<Shared>);

#[async_trait]
impl HitlControl for HitlHandle {
    async fn resume(&self, step_name: Option<&str>) -> Result<(), NodeError> {
        self.decide(step_name, NodeStatus::Succeeded, "resumed via external hitl decision").await
    }

    async fn abort(&self, step_name: Option<&str>) -> Result<(), NodeError> {
        self.decide(step_name, NodeStatus::Aborted, "aborted via external hitl decision").await
    }
}

impl HitlHandle {
    async fn decide(&self, step_name: Option<&str>, new_status: NodeStatus, note: &str) -> Result<(), NodeError> {
        let mut status = self.0.status.lock().await;
        let mut touched = false;
        for node in status.nodes.iter_mut() {
            if node.status != NodeStatus::Waiting {
                continue;
            }
            if step_name.map(|n| n == node.name()).unwrap_or(true) {
                node.status = new_status;
                node.finished_at = Some(Utc::now());
                node.error = Some(note.to_string());
                touched = true;
            }
        }
        if !touched {
            return Err(NodeError::Execution(match step_name {
                Some(name) => format!("no step named '{name}' is waiting"),
                None => "no step is waiting".to_string(),
            }));
        }
        let _ = self.0.progress_tx.send(status.clone());
        drop(status);
        self.0.resume_notify.notify_one();
        Ok(())
    }
}

/// Implements [`nodes::DagRunner`] by looking a sub-DAG name up in the
/// config's loaded [`DagSet`] and running it to completion with a fresh
/// `Agent`. Injected into every [`NodeExecutorCtx`] so `subdag`/`call`/
/// `parallel` steps can start nested runs without the `nodes` crate
/// depending on `engine`.
struct SubDagRunner {
    config: AgentConfig,
}

#[async_trait]
impl nodes::DagRunner for SubDagRunner {
    async fn run_sub_dag(
        &self,
        dag_name: &str,
        params: Value,
        worker_selector: &HashMap<String, String>,
    ) -> Result<Value, NodeError> {
        let dag = self
            .config
            .dags
            .get(dag_name)
            .cloned()
            .ok_or_else(|| NodeError::Execution(format!("unknown sub-dag '{dag_name}'")))?;

        // A purely local sub-runner has nowhere else to dispatch to; label
        // matching for a remote worker is the coordinator's job (spec.md
        // §4.6), invoked instead of this type when the target carries a
        // `workerSelector` the local host can't satisfy.
        let _ = worker_selector;

        let params_map = match params {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        let agent = Agent::new(dag, self.config.clone(), RunOptions { dag_run_id: None, params: params_map, worker_id: None });
        agent.run().await.map_err(|e| NodeError::Execution(e.to_string()))?;
        let final_status = agent.status().await;

        let outputs: serde_json::Map<String, Value> = final_status
            .nodes
            .iter()
            .flat_map(|n| n.output_variables.iter().map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Value::Null))))
            .collect();
        Ok(serde_json::json!({ "outputs": outputs }))
    }
}
