//! Core domain models for the DAG run engine.
//!
//! These types are the source of truth for what a workflow, and a run of a
//! workflow, look like in memory. A `Dag` is produced by a loader (out of
//! scope here — see `crate::load`) and is immutable for the lifetime of a
//! run; a `DagRunStatus` is assembled by the graph walker from `Node`s on
//! every state change.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Dag
// ---------------------------------------------------------------------------

/// How the step dependency graph is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DagType {
    /// Each step with no explicit `depends` inherits the previous step.
    Chain,
    /// Dependencies are exactly the declared `depends` sets.
    Graph,
}

impl Default for DagType {
    fn default() -> Self {
        Self::Graph
    }
}

/// Defaults inherited by every step unless overridden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDefaults {
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub continue_on: Option<ContinueOn>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub container: Option<serde_json::Value>,
    #[serde(default)]
    pub ssh: Option<serde_json::Value>,
}

/// Lifecycle handlers, themselves steps with synthetic names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Handlers {
    pub init: Option<Step>,
    pub success: Option<Step>,
    pub failure: Option<Step>,
    pub wait: Option<Step>,
    #[serde(alias = "abort")]
    pub cancel: Option<Step>,
    pub exit: Option<Step>,
}

/// A complete, validated workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    pub name: String,
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(rename = "type", default)]
    pub dag_type: DagType,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub handler_on: Handlers,
    #[serde(default)]
    pub defaults: StepDefaults,
    #[serde(default)]
    pub max_active_runs: Option<u32>,
    #[serde(default)]
    pub max_active_steps: Option<u32>,
    #[serde(default)]
    pub worker_selector: HashMap<String, String>,
    pub steps: Vec<Step>,
}

impl Dag {
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn step_by_name(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    pub condition: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub limit: u32,
    #[serde(default)]
    pub interval_sec: u64,
    #[serde(default)]
    pub exit_code: Option<Vec<i32>>,
}

/// `repeat` accepts `true`, `"while"`, `"until"`, or `false`/omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RepeatMode {
    Bool(bool),
    Mode(String),
}

impl Default for RepeatMode {
    fn default() -> Self {
        RepeatMode::Bool(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepeatPolicy {
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub interval_sec: u64,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub exit_code: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContinueOn {
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub exit_code: Option<Vec<i32>>,
    #[serde(default)]
    pub output: Option<Vec<String>>,
    #[serde(default)]
    pub mark_success: bool,
}

/// Either one command or a sequential list of commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Single(String),
    Multiple(Vec<String>),
}

impl CommandSpec {
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            CommandSpec::Single(s) => vec![s.as_str()],
            CommandSpec::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    #[serde(default)]
    pub command: Option<CommandSpec>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, alias = "working_dir", alias = "workingDir")]
    pub dir: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default, alias = "retry_policy")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, alias = "repeat_policy")]
    pub repeat_policy: Option<RepeatPolicy>,
    #[serde(default, alias = "continue_on")]
    pub continue_on: Option<ContinueOn>,
    #[serde(default, alias = "timeout_sec")]
    pub timeout_sec: Option<u64>,
    #[serde(default, alias = "signal_on_stop")]
    pub signal_on_stop: Option<String>,
    /// Ordered map: route key (literal or `re:<pattern>`) -> target step names.
    #[serde(default)]
    pub routes: Vec<(String, Vec<String>)>,
    #[serde(default)]
    pub call: Option<CallSpec>,
    #[serde(default)]
    pub parallel: Option<ParallelSpec>,
    #[serde(default)]
    pub container: Option<serde_json::Value>,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_step_type() -> String {
    "command".to_string()
}

impl Step {
    /// Stable reference key for cross-step lookups: `id` if present, else `name`.
    pub fn ref_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn is_router(&self) -> bool {
        self.step_type == "router"
    }

    pub fn is_hitl(&self) -> bool {
        self.step_type == "hitl"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    pub dag: String,
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSpec {
    /// Either a literal list or a `${VAR}` reference to an upstream list output.
    pub items: serde_json::Value,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_max_concurrent() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Node (runtime state of a step within a run)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Skipped,
    PartiallySucceeded,
    /// hitl-only: yielded to an external resume/abort.
    Waiting,
}

impl NodeStatus {
    /// True for the five statuses the spec calls `TerminalSet`. `Waiting` is
    /// deliberately excluded: a hitl node parked in `Waiting` hasn't had the
    /// last word yet (resume/abort still pending), so its dependents stay
    /// `NotStarted` rather than being cascade-skipped, and the walker keeps
    /// dispatching unrelated ready branches around it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded
                | NodeStatus::Failed
                | NodeStatus::Aborted
                | NodeStatus::Skipped
                | NodeStatus::PartiallySucceeded
        )
    }
}

/// Tagged union for captured output variables: a plain string, or a value
/// that was successfully parsed as JSON (enabling `${VAR.field}` lookups).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Json(serde_json::Value),
    Text(String),
}

impl OutputValue {
    pub fn from_captured(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v) => OutputValue::Json(v),
            Err(_) => OutputValue::Text(raw.to_string()),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            OutputValue::Json(v) => v.to_string(),
            OutputValue::Text(s) => s.clone(),
        }
    }

    /// Resolve a dotted field path against a JSON value; `None` for `Text`.
    pub fn lookup(&self, path: &str) -> Option<String> {
        match self {
            OutputValue::Text(_) => None,
            OutputValue::Json(v) => {
                let mut cur = v;
                for part in path.split('.') {
                    cur = cur.get(part)?;
                }
                Some(match cur {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
        }
    }
}

/// Runtime state of a step within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub step: Step,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stdout_path: Option<String>,
    #[serde(default)]
    pub stderr_path: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub done_count: u32,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub output_variables: HashMap<String, OutputValue>,
    #[serde(default)]
    pub sub_runs: Vec<Uuid>,
    /// Populated only for `type: router` steps: the targets reached by the
    /// routes that matched. Drives the walker's router-gating rule.
    #[serde(default)]
    pub router_matched: Option<Vec<String>>,
}

impl Node {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            status: NodeStatus::NotStarted,
            started_at: None,
            finished_at: None,
            stdout_path: None,
            stderr_path: None,
            error: None,
            exit_code: None,
            retry_count: 0,
            done_count: 0,
            repeated: false,
            output_variables: HashMap::new(),
            sub_runs: Vec::new(),
            router_matched: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.step.name
    }

    /// Whether this node's outcome satisfies a downstream dependant without
    /// triggering the walker's cascade-skip rule: an outright success, or a
    /// failure/skip this node's own `continueOn` is declared to tolerate.
    pub fn unblocks_downstream(&self) -> bool {
        match self.status {
            NodeStatus::Succeeded | NodeStatus::PartiallySucceeded => true,
            NodeStatus::Aborted => false,
            NodeStatus::Failed => self
                .step
                .continue_on
                .as_ref()
                .is_some_and(|c| self.continue_on_admits_failure(c)),
            NodeStatus::Skipped => {
                self.step.continue_on.as_ref().is_some_and(|c| c.skipped)
            }
            NodeStatus::NotStarted | NodeStatus::Running | NodeStatus::Waiting => false,
        }
    }

    /// Whether this node's own `continueOn` tolerates the failure it just
    /// recorded (`self.status`/`self.exit_code`/`self.output_variables`).
    /// Called once those fields are populated, before the final status is
    /// committed.
    pub fn continue_on_admits_own_failure(&self) -> bool {
        self.step
            .continue_on
            .as_ref()
            .is_some_and(|c| self.continue_on_admits_failure(c))
    }

    fn continue_on_admits_failure(&self, c: &ContinueOn) -> bool {
        if c.failure {
            return true;
        }
        if let (Some(codes), Some(code)) = (&c.exit_code, self.exit_code) {
            if codes.contains(&code) {
                return true;
            }
        }
        if let (Some(patterns), Some(output_name)) = (&c.output, &self.step.output) {
            if let Some(value) = self.output_variables.get(output_name) {
                let text = value.as_text();
                if patterns.iter().any(|p| crate::templating::pattern_matches(p, &text)) {
                    return true;
                }
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// DagRunStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotStarted,
    Running,
    Waiting,
    Succeeded,
    Failed,
    Aborted,
    PartiallySucceeded,
}

/// One append-only snapshot of a run, as written to the status store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagRunStatus {
    pub dag_run_id: Uuid,
    pub dag_name: String,
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub params: HashMap<String, serde_json::Value>,
    pub nodes: Vec<Node>,
    pub on_init: Option<Node>,
    pub on_success: Option<Node>,
    pub on_failure: Option<Node>,
    pub on_wait: Option<Node>,
    pub on_cancel: Option<Node>,
    pub on_exit: Option<Node>,
    pub worker_id: Option<String>,
}

impl DagRunStatus {
    pub fn new(dag_run_id: Uuid, dag: &Dag, params: HashMap<String, serde_json::Value>) -> Self {
        Self {
            dag_run_id,
            dag_name: dag.name.clone(),
            status: Status::NotStarted,
            started_at: None,
            finished_at: None,
            params,
            nodes: dag.steps.iter().cloned().map(Node::new).collect(),
            on_init: None,
            on_success: None,
            on_failure: None,
            on_wait: None,
            on_cancel: None,
            on_exit: None,
            worker_id: None,
        }
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name() == name)
    }
}

pub const TERMINAL_SET: &[NodeStatus] = &[
    NodeStatus::Succeeded,
    NodeStatus::Failed,
    NodeStatus::Aborted,
    NodeStatus::Skipped,
    NodeStatus::PartiallySucceeded,
];

/// Materialize the dependency set of every step, synthesizing linear edges
/// in `chain` mode.
pub fn dependency_map(dag: &Dag) -> HashMap<String, HashSet<String>> {
    let mut deps: HashMap<String, HashSet<String>> = HashMap::new();
    match dag.dag_type {
        DagType::Graph => {
            for step in &dag.steps {
                deps.insert(step.name.clone(), step.depends.iter().cloned().collect());
            }
        }
        DagType::Chain => {
            let mut prev: Option<String> = None;
            for step in &dag.steps {
                let set = if !step.depends.is_empty() {
                    step.depends.iter().cloned().collect()
                } else if let Some(p) = &prev {
                    HashSet::from([p.clone()])
                } else {
                    HashSet::new()
                };
                deps.insert(step.name.clone(), set);
                prev = Some(step.name.clone());
            }
        }
    }
    deps
}
