//! Per-step state machine: preconditions, template expansion, the
//! retry/repeat attempt loop, continueOn, output capture, and router
//! matching. Owns exactly one [`crate::models::Node`] for the duration of
//! `execute`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nodes::{DagRunner, ExecutionContext as PluginContext, NodeError, NodeIo, NodeRegistry, StepRequest};
use tokio::fs::File;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::env::{build_env, SpecialVars};
use crate::models::{Dag, Node, NodeStatus, OutputValue, RepeatMode, RepeatPolicy, RetryPolicy};
use crate::templating::{expand, pattern_matches, TemplateContext};

/// Everything the node executor needs that isn't carried by the `Node`
/// itself: identity of the run, where to put log files, the plugin
/// registry, and the cancellation token for the whole run.
pub struct NodeExecutorCtx<'a> {
    pub dag: &'a Dag,
    pub dag_run_id: uuid::Uuid,
    pub dag_run_log_file: String,
    pub log_dir: PathBuf,
    pub registry: &'a NodeRegistry,
    pub cancel: CancellationToken,
    pub sub_runner: Arc<dyn DagRunner>,
    /// `None` when executing a handler (init/success/failure/wait/cancel/exit).
    pub waiting_steps: Option<String>,
}

const DEFAULT_SIGNAL: &str = "SIGTERM";

/// Outcome of one attempt (one pass through the inner retry loop body).
struct AttemptOutcome {
    exit_code: Option<i32>,
    error: Option<String>,
    stdout_path: String,
    stderr_path: String,
    cancelled: bool,
}

/// Run `node` to a terminal status, mutating it in place. `completed` is
/// every other node that has already reached a terminal state in this run
/// (used for env layering and step-ref templating).
#[instrument(skip_all, fields(step = %node.name()))]
pub async fn execute(node: &mut Node, completed: &[Node], ctx: &NodeExecutorCtx<'_>) {
    if ctx.cancel.is_cancelled() {
        node.status = NodeStatus::Aborted;
        node.error = Some("cancelled before start".into());
        return;
    }

    let special = SpecialVars {
        dag_name: ctx.dag.name.clone(),
        dag_run_id: ctx.dag_run_id.to_string(),
        dag_run_log_file: ctx.dag_run_log_file.clone(),
        dag_run_step_name: Some(node.step.name.clone()),
        dag_run_step_stdout_file: Some(stdout_path(ctx, node.step.name.as_str())),
        dag_run_step_stderr_file: Some(stderr_path(ctx, node.step.name.as_str())),
        dag_waiting_steps: ctx.waiting_steps.clone(),
    };
    let env = build_env(ctx.dag, Some(&node.step), &special, completed);
    let tctx = TemplateContext::new(&env, completed);

    if node.step.continue_on.is_none() {
        node.step.continue_on = ctx.dag.defaults.continue_on.clone();
    }

    let preconditions: Vec<_> =
        ctx.dag.preconditions.iter().chain(node.step.preconditions.iter()).collect();
    for pre in preconditions {
        if !eval_precondition(pre, &env, &tctx).await {
            node.status = NodeStatus::Skipped;
            node.error = Some(format!("precondition not satisfied: {}", pre.condition));
            return;
        }
    }

    if node.step.is_hitl() {
        node.status = NodeStatus::Waiting;
        node.started_at = Some(Utc::now());
        return;
    }

    node.started_at = Some(Utc::now());

    let dir = node.step.dir.as_ref().map(|d| expand(d, &tctx));
    let shell = node
        .step
        .shell
        .clone()
        .or_else(|| ctx.dag.defaults.shell.clone());
    let commands: Vec<String> = match &node.step.command {
        Some(spec) => spec.as_list().into_iter().map(|c| expand(c, &tctx)).collect(),
        None => vec![],
    };
    let script = node.step.script.as_ref().map(|s| expand(s, &tctx));
    let config = build_plugin_config(&node.step, &ctx.dag.defaults, &tctx);
    let req = StepRequest { commands, script, shell, config };

    let registry_key = node.step.step_type.as_str();
    let Some(plugin) = ctx.registry.get(registry_key).cloned() else {
        node.status = NodeStatus::Failed;
        node.error = Some(format!("no executor registered for step type '{registry_key}'"));
        node.finished_at = Some(Utc::now());
        return;
    };

    let retry_policy = node.step.retry_policy.clone().or_else(|| ctx.dag.defaults.retry_policy.clone());
    let repeat_policy = node.step.repeat_policy.clone();

    let mut done_count = 0u32;
    let outcome = loop {
        let (outcome, retry_count) =
            run_with_retries(plugin.as_ref(), ctx, &env, dir.as_deref(), &node.step, &req, &retry_policy).await;
        node.retry_count = retry_count;
        done_count += 1;
        node.done_count = done_count;

        if outcome.cancelled {
            break outcome;
        }

        if should_repeat(&repeat_policy, outcome.exit_code, done_count, &env, &tctx).await {
            node.repeated = true;
            let interval = repeat_policy.as_ref().map(|r| r.interval_sec).unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(interval)).await;
            continue;
        }
        break outcome;
    };

    node.finished_at = Some(Utc::now());
    node.stdout_path = Some(outcome.stdout_path.clone());
    node.stderr_path = Some(outcome.stderr_path.clone());
    node.exit_code = outcome.exit_code;
    node.error = outcome.error.clone();

    if outcome.cancelled {
        node.status = NodeStatus::Aborted;
        return;
    }

    finalize_status(node, &outcome.stdout_path).await;
}

/// Run one repeat-iteration's worth of attempts: retry on failure per
/// `retry_policy` until it succeeds, exhausts its limit, or the run is
/// cancelled.
async fn run_with_retries(
    plugin: &dyn nodes::ExecutableNode,
    ctx: &NodeExecutorCtx<'_>,
    env: &std::collections::HashMap<String, String>,
    dir: Option<&str>,
    step: &crate::models::Step,
    req: &StepRequest,
    retry_policy: &Option<RetryPolicy>,
) -> (AttemptOutcome, u32) {
    let mut retry_count = 0u32;
    loop {
        if ctx.cancel.is_cancelled() {
            return (
                AttemptOutcome {
                    exit_code: None,
                    error: Some("cancelled".into()),
                    stdout_path: stdout_path(ctx, &step.name),
                    stderr_path: stderr_path(ctx, &step.name),
                    cancelled: true,
                },
                retry_count,
            );
        }

        let stdout_p = stdout_path(ctx, &step.name);
        let stderr_p = stderr_path(ctx, &step.name);
        let result = run_attempt(
            plugin,
            ctx,
            env,
            dir,
            &step.name,
            step.timeout_sec,
            step.signal_on_stop.as_deref().unwrap_or(DEFAULT_SIGNAL),
            req,
            &stdout_p,
            &stderr_p,
        )
        .await;

        let outcome = match result {
            Ok(code) => AttemptOutcome {
                exit_code: Some(code),
                error: None,
                stdout_path: stdout_p,
                stderr_path: stderr_p,
                cancelled: false,
            },
            Err(NodeError::Cancelled) => AttemptOutcome {
                exit_code: None,
                error: Some("cancelled".into()),
                stdout_path: stdout_p,
                stderr_path: stderr_p,
                cancelled: true,
            },
            Err(NodeError::Timeout) => AttemptOutcome {
                exit_code: None,
                error: Some("step timed out".into()),
                stdout_path: stdout_p,
                stderr_path: stderr_p,
                cancelled: false,
            },
            Err(e) => AttemptOutcome {
                exit_code: None,
                error: Some(e.to_string()),
                stdout_path: stdout_p,
                stderr_path: stderr_p,
                cancelled: false,
            },
        };

        if outcome.cancelled || outcome.exit_code == Some(0) {
            return (outcome, retry_count);
        }
        if retry_eligible(retry_policy, retry_count, outcome.exit_code) {
            retry_count += 1;
            warn!(attempt = retry_count, step = %step.name, "step attempt failed, retrying");
            let interval = retry_policy.as_ref().map(|r| r.interval_sec).unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(interval)).await;
            continue;
        }
        return (outcome, retry_count);
    }
}

/// Decide the terminal `NodeStatus` from the last attempt's outcome,
/// applying router capture, output capture, and `continueOn`/`markSuccess`.
/// Assumes `node.exit_code` / `node.error` are already populated.
async fn finalize_status(node: &mut Node, stdout_path: &str) {
    let raw_stdout = tokio::fs::read_to_string(stdout_path).await.unwrap_or_default();
    let trimmed = raw_stdout.trim_end().to_string();

    if node.step.is_router() {
        if let Ok(targets) = serde_json::from_str::<Vec<String>>(&trimmed) {
            node.router_matched = Some(targets);
        }
    }

    if let Some(name) = &node.step.output {
        node.output_variables.insert(name.clone(), OutputValue::from_captured(&trimmed));
    }

    if node.step.step_type == "parallel" {
        node.status = match node.exit_code {
            Some(0) => NodeStatus::Succeeded,
            Some(c) if c == nodes::plugins::parallel::PARTIAL_EXIT_CODE => NodeStatus::PartiallySucceeded,
            _ => NodeStatus::Failed,
        };
        return;
    }

    match node.exit_code {
        Some(0) => node.status = NodeStatus::Succeeded,
        _ => {
            node.status = NodeStatus::Failed;
            if node.continue_on_admits_own_failure() {
                let mark_success =
                    node.step.continue_on.as_ref().map(|c| c.mark_success).unwrap_or(false);
                if mark_success {
                    node.status = NodeStatus::Succeeded;
                }
            }
        }
    }
}

/// Resolve a precondition/repeat `condition` to its actual value: the value
/// of an env variable named `condition`, or (if no such variable exists)
/// the trimmed stdout of running `condition` as a shell expression.
async fn resolve_condition(
    condition: &str,
    env: &std::collections::HashMap<String, String>,
    tctx: &TemplateContext<'_>,
) -> String {
    let condition = expand(condition, tctx);
    if let Some(value) = env.get(&condition) {
        return value.clone();
    }
    match Command::new("sh").arg("-c").arg(&condition).stdout(Stdio::piped()).output().await {
        Ok(out) => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        Err(_) => String::new(),
    }
}

pub(crate) async fn eval_precondition(
    pre: &crate::models::Precondition,
    env: &std::collections::HashMap<String, String>,
    tctx: &TemplateContext<'_>,
) -> bool {
    let actual = resolve_condition(&pre.condition, env, tctx).await;
    let expected = pre.expected.as_deref().map(|e| expand(e, tctx));

    let matched = match &expected {
        Some(e) => pattern_matches(e, &actual),
        None => !actual.is_empty(),
    };
    if pre.negate {
        !matched
    } else {
        matched
    }
}

fn retry_eligible(policy: &Option<RetryPolicy>, retry_count: u32, exit_code: Option<i32>) -> bool {
    let Some(policy) = policy else { return false };
    if retry_count >= policy.limit {
        return false;
    }
    match (&policy.exit_code, exit_code) {
        (Some(codes), Some(code)) => codes.contains(&code),
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// Evaluate the repeat policy; `done_count` already reflects the attempt
/// that just finished, and is the hard cap enforced against `limit`.
async fn should_repeat(
    policy: &Option<RepeatPolicy>,
    exit_code: Option<i32>,
    done_count: u32,
    env: &std::collections::HashMap<String, String>,
    tctx: &TemplateContext<'_>,
) -> bool {
    let Some(policy) = policy else { return false };
    if let Some(limit) = policy.limit {
        if done_count >= limit {
            return false;
        }
    }

    let succeeded = exit_code == Some(0);
    match &policy.repeat {
        RepeatMode::Bool(true) => succeeded,
        RepeatMode::Bool(false) => {
            // Backward-compat: a bare `exitCode` with no `repeat` keyword
            // infers "while" on exit-code match.
            matches!((&policy.exit_code, exit_code), (Some(codes), Some(code)) if codes.contains(&code))
        }
        RepeatMode::Mode(mode) => match mode.as_str() {
            "while" => match (&policy.condition, &policy.expected) {
                (Some(cond), Some(expected)) => {
                    let actual = resolve_condition(cond, env, tctx).await;
                    pattern_matches(expected, &actual)
                }
                _ => succeeded,
            },
            "until" => match (&policy.condition, &policy.expected, &policy.exit_code) {
                (Some(cond), Some(expected), _) => {
                    let actual = resolve_condition(cond, env, tctx).await;
                    !pattern_matches(expected, &actual)
                }
                (_, _, Some(codes)) => exit_code.map(|c| !codes.contains(&c)).unwrap_or(true),
                _ => !succeeded,
            },
            _ => false,
        },
    }
}

fn expand_config(config: &serde_json::Value, tctx: &TemplateContext) -> serde_json::Value {
    match config {
        serde_json::Value::String(s) => serde_json::Value::String(expand(s, tctx)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| expand_config(v, tctx)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), expand_config(v, tctx))).collect(),
        ),
        other => other.clone(),
    }
}

/// Build the JSON object handed to the executor plugin as `req.config`:
/// the generic `config:` bucket (expanded), overlaid on a `defaults.ssh`
/// base for `ssh`/`sftp` steps, then merged with whichever dedicated Step
/// field this step's type actually carries (`routes` for `router`, `call`
/// for `subdag`/`call`, `call`+`parallel` for `parallel`, `container`
/// falling back to `defaults.container`) — each plugin's own `Deserialize`
/// struct (`RouterConfig`, `CallConfig`, `ParallelConfig`, `ContainerSpec`,
/// `SshConfig`/`SftpConfig`) expects these fields at the top level, not
/// nested under a dedicated key, so a step written exactly as spec.md §6
/// documents it (`routes:`, `call: {...}`, `parallel: {...}`, `container:
/// {...}`) resolves to a config the plugin can actually deserialize.
fn build_plugin_config(
    step: &crate::models::Step,
    defaults: &crate::models::StepDefaults,
    tctx: &TemplateContext,
) -> serde_json::Value {
    let mut map = match step.step_type.as_str() {
        "ssh" | "sftp" => match &defaults.ssh {
            Some(serde_json::Value::Object(m)) => m.clone(),
            _ => serde_json::Map::new(),
        },
        _ => serde_json::Map::new(),
    };

    if let serde_json::Value::Object(step_cfg) = expand_config(&step.config, tctx) {
        map.extend(step_cfg);
    }

    match step.step_type.as_str() {
        "router" => {
            if !step.routes.is_empty() {
                map.insert("routes".into(), serde_json::to_value(&step.routes).unwrap_or_default());
            }
        }
        "subdag" | "call" => {
            if let Some(call) = &step.call {
                map.insert("dag".into(), serde_json::Value::String(expand(&call.dag, tctx)));
                map.insert("params".into(), parse_call_params(&expand(&call.params, tctx)));
            }
        }
        "parallel" => {
            if let Some(parallel) = &step.parallel {
                map.insert("items".into(), expand_config(&parallel.items, tctx));
                map.insert("max_concurrent".into(), serde_json::Value::from(parallel.max_concurrent));
            }
            if let Some(call) = &step.call {
                map.insert("dag".into(), serde_json::Value::String(expand(&call.dag, tctx)));
            }
        }
        "container" => {
            let container = step.container.clone().or_else(|| defaults.container.clone());
            if let Some(serde_json::Value::Object(cm)) = container.map(|c| expand_config(&c, tctx)) {
                map.extend(cm);
            }
        }
        _ => {}
    }

    serde_json::Value::Object(map)
}

/// Parse a `call.params` string (`"KEY=VALUE"`, optionally several
/// separated by commas or whitespace, e.g. `"A=1 B=2"`) into a JSON
/// object, using the same "JSON value if it parses, else plain string"
/// convention the CLI's `--param` flag uses.
fn parse_call_params(raw: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for pair in raw.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()) {
        if let Some((k, v)) = pair.split_once('=') {
            let value = serde_json::from_str(v).unwrap_or_else(|_| serde_json::Value::String(v.to_string()));
            map.insert(k.to_string(), value);
        }
    }
    serde_json::Value::Object(map)
}

fn stdout_path(ctx: &NodeExecutorCtx, step_name: &str) -> String {
    ctx.log_dir.join(format!("{step_name}.stdout.log")).to_string_lossy().into_owned()
}

fn stderr_path(ctx: &NodeExecutorCtx, step_name: &str) -> String {
    ctx.log_dir.join(format!("{step_name}.stderr.log")).to_string_lossy().into_owned()
}

#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    plugin: &dyn nodes::ExecutableNode,
    ctx: &NodeExecutorCtx<'_>,
    env: &std::collections::HashMap<String, String>,
    dir: Option<&str>,
    step_name: &str,
    timeout_sec: Option<u64>,
    signal_on_stop: &str,
    req: &StepRequest,
    stdout_path: &str,
    stderr_path: &str,
) -> Result<i32, NodeError> {
    let stdout = File::create(stdout_path).await.map_err(|e| NodeError::Execution(e.to_string()))?;
    let stderr = File::create(stderr_path).await.map_err(|e| NodeError::Execution(e.to_string()))?;
    let mut io = NodeIo { stdout, stderr };

    let attempt_cancel = ctx.cancel.child_token();
    let plugin_ctx = PluginContext {
        dag_name: ctx.dag.name.clone(),
        dag_run_id: ctx.dag_run_id,
        step_name: step_name.to_string(),
        env: env.clone(),
        dir: dir.map(|d| d.to_string()),
        cancel: attempt_cancel.clone(),
        signal_on_stop: signal_on_stop.to_string(),
        sub_runner: ctx.sub_runner.clone(),
    };

    let mut timed_out = false;
    let timeout_guard = timeout_sec.map(|secs| {
        let token = attempt_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            token.cancel();
        })
    });

    let result = tokio::select! {
        res = plugin.run(&plugin_ctx, req, &mut io) => res,
        _ = ctx.cancel.cancelled() => Err(NodeError::Cancelled),
    };

    if let Some(guard) = timeout_guard {
        if guard.is_finished() && !ctx.cancel.is_cancelled() && result.is_err() {
            timed_out = true;
        }
        guard.abort();
    }

    if timed_out {
        Err(NodeError::Timeout)
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use nodes::default_registry;
    use uuid::Uuid;

    use super::*;
    use crate::models::{CallSpec, CommandSpec, Dag, DagType, ParallelSpec, Step, StepDefaults};

    struct RecordingSubRunner {
        calls: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingSubRunner {
        fn new() -> Self {
            Self { calls: std::sync::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl DagRunner for RecordingSubRunner {
        async fn run_sub_dag(
            &self,
            dag_name: &str,
            params: serde_json::Value,
            _worker_selector: &HashMap<String, String>,
        ) -> Result<serde_json::Value, NodeError> {
            self.calls.lock().unwrap().push((dag_name.to_string(), params));
            Ok(serde_json::json!({ "outputs": { "OUTPUT": "ok" } }))
        }
    }

    fn bare_step(name: &str, step_type: &str) -> Step {
        Step {
            name: name.into(),
            id: None,
            step_type: step_type.into(),
            command: None,
            script: None,
            args: vec![],
            dir: None,
            shell: None,
            env: vec![],
            output: None,
            stdout: None,
            stderr: None,
            depends: vec![],
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

    fn bare_dag(steps: Vec<Step>) -> Dag {
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

    fn ctx<'a>(
        dag: &'a Dag,
        registry: &'a NodeRegistry,
        sub_runner: Arc<dyn DagRunner>,
        tmp: &std::path::Path,
    ) -> NodeExecutorCtx<'a> {
        NodeExecutorCtx {
            dag,
            dag_run_id: Uuid::new_v4(),
            dag_run_log_file: tmp.join("run.log").to_string_lossy().into_owned(),
            log_dir: tmp.to_path_buf(),
            registry,
            cancel: CancellationToken::new(),
            sub_runner,
            waiting_steps: None,
        }
    }

    #[tokio::test]
    async fn router_step_resolves_routes_and_value_from_dedicated_fields() {
        let mut step = bare_step("route", "router");
        step.routes = vec![
            ("re:^apple.*".to_string(), vec!["a".to_string()]),
            ("re:^banana.*".to_string(), vec!["b".to_string()]),
        ];
        step.config = serde_json::json!({ "value": "apple_pie" });
        let dag = bare_dag(vec![step.clone()]);
        let registry = default_registry();
        let tmp = tempfile::tempdir().unwrap();
        let exec_ctx = ctx(&dag, &registry, Arc::new(RecordingSubRunner::new()), tmp.path());

        let mut node = Node::new(step);
        execute(&mut node, &[], &exec_ctx).await;

        assert_eq!(node.status, NodeStatus::Succeeded);
        assert_eq!(node.router_matched, Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn call_step_resolves_dag_and_params_from_dedicated_fields() {
        let mut step = bare_step("invoke", "call");
        step.call = Some(CallSpec { dag: "child".into(), params: "PARAM=123".into() });
        step.output = Some("CALL".into());
        let dag = bare_dag(vec![step.clone()]);
        let registry = default_registry();
        let tmp = tempfile::tempdir().unwrap();
        let sub_runner = Arc::new(RecordingSubRunner::new());
        let exec_ctx = ctx(&dag, &registry, sub_runner.clone(), tmp.path());

        let mut node = Node::new(step);
        execute(&mut node, &[], &exec_ctx).await;

        assert_eq!(node.status, NodeStatus::Succeeded);
        let calls = sub_runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "child");
        assert_eq!(calls[0].1, serde_json::json!({ "PARAM": 123 }));
    }

    #[tokio::test]
    async fn parallel_step_resolves_dag_from_call_and_items_from_parallel() {
        let mut step = bare_step("fanout", "parallel");
        step.call = Some(CallSpec { dag: "child".into(), params: String::new() });
        step.parallel = Some(ParallelSpec {
            items: serde_json::json!([1, 2, 3]),
            max_concurrent: 2,
        });
        let dag = bare_dag(vec![step.clone()]);
        let registry = default_registry();
        let tmp = tempfile::tempdir().unwrap();
        let sub_runner = Arc::new(RecordingSubRunner::new());
        let exec_ctx = ctx(&dag, &registry, sub_runner.clone(), tmp.path());

        let mut node = Node::new(step);
        execute(&mut node, &[], &exec_ctx).await;

        assert_eq!(node.status, NodeStatus::Succeeded);
        let calls = sub_runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(name, _)| name == "child"));
    }

    #[test]
    fn build_plugin_config_merges_container_step_field_over_defaults() {
        let mut defaults = StepDefaults::default();
        defaults.container = Some(serde_json::json!({ "image": "default:latest", "mode": "ephemeral" }));
        let mut step = bare_step("c", "container");
        step.container = Some(serde_json::json!({ "image": "override:latest" }));
        let env = HashMap::new();
        let tctx = TemplateContext::new(&env, &[]);

        let config = build_plugin_config(&step, &defaults, &tctx);
        assert_eq!(config["image"], serde_json::json!("override:latest"));
    }

    #[test]
    fn build_plugin_config_falls_back_to_default_container_when_step_has_none() {
        let mut defaults = StepDefaults::default();
        defaults.container = Some(serde_json::json!({ "image": "default:latest" }));
        let step = bare_step("c", "container");
        let env = HashMap::new();
        let tctx = TemplateContext::new(&env, &[]);

        let config = build_plugin_config(&step, &defaults, &tctx);
        assert_eq!(config["image"], serde_json::json!("default:latest"));
    }

    #[test]
    fn build_plugin_config_applies_ssh_defaults_under_step_config() {
        let mut defaults = StepDefaults::default();
        defaults.ssh = Some(serde_json::json!({ "host": "default-host", "user": "default-user" }));
        let mut step = bare_step("s", "ssh");
        step.config = serde_json::json!({ "user": "override-user" });
        let env = HashMap::new();
        let tctx = TemplateContext::new(&env, &[]);

        let config = build_plugin_config(&step, &defaults, &tctx);
        assert_eq!(config["host"], serde_json::json!("default-host"));
        assert_eq!(config["user"], serde_json::json!("override-user"));
    }

    #[tokio::test]
    async fn dag_level_continue_on_default_applies_when_step_has_none() {
        let mut step = bare_step("fails", "command");
        step.command = Some(CommandSpec::Single("false".into()));
        let mut dag = bare_dag(vec![step.clone()]);
        dag.defaults = StepDefaults {
            continue_on: Some(crate::models::ContinueOn {
                failure: true,
                exit_code: None,
                output: None,
                skipped: false,
                mark_success: true,
            }),
            ..Default::default()
        };
        let registry = default_registry();
        let tmp = tempfile::tempdir().unwrap();
        let exec_ctx = ctx(&dag, &registry, Arc::new(RecordingSubRunner::new()), tmp.path());

        let mut node = Node::new(step);
        execute(&mut node, &[], &exec_ctx).await;

        assert_eq!(node.status, NodeStatus::Succeeded);
    }
}
