//! Layered environment construction.
//!
//! Built lazily, once per node attempt, by stacking (later overrides
//! earlier): process env, DAG env, step env, the special `DAG_*` variables,
//! then output variables from already-completed upstream nodes. Never
//! mutates a parent scope's map in place — each layer starts from a clone.

use std::collections::HashMap;

use crate::models::{Dag, EnvVar, Node, Step};

pub struct SpecialVars {
    pub dag_name: String,
    pub dag_run_id: String,
    pub dag_run_log_file: String,
    pub dag_run_step_name: Option<String>,
    pub dag_run_step_stdout_file: Option<String>,
    pub dag_run_step_stderr_file: Option<String>,
    pub dag_waiting_steps: Option<String>,
}

fn apply_vars(map: &mut HashMap<String, String>, vars: &[EnvVar]) {
    for v in vars {
        map.insert(v.key.clone(), v.value.clone());
    }
}

/// Build the environment a step (or handler) sees. `step` is `None` when
/// building for a handler whose synthetic step has no per-step env to layer.
pub fn build_env(
    dag: &Dag,
    step: Option<&Step>,
    special: &SpecialVars,
    completed: &[Node],
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    apply_vars(&mut env, &dag.env);
    apply_vars(&mut env, &dag.defaults.env);
    if let Some(step) = step {
        apply_vars(&mut env, &step.env);
    }

    env.insert("DAG_NAME".into(), special.dag_name.clone());
    env.insert("DAG_RUN_ID".into(), special.dag_run_id.clone());
    env.insert("DAG_RUN_LOG_FILE".into(), special.dag_run_log_file.clone());
    if let Some(name) = &special.dag_run_step_name {
        env.insert("DAG_RUN_STEP_NAME".into(), name.clone());
    }
    // Handlers deliberately do not see the per-step stdout/stderr file vars.
    if let Some(path) = &special.dag_run_step_stdout_file {
        env.insert("DAG_RUN_STEP_STDOUT_FILE".into(), path.clone());
    }
    if let Some(path) = &special.dag_run_step_stderr_file {
        env.insert("DAG_RUN_STEP_STDERR_FILE".into(), path.clone());
    }
    if let Some(steps) = &special.dag_waiting_steps {
        env.insert("DAG_WAITING_STEPS".into(), steps.clone());
    }

    for node in completed {
        for (name, value) in &node.output_variables {
            env.insert(name.clone(), value.as_text());
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DagType;

    fn empty_dag() -> Dag {
        Dag {
            name: "d".into(),
            id: uuid::Uuid::new_v4(),
            dag_type: DagType::Graph,
            params: Default::default(),
            env: vec![EnvVar { key: "DAG_LEVEL".into(), value: "1".into() }],
            preconditions: vec![],
            handler_on: Default::default(),
            defaults: Default::default(),
            max_active_runs: None,
            max_active_steps: None,
            worker_selector: Default::default(),
            steps: vec![],
        }
    }

    #[test]
    fn step_env_overrides_dag_env() {
        let dag = empty_dag();
        let step = Step {
            name: "s".into(),
            id: None,
            step_type: "command".into(),
            command: None,
            script: None,
            args: vec![],
            dir: None,
            shell: None,
            env: vec![EnvVar { key: "DAG_LEVEL".into(), value: "2".into() }],
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
        };
        let special = SpecialVars {
            dag_name: "d".into(),
            dag_run_id: "run-1".into(),
            dag_run_log_file: "/tmp/run.log".into(),
            dag_run_step_name: Some("s".into()),
            dag_run_step_stdout_file: Some("/tmp/s.stdout.log".into()),
            dag_run_step_stderr_file: Some("/tmp/s.stderr.log".into()),
            dag_waiting_steps: None,
        };
        let env = build_env(&dag, Some(&step), &special, &[]);
        assert_eq!(env.get("DAG_LEVEL"), Some(&"2".to_string()));
        assert_eq!(env.get("DAG_NAME"), Some(&"d".to_string()));
    }

    #[test]
    fn handlers_do_not_see_step_file_vars() {
        let dag = empty_dag();
        let special = SpecialVars {
            dag_name: "d".into(),
            dag_run_id: "run-1".into(),
            dag_run_log_file: "/tmp/run.log".into(),
            dag_run_step_name: None,
            dag_run_step_stdout_file: None,
            dag_run_step_stderr_file: None,
            dag_waiting_steps: None,
        };
        let env = build_env(&dag, None, &special, &[]);
        assert!(!env.contains_key("DAG_RUN_STEP_STDOUT_FILE"));
        assert!(!env.contains_key("DAG_RUN_STEP_STDERR_FILE"));
    }
}
