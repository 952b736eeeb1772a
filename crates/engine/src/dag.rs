//! DAG validation — run this before executing a workflow.
//!
//! Rules enforced:
//! 1. Step names must be unique within the workflow.
//! 2. Every `depends` entry must reference a step that exists.
//! 3. The dependency graph (after chain-mode synthesis) must be acyclic.
//! 4. A router's routes may each target a step that exists, and a step may
//!    be targeted by at most one route across all routers in the DAG.
//!
//! Returns a topologically-sorted list of step names on success.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{dependency_map, Dag};
use crate::EngineError;

pub fn validate_dag(dag: &Dag) -> Result<Vec<String>, EngineError> {
    // 1. Unique step names.
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &dag.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(EngineError::DuplicateStepName(step.name.clone()));
        }
    }
    let step_set: HashSet<&str> = dag.steps.iter().map(|s| s.name.as_str()).collect();

    // 2. Dependency endpoints exist (chain mode never references unknown
    //    steps since it synthesizes edges from declaration order, but an
    //    explicit `depends` inside a chain DAG is still checked).
    let deps = dependency_map(dag);
    for (step, ds) in &deps {
        for d in ds {
            if !step_set.contains(d.as_str()) {
                return Err(EngineError::UnknownDependency {
                    step: step.clone(),
                    dependency: d.clone(),
                });
            }
        }
    }

    // 3. Router target validation: every target must exist, and no step may
    //    be targeted by more than one route across the whole DAG.
    let mut targeted_by: HashMap<&str, &str> = HashMap::new();
    for step in &dag.steps {
        if !step.is_router() {
            continue;
        }
        for (_, targets) in &step.routes {
            for target in targets {
                if !step_set.contains(target.as_str()) {
                    return Err(EngineError::UnknownRouteTarget {
                        step: step.name.clone(),
                        target: target.clone(),
                    });
                }
                if let Some(_existing) = targeted_by.insert(target.as_str(), step.name.as_str()) {
                    return Err(EngineError::DuplicateRouteTarget {
                        step: target.clone(),
                    });
                }
            }
        }
    }

    // 4. Topological sort (Kahn's algorithm) over the materialized deps.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for step in &dag.steps {
        adjacency.entry(step.name.as_str()).or_default();
        in_degree.entry(step.name.as_str()).or_insert(0);
    }
    for (step, ds) in &deps {
        for d in ds {
            adjacency.entry(d.as_str()).or_default().push(step.as_str());
            *in_degree.entry(step.as_str()).or_insert(0) += 1;
        }
    }

    // Seed with zero-in-degree nodes, in declaration order (tie-break rule).
    let mut queue: VecDeque<&str> = dag
        .steps
        .iter()
        .map(|s| s.name.as_str())
        .filter(|n| in_degree.get(n).copied().unwrap_or(0) == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(dag.steps.len());
    while let Some(name) = queue.pop_front() {
        sorted.push(name.to_owned());
        if let Some(neighbours) = adjacency.get(name) {
            for &next in neighbours {
                let deg = in_degree.entry(next).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if sorted.len() != dag.steps.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DagType, Step};

    fn make_step(name: &str, depends: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            id: None,
            step_type: "command".into(),
            command: None,
            script: None,
            args: vec![],
            dir: None,
            shell: None,
            env: vec![],
            output: None,
            stdout: None,
            stderr: None,
            depends: depends.iter().map(|s| s.to_string()).collect(),
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

    fn make_dag(steps: Vec<Step>) -> Dag {
        Dag {
            name: "test".into(),
            id: uuid::Uuid::new_v4(),
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

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        let dag = make_dag(vec![
            make_step("a", &[]),
            make_step("b", &["a"]),
            make_step("c", &["b"]),
        ]);
        let sorted = validate_dag(&dag).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        let dag = make_dag(vec![
            make_step("a", &[]),
            make_step("b", &["a"]),
            make_step("c", &["a"]),
            make_step("d", &["b", "c"]),
        ]);
        let sorted = validate_dag(&dag).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let dag = make_dag(vec![make_step("a", &[]), make_step("a", &[])]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::DuplicateStepName(name)) if name == "a"
        ));
    }

    #[test]
    fn dependency_on_missing_step_is_rejected() {
        let dag = make_dag(vec![make_step("a", &["ghost"])]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::UnknownDependency { dependency, .. }) if dependency == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let mut dag = make_dag(vec![
            make_step("a", &[]),
            make_step("b", &["a"]),
            make_step("c", &["b"]),
        ]);
        dag.steps[0].depends.push("c".to_string());
        assert!(matches!(validate_dag(&dag), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn chain_mode_synthesizes_linear_edges() {
        let mut dag = make_dag(vec![
            make_step("a", &[]),
            make_step("b", &[]),
            make_step("c", &[]),
        ]);
        dag.dag_type = DagType::Chain;
        let sorted = validate_dag(&dag).expect("chain should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_route_target_is_rejected() {
        let mut router = make_step("r", &[]);
        router.step_type = "router".into();
        router.routes = vec![
            ("full".into(), vec!["x".into(), "y".into()]),
            ("minimal".into(), vec!["x".into()]),
        ];
        let dag = make_dag(vec![router, make_step("x", &[]), make_step("y", &[])]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::DuplicateRouteTarget { step }) if step == "x"
        ));
    }

    #[test]
    fn single_step_no_deps_is_valid() {
        let dag = make_dag(vec![make_step("solo", &[])]);
        let sorted = validate_dag(&dag).expect("single step should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }
}
