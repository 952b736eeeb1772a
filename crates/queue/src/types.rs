//! The coordinator's worker/task/selector types (spec.md §4.6, §2).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use engine::Dag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One unit of dispatch: a fully-resolved DAG plus the run identity and
/// params it should be started with. Carrying the whole `Dag` (rather than
/// just its name) means a worker can start the run without re-resolving the
/// spec from wherever the dispatcher originally loaded it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub dag_run_id: Uuid,
    pub dag_name: String,
    pub dag: Dag,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub worker_selector: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

/// A worker's self-reported registration: its identity, the labels a
/// `workerSelector` is matched against, and the run ids it currently hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub running_tasks: Vec<Uuid>,
}

/// Exact key/value match for every entry in `selector` against `labels` — an
/// empty selector matches any worker.
pub fn selector_matches(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_any_worker() {
        assert!(selector_matches(&HashMap::new(), &HashMap::from([("zone".into(), "us".into())])));
    }

    #[test]
    fn selector_requires_every_entry_to_match() {
        let selector = HashMap::from([("zone".into(), "us".into()), ("gpu".into(), "true".into())]);
        let labels = HashMap::from([("zone".into(), "us".into())]);
        assert!(!selector_matches(&selector, &labels));

        let labels = HashMap::from([("zone".into(), "us".into()), ("gpu".into(), "true".into())]);
        assert!(selector_matches(&selector, &labels));
    }
}
