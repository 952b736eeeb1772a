//! Conversions between `queue::Task` and the wire `pb::Task`, shared by the
//! server and client so they can't drift apart.

use chrono::{DateTime, Utc};

use crate::pb;
use crate::CoordinatorError;

pub(crate) fn to_pb(task: &queue::Task) -> Result<pb::Task, CoordinatorError> {
    Ok(pb::Task {
        dag_run_id: task.dag_run_id.to_string(),
        dag_name: task.dag_name.clone(),
        dag_json: serde_json::to_string(&task.dag)?,
        params_json: serde_json::to_string(&task.params)?,
        worker_selector: task.worker_selector.clone(),
        enqueued_at_unix_ms: task.enqueued_at.timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use engine::{Dag, DagType};
    use uuid::Uuid;

    use super::*;

    fn dag() -> Dag {
        Dag {
            name: "d".into(),
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
            steps: vec![],
        }
    }

    #[test]
    fn task_round_trips_through_pb() {
        let task = queue::Task {
            dag_run_id: Uuid::new_v4(),
            dag_name: "d".into(),
            dag: dag(),
            params: HashMap::new(),
            worker_selector: HashMap::from([("zone".into(), "us".into())]),
            enqueued_at: Utc::now(),
        };
        let pb_task = to_pb(&task).unwrap();
        let back = from_pb(pb_task).unwrap();
        assert_eq!(back.dag_run_id, task.dag_run_id);
        assert_eq!(back.dag_name, task.dag_name);
        assert_eq!(back.worker_selector, task.worker_selector);
    }
}

pub(crate) fn from_pb(task: pb::Task) -> Result<queue::Task, CoordinatorError> {
    let enqueued_at: DateTime<Utc> = DateTime::from_timestamp_millis(task.enqueued_at_unix_ms).unwrap_or_else(Utc::now);
    Ok(queue::Task {
        dag_run_id: task.dag_run_id.parse()?,
        dag_name: task.dag_name,
        dag: serde_json::from_str(&task.dag_json)?,
        params: serde_json::from_str(&task.params_json)?,
        worker_selector: task.worker_selector,
        enqueued_at,
    })
}
