//! In-memory worker bookkeeping backing the `Coordinator` service: who's
//! registered, what each worker is currently running, and which runs still
//! owe a `Stop` to a worker that isn't reachable by socket path directly.
//!
//! The queue itself (what's pending, label-matched dispatch) lives in
//! `queue::QueueStore` on disk; this registry only tracks the live
//! worker/assignment state a single coordinator process holds in memory,
//! same split as the grounding workspace kept its in-memory job table
//! separate from the durable `db` rows.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct WorkerEntry {
    pub labels: HashMap<String, String>,
    pub running_tasks: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub worker_id: String,
    pub sock_path: String,
}

#[derive(Default)]
pub struct Registry {
    workers: Mutex<HashMap<String, WorkerEntry>>,
    assignments: Mutex<HashMap<Uuid, Assignment>>,
    pending_stops: Mutex<HashMap<String, Vec<Uuid>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_worker(&self, worker_id: &str, labels: &HashMap<String, String>) {
        let mut workers = self.workers.lock().unwrap();
        let entry = workers.entry(worker_id.to_string()).or_default();
        entry.labels = labels.clone();
    }

    pub fn ack(&self, worker_id: &str, dag_run_id: Uuid, sock_path: String) {
        {
            let mut workers = self.workers.lock().unwrap();
            let entry = workers.entry(worker_id.to_string()).or_default();
            if !entry.running_tasks.contains(&dag_run_id) {
                entry.running_tasks.push(dag_run_id);
            }
        }
        self.assignments.lock().unwrap().insert(dag_run_id, Assignment { worker_id: worker_id.to_string(), sock_path });
    }

    pub fn assignment(&self, dag_run_id: Uuid) -> Option<Assignment> {
        self.assignments.lock().unwrap().get(&dag_run_id).cloned()
    }

    pub fn queue_pending_stop(&self, worker_id: &str, dag_run_id: Uuid) {
        self.pending_stops.lock().unwrap().entry(worker_id.to_string()).or_default().push(dag_run_id);
    }

    pub fn pending_stops(&self, worker_id: &str) -> Vec<Uuid> {
        self.pending_stops.lock().unwrap().get(worker_id).cloned().unwrap_or_default()
    }

    pub fn ack_stop(&self, worker_id: &str, dag_run_id: Uuid) {
        if let Some(list) = self.pending_stops.lock().unwrap().get_mut(worker_id) {
            list.retain(|id| *id != dag_run_id);
        }
        self.assignments.lock().unwrap().remove(&dag_run_id);
        if let Some(entry) = self.workers.lock().unwrap().get_mut(worker_id) {
            entry.running_tasks.retain(|id| *id != dag_run_id);
        }
    }

    pub fn workers(&self) -> Vec<(String, WorkerEntry)> {
        self.workers.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_then_stop_finds_the_assignment() {
        let registry = Registry::new();
        let run_id = Uuid::new_v4();
        registry.ack("w1", run_id, "/tmp/run.sock".into());
        let assignment = registry.assignment(run_id).unwrap();
        assert_eq!(assignment.worker_id, "w1");
        assert_eq!(assignment.sock_path, "/tmp/run.sock");
    }

    #[test]
    fn pending_stop_drains_on_ack_stop() {
        let registry = Registry::new();
        let run_id = Uuid::new_v4();
        registry.queue_pending_stop("w1", run_id);
        assert_eq!(registry.pending_stops("w1"), vec![run_id]);
        registry.ack_stop("w1", run_id);
        assert!(registry.pending_stops("w1").is_empty());
    }

    #[test]
    fn ack_does_not_duplicate_running_tasks_on_reassignment() {
        let registry = Registry::new();
        let run_id = Uuid::new_v4();
        registry.ack("w1", run_id, "/tmp/a.sock".into());
        registry.ack("w1", run_id, "/tmp/a.sock".into());
        let (_, entry) = registry.workers().into_iter().find(|(id, _)| id == "w1").unwrap();
        assert_eq!(entry.running_tasks.len(), 1);
    }
}
