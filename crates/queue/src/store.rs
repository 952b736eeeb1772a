//! Filesystem-backed FIFO queue: brokerless, one file per pending task at
//! `<queue-dir>/<dag-name>/<dagRunId>.json`, deduplicated by run id — a
//! second `enqueue` of the same `dagRunId` while the first is still pending
//! is a no-op rather than a duplicate dispatch.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::types::{selector_matches, Task};
use crate::QueueError;

#[derive(Debug, Clone)]
pub struct QueueStore {
    queue_dir: PathBuf,
}

impl QueueStore {
    pub fn new(queue_dir: impl Into<PathBuf>) -> Self {
        Self { queue_dir: queue_dir.into() }
    }

    fn task_path(&self, dag_name: &str, dag_run_id: Uuid) -> PathBuf {
        self.queue_dir.join(dag_name).join(format!("{dag_run_id}.json"))
    }

    /// Stage `task`. Returns `false` without error if a task for the same
    /// `dagRunId` is already queued.
    pub async fn enqueue(&self, task: &Task) -> Result<bool, QueueError> {
        let path = self.task_path(&task.dag_name, task.dag_run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let opened = OpenOptions::new().create_new(true).write(true).open(&path).await;
        let mut file = match opened {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let bytes = serde_json::to_vec(task)?;
        file.write_all(&bytes).await?;
        Ok(true)
    }

    /// Every task currently queued for `dag_name`, oldest first.
    pub async fn list_by_dag_name(&self, dag_name: &str) -> Result<Vec<Task>, QueueError> {
        let dir = self.queue_dir.join(dag_name);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let content = fs::read(entry.path()).await?;
            tasks.push(serde_json::from_slice::<Task>(&content)?);
        }
        tasks.sort_by_key(|t| t.enqueued_at);
        Ok(tasks)
    }

    /// Remove and return the oldest queued task (across every DAG) whose
    /// `workerSelector` is satisfied by `labels` — the coordinator's `Poll`.
    /// Pull-based: a worker only takes a task when it asks for one.
    pub async fn poll(&self, labels: &HashMap<String, String>) -> Result<Option<Task>, QueueError> {
        let mut candidates = Vec::new();
        let mut dag_dirs = match fs::read_dir(&self.queue_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        while let Some(dag_entry) = dag_dirs.next_entry().await? {
            if !dag_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(dag_name) = dag_entry.file_name().to_str().map(str::to_string) else { continue };
            candidates.extend(self.list_by_dag_name(&dag_name).await?);
        }

        let mut matching: Vec<Task> = candidates.into_iter().filter(|t| selector_matches(&t.worker_selector, labels)).collect();
        matching.sort_by_key(|t| t.enqueued_at);
        let Some(task) = matching.into_iter().next() else {
            return Ok(None);
        };

        // Best-effort removal: if another poller already claimed it (the
        // file is gone), this poller simply got nothing this round.
        match fs::remove_file(self.task_path(&task.dag_name, task.dag_run_id)).await {
            Ok(()) => Ok(Some(task)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Requeue a task after a worker disconnected before acknowledging it.
    pub async fn requeue(&self, task: &Task) -> Result<(), QueueError> {
        self.enqueue(task).await.map(|_| ())
    }

    pub async fn cancel(&self, dag_name: &str, dag_run_id: Uuid) -> Result<(), QueueError> {
        match fs::remove_file(self.task_path(dag_name, dag_run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Dag, DagType};

    fn dag(name: &str) -> Dag {
        Dag {
            name: name.into(),
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

    fn task(dag_name: &str, selector: HashMap<String, String>) -> Task {
        Task {
            dag_run_id: Uuid::new_v4(),
            dag_name: dag_name.into(),
            dag: dag(dag_name),
            params: HashMap::new(),
            worker_selector: selector,
            enqueued_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_dedups_by_run_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = QueueStore::new(tmp.path());
        let t = task("d", HashMap::new());
        assert!(store.enqueue(&t).await.unwrap());
        assert!(!store.enqueue(&t).await.unwrap());
        assert_eq!(store.list_by_dag_name("d").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poll_only_returns_tasks_the_labels_satisfy() {
        let tmp = tempfile::tempdir().unwrap();
        let store = QueueStore::new(tmp.path());
        let gated = task("d", HashMap::from([("gpu".into(), "true".into())]));
        let open = task("d2", HashMap::new());
        store.enqueue(&gated).await.unwrap();
        store.enqueue(&open).await.unwrap();

        let no_labels = store.poll(&HashMap::new()).await.unwrap().unwrap();
        assert_eq!(no_labels.dag_run_id, open.dag_run_id);

        let with_gpu = store.poll(&HashMap::from([("gpu".into(), "true".into())])).await.unwrap().unwrap();
        assert_eq!(with_gpu.dag_run_id, gated.dag_run_id);

        assert!(store.poll(&HashMap::new()).await.unwrap().is_none());
    }
}
