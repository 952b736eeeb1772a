//! `store` crate — the append-only status store.
//!
//! Persists one append-only `status.jsonl` per attempt of a run, readable
//! by any number of concurrent readers while a single writer (the walker,
//! via the `Agent`) appends snapshots. Also owns the on-disk directory
//! layout (spec.md §6) and the filesystem run lock that guarantees
//! at-most-one-concurrent-run per `(dagName, dagRunId)` on a host.
//!
//! This supersedes the grounding workspace's `db` crate: that crate
//! persisted rows in Postgres via `sqlx`. This system's persistence model
//! is filesystem-based (spec.md §6), so `sqlx`/Postgres are dropped and the
//! repository-function shape — one async fn per operation, typed error
//! enum with `#[from]` conversions — is kept, implemented over `tokio::fs`.

pub mod error;
pub mod layout;
pub mod lock;
pub mod reader;
pub mod writer;

pub use error::StoreError;
pub use layout::Layout;
pub use lock::RunLock;
pub use writer::AttemptWriter;

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Facade over the layout + reader/writer free functions; most callers only
/// need this.
#[derive(Debug, Clone)]
pub struct StatusStore {
    layout: Layout,
}

impl StatusStore {
    pub fn new(data_dir: impl Into<std::path::PathBuf>, runs_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { layout: Layout::new(data_dir, runs_dir) }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Open a fresh attempt for `dag_run_id`. Each call to `Run`/`Retry`
    /// opens exactly one attempt.
    pub async fn open_attempt(&self, dag_name: &str, dag_run_id: Uuid) -> Result<AttemptWriter, StoreError> {
        AttemptWriter::open(&self.layout, dag_name, dag_run_id).await
    }

    pub async fn read_latest<T: DeserializeOwned>(
        &self,
        dag_name: &str,
        dag_run_id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        reader::read_latest(&self.layout, dag_name, dag_run_id).await
    }

    /// The `n` most recently started runs of `dag_name`, newest first, each
    /// resolved to its latest attempt's last-line status.
    pub async fn list_recent_status<T: DeserializeOwned>(
        &self,
        dag_name: &str,
        n: usize,
    ) -> Result<Vec<T>, StoreError> {
        reader::list_recent_status(&self.layout, dag_name, n).await
    }

    pub async fn acquire_lock(&self, dag_name: &str, dag_run_id: Uuid) -> Result<RunLock, StoreError> {
        RunLock::acquire(&self.layout, dag_name, dag_run_id).await
    }
}

/// Convenience wrapper for callers that already hold an open attempt.
pub async fn append<T: Serialize>(writer: &mut AttemptWriter, snapshot: &T) -> Result<(), StoreError> {
    writer.write(snapshot).await
}
