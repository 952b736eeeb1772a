//! Filesystem directory layout for the status store.
//!
//! ```text
//! <data-dir>/<dag-name>/attempts/<dagRunId>/<attempt-ts>/status.jsonl
//! <data-dir>/<dag-name>/logs/<dagRunId>/<attempt-ts>/<stepName>.stdout.log
//! <data-dir>/<dag-name>/logs/<dagRunId>/<attempt-ts>/<stepName>.stderr.log
//! <runs-dir>/<dag-name>/<dagRunId>.lock
//! ```
//!
//! Attempt directories are named by a monotonic timestamp so attempts for a
//! single run sort chronologically by directory name alone.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Format an attempt timestamp: sortable, filesystem-safe, microsecond
/// resolution so two attempts opened in the same run never collide.
pub fn attempt_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
}

#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
    runs_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>, runs_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), runs_dir: runs_dir.into() }
    }

    pub fn dag_dir(&self, dag_name: &str) -> PathBuf {
        self.data_dir.join(dag_name)
    }

    pub fn attempts_dir(&self, dag_name: &str, dag_run_id: Uuid) -> PathBuf {
        self.dag_dir(dag_name).join("attempts").join(dag_run_id.to_string())
    }

    pub fn attempt_dir(&self, dag_name: &str, dag_run_id: Uuid, attempt_ts: &str) -> PathBuf {
        self.attempts_dir(dag_name, dag_run_id).join(attempt_ts)
    }

    pub fn status_file(&self, dag_name: &str, dag_run_id: Uuid, attempt_ts: &str) -> PathBuf {
        self.attempt_dir(dag_name, dag_run_id, attempt_ts).join("status.jsonl")
    }

    pub fn logs_dir(&self, dag_name: &str, dag_run_id: Uuid, attempt_ts: &str) -> PathBuf {
        self.dag_dir(dag_name).join("logs").join(dag_run_id.to_string()).join(attempt_ts)
    }

    /// Every DAG's top-level directory under the data dir, used by
    /// `ListRecentStatus` to scan across DAGs is not needed — callers
    /// already know the DAG name; this just exposes the root for tooling.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub fn lock_file(&self, dag_name: &str, dag_run_id: Uuid) -> PathBuf {
        self.runs_dir.join(dag_name).join(format!("{dag_run_id}.lock"))
    }

    /// Deterministic IPC socket path for one run, alongside its lock file.
    pub fn sock_file(&self, dag_name: &str, dag_run_id: Uuid) -> PathBuf {
        self.runs_dir.join(dag_name).join(format!("{dag_run_id}.sock"))
    }

    pub fn runs_dir(&self) -> &std::path::Path {
        &self.runs_dir
    }
}
