//! Append-only attempt writer: `Open` allocates a fresh attempt directory,
//! `write` appends one JSON line per snapshot, `close` flushes and drops the
//! handle. Nothing already appended is ever rewritten — callers append a
//! new line for every state change instead of mutating the last one.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::layout::{attempt_timestamp, Layout};
use crate::StoreError;

/// A single open attempt: one append-only `status.jsonl` plus its sibling
/// log directory for step stdout/stderr files.
pub struct AttemptWriter {
    dag_name: String,
    dag_run_id: Uuid,
    attempt_ts: String,
    status_path: PathBuf,
    log_dir: PathBuf,
    file: File,
}

impl AttemptWriter {
    /// Allocate directories for a fresh attempt of `dag_run_id` and open its
    /// status file for appending.
    pub async fn open(layout: &Layout, dag_name: &str, dag_run_id: Uuid) -> Result<Self, StoreError> {
        let attempt_ts = attempt_timestamp(Utc::now());
        let attempt_dir = layout.attempt_dir(dag_name, dag_run_id, &attempt_ts);
        let log_dir = layout.logs_dir(dag_name, dag_run_id, &attempt_ts);
        fs::create_dir_all(&attempt_dir).await?;
        fs::create_dir_all(&log_dir).await?;

        let status_path = layout.status_file(dag_name, dag_run_id, &attempt_ts);
        let file = OpenOptions::new().create(true).append(true).open(&status_path).await?;

        Ok(Self {
            dag_name: dag_name.to_string(),
            dag_run_id,
            attempt_ts,
            status_path,
            log_dir,
            file,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn attempt_ts(&self) -> &str {
        &self.attempt_ts
    }

    pub fn dag_name(&self) -> &str {
        &self.dag_name
    }

    pub fn dag_run_id(&self) -> Uuid {
        self.dag_run_id
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// Append one JSON line. Each line fully supersedes earlier ones for
    /// readers that only care about the latest snapshot.
    pub async fn write<T: Serialize>(&mut self, snapshot: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Flush and drop the handle. Attempts don't need explicit cleanup
    /// beyond this — the file stays on disk for readers.
    pub async fn close(mut self) -> Result<(), StoreError> {
        self.file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Snap {
        n: u32,
    }

    #[tokio::test]
    async fn appends_one_line_per_write() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("data"), tmp.path().join("runs"));
        let run_id = Uuid::new_v4();
        let mut writer = AttemptWriter::open(&layout, "example", run_id).await.unwrap();
        writer.write(&Snap { n: 1 }).await.unwrap();
        writer.write(&Snap { n: 2 }).await.unwrap();
        let path = writer.status_path().to_path_buf();
        writer.close().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(serde_json::from_str::<Snap>(lines[0]).unwrap(), Snap { n: 1 });
        assert_eq!(serde_json::from_str::<Snap>(lines[1]).unwrap(), Snap { n: 2 });
    }
}
