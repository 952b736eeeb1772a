//! Readers over the attempt layout: the last line of the most recent
//! attempt is authoritative for a single run; `list_recent_status` scans a
//! DAG's attempt directories in reverse chronological order.

use std::path::Path;

use serde::de::DeserializeOwned;
use tokio::fs;
use uuid::Uuid;

use crate::layout::Layout;
use crate::StoreError;

/// Read the last JSON line of `path`. `None` if the file doesn't exist or
/// has no complete lines yet.
async fn last_line<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let Some(line) = content.lines().last() else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(line)?))
}

/// Every attempt timestamp recorded for `dag_run_id`, oldest first (the
/// directory-name format sorts lexicographically the same as
/// chronologically).
async fn attempt_timestamps(
    layout: &Layout,
    dag_name: &str,
    dag_run_id: Uuid,
) -> Result<Vec<String>, StoreError> {
    let dir = layout.attempts_dir(dag_name, dag_run_id);
    let mut entries = match fs::read_dir(&dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Read the latest attempt's last status line for one run. `None` if the
/// run has never had an attempt opened.
pub async fn read_latest<T: DeserializeOwned>(
    layout: &Layout,
    dag_name: &str,
    dag_run_id: Uuid,
) -> Result<Option<T>, StoreError> {
    let timestamps = attempt_timestamps(layout, dag_name, dag_run_id).await?;
    let Some(latest) = timestamps.last() else {
        return Ok(None);
    };
    let path = layout.status_file(dag_name, dag_run_id, latest);
    last_line(&path).await
}

/// Scan `dag_name`'s run directories and return the last-line status of the
/// latest attempt for the `n` most recently started runs, newest first.
pub async fn list_recent_status<T: DeserializeOwned>(
    layout: &Layout,
    dag_name: &str,
    n: usize,
) -> Result<Vec<T>, StoreError> {
    let runs_root = layout.dag_dir(dag_name).join("attempts");
    let mut run_ids = Vec::new();
    let mut entries = match fs::read_dir(&runs_root).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(id) = Uuid::parse_str(name) {
                let modified = entry.metadata().await.ok().and_then(|m| m.modified().ok());
                run_ids.push((id, modified));
            }
        }
    }
    // Newest first by directory mtime (falls back to insertion order for
    // filesystems that don't report mtimes).
    run_ids.sort_by(|a, b| b.1.cmp(&a.1));

    let mut out = Vec::with_capacity(n.min(run_ids.len()));
    for (id, _) in run_ids.into_iter().take(n) {
        if let Some(status) = read_latest::<T>(layout, dag_name, id).await? {
            out.push(status);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::AttemptWriter;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Snap {
        n: u32,
    }

    #[tokio::test]
    async fn read_latest_returns_last_line_of_newest_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("data"), tmp.path().join("runs"));
        let run_id = Uuid::new_v4();

        let mut first = AttemptWriter::open(&layout, "d", run_id).await.unwrap();
        first.write(&Snap { n: 1 }).await.unwrap();
        first.close().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let mut second = AttemptWriter::open(&layout, "d", run_id).await.unwrap();
        second.write(&Snap { n: 2 }).await.unwrap();
        second.write(&Snap { n: 3 }).await.unwrap();
        second.close().await.unwrap();

        let latest: Snap = read_latest(&layout, "d", run_id).await.unwrap().unwrap();
        assert_eq!(latest, Snap { n: 3 });
    }

    #[tokio::test]
    async fn read_latest_missing_run_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("data"), tmp.path().join("runs"));
        let result: Option<Snap> = read_latest(&layout, "d", Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());
    }
}
