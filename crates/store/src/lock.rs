//! Filesystem-based at-most-one-concurrent-run lock.
//!
//! Guarantees at most one `Agent` runs a given `(dagName, dagRunId)` on the
//! same host: an advisory exclusive `flock` on `<runs-dir>/<dag-name>/
//! <dagRunId>.lock`, held for the lifetime of the returned [`RunLock`] and
//! released automatically when it's dropped (process exit releases it too).
//! The coordinator's worker registry provides the cluster-wide equivalent,
//! under the assumption that workers honor their selector constraints.

use std::path::PathBuf;

use tokio::fs::{self, File};
use uuid::Uuid;

use crate::layout::Layout;
use crate::StoreError;

pub struct RunLock {
    dag_run_id: Uuid,
    path: PathBuf,
    // Held for the lifetime of the lock; dropping the file releases the
    // advisory flock.
    _file: File,
}

impl RunLock {
    /// Acquire the lock for `dag_run_id`, creating the runs-dir hierarchy if
    /// needed. Fails with [`StoreError::AlreadyLocked`] if another process
    /// already holds it.
    pub async fn acquire(layout: &Layout, dag_name: &str, dag_run_id: Uuid) -> Result<Self, StoreError> {
        let path = layout.lock_file(dag_name, dag_run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::options().create(true).write(true).open(&path).await?;
        try_lock_exclusive(&file, dag_run_id)?;
        Ok(Self { dag_run_id, path, _file: file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File, dag_run_id: Uuid) -> Result<(), StoreError> {
    use std::os::fd::AsFd;

    use nix::fcntl::{flock, FlockArg};

    flock(file.as_fd(), FlockArg::LockExclusiveNonblock)
        .map_err(|_| StoreError::AlreadyLocked(dag_run_id))
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File, _dag_run_id: Uuid) -> Result<(), StoreError> {
    // Advisory locking across processes is not implemented on non-Unix
    // targets; the lock file still exists for diagnostics but doesn't
    // enforce exclusivity. See spec.md §9 Open Questions (Windows signal
    // propagation is in the same boat).
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_first_is_held() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("data"), tmp.path().join("runs"));
        let run_id = Uuid::new_v4();

        let first = RunLock::acquire(&layout, "d", run_id).await.unwrap();
        let second = RunLock::acquire(&layout, "d", run_id).await;
        assert!(matches!(second, Err(StoreError::AlreadyLocked(id)) if id == run_id));

        drop(first);
        RunLock::acquire(&layout, "d", run_id).await.expect("lock released after drop");
    }
}
