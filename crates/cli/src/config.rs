//! Where a run's state lives on disk, taken through `clap` args and env
//! vars the way the teacher's `cli` crate took `DATABASE_URL` — just more
//! of them, since this system has no single connection string.

use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Root directory status snapshots and logs are written under.
    #[arg(long, env = "DAGRUN_DATA_DIR", default_value = "./dagrun-data")]
    pub data_dir: PathBuf,

    /// Root directory run locks and IPC sockets live under.
    #[arg(long, env = "DAGRUN_RUNS_DIR", default_value = "./dagrun-runs")]
    pub runs_dir: PathBuf,

    /// Root directory the filesystem task queue is staged under.
    #[arg(long, env = "DAGRUN_QUEUE_DIR", default_value = "./dagrun-queue")]
    pub queue_dir: PathBuf,
}

impl StoreArgs {
    pub fn status_store(&self) -> store::StatusStore {
        store::StatusStore::new(self.data_dir.clone(), self.runs_dir.clone())
    }

    pub fn queue_store(&self) -> queue::QueueStore {
        queue::QueueStore::new(self.queue_dir.clone())
    }
}

/// Parse a list of `key=value` CLI args into a map. Used for `--param` and
/// `--label`/`--selector` flags.
pub fn parse_pairs(pairs: &[String]) -> anyhow::Result<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{pair}'"))?;
        map.insert(k.to_string(), v.to_string());
    }
    Ok(map)
}

/// Same as `parse_pairs` but values are parsed as JSON when possible,
/// falling back to a plain string — lets `--param count=3` produce a
/// number rather than the string `"3"`.
pub fn parse_params(pairs: &[String]) -> anyhow::Result<std::collections::HashMap<String, serde_json::Value>> {
    let mut map = std::collections::HashMap::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{pair}'"))?;
        let value = serde_json::from_str(v).unwrap_or_else(|_| serde_json::Value::String(v.to_string()));
        map.insert(k.to_string(), value);
    }
    Ok(map)
}
