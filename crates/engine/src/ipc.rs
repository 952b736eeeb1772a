//! Run control IPC: a UNIX-domain socket at a deterministic path derived
//! from `(dagName, dagRunId)`. Accepted text commands: `status`, `stop`,
//! plus the `resume`/`abort [step]` commands the hitl executor needs —
//! `Waiting` is otherwise a dead end since nothing inside the walker can
//! move a node out of it on its own. Responses are a JSON status snapshot
//! or the literal `ok`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nodes::HitlControl;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::DagRunStatus;

/// Collaborators the IPC listener needs to answer each accepted command.
#[derive(Clone)]
pub struct IpcState {
    pub status: watch::Receiver<DagRunStatus>,
    pub cancel: CancellationToken,
    pub hitl: Arc<dyn HitlControl>,
}

pub struct IpcListener {
    path: PathBuf,
    listener: UnixListener,
}

impl IpcListener {
    /// Bind the socket, removing a stale file left behind by a prior crash.
    pub async fn bind(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let _ = tokio::fs::remove_file(&path).await;
        let listener = UnixListener::bind(&path)?;
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `state.cancel` fires. Runs as a background
    /// task for the lifetime of the `Agent`; each connection is handled on
    /// its own task so a slow client can't stall `status` queries from
    /// others.
    pub async fn serve(self, state: IpcState) {
        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let state = state.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, &state).await {
                                    warn!("ipc connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("ipc accept error: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection(stream: UnixStream, state: &IpcState) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let Some(line) = lines.next_line().await? else { return Ok(()) };
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let response = match cmd {
        "status" => serde_json::to_string(&*state.status.borrow())
            .unwrap_or_else(|e| format!("error: {e}")),
        "stop" => {
            info!("ipc: received stop");
            state.cancel.cancel();
            "ok".to_string()
        }
        "resume" => match state.hitl.resume(arg).await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        },
        "abort" => match state.hitl.abort(arg).await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        },
        other => format!("error: unknown command '{other}'"),
    };

    writer.write_all(response.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.shutdown().await?;
    Ok(())
}

/// Send one command to the run at `path` and return its trimmed response.
/// Used by the CLI's `status`/`stop` subcommands and, indirectly, by the
/// coordinator proxying a remote `Stop` RPC to a worker-hosted run.
pub async fn send_command(path: &Path, cmd: &str) -> std::io::Result<String> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(cmd.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use nodes::NodeError;
    use uuid::Uuid;

    use super::*;
    use crate::models::{Dag, DagType, Status};

    struct NoopHitl;

    #[async_trait]
    impl HitlControl for NoopHitl {
        async fn resume(&self, _step_name: Option<&str>) -> Result<(), NodeError> {
            Ok(())
        }
        async fn abort(&self, _step_name: Option<&str>) -> Result<(), NodeError> {
            Ok(())
        }
    }

    fn empty_dag() -> Dag {
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

    #[tokio::test]
    async fn status_and_stop_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.sock");
        let listener = IpcListener::bind(path.clone()).await.unwrap();

        let dag = empty_dag();
        let run_status = DagRunStatus::new(Uuid::new_v4(), &dag, Default::default());
        let (tx, rx) = watch::channel(run_status);
        let cancel = CancellationToken::new();
        let state = IpcState { status: rx, cancel: cancel.clone(), hitl: Arc::new(NoopHitl) };

        let serve_cancel = cancel.clone();
        let handle = tokio::spawn(async move { listener.serve(state).await });

        let status_response = send_command(&path, "status").await.unwrap();
        let parsed: DagRunStatus = serde_json::from_str(&status_response).unwrap();
        assert_eq!(parsed.status, Status::NotStarted);

        let stop_response = send_command(&path, "stop").await.unwrap();
        assert_eq!(stop_response, "ok");
        assert!(cancel.is_cancelled());

        drop(tx);
        serve_cancel.cancel();
        handle.await.unwrap();
    }
}
