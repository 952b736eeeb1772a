//! `sftp` plugin — uploads or downloads a file (or directory, non-recursive
//! in this implementation) over the same `ssh2` connection machinery as
//! `ssh`.

use std::io::{Read, Write};
use std::net::TcpStream;

use async_trait::async_trait;
use serde::Deserialize;
use ssh2::Session;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize)]
enum Direction {
    #[serde(rename = "upload")]
    Upload,
    #[serde(rename = "download")]
    Download,
}

#[derive(Deserialize)]
struct SftpConfig {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    user: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    password: Option<String>,
    direction: Direction,
    source: String,
    destination: String,
}

fn default_port() -> u16 {
    22
}

pub struct SftpNode;

fn run_blocking(config: SftpConfig) -> Result<String, NodeError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| NodeError::Execution(format!("sftp connect failed: {e}")))?;
    let mut session = Session::new().map_err(|e| NodeError::Execution(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| NodeError::Execution(format!("sftp handshake failed: {e}")))?;

    if let Some(key_path) = &config.key {
        session
            .userauth_pubkey_file(&config.user, None, std::path::Path::new(key_path), None)
            .map_err(|e| NodeError::Execution(format!("sftp key auth failed: {e}")))?;
    } else if let Some(password) = &config.password {
        session
            .userauth_password(&config.user, password)
            .map_err(|e| NodeError::Execution(format!("sftp password auth failed: {e}")))?;
    } else {
        return Err(NodeError::Execution("sftp step requires key or password".into()));
    }

    let sftp = session.sftp().map_err(|e| NodeError::Execution(e.to_string()))?;
    match config.direction {
        Direction::Upload => {
            let mut local = std::fs::File::open(&config.source)
                .map_err(|e| NodeError::Execution(format!("open local source: {e}")))?;
            let mut remote = sftp
                .create(std::path::Path::new(&config.destination))
                .map_err(|e| NodeError::Execution(format!("create remote destination: {e}")))?;
            let mut buf = Vec::new();
            local.read_to_end(&mut buf).map_err(|e| NodeError::Execution(e.to_string()))?;
            remote.write_all(&buf).map_err(|e| NodeError::Execution(e.to_string()))?;
        }
        Direction::Download => {
            let mut remote = sftp
                .open(std::path::Path::new(&config.source))
                .map_err(|e| NodeError::Execution(format!("open remote source: {e}")))?;
            let mut buf = Vec::new();
            remote.read_to_end(&mut buf).map_err(|e| NodeError::Execution(e.to_string()))?;
            let mut local = std::fs::File::create(&config.destination)
                .map_err(|e| NodeError::Execution(format!("create local destination: {e}")))?;
            local.write_all(&buf).map_err(|e| NodeError::Execution(e.to_string()))?;
        }
    }
    Ok(format!("transferred {} -> {}", config.source, config.destination))
}

#[async_trait]
impl ExecutableNode for SftpNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: SftpConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid sftp config: {e}")))?;

        let summary = tokio::task::spawn_blocking(move || run_blocking(config))
            .await
            .map_err(|e| NodeError::Execution(e.to_string()))??;

        io.stdout.write_all(summary.as_bytes()).await.ok();
        Ok(0)
    }
}
