//! `ssh` plugin — opens an SSH connection per step and runs `command`/
//! `script` on the remote via a shell pipe.
//!
//! `ssh2` is a blocking API; the connection and the command run on a
//! blocking-pool task so they don't stall the walker's event loop. Remote
//! `$VAR` references are intentionally *not* expanded locally — they're
//! passed through verbatim for the remote shell; only `${...}` DAG-scoped
//! templates are expanded before this plugin ever sees the command.

use std::io::Read;
use std::net::TcpStream;

use async_trait::async_trait;
use serde::Deserialize;
use ssh2::Session;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize)]
struct SshConfig {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    user: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    strict_host_key: bool,
    #[serde(default)]
    shell: Option<String>,
}

fn default_port() -> u16 {
    22
}

pub struct SshNode;

fn run_blocking(config: SshConfig, body: String) -> Result<(i32, Vec<u8>, Vec<u8>), NodeError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| NodeError::Execution(format!("ssh connect failed: {e}")))?;
    let mut session = Session::new().map_err(|e| NodeError::Execution(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| NodeError::Execution(format!("ssh handshake failed: {e}")))?;

    if !config.strict_host_key {
        tracing::debug!(host = %config.host, "ssh strict host-key checking disabled");
    }

    if let Some(key_path) = &config.key {
        session
            .userauth_pubkey_file(&config.user, None, std::path::Path::new(key_path), None)
            .map_err(|e| NodeError::Execution(format!("ssh key auth failed: {e}")))?;
    } else if let Some(password) = &config.password {
        session
            .userauth_password(&config.user, password)
            .map_err(|e| NodeError::Execution(format!("ssh password auth failed: {e}")))?;
    } else {
        return Err(NodeError::Execution("ssh step requires key or password".into()));
    }

    let mut channel = session.channel_session().map_err(|e| NodeError::Execution(e.to_string()))?;
    let shell = config.shell.as_deref().unwrap_or("sh");
    channel
        .exec(&format!("{shell} -c {}", shell_words::quote(&body)))
        .map_err(|e| NodeError::Execution(e.to_string()))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    channel.read_to_end(&mut stdout).ok();
    channel.stderr().read_to_end(&mut stderr).ok();
    channel.wait_close().ok();
    let exit_status = channel.exit_status().unwrap_or(-1);
    Ok((exit_status, stdout, stderr))
}

#[async_trait]
impl ExecutableNode for SshNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: SshConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid ssh config: {e}")))?;
        let body = req
            .script
            .clone()
            .or_else(|| req.commands.first().cloned())
            .ok_or_else(|| NodeError::Execution("ssh step requires a command or script".into()))?;

        let (code, stdout, stderr) = tokio::task::spawn_blocking(move || run_blocking(config, body))
            .await
            .map_err(|e| NodeError::Execution(e.to_string()))??;

        io.stdout.write_all(&stdout).await.ok();
        io.stderr.write_all(&stderr).await.ok();
        Ok(code)
    }
}
