//! `container` plugin — runs `command` inside a Docker container via
//! `bollard`.
//!
//! Three modes, chosen by `config.mode`:
//! - `ephemeral` (default): one container created, started, waited on, and
//!   removed per step.
//! - `keepalive`: a DAG-level container identified by `config.name` is
//!   created once (idle, running `config.startup_command` or sleeping) and
//!   reused by every step that references the same name; steps run via
//!   `exec_create`/`exec_start` against it instead of a fresh container.
//! - `command_startup`: like keepalive, but the startup command is expected
//!   to become healthy on its own; the plugin polls `waitFor: running`
//!   before executing the step's command.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Mode {
    #[default]
    Ephemeral,
    Keepalive,
    CommandStartup,
}

#[derive(Deserialize)]
struct VolumeMapping {
    host: String,
    container: String,
}

#[derive(Deserialize)]
struct PortMapping {
    host: u16,
    container: u16,
}

#[derive(Deserialize, Default)]
struct ContainerSpec {
    image: String,
    #[serde(default)]
    mode: Mode,
    /// Shared name for a keepalive/command-startup container; steps in the
    /// same DAG run referencing the same name reuse it.
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    startup_command: Option<Vec<String>>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    volumes: Vec<VolumeMapping>,
    #[serde(default)]
    ports: Vec<PortMapping>,
    #[serde(default)]
    wait_for_running_timeout_sec: Option<u64>,
}

pub struct ContainerNode {
    /// Tracks keepalive container ids this process has already started, by
    /// `(dag_run_id, name)`, so repeated steps reuse rather than recreate.
    started: Mutex<HashMap<(uuid::Uuid, String), String>>,
}

impl ContainerNode {
    pub fn new() -> Self {
        Self { started: Mutex::new(HashMap::new()) }
    }
}

impl Default for ContainerNode {
    fn default() -> Self {
        Self::new()
    }
}

fn host_config(spec: &ContainerSpec) -> HostConfig {
    let binds = spec
        .volumes
        .iter()
        .map(|v| format!("{}:{}", v.host, v.container))
        .collect::<Vec<_>>();
    let port_bindings = spec
        .ports
        .iter()
        .map(|p| {
            (
                format!("{}/tcp", p.container),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(p.host.to_string()),
                }]),
            )
        })
        .collect::<HashMap<_, _>>();
    HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
        ..Default::default()
    }
}

async fn create_and_start(
    docker: &Docker,
    container_name: &str,
    spec: &ContainerSpec,
    cmd: Option<Vec<String>>,
) -> Result<String, NodeError> {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let config = ContainerConfig {
        image: Some(spec.image.clone()),
        cmd,
        env: if env.is_empty() { None } else { Some(env) },
        host_config: Some(host_config(spec)),
        ..Default::default()
    };
    let created = docker
        .create_container(Some(CreateContainerOptions { name: container_name, platform: None }), config)
        .await
        .map_err(|e| NodeError::Execution(format!("container create failed: {e}")))?;
    docker
        .start_container::<String>(&created.id, None)
        .await
        .map_err(|e| NodeError::Execution(format!("container start failed: {e}")))?;
    Ok(created.id)
}

async fn wait_for_running(docker: &Docker, id: &str, timeout: Duration) -> Result<(), NodeError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let inspect = docker
            .inspect_container(id, None)
            .await
            .map_err(|e| NodeError::Execution(format!("container inspect failed: {e}")))?;
        if inspect.state.and_then(|s| s.running).unwrap_or(false) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(NodeError::Execution("container did not reach running state in time".into()));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn exec_in_container(
    docker: &Docker,
    id: &str,
    cmd: Vec<String>,
    io: &mut NodeIo,
) -> Result<i32, NodeError> {
    let exec = docker
        .create_exec(
            id,
            CreateExecOptions {
                cmd: Some(cmd),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| NodeError::Execution(format!("exec create failed: {e}")))?;

    let start = docker
        .start_exec(&exec.id, None)
        .await
        .map_err(|e| NodeError::Execution(format!("exec start failed: {e}")))?;

    if let StartExecResults::Attached { mut output, .. } = start {
        while let Some(chunk) = output.next().await {
            match chunk.map_err(|e| NodeError::Execution(e.to_string()))? {
                bollard::container::LogOutput::StdOut { message } => {
                    io.stdout.write_all(&message).await.ok();
                }
                bollard::container::LogOutput::StdErr { message } => {
                    io.stderr.write_all(&message).await.ok();
                }
                _ => {}
            }
        }
    }

    let inspect = docker
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| NodeError::Execution(format!("exec inspect failed: {e}")))?;
    Ok(inspect.exit_code.unwrap_or(-1) as i32)
}

#[async_trait]
impl ExecutableNode for ContainerNode {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let spec: ContainerSpec = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid container config: {e}")))?;
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| NodeError::Execution(format!("cannot reach docker daemon: {e}")))?;

        let step_cmd: Vec<String> = if let Some(script) = &req.script {
            vec!["sh".into(), "-c".into(), script.clone()]
        } else {
            req.commands
                .first()
                .map(|c| shell_words::split(c))
                .transpose()
                .map_err(|e| NodeError::Execution(e.to_string()))?
                .unwrap_or_default()
        };

        match spec.mode {
            Mode::Ephemeral => {
                let name = format!("dagrun-{}-{}", ctx.dag_run_id, ctx.step_name);
                let id = create_and_start(&docker, &name, &spec, Some(step_cmd)).await?;
                let result = wait_and_collect(&docker, &id, io).await;
                let _ = docker
                    .remove_container(&id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
                    .await;
                result
            }
            Mode::Keepalive | Mode::CommandStartup => {
                let name = spec.name.clone().unwrap_or_else(|| format!("dagrun-{}-shared", ctx.dag_run_id));
                let key = (ctx.dag_run_id, name.clone());
                let mut started = self.started.lock().await;
                let id = if let Some(id) = started.get(&key) {
                    id.clone()
                } else {
                    let startup = spec.startup_command.clone();
                    let id = create_and_start(&docker, &name, &spec, startup).await?;
                    if spec.mode == Mode::CommandStartup {
                        let timeout = Duration::from_secs(spec.wait_for_running_timeout_sec.unwrap_or(30));
                        wait_for_running(&docker, &id, timeout).await?;
                    }
                    started.insert(key, id.clone());
                    id
                };
                drop(started);
                exec_in_container(&docker, &id, step_cmd, io).await
            }
        }
    }
}

async fn wait_and_collect(docker: &Docker, id: &str, io: &mut NodeIo) -> Result<i32, NodeError> {
    let mut logs = docker.logs::<String>(
        id,
        Some(bollard::container::LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );
    let log_task = async {
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(bollard::container::LogOutput::StdOut { message }) => {
                    io.stdout.write_all(&message).await.ok();
                }
                Ok(bollard::container::LogOutput::StdErr { message }) => {
                    io.stderr.write_all(&message).await.ok();
                }
                _ => {}
            }
        }
    };

    let mut wait_stream = docker.wait_container(id, None::<WaitContainerOptions<String>>);
    let wait_task = async { wait_stream.next().await };

    let (_, waited) = tokio::join!(log_task, wait_task);
    match waited {
        Some(Ok(response)) => Ok(response.status_code as i32),
        Some(Err(e)) => Err(NodeError::Execution(format!("container wait failed: {e}"))),
        None => Ok(-1),
    }
}
