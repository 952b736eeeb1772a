//! `dagrun` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`    — check a DAG spec and print its execution order.
//! - `run`         — execute a DAG spec in-process.
//! - `status`      — print the latest (or N most recent) run status.
//! - `stop`        — signal a running run to cancel, locally or via a
//!                   coordinator.
//! - `retry`       — resume a run from its last persisted status.
//! - `enqueue`     — stage a run for an external worker to pick up.
//! - `worker`      — long-poll a coordinator for work and execute it.

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::StoreArgs;
use engine::{Agent, AgentConfig, DagRunStatus, RunOptions, Status};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dagrun", about = "DAG run engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a DAG spec and print its topological execution order.
    Validate { path: PathBuf },

    /// Execute a DAG spec in-process, blocking until it reaches a terminal
    /// status.
    Run {
        path: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
        /// Which DAG in a multi-document spec to run (default: the parent).
        #[arg(long)]
        dag: Option<String>,
        /// `key=value` run params; values are parsed as JSON when possible.
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Print the latest, or N most recent, persisted run status.
    Status {
        dag_name: String,
        #[command(flatten)]
        store: StoreArgs,
        /// A specific run id; omit to list the most recent runs instead.
        #[arg(long)]
        run_id: Option<Uuid>,
        #[arg(long, default_value_t = 10)]
        n: usize,
    },

    /// Signal a run to cancel.
    Stop {
        dag_name: String,
        run_id: Uuid,
        #[command(flatten)]
        store: StoreArgs,
        /// Coordinator address (`http://host:port`) to proxy through instead
        /// of connecting to the run's IPC socket directly.
        #[arg(long)]
        coordinator: Option<String>,
    },

    /// Resume a run from its last persisted status in a fresh attempt.
    Retry {
        path: PathBuf,
        run_id: Uuid,
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        dag: Option<String>,
    },

    /// Stage a run for an external worker to pick up later.
    Enqueue {
        path: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        dag: Option<String>,
        #[arg(long = "param")]
        params: Vec<String>,
        /// `key=value` labels a worker must satisfy to claim this run.
        #[arg(long = "selector")]
        selector: Vec<String>,
        #[arg(long)]
        coordinator: Option<String>,
    },

    /// Long-poll a coordinator for work and execute whatever it dispatches.
    Worker {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, env = "DAGRUN_WORKER_ID")]
        worker_id: String,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long)]
        coordinator: String,
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => cmd_validate(&path),
        Command::Run { path, store, dag, params } => cmd_run(&path, &store, dag.as_deref(), &params).await,
        Command::Status { dag_name, store, run_id, n } => cmd_status(&dag_name, &store, run_id, n).await,
        Command::Stop { dag_name, run_id, store, coordinator } => cmd_stop(&dag_name, run_id, &store, coordinator).await,
        Command::Retry { path, run_id, store, dag } => cmd_retry(&path, run_id, &store, dag.as_deref()).await,
        Command::Enqueue { path, store, dag, params, selector, coordinator } => {
            cmd_enqueue(&path, &store, dag.as_deref(), &params, &selector, coordinator).await
        }
        Command::Worker { store, worker_id, labels, coordinator, poll_interval_ms } => {
            cmd_worker(&store, &worker_id, &labels, &coordinator, poll_interval_ms).await
        }
    }
}

fn read_dag_set(path: &PathBuf) -> Result<engine::DagSet> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(engine::load_dag_set_str(&content)?)
}

fn pick_dag(set: &engine::DagSet, name: Option<&str>) -> Result<engine::Dag> {
    match name {
        Some(n) => set.get(n).cloned().ok_or_else(|| anyhow::anyhow!("no DAG named '{n}' in this spec")),
        None => Ok(set.parent.clone()),
    }
}

fn cmd_validate(path: &PathBuf) -> Result<()> {
    let set = read_dag_set(path)?;
    for dag in std::iter::once(&set.parent).chain(set.children.values()) {
        match engine::validate_dag(dag) {
            Ok(order) => println!("{}: valid, execution order: {order:?}", dag.name),
            Err(e) => {
                eprintln!("{}: invalid: {e}", dag.name);
                bail!("validation failed");
            }
        }
    }
    Ok(())
}

fn build_agent_config(store: &StoreArgs, dags: engine::DagSet) -> AgentConfig {
    AgentConfig { store: store.status_store(), registry: Arc::new(nodes::default_registry()), dags: Arc::new(dags) }
}

async fn cmd_run(path: &PathBuf, store: &StoreArgs, dag_name: Option<&str>, params: &[String]) -> Result<()> {
    let set = read_dag_set(path)?;
    let dag = pick_dag(&set, dag_name)?;
    engine::validate_dag(&dag)?;
    let params = config::parse_params(params)?;

    let config = build_agent_config(store, set);
    let agent = Agent::new(dag, config, RunOptions { dag_run_id: None, params, worker_id: None });
    info!(run_id = %agent.dag_run_id(), "starting run");

    let status = agent.run().await?;
    println!("{}", serde_json::to_string_pretty(&agent.status().await)?);
    match status {
        Status::Succeeded | Status::PartiallySucceeded => Ok(()),
        other => bail!("run finished with status {other:?}"),
    }
}

async fn cmd_status(dag_name: &str, store: &StoreArgs, run_id: Option<Uuid>, n: usize) -> Result<()> {
    let status_store = store.status_store();
    match run_id {
        Some(id) => {
            let latest: Option<DagRunStatus> = status_store.read_latest(dag_name, id).await?;
            match latest {
                Some(s) => println!("{}", serde_json::to_string_pretty(&s)?),
                None => bail!("no status recorded for run '{id}'"),
            }
        }
        None => {
            let recent: Vec<DagRunStatus> = status_store.list_recent_status(dag_name, n).await?;
            println!("{}", serde_json::to_string_pretty(&recent)?);
        }
    }
    Ok(())
}

async fn cmd_stop(dag_name: &str, run_id: Uuid, store: &StoreArgs, coordinator: Option<String>) -> Result<()> {
    if let Some(addr) = coordinator {
        let mut client = coordinator::CoordinatorClient::connect(addr).await?;
        let detail = client.stop(run_id).await?;
        println!("stop requested: {detail}");
        return Ok(());
    }
    let sock = store.status_store().layout().sock_file(dag_name, run_id);
    let response = engine::ipc::send_command(&sock, "stop").await.with_context(|| format!("connecting to {}", sock.display()))?;
    println!("{response}");
    Ok(())
}

async fn cmd_retry(path: &PathBuf, run_id: Uuid, store: &StoreArgs, dag_name: Option<&str>) -> Result<()> {
    let set = read_dag_set(path)?;
    let dag = pick_dag(&set, dag_name)?;
    engine::validate_dag(&dag)?;

    let status_store = store.status_store();
    let previous: DagRunStatus = status_store
        .read_latest(&dag.name, run_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no prior status recorded for run '{run_id}'"))?;

    let config = build_agent_config(store, set);
    let agent = Agent::from_status(dag, config, previous);
    let status = agent.run().await?;
    println!("{}", serde_json::to_string_pretty(&agent.status().await)?);
    match status {
        Status::Succeeded | Status::PartiallySucceeded => Ok(()),
        other => bail!("retry finished with status {other:?}"),
    }
}

async fn cmd_enqueue(
    path: &PathBuf,
    store: &StoreArgs,
    dag_name: Option<&str>,
    params: &[String],
    selector: &[String],
    coordinator: Option<String>,
) -> Result<()> {
    let set = read_dag_set(path)?;
    let dag = pick_dag(&set, dag_name)?;
    engine::validate_dag(&dag)?;

    let task = queue::Task {
        dag_run_id: Uuid::new_v4(),
        dag_name: dag.name.clone(),
        dag,
        params: config::parse_params(params)?,
        worker_selector: config::parse_pairs(selector)?,
        enqueued_at: chrono::Utc::now(),
    };

    if let Some(addr) = coordinator {
        let mut client = coordinator::CoordinatorClient::connect(addr).await?;
        let accepted = client.dispatch(&task).await?;
        println!("dispatched {} (accepted: {accepted})", task.dag_run_id);
    } else {
        let accepted = store.queue_store().enqueue(&task).await?;
        println!("enqueued {} (accepted: {accepted})", task.dag_run_id);
    }
    Ok(())
}

async fn cmd_worker(store: &StoreArgs, worker_id: &str, labels: &[String], coordinator: &str, poll_interval_ms: u64) -> Result<()> {
    let labels = config::parse_pairs(labels)?;
    let mut client = coordinator::CoordinatorClient::connect(coordinator.to_string()).await?;
    let status_store = store.status_store();
    let registry = Arc::new(nodes::default_registry());
    let running: Arc<Mutex<HashMap<Uuid, Agent>>> = Arc::new(Mutex::new(HashMap::new()));

    info!(worker_id, ?labels, "worker starting, polling {coordinator}");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("worker shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(poll_interval_ms)) => {}
        }

        for stop_id in client.pending_stops(worker_id).await.unwrap_or_default() {
            if let Some(agent) = running.lock().await.get(&stop_id) {
                agent.abort();
            }
            let _ = client.ack_stop(worker_id, stop_id).await;
        }

        let task = match client.poll(worker_id, &labels).await {
            Ok(t) => t,
            Err(e) => {
                warn!("poll failed: {e}");
                continue;
            }
        };
        let Some(task) = task else { continue };

        let dag_set = engine::DagSet { parent: task.dag.clone(), children: HashMap::new() };
        let config = AgentConfig { store: status_store.clone(), registry: registry.clone(), dags: Arc::new(dag_set) };
        let options = RunOptions { dag_run_id: Some(task.dag_run_id), params: task.params.clone(), worker_id: Some(worker_id.to_string()) };
        let agent = Agent::new(task.dag.clone(), config, options);

        let sock_path = status_store.layout().sock_file(&task.dag_name, task.dag_run_id);
        if let Err(e) = client.ack(worker_id, task.dag_run_id, sock_path.display().to_string()).await {
            warn!("ack failed: {e}");
        }

        running.lock().await.insert(task.dag_run_id, agent.clone());
        let running = running.clone();
        let dag_run_id = task.dag_run_id;
        tokio::spawn(async move {
            match agent.run().await {
                Ok(status) => info!(%dag_run_id, ?status, "run finished"),
                Err(e) => error!(%dag_run_id, error = %e, "run failed"),
            }
            running.lock().await.remove(&dag_run_id);
        });
    }
}
