//! `engine` crate — core domain models, DAG validation, and the DAG run
//! engine: the graph walker, the node executor, and the single-run `Agent`
//! that supervises them.

pub mod agent;
pub mod dag;
pub mod env;
pub mod error;
pub mod ipc;
pub mod loader;
pub mod models;
pub mod node_executor;
pub mod templating;
pub mod walker;

pub use agent::{Agent, AgentConfig, RunOptions};
pub use dag::validate_dag;
pub use error::EngineError;
pub use loader::{load_dag_set_str, load_dag_str, DagSet};
pub use models::{Dag, DagRunStatus, DagType, Node, NodeStatus, Status, Step};
