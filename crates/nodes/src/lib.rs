//! `nodes` crate — the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node — built-in and plugin alike — must implement [`ExecutableNode`].
//! The engine crate dispatches execution through this trait object.

pub mod error;
pub mod traits;
pub mod mock;
pub mod plugins;
pub mod registry;

pub use error::NodeError;
pub use registry::{default_registry, NodeRegistry};
pub use traits::{DagRunner, ExecutableNode, ExecutionContext, HitlControl, NodeIo, StepRequest};
