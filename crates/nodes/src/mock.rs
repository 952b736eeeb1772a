//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in engine-level unit and integration tests where a real plugin
//! (spawning a subprocess, opening a connection) is either unavailable or
//! irrelevant to what's being tested.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use crate::{ExecutableNode, NodeError, traits::{ExecutionContext, NodeIo, StepRequest}};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Write `stdout` and exit with `code`.
    Exit { code: i32, stdout: String },
    /// Fail with `NodeError::Execution`.
    FailExecution(String),
    /// Fail with `NodeError::Timeout`.
    Timeout,
}

/// A mock plugin that records every request it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    pub name: String,
    pub behaviour: MockBehaviour,
    pub calls: Arc<Mutex<Vec<StepRequest>>>,
}

impl MockNode {
    pub fn exiting(name: impl Into<String>, code: i32, stdout: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Exit { code, stdout: stdout.into() },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailExecution(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn timing_out(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Timeout,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        self.calls.lock().unwrap().push(req.clone());

        match &self.behaviour {
            MockBehaviour::Exit { code, stdout } => {
                io.stdout.write_all(stdout.as_bytes()).await.ok();
                Ok(*code)
            }
            MockBehaviour::FailExecution(msg) => Err(NodeError::Execution(msg.clone())),
            MockBehaviour::Timeout => Err(NodeError::Timeout),
        }
    }
}
