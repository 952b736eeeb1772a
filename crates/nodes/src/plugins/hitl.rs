//! `hitl` (human-in-the-loop) plugin — yields the node to `Waiting` instead
//! of running anything. It occupies no worker slot: the node executor
//! special-cases this plugin's result to set the run status to `Waiting`
//! rather than treating it as a normal in-flight step. Resumption/abort
//! happens out-of-band, through the run's control IPC socket.

use async_trait::async_trait;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

/// Sentinel exit code the node executor recognizes as "this step parked
/// itself waiting for an external decision" rather than succeeding.
pub const WAITING_EXIT_CODE: i32 = i32::MIN;

pub struct HitlNode;

#[async_trait]
impl ExecutableNode for HitlNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        _req: &StepRequest,
        _io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        Ok(WAITING_EXIT_CODE)
    }
}
