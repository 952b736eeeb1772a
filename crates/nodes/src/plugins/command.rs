//! `command` (a.k.a. direct) plugin — same sequencing rules as `shell` but
//! bypasses an interpreter: each command is argv-split (no globbing, no
//! variable expansion beyond what templating already did) and exec'd
//! directly.

use async_trait::async_trait;
use tokio::process::Command;

use super::proc_common::run_one;
use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

pub struct CommandNode;

#[async_trait]
impl ExecutableNode for CommandNode {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        if req.commands.is_empty() {
            return Ok(0);
        }

        for body in &req.commands {
            let argv = shell_words::split(body)
                .map_err(|e| NodeError::Execution(format!("invalid command: {e}")))?;
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd.envs(&ctx.env);
            if let Some(dir) = &ctx.dir {
                cmd.current_dir(dir);
            }
            let code = run_one(cmd, ctx, io, true).await?;
            if code != 0 {
                return Ok(code);
            }
        }
        Ok(0)
    }
}
