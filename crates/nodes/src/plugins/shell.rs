//! `shell` plugin — runs `command` or `script` through a shell interpreter
//! (the step's `shell:` attribute, or the system default).
//!
//! A command list is run sequentially, stopping at the first non-zero exit.
//! Each command's trimmed stdout is written to the combined stdout stream
//! followed by a newline, so the node executor's `output` capture — which
//! trims the whole stream — sees exactly `out(c1) + "\n" + ... + out(cN)`.

use async_trait::async_trait;
use tokio::process::Command;

use super::proc_common::run_one;
use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

pub struct ShellNode;

fn invocation(shell: Option<&str>, body: &str) -> Command {
    let mut cmd = Command::new(shell.unwrap_or("sh"));
    cmd.arg("-c").arg(body);
    cmd
}

#[async_trait]
impl ExecutableNode for ShellNode {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let bodies: Vec<&str> = if let Some(script) = &req.script {
            vec![script.as_str()]
        } else {
            req.commands.iter().map(|s| s.as_str()).collect()
        };
        if bodies.is_empty() {
            return Ok(0);
        }

        for body in bodies {
            let mut cmd = invocation(req.shell.as_deref(), body);
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
