//! Shared subprocess plumbing for the `shell` and `command` plugins: spawn
//! into a fresh process group, stream stdout/stderr, and honor cancellation
//! by forwarding `signal_on_stop` then escalating to `SIGKILL` after a grace
//! period.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::traits::{ExecutionContext, NodeIo};
use crate::NodeError;

const KILL_GRACE: Duration = Duration::from_secs(30);

#[cfg(unix)]
fn setsid_pre_exec(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().ok();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn setsid_pre_exec(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pgid: i32, name: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let signal = name.parse::<Signal>().unwrap_or(Signal::SIGTERM);
    let _ = kill(Pid::from_raw(-pgid), signal);
}

#[cfg(not(unix))]
fn signal_group(_pgid: i32, _name: &str) {}

/// Run one already-built `Command`, streaming its stdout/stderr into `io`
/// and honoring `ctx.cancel`.
///
/// Returns the process exit code, or `NodeError::Cancelled` if the run's
/// cancellation token fired first (after the kill sequence was sent).
pub async fn run_one(
    mut cmd: Command,
    ctx: &ExecutionContext,
    io: &mut NodeIo,
    trim_and_newline_stdout: bool,
) -> Result<i32, NodeError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    setsid_pre_exec(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| NodeError::Execution(e.to_string()))?;
    let pgid = child.id().map(|id| id as i32);
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let wait = async {
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        if let Some(mut s) = stdout.take() {
            let _ = s.read_to_end(&mut out_buf).await;
        }
        if let Some(mut s) = stderr.take() {
            let _ = s.read_to_end(&mut err_buf).await;
        }
        let status = child.wait().await;
        (status, out_buf, err_buf)
    };

    tokio::select! {
        _ = ctx.cancel.cancelled() => {
            if let Some(pgid) = pgid {
                signal_group(pgid, &ctx.signal_on_stop);
                tokio::time::sleep(KILL_GRACE).await;
                signal_group(pgid, "SIGKILL");
            }
            Err(NodeError::Cancelled)
        }
        (status, out_buf, err_buf) = wait => {
            if trim_and_newline_stdout {
                let trimmed = String::from_utf8_lossy(&out_buf);
                io.stdout.write_all(trimmed.trim_end().as_bytes()).await.ok();
                io.stdout.write_all(b"\n").await.ok();
            } else {
                io.stdout.write_all(&out_buf).await.ok();
            }
            io.stderr.write_all(&err_buf).await.ok();
            let status = status.map_err(|e| NodeError::Execution(e.to_string()))?;
            Ok(status.code().unwrap_or(-1))
        }
    }
}
