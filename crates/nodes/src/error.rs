//! Node-level error type.

use thiserror::Error;

/// Errors returned by a plugin's `run` method.
///
/// The node executor (in the `engine` crate) decides retry/repeat/continueOn
/// behaviour from the step's *exit code*, not from this type — `NodeError`
/// only covers failures a plugin cannot express as an exit code: unsupported
/// features, infrastructure failures reaching the target (SSH handshake,
/// container daemon, DB connection), timeout, and cancellation.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// A plugin was given a feature it does not implement, e.g. a
    /// multi-command list handed to `jq` or `http`.
    #[error("executor does not support multiple commands")]
    MultiCommandUnsupported,

    #[error("executor does not support this feature: {0}")]
    Unsupported(String),

    /// The step's `timeoutSec` elapsed before the operation finished.
    #[error("step timed out")]
    Timeout,

    /// The run was cancelled (`Abort`) while this plugin was in flight.
    #[error("cancelled")]
    Cancelled,

    /// Plugin could not even start the operation (bad config, connection
    /// refused, malformed request) — distinct from a non-zero exit code.
    #[error("execution error: {0}")]
    Execution(String),
}
