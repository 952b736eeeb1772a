//! Typed error type for the coordinator crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc error: {0}")]
    Status(#[from] tonic::Status),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid uuid: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("no run assigned for id '{0}'")]
    UnknownRun(uuid::Uuid),
}
