//! Typed error type for the store crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no attempts recorded for run '{0}'")]
    NoAttempts(uuid::Uuid),

    #[error("run '{0}' is already locked by another process")]
    AlreadyLocked(uuid::Uuid),
}
