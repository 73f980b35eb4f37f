//! Error types for coordinator operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("request rejected: {0}")]
    RequestRejected(String),

    #[error("request not found: {0}")]
    NotFound(String),

    #[error("worker never emitted readiness: {0}")]
    WorkerNoReadiness(String),

    #[error("worker went silent: {0}")]
    WorkerSilent(String),

    #[error("worker exited without a result: {0}")]
    WorkerNoResult(String),

    #[error("mailbox filesystem unavailable: {0}")]
    MailboxUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<synapse_core::SynapseError> for CoordinatorError {
    fn from(err: synapse_core::SynapseError) -> Self {
        CoordinatorError::MailboxUnavailable(err.to_string())
    }
}
