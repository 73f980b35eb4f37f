//! Error types shared across the memory substrate, rate limiter, expert
//! engine, and refinement loop.

/// Result type for `synapse-core` operations.
pub type Result<T> = std::result::Result<T, SynapseError>;

/// The closed error taxonomy from the platform's error handling design:
/// transient, resource, invalid-input, contract-violation, and safety
/// failures each retry or propagate differently at the coordinator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Resource,
    InvalidInput,
    ContractViolation,
    Safety,
}

#[derive(Debug, thiserror::Error)]
pub enum SynapseError {
    // --- transient ---
    #[error("rate limited on backend {0}")]
    RateLimited(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("storage temporarily unavailable: {0}")]
    StorageTemporarilyUnavailable(String),

    // --- resource ---
    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    // --- invalid input ---
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid memory type: {0}")]
    InvalidType(String),

    #[error("importance out of range: {0}")]
    ImportanceOutOfRange(f64),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    // --- contract violation ---
    #[error("worker never emitted readiness: {0}")]
    WorkerNoReadiness(String),

    #[error("worker went silent: {0}")]
    WorkerSilent(String),

    #[error("worker exited without a result: {0}")]
    WorkerNoResult(String),

    // --- safety ---
    #[error("safety dimension failed: {0}")]
    SafetyDimensionFailure(String),

    // --- structural / ambient ---
    #[error("memory record not found: {0}")]
    NotFound(String),

    #[error("conflicting update to {0}")]
    ConflictingUpdate(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SynapseError {
    /// The taxonomy category this error belongs to, used by callers deciding
    /// whether to retry, surface a non-retryable Result, reject at the
    /// boundary, or abort a refinement loop.
    pub fn category(&self) -> ErrorCategory {
        use SynapseError::*;
        match self {
            RateLimited(_) | BackendUnavailable(_) | StorageTemporarilyUnavailable(_) => {
                ErrorCategory::Transient
            }
            Timeout | Cancelled | QuotaExceeded(_) => ErrorCategory::Resource,
            MalformedRequest(_) | InvalidType(_) | ImportanceOutOfRange(_) | InvalidFilter(_) => {
                ErrorCategory::InvalidInput
            }
            WorkerNoReadiness(_) | WorkerSilent(_) | WorkerNoResult(_) => {
                ErrorCategory::ContractViolation
            }
            SafetyDimensionFailure(_) => ErrorCategory::Safety,
            _ => ErrorCategory::Resource,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl From<String> for SynapseError {
    fn from(s: String) -> Self {
        SynapseError::Other(s)
    }
}

impl From<&str> for SynapseError {
    fn from(s: &str) -> Self {
        SynapseError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for SynapseError {
    fn from(err: anyhow::Error) -> Self {
        SynapseError::Other(err.to_string())
    }
}
