//! Error types for the sync engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, TrackerError>;

/// Classified failures from remote calls and engine orchestration.
///
/// Remote conditions never surface as panics; every call resolves to
/// a value or one of these kinds so callers can branch on
/// retryability without inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// Credentials were rejected (HTTP 401). Never retried.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The caller lacks permission (HTTP 403). Never retried.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The target does not exist (HTTP 404). Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Throttled by the server (HTTP 429) and retries were exhausted.
    #[error("rate limited after {attempts} attempts")]
    RateLimited {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Retryable server failure (HTTP 5xx) and retries were exhausted.
    #[error("transient failure (status {status}) after {attempts} attempts")]
    Transient {
        /// Last observed status code.
        status: u16,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Connection-level failure and retries were exhausted.
    #[error("network failure after {attempts} attempts: {message}")]
    Network {
        /// Last transport error message.
        message: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A response that fits no classification, e.g. an unexpected 4xx
    /// or a malformed body. Never retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The sync was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// Engine misuse, e.g. starting a sync while one is active or
    /// applying a change set that fails ordering validation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Snapshot store failure.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl TrackerError {
    /// Returns true if retrying the call could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::RateLimited { .. }
                | TrackerError::Transient { .. }
                | TrackerError::Network { .. }
        )
    }

    /// Returns true for failures that no retry can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TrackerError::Authentication(_)
                | TrackerError::Permission(_)
                | TrackerError::NotFound(_)
                | TrackerError::Protocol(_)
        )
    }
}
