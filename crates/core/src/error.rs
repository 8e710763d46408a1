use thiserror::Error;
use uuid::Uuid;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by the turn engine, the controller and the stores.
///
/// Nothing is retried internally; every variant reaches the caller, and after
/// any of them the session remains at its last persisted state.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or missing input, or an operation not allowed in the current state.
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("session '{0}' not found")]
    NotFound(Uuid),

    /// The record changed between read and write.
    #[error("session '{0}' was modified concurrently; reload and retry")]
    Conflict(Uuid),

    /// Completion, speech or file service failure. Safe to retry.
    #[error("upstream service failed: {0}")]
    Upstream(anyhow::Error),

    #[error("store operation failed: {0}")]
    Store(anyhow::Error),
}

impl SessionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
