//! Error taxonomy for the katabox engine.
//!
//! One enum covers the whole crate. Validation and authentication errors
//! surface immediately; `Unavailable` is the only variant the controller
//! retries internally.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type KataboxResult<T> = Result<T, KataboxError>;

/// Errors produced by the katabox engine.
#[derive(Debug, Error)]
pub enum KataboxError {
    /// Malformed sandbox spec — never reaches the orchestrator.
    #[error("validation error: {0}")]
    Validation(String),

    /// A sandbox with the same name already exists in the namespace.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not valid for the sandbox's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Transient orchestrator transport failure. Retried with bounded
    /// exponential backoff before being surfaced.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    /// The cluster rejected the sandbox for exceeding a resource quota.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The sandbox image could not be pulled.
    #[error("image pull failure: {0}")]
    ImagePull(String),

    /// The before-script did not complete within its timeout.
    #[error("before-script timeout: {0}")]
    ScriptTimeout(String),

    /// API key missing, invalid, expired, or revoked.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Operator configuration problem (kubeconfig, paths, options).
    #[error("config error: {0}")]
    Config(String),

    /// Persistent state (API key file) could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Bug or unclassifiable failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KataboxError {
    /// Whether the error is a transient transport failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, KataboxError::Unavailable(_))
    }

    /// Whether the error reflects the request itself and must never be
    /// retried automatically.
    pub fn is_terminal_for_sandbox(&self) -> bool {
        matches!(
            self,
            KataboxError::QuotaExceeded(_)
                | KataboxError::ImagePull(_)
                | KataboxError::ScriptTimeout(_)
        )
    }
}
