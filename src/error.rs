//! Crate-wide error types, one enum per failure domain.
//!
//! No module reaches for `unwrap()`/`expect()` on a fallible path outside
//! test code. The one exception is recovering from a poisoned `Mutex`: that
//! indicates a prior panic while the lock was held, which is a process-level
//! bug rather than something a single request can meaningfully recover from.

use thiserror::Error;

/// Errors surfaced by the [`crate::orchestrator::OrchestratorClient`].
///
/// Classified per the orchestrator client contract: callers branch on the
/// variant, never on the underlying `kube` error text.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict updating {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("orchestrator error: {0}")]
    Other(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<kube::Error> for OrchestratorError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) => match resp.code {
                404 => OrchestratorError::NotFound(resp.message.clone()),
                409 => OrchestratorError::Conflict(resp.message.clone()),
                403 => OrchestratorError::Forbidden(resp.message.clone()),
                _ => OrchestratorError::Other(err.to_string()),
            },
            _ => OrchestratorError::Other(err.to_string()),
        }
    }
}

/// Errors surfaced by the [`crate::forward::Forwarder`].
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream error: {0}")]
    Other(String),
}

pub type ForwardResult<T> = Result<T, ForwardError>;
