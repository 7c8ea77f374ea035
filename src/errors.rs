//! Typed error taxonomy for user-facing operations.
//!
//! Background tasks recover locally (log and continue) and don't need these;
//! this enum exists so the API layer can map distinct failure kinds to
//! distinct HTTP responses, and so callers can match on `CycleDetected`
//! without string-sniffing. Unresolved formula dependencies are not an error:
//! they surface as `None` from the formula engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Request payload or parameters failed validation.
    #[error("{0}")]
    Validation(String),

    /// Missing webhook token.
    #[error("{0}")]
    AuthMissing(String),

    /// Wrong webhook token.
    #[error("{0}")]
    AuthInvalid(String),

    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Monitor formula would create a dependency cycle.
    #[error("circular dependency detected: {0}")]
    CycleDetected(String),

    /// Every upstream source failed and no cached data exists.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// The persistence layer rejected an operation.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
