//! Centralized error types for the Phoenix workspace.

use thiserror::Error;

/// Top-level error enum. The first four variants are the outcomes callers
/// translate into user-visible responses.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PhoenixError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A multi-step write failed part way and was rolled back.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// A single backing-store operation failed outright.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PhoenixError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }
}

pub type PhoenixResult<T> = Result<T, PhoenixError>;
