//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, event identity). Storage concerns belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An event was applied without naming the aggregate it belongs to.
    #[error("event '{event_name}' carries no aggregate id")]
    MissingAggregateId { event_name: &'static str },

    /// An event was applied to an aggregate owning a different stream.
    #[error("event '{event_name}' belongs to stream '{found}', not '{expected}'")]
    StreamMismatch {
        event_name: &'static str,
        expected: String,
        found: String,
    },

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A requested aggregate has no history.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. opening an account twice).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
