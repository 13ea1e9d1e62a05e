//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// business rules, conflicts). Infrastructure concerns belong elsewhere; the
/// repository boundary translates storage integrity failures into
/// `BusinessRule` before they reach callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed/missing input, caller's fault).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity is absent or belongs to another tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// A business rule was violated (insufficient quantity, stale version,
    /// misconfigured tracking). Terminal for this request; retryable once
    /// the underlying condition changes.
    #[error("business rule violated: {0}")]
    BusinessRule(String),

    /// A uniqueness conflict that is meaningful to the caller
    /// (e.g. duplicate user-facing code).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn business_rule(msg: impl Into<String>) -> Self {
        Self::BusinessRule(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
