//! Error types for the OPAL engine core.
//!
//! All public APIs return `OpalResult<T>` — no panics in library code.

use thiserror::Error;

/// Unified error type for all OPAL operations.
#[derive(Debug, Error)]
pub enum OpalError {
    /// Plan construction or validation error
    #[error("plan error: {0}")]
    Plan(String),

    /// Optimizer invariant violation — a logic bug, never a user error
    #[error("internal error: {0}")]
    Internal(String),

    /// Feature not yet implemented
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Unsupported SQL feature
    #[error("SQL feature not supported: {feature}\nHint: {hint}")]
    SqlNotSupported { feature: String, hint: String },
}

/// Result type alias for all OPAL operations.
pub type OpalResult<T> = Result<T, OpalError>;
