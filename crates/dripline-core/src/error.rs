//! Dripline error types.

use thiserror::Error;

/// Convenient result alias used across all Dripline crates.
pub type Result<T> = std::result::Result<T, DriplineError>;

/// Unified error type for Dripline operations.
///
/// Validation and not-found variants are recoverable and carry a message
/// meant to be shown to the caller verbatim. Persistence errors surface the
/// store failure without retrying.
#[derive(Debug, Error)]
pub enum DriplineError {
    /// Bad request payload — empty recipient list, malformed input, or an
    /// account whose quota can never host a slot.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced sending account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// The referenced job does not exist (already cancelled or never created).
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The store is unavailable or rejected the operation.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration could not be read, parsed, or written.
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem-level failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
