//! Unified error types for the CollabDrive platform
//!
//! Subsystem crates define their own error enums and convert into this
//! central type at crate boundaries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for the CollabDrive platform
#[derive(Debug, Error)]
pub enum CoreError {
    /// Authorization errors
    #[error("Permission error: {0}")]
    Permission(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input/state
    #[error("Invalid: {0}")]
    Invalid(String),
}
