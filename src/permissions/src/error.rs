//! Error types for the permission engine
//!
//! Expected authorization and validation outcomes are data, not panics: the
//! mutation pipeline returns [`MutationError`] variants from a closed set.
//! Only [`MutationError::Store`] marks an infrastructure fault a caller may
//! retry; retrying any business variant is pointless by construction.

use collabdrive_core::CoreError;
use thiserror::Error;

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or statement failure
    #[error("Database error: {0}")]
    Database(String),

    /// Backend could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Mutation pipeline outcomes other than success.
///
/// `PageNotAccessible` deliberately covers both "page does not exist" and
/// "actor cannot share this page"; splitting the two would let callers probe
/// for page existence through authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Input failed schema validation
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Flag combination rejected by the combination policy
    #[error("Invalid permission combination")]
    InvalidPermissionCombination,

    /// Actors cannot grant or revoke their own access
    #[error("Cannot change own permissions")]
    SelfPermissionDenied,

    /// Page missing or actor lacks share rights on it (intentionally ambiguous)
    #[error("Page not accessible")]
    PageNotAccessible,

    /// Grant target is not a known account
    #[error("User not found")]
    UserNotFound,

    /// Infrastructure fault; the only retryable variant
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for MutationError {
    fn from(err: StoreError) -> Self {
        MutationError::Store(err.to_string())
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<MutationError> for CoreError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::ValidationFailed(message) => CoreError::Invalid(message),
            MutationError::UserNotFound => CoreError::NotFound(err.to_string()),
            MutationError::Store(message) => CoreError::Storage(message),
            MutationError::InvalidPermissionCombination
            | MutationError::SelfPermissionDenied
            | MutationError::PageNotAccessible => CoreError::Permission(err.to_string()),
        }
    }
}

impl MutationError {
    /// Whether a caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationError::Store(_))
    }
}

/// Distributed cache tier is unreachable; always degraded to a soft miss,
/// never surfaced to cache callers.
#[derive(Debug, Clone, Error)]
#[error("Cache tier unavailable: {0}")]
pub struct TierUnavailable(pub String);

/// Audit sink append failure; logged by the engine, never propagated.
#[derive(Debug, Error)]
#[error("Audit sink error: {0}")]
pub struct AuditError(pub String);

/// Realtime eviction failure; logged by the engine, never propagated.
#[derive(Debug, Error)]
#[error("Realtime service error: {0}")]
pub struct RealtimeError(pub String);
