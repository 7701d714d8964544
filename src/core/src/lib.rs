//! # CollabDrive Core
//!
//! Shared identifier types, session-derived authorization context, and error
//! handling for the CollabDrive platform. This package breaks circular
//! dependencies between the permissions, realtime, and document packages.

pub mod error;
pub mod id;
pub mod session;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use id::{DriveId, PageId, UserId};
pub use session::{AuthContext, VerifiedSession};
