//! # CollabDrive Permission Engine
//!
//! Decides who may view, edit, share, or delete a page, enforces those
//! decisions under concurrent mutation, and keeps a two-tier read cache
//! coherent with the authoritative store.
//!
//! ## Design
//!
//! - **Deny by default**: access exists only through drive ownership or an
//!   explicit grant row; nothing is inherited across the page tree.
//! - **Two-tier cache**: bounded in-process L1 over an optional shared tier;
//!   an unreachable shared tier degrades silently to memory-only.
//! - **Race-free mutation**: grants insert first and let the store's
//!   uniqueness constraint absorb conflicts; caches are invalidated before a
//!   mutation reports success.
//! - **Real-time revocation**: a successful revoke evicts the target's live
//!   sessions from the page's collaboration room.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use collabdrive_core::{AuthContext, VerifiedSession};
//! use collabdrive_permissions::{
//!     EngineConfig, InMemoryAuditSink, InMemoryPermissionStore, NoopRealtime, PermissionEngine,
//! };
//!
//! # async fn example() {
//! let store = Arc::new(InMemoryPermissionStore::new());
//! let engine = PermissionEngine::new(
//!     EngineConfig::default(),
//!     store,
//!     Arc::new(InMemoryAuditSink::new()),
//!     Arc::new(NoopRealtime),
//!     None,
//! );
//!
//! let session = VerifiedSession::new("alice".into(), uuid::Uuid::new_v4());
//! let ctx = AuthContext::from_verified_session(&session);
//! let result = engine
//!     .grant_page_permission(
//!         &ctx,
//!         serde_json::json!({
//!             "targetUserId": "bob",
//!             "pageId": "page-1",
//!             "flags": { "canView": true, "canEdit": false, "canShare": false, "canDelete": false },
//!         }),
//!     )
//!     .await;
//! # let _ = result;
//! # }
//! ```

pub mod audit;
pub mod cache;
pub mod engine;
pub mod error;
pub mod realtime;
pub mod resolver;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use audit::{AuditAction, AuditRecord, AuditResult, AuditSink, InMemoryAuditSink};
pub use cache::{CacheConfig, CacheStats, CacheTier, InMemoryTier, TieredCache};
pub use engine::{
    default_flag_policy, EngineConfig, FlagPolicy, GrantReceipt, PermissionEngine, RevokeOutcome,
};
pub use error::{AuditError, MutationError, RealtimeError, StoreError, TierUnavailable};
pub use realtime::{NoopRealtime, RealtimeService};
pub use resolver::AccessResolver;
pub use store::{GrantUpsert, InMemoryPermissionStore, PermissionStore};
pub use types::{EffectiveAccess, PageOwnership, PermissionFlags, PermissionGrant};

#[cfg(feature = "postgres")]
pub use store::PostgresPermissionStore;

#[cfg(feature = "redis")]
pub use cache::RedisTier;
