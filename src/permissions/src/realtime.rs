//! Revocation notification to the realtime collaboration layer
//!
//! Only one capability of the collaboration service is consumed here:
//! evicting a user's live sessions from a page's room. A connected client
//! holds its access in memory, so a revoke is not complete for practical
//! purposes until the room eviction lands; it is still best-effort and never
//! fails the revoke itself.

use crate::error::RealtimeError;
use async_trait::async_trait;
use collabdrive_core::{PageId, UserId};
use tracing::debug;

/// Realtime collaboration service contract
#[async_trait]
pub trait RealtimeService: Send + Sync {
    /// Force the user's live sessions out of the page's collaboration room
    async fn evict_user_from_page_room(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<(), RealtimeError>;
}

/// No-op implementation for deployments without a realtime layer
pub struct NoopRealtime;

#[async_trait]
impl RealtimeService for NoopRealtime {
    async fn evict_user_from_page_room(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<(), RealtimeError> {
        debug!("No realtime layer attached; skipping eviction of {} from {}", user_id, page_id);
        Ok(())
    }
}
