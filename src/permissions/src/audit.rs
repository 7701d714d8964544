//! Audit trail for permission mutations
//!
//! Every mutation attempt that can be attributed (success or business
//! denial) produces an [`AuditRecord`]. Records are append-only: this
//! subsystem never mutates or deletes them. Appends are fire-and-forget from
//! the engine's perspective; a failing sink is logged, never propagated.

use crate::error::AuditError;
use crate::types::PermissionFlags;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collabdrive_core::{PageId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Which mutation was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Grant,
    Revoke,
}

/// How the attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditResult {
    Success,
    Denied,
    Error,
}

/// One audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub actor_id: UserId,
    pub target_user_id: UserId,
    pub page_id: PageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_flags: Option<PermissionFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_flags: Option<PermissionFlags>,
    pub result: AuditResult,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: AuditAction,
        actor_id: UserId,
        target_user_id: UserId,
        page_id: PageId,
        result: AuditResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            actor_id,
            target_user_id,
            page_id,
            previous_flags: None,
            new_flags: None,
            result,
            timestamp: Utc::now(),
        }
    }

    pub fn with_previous_flags(mut self, flags: Option<PermissionFlags>) -> Self {
        self.previous_flags = flags;
        self
    }

    pub fn with_new_flags(mut self, flags: Option<PermissionFlags>) -> Self {
        self.new_flags = flags;
        self
    }
}

/// External audit sink contract
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Bounded in-memory audit sink.
///
/// Backs tests and postgres-less deployments; the platform's durable sink
/// implements the same trait.
pub struct InMemoryAuditSink {
    buffer: Arc<RwLock<Vec<AuditRecord>>>,
}

const MAX_BUFFERED_RECORDS: usize = 10_000;

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of the buffered records, oldest first
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.buffer.read().await.clone()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut buffer = self.buffer.write().await;
        buffer.push(record);

        if buffer.len() > MAX_BUFFERED_RECORDS {
            buffer.drain(0..1_000);
        }

        Ok(())
    }
}
