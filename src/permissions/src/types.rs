//! Core permission types
//!
//! Flags are independent booleans: no flag implies another, and the resolver
//! checks each one explicitly (deny by default). "No access" is the absence
//! of an [`EffectiveAccess`], never a zeroed struct, so callers can
//! short-circuit on `None` and the wire cannot distinguish "denied" from
//! "does not exist".

use chrono::{DateTime, Utc};
use collabdrive_core::{DriveId, PageId, UserId};
use serde::{Deserialize, Serialize};

/// Independent permission flags stored on a grant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionFlags {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_share: bool,
    pub can_delete: bool,
}

impl PermissionFlags {
    /// All four flags set
    pub fn all() -> Self {
        Self {
            can_view: true,
            can_edit: true,
            can_share: true,
            can_delete: true,
        }
    }

    /// View-only flags
    pub fn view_only() -> Self {
        Self {
            can_view: true,
            ..Self::default()
        }
    }
}

/// A stored grant row: one user's explicit flags on one page.
///
/// At most one row exists per `(user_id, page_id)`; the store's uniqueness
/// constraint enforces it. Subsequent grants to the same pair overwrite the
/// flags, they are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub user_id: UserId,
    pub page_id: PageId,
    #[serde(flatten)]
    pub flags: PermissionFlags,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

impl PermissionGrant {
    pub fn new(user_id: UserId, page_id: PageId, flags: PermissionFlags, granted_by: UserId) -> Self {
        Self {
            user_id,
            page_id,
            flags,
            granted_by,
            granted_at: Utc::now(),
        }
    }
}

/// Ownership record for a page: the drive it lives in and that drive's owner.
///
/// The owner holds every permission on every page of the drive without a
/// stored grant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOwnership {
    pub drive_id: DriveId,
    pub owner_id: UserId,
}

/// Resolved access for a (user, page) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveAccess {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_share: bool,
    pub can_delete: bool,
    pub is_owner: bool,
}

impl EffectiveAccess {
    /// The implicit, unconditional access of the owning drive's owner
    pub fn owner() -> Self {
        Self {
            can_view: true,
            can_edit: true,
            can_share: true,
            can_delete: true,
            is_owner: true,
        }
    }

    /// Access derived from an explicit grant row, flag for flag
    pub fn from_flags(flags: &PermissionFlags) -> Self {
        Self {
            can_view: flags.can_view,
            can_edit: flags.can_edit,
            can_share: flags.can_share,
            can_delete: flags.can_delete,
            is_owner: false,
        }
    }
}

/// Cache key for one (user, page) resolution
pub fn access_cache_key(user_id: &UserId, page_id: &PageId) -> String {
    format!("perms:{}:{}", user_id, page_id)
}

/// Cache key prefix covering every page for one user
pub fn user_cache_prefix(user_id: &UserId) -> String {
    format!("perms:{}:", user_id)
}

/// Match pattern covering one page across every user
pub fn page_cache_pattern(page_id: &PageId) -> String {
    format!("perms:*:{}", page_id)
}
