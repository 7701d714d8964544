//! Permission storage: the authoritative records behind the cache
//!
//! The store is the only serialization point for concurrent grants: its
//! uniqueness constraint on `(user_id, page_id)` turns the engine's
//! insert-first strategy into a race-free upsert. Application code never
//! reads-then-writes to decide between insert and update.

use crate::error::StoreError;
use crate::types::{PageOwnership, PermissionFlags, PermissionGrant};
use async_trait::async_trait;
use collabdrive_core::{DriveId, PageId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionStore;

/// Outcome of an upsert: whether a fresh row was created, and the flags the
/// row carried beforehand when it was not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantUpsert {
    pub created: bool,
    pub previous: Option<PermissionFlags>,
}

/// Authoritative permission store
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Fetch the explicit grant row for a (user, page) pair
    async fn find_grant(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<Option<PermissionGrant>, StoreError>;

    /// Resolve a page to its drive and the drive's owner.
    ///
    /// `None` means the page does not exist.
    async fn find_page_ownership(
        &self,
        page_id: &PageId,
    ) -> Result<Option<PageOwnership>, StoreError>;

    /// Whether a user id resolves to a real account
    async fn find_user(&self, user_id: &UserId) -> Result<bool, StoreError>;

    /// Insert-first upsert of a grant row.
    ///
    /// Implementations attempt an insert; a uniqueness conflict from a
    /// concurrent grant is absorbed silently and followed by an explicit
    /// update of the flags (last writer wins).
    async fn upsert_grant(&self, grant: &PermissionGrant) -> Result<GrantUpsert, StoreError>;

    /// Delete the grant row for a pair, returning the flags it carried.
    ///
    /// `None` means there was nothing to delete.
    async fn delete_grant(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<Option<PermissionFlags>, StoreError>;

    /// Every page belonging to a drive (used by drive-wide cache invalidation)
    async fn pages_in_drive(&self, drive_id: &DriveId) -> Result<Vec<PageId>, StoreError>;
}

#[derive(Default)]
struct InMemoryState {
    users: HashSet<UserId>,
    drive_owners: HashMap<DriveId, UserId>,
    page_drives: HashMap<PageId, DriveId>,
    grants: HashMap<(UserId, PageId), PermissionGrant>,
}

/// In-memory permission store.
///
/// Backs tests and single-node deployments. A single `RwLock` over the whole
/// state plays the role of the database's row-level consistency: upserts take
/// one write lock, so concurrent grants serialize exactly as they would
/// against the unique constraint.
pub struct InMemoryPermissionStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryState::default())),
        }
    }

    /// Register an account
    pub async fn add_user(&self, user_id: UserId) {
        self.state.write().await.users.insert(user_id);
    }

    /// Register a drive with its owner (the owner is also registered as a user)
    pub async fn add_drive(&self, drive_id: DriveId, owner_id: UserId) {
        let mut state = self.state.write().await;
        state.users.insert(owner_id.clone());
        state.drive_owners.insert(drive_id, owner_id);
    }

    /// Register a page inside a drive
    pub async fn add_page(&self, page_id: PageId, drive_id: DriveId) {
        self.state.write().await.page_drives.insert(page_id, drive_id);
    }

    /// Number of stored grant rows
    pub async fn grant_count(&self) -> usize {
        self.state.read().await.grants.len()
    }
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn find_grant(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<Option<PermissionGrant>, StoreError> {
        let state = self.state.read().await;
        Ok(state.grants.get(&(user_id.clone(), page_id.clone())).cloned())
    }

    async fn find_page_ownership(
        &self,
        page_id: &PageId,
    ) -> Result<Option<PageOwnership>, StoreError> {
        let state = self.state.read().await;
        let Some(drive_id) = state.page_drives.get(page_id) else {
            return Ok(None);
        };
        let owner_id = state
            .drive_owners
            .get(drive_id)
            .ok_or_else(|| StoreError::Database(format!("drive {} has no owner row", drive_id)))?;
        Ok(Some(PageOwnership {
            drive_id: drive_id.clone(),
            owner_id: owner_id.clone(),
        }))
    }

    async fn find_user(&self, user_id: &UserId) -> Result<bool, StoreError> {
        Ok(self.state.read().await.users.contains(user_id))
    }

    async fn upsert_grant(&self, grant: &PermissionGrant) -> Result<GrantUpsert, StoreError> {
        // One write lock for the whole insert-or-update, mirroring the
        // database constraint as the serialization point.
        let mut state = self.state.write().await;
        let key = (grant.user_id.clone(), grant.page_id.clone());
        match state.grants.insert(key, grant.clone()) {
            None => Ok(GrantUpsert {
                created: true,
                previous: None,
            }),
            Some(existing) => Ok(GrantUpsert {
                created: false,
                previous: Some(existing.flags),
            }),
        }
    }

    async fn delete_grant(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<Option<PermissionFlags>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state
            .grants
            .remove(&(user_id.clone(), page_id.clone()))
            .map(|g| g.flags))
    }

    async fn pages_in_drive(&self, drive_id: &DriveId) -> Result<Vec<PageId>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .page_drives
            .iter()
            .filter(|(_, d)| *d == drive_id)
            .map(|(p, _)| p.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(user: &str, page: &str, flags: PermissionFlags) -> PermissionGrant {
        PermissionGrant::new(user.into(), page.into(), flags, "granter".into())
    }

    #[tokio::test]
    async fn test_upsert_creates_then_overwrites() {
        let store = InMemoryPermissionStore::new();

        let first = store
            .upsert_grant(&grant("u1", "p1", PermissionFlags::view_only()))
            .await
            .unwrap();
        assert!(first.created);
        assert!(first.previous.is_none());

        let second = store
            .upsert_grant(&grant("u1", "p1", PermissionFlags::all()))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.previous, Some(PermissionFlags::view_only()));

        // Flags overwritten, not merged; still one row.
        let row = store
            .find_grant(&"u1".into(), &"p1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.flags, PermissionFlags::all());
        assert_eq!(store.grant_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_reports_previous_flags() {
        let store = InMemoryPermissionStore::new();
        store
            .upsert_grant(&grant("u1", "p1", PermissionFlags::view_only()))
            .await
            .unwrap();

        let removed = store.delete_grant(&"u1".into(), &"p1".into()).await.unwrap();
        assert_eq!(removed, Some(PermissionFlags::view_only()));

        let again = store.delete_grant(&"u1".into(), &"p1".into()).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_page_ownership_lookup() {
        let store = InMemoryPermissionStore::new();
        store.add_drive("d1".into(), "owner".into()).await;
        store.add_page("p1".into(), "d1".into()).await;

        let ownership = store
            .find_page_ownership(&"p1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ownership.owner_id, UserId::from("owner"));
        assert_eq!(ownership.drive_id, DriveId::from("d1"));

        assert!(store.find_page_ownership(&"missing".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pages_in_drive() {
        let store = InMemoryPermissionStore::new();
        store.add_drive("d1".into(), "owner".into()).await;
        store.add_page("p1".into(), "d1".into()).await;
        store.add_page("p2".into(), "d1".into()).await;
        store.add_page("elsewhere".into(), "d2".into()).await;

        let mut pages = store.pages_in_drive(&"d1".into()).await.unwrap();
        pages.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(pages, vec![PageId::from("p1"), PageId::from("p2")]);
    }
}
