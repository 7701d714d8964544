//! Effective-access resolution
//!
//! Merges the drive-ownership shortcut with explicit grant rows, cache
//! first. Permissions are page-scoped: nothing is inherited from ancestor or
//! sibling pages. Denied results are cached as present `None` values so
//! legitimately-denied users do not hammer the store.

use crate::cache::TieredCache;
use crate::error::StoreError;
use crate::store::PermissionStore;
use crate::types::{access_cache_key, EffectiveAccess};
use collabdrive_core::{PageId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cached value type: present-`None` means "known denied"
pub type CachedAccess = Option<EffectiveAccess>;

/// Resolves (user, page) pairs to effective access
pub struct AccessResolver {
    cache: Arc<TieredCache<CachedAccess>>,
    store: Arc<dyn PermissionStore>,
}

impl AccessResolver {
    pub fn new(cache: Arc<TieredCache<CachedAccess>>, store: Arc<dyn PermissionStore>) -> Self {
        Self { cache, store }
    }

    /// Resolve one pair, failing closed.
    ///
    /// Any store error resolves to `None` (deny); a transient store fault
    /// must never read as "allowed", and the error result is not cached.
    pub async fn resolve(&self, user_id: &UserId, page_id: &PageId) -> Option<EffectiveAccess> {
        match self.try_resolve(user_id, page_id).await {
            Ok(access) => access,
            Err(e) => {
                warn!(
                    "Failing closed for {} on {}: {}",
                    user_id, page_id, e
                );
                None
            }
        }
    }

    /// Resolve one pair, surfacing store faults.
    ///
    /// Mutation paths use this so a caller can tell a retryable
    /// infrastructure fault apart from a legitimate denial.
    pub async fn try_resolve(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<Option<EffectiveAccess>, StoreError> {
        let key = access_cache_key(user_id, page_id);

        if let Some(cached) = self.cache.get(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(cached);
        }

        let access = self.resolve_from_store(user_id, page_id).await?;

        // Cache the result, including a denial, before returning.
        self.cache.set(key, access).await;
        Ok(access)
    }

    /// Resolve many pages for one user.
    ///
    /// One pass over each cache tier for the whole key set, then a store
    /// fall-through per remaining page. Store faults on individual pages
    /// fail closed for those pages only.
    pub async fn resolve_batch(
        &self,
        user_id: &UserId,
        page_ids: &[PageId],
    ) -> HashMap<PageId, Option<EffectiveAccess>> {
        let keys: Vec<String> = page_ids
            .iter()
            .map(|page_id| access_cache_key(user_id, page_id))
            .collect();
        let cached = self.cache.get_many(&keys).await;

        let mut results = HashMap::with_capacity(page_ids.len());
        for (page_id, key) in page_ids.iter().zip(&keys) {
            if let Some(access) = cached.get(key) {
                results.insert(page_id.clone(), *access);
                continue;
            }
            match self.resolve_from_store(user_id, page_id).await {
                Ok(access) => {
                    self.cache.set(key.clone(), access).await;
                    results.insert(page_id.clone(), access);
                }
                Err(e) => {
                    warn!("Failing closed for {} on {}: {}", user_id, page_id, e);
                    results.insert(page_id.clone(), None);
                }
            }
        }
        results
    }

    async fn resolve_from_store(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Result<Option<EffectiveAccess>, StoreError> {
        // Nonexistent pages resolve to no access, indistinguishable from a
        // denial by design.
        let Some(ownership) = self.store.find_page_ownership(page_id).await? else {
            return Ok(None);
        };

        if ownership.owner_id == *user_id {
            return Ok(Some(EffectiveAccess::owner()));
        }

        let grant = self.store.find_grant(user_id, page_id).await?;
        Ok(grant.map(|g| EffectiveAccess::from_flags(&g.flags)))
    }
}
