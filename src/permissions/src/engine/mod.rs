//! Permission engine: the public surface of the subsystem
//!
//! Orchestrates resolution, the two-tier cache, the authoritative store, and
//! the mutation pipelines with audit logging and realtime revocation.
//!
//! ```text
//! caller ── reads ──→ AccessResolver ──→ TieredCache ──→ PermissionStore
//!        ── writes ─→ grant/revoke pipeline ──→ PermissionStore
//!                        │                         │
//!                        ├─ invalidate cache (awaited, before responding)
//!                        ├─ audit append (spawned, fire-and-forget)
//!                        └─ room eviction (spawned, best-effort, revoke only)
//! ```
//!
//! Writes never apply optimistically: they round-trip to the store, and the
//! store's uniqueness constraint on `(user_id, page_id)` is the
//! serialization point under concurrent grants.

use crate::audit::{AuditAction, AuditRecord, AuditResult, AuditSink};
use crate::cache::{CacheConfig, CacheTier, CacheStats, TieredCache};
use crate::error::{MutationError, StoreError};
use crate::realtime::RealtimeService;
use crate::resolver::{AccessResolver, CachedAccess};
use crate::store::PermissionStore;
use crate::types::{
    access_cache_key, page_cache_pattern, user_cache_prefix, EffectiveAccess, PermissionFlags,
    PermissionGrant,
};
use collabdrive_core::{AuthContext, DriveId, PageId, UserId};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pluggable validity check for requested flag combinations.
///
/// The set of nonsensical combinations is product policy, not engine logic;
/// deployments swap the function without touching the pipeline.
pub type FlagPolicy = Arc<dyn Fn(&PermissionFlags) -> bool + Send + Sync>;

/// Default combination policy: edit, share, or delete without view is
/// rejected. An all-false grant stays valid (an explicit "no rights" row).
pub fn default_flag_policy(flags: &PermissionFlags) -> bool {
    if (flags.can_edit || flags.can_share || flags.can_delete) && !flags.can_view {
        return false;
    }
    true
}

/// Permission engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Two-tier cache configuration
    pub cache_config: CacheConfig,

    /// Flag-combination validity policy
    pub flag_policy: FlagPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            flag_policy: Arc::new(default_flag_policy),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("cache_config", &self.cache_config)
            .finish_non_exhaustive()
    }
}

/// Successful grant application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantReceipt {
    pub target_user_id: UserId,
    pub page_id: PageId,
    /// The flags now in force (overwritten, never merged)
    pub flags: PermissionFlags,
    /// Whether a fresh row was created (false: an existing grant was updated)
    pub created: bool,
    /// Flags the pair carried before, when any
    pub previous: Option<PermissionFlags>,
}

/// Successful revoke application.
///
/// `AlreadyAbsent` is a success: revocation is idempotent, and a retrying
/// caller must never see failure because the revoke already took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked { previous: PermissionFlags },
    AlreadyAbsent,
}

/// Boundary shape of a grant request; untyped until decoded here
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GrantInput {
    target_user_id: UserId,
    page_id: PageId,
    flags: PermissionFlags,
}

/// Boundary shape of a revoke request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RevokeInput {
    target_user_id: UserId,
    page_id: PageId,
}

/// Main permission engine
pub struct PermissionEngine {
    resolver: AccessResolver,
    cache: Arc<TieredCache<CachedAccess>>,
    store: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditSink>,
    realtime: Arc<dyn RealtimeService>,
    flag_policy: FlagPolicy,
}

impl PermissionEngine {
    /// Assemble the engine over its collaborators.
    ///
    /// `shared_tier` is the optional distributed cache; without it the cache
    /// runs memory-only, which is also where it degrades to when the tier is
    /// unreachable.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn PermissionStore>,
        audit: Arc<dyn AuditSink>,
        realtime: Arc<dyn RealtimeService>,
        shared_tier: Option<Arc<dyn CacheTier>>,
    ) -> Self {
        let has_shared_tier = shared_tier.is_some();
        let cache = TieredCache::new(config.cache_config.clone(), shared_tier);
        let resolver = AccessResolver::new(cache.clone(), store.clone());

        info!(
            "PermissionEngine initialized (l1_capacity={}, shared_tier={})",
            config.cache_config.capacity, has_shared_tier,
        );

        Self {
            resolver,
            cache,
            store,
            audit,
            realtime,
            flag_policy: config.flag_policy,
        }
    }

    /// Effective access for one (user, page) pair; `None` is no access.
    pub async fn resolve_access(
        &self,
        user_id: &UserId,
        page_id: &PageId,
    ) -> Option<EffectiveAccess> {
        self.resolver.resolve(user_id, page_id).await
    }

    /// Effective access for one user over many pages.
    pub async fn resolve_access_batch(
        &self,
        user_id: &UserId,
        page_ids: &[PageId],
    ) -> HashMap<PageId, Option<EffectiveAccess>> {
        self.resolver.resolve_batch(user_id, page_ids).await
    }

    /// Grant or overwrite a target user's flags on a page.
    ///
    /// The actor comes from `ctx` only; `input` is the untyped boundary
    /// payload `{ targetUserId, pageId, flags: {canView, canEdit, canShare,
    /// canDelete} }`.
    pub async fn grant_page_permission(
        &self,
        ctx: &AuthContext,
        input: serde_json::Value,
    ) -> Result<GrantReceipt, MutationError> {
        let input: GrantInput = decode_input(input)?;
        let actor = ctx.actor_id().clone();

        let result = self.apply_grant(&actor, &input).await;

        match &result {
            Ok(receipt) => {
                debug!(
                    "{} granted {:?} to {} on {}",
                    actor, receipt.flags, receipt.target_user_id, receipt.page_id
                );
                self.record_audit(
                    AuditRecord::new(
                        AuditAction::Grant,
                        actor,
                        input.target_user_id,
                        input.page_id,
                        AuditResult::Success,
                    )
                    .with_previous_flags(receipt.previous)
                    .with_new_flags(Some(receipt.flags)),
                );
            }
            Err(e) => {
                self.record_audit(
                    AuditRecord::new(
                        AuditAction::Grant,
                        actor,
                        input.target_user_id,
                        input.page_id,
                        mutation_audit_result(e),
                    )
                    .with_new_flags(Some(input.flags)),
                );
            }
        }

        result
    }

    /// Revoke a target user's grant on a page; idempotent.
    pub async fn revoke_page_permission(
        &self,
        ctx: &AuthContext,
        input: serde_json::Value,
    ) -> Result<RevokeOutcome, MutationError> {
        let input: RevokeInput = decode_input(input)?;
        let actor = ctx.actor_id().clone();

        let result = self.apply_revoke(&actor, &input).await;

        match &result {
            Ok(outcome) => {
                let previous = match outcome {
                    RevokeOutcome::Revoked { previous } => Some(*previous),
                    RevokeOutcome::AlreadyAbsent => None,
                };
                debug!(
                    "{} revoked {} on {} (already_absent={})",
                    actor,
                    input.target_user_id,
                    input.page_id,
                    previous.is_none()
                );
                self.record_audit(
                    AuditRecord::new(
                        AuditAction::Revoke,
                        actor,
                        input.target_user_id,
                        input.page_id,
                        AuditResult::Success,
                    )
                    .with_previous_flags(previous),
                );
            }
            Err(e) => {
                self.record_audit(AuditRecord::new(
                    AuditAction::Revoke,
                    actor,
                    input.target_user_id,
                    input.page_id,
                    mutation_audit_result(e),
                ));
            }
        }

        result
    }

    /// Drop every cached resolution for a user.
    ///
    /// Called by external flows that change a user's standing wholesale
    /// (account deactivation, drive membership changes).
    pub async fn invalidate_for_user(&self, user_id: &UserId) {
        self.cache
            .delete_matching(&format!("{}*", user_cache_prefix(user_id)))
            .await;
    }

    /// Drop every cached resolution touching a drive's pages.
    ///
    /// Ownership transfer and page deletion are external responsibilities,
    /// but they must call this so the implicit-owner shortcut cannot serve
    /// stale answers.
    pub async fn invalidate_for_drive(&self, drive_id: &DriveId) -> Result<(), StoreError> {
        let pages = self.store.pages_in_drive(drive_id).await?;
        for page_id in &pages {
            self.cache
                .delete_matching(&page_cache_pattern(page_id))
                .await;
        }
        debug!("Invalidated cache for {} pages of drive {}", pages.len(), drive_id);
        Ok(())
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn apply_grant(
        &self,
        actor: &UserId,
        input: &GrantInput,
    ) -> Result<GrantReceipt, MutationError> {
        if !(self.flag_policy)(&input.flags) {
            return Err(MutationError::InvalidPermissionCombination);
        }

        // Actors cannot launder privileges through self-targeting; rejected
        // before any store contact.
        if input.target_user_id == *actor {
            return Err(MutationError::SelfPermissionDenied);
        }

        self.ensure_actor_can_share(actor, &input.page_id).await?;

        if !self.store.find_user(&input.target_user_id).await? {
            return Err(MutationError::UserNotFound);
        }

        let grant = PermissionGrant::new(
            input.target_user_id.clone(),
            input.page_id.clone(),
            input.flags,
            actor.clone(),
        );
        let upsert = self.store.upsert_grant(&grant).await?;

        // Invalidate, then respond: a racing reader must never observe this
        // call's success alongside a pre-mutation cache entry.
        self.cache
            .delete(&access_cache_key(&input.target_user_id, &input.page_id))
            .await;

        Ok(GrantReceipt {
            target_user_id: input.target_user_id.clone(),
            page_id: input.page_id.clone(),
            flags: input.flags,
            created: upsert.created,
            previous: upsert.previous,
        })
    }

    async fn apply_revoke(
        &self,
        actor: &UserId,
        input: &RevokeInput,
    ) -> Result<RevokeOutcome, MutationError> {
        if input.target_user_id == *actor {
            return Err(MutationError::SelfPermissionDenied);
        }

        self.ensure_actor_can_share(actor, &input.page_id).await?;

        let previous = self
            .store
            .delete_grant(&input.target_user_id, &input.page_id)
            .await?;

        self.cache
            .delete(&access_cache_key(&input.target_user_id, &input.page_id))
            .await;

        match previous {
            Some(previous) => {
                // The target's live sessions hold their access in memory;
                // push them out of the room rather than waiting for a
                // reconnect to notice the grant is gone.
                self.dispatch_eviction(input.target_user_id.clone(), input.page_id.clone());
                Ok(RevokeOutcome::Revoked { previous })
            }
            None => Ok(RevokeOutcome::AlreadyAbsent),
        }
    }

    /// Combined existence and authorization check.
    ///
    /// "Page does not exist" and "actor cannot share this page" produce the
    /// identical `PageNotAccessible`; splitting them would let callers
    /// enumerate pages by probing authorization failures.
    async fn ensure_actor_can_share(
        &self,
        actor: &UserId,
        page_id: &PageId,
    ) -> Result<(), MutationError> {
        match self.resolver.try_resolve(actor, page_id).await? {
            Some(access) if access.can_share => Ok(()),
            _ => Err(MutationError::PageNotAccessible),
        }
    }

    fn record_audit(&self, record: AuditRecord) {
        let sink = Arc::clone(&self.audit);
        tokio::spawn(async move {
            if let Err(e) = sink.append(record).await {
                warn!("Audit append failed, dropping record: {}", e);
            }
        });
    }

    fn dispatch_eviction(&self, user_id: UserId, page_id: PageId) {
        let realtime = Arc::clone(&self.realtime);
        tokio::spawn(async move {
            if let Err(e) = realtime
                .evict_user_from_page_room(&user_id, &page_id)
                .await
            {
                warn!(
                    "Room eviction of {} from {} failed: {}",
                    user_id, page_id, e
                );
            }
        });
    }
}

fn decode_input<T: serde::de::DeserializeOwned>(
    input: serde_json::Value,
) -> Result<T, MutationError> {
    serde_json::from_value(input).map_err(|e| {
        // No trustworthy ids exist in a payload that failed decoding, so the
        // rejection is logged rather than audited.
        debug!("Rejected malformed mutation input: {}", e);
        MutationError::ValidationFailed(e.to_string())
    })
}

fn mutation_audit_result(err: &MutationError) -> AuditResult {
    if err.is_retryable() {
        AuditResult::Error
    } else {
        AuditResult::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::cache::InMemoryTier;
    use crate::error::RealtimeError;
    use crate::store::InMemoryPermissionStore;
    use async_trait::async_trait;
    use collabdrive_core::VerifiedSession;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    /// Recording realtime double
    struct RecordingRealtime {
        evictions: RwLock<Vec<(UserId, PageId)>>,
    }

    impl RecordingRealtime {
        fn new() -> Self {
            Self {
                evictions: RwLock::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RealtimeService for RecordingRealtime {
        async fn evict_user_from_page_room(
            &self,
            user_id: &UserId,
            page_id: &PageId,
        ) -> Result<(), RealtimeError> {
            self.evictions
                .write()
                .await
                .push((user_id.clone(), page_id.clone()));
            Ok(())
        }
    }

    struct Harness {
        engine: Arc<PermissionEngine>,
        store: Arc<InMemoryPermissionStore>,
        audit: Arc<InMemoryAuditSink>,
        realtime: Arc<RecordingRealtime>,
        tier: Arc<InMemoryTier>,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryPermissionStore::new());
        store.add_drive("d1".into(), "owner".into()).await;
        store.add_page("p1".into(), "d1".into()).await;
        store.add_user("target".into()).await;
        store.add_user("outsider".into()).await;

        let audit = Arc::new(InMemoryAuditSink::new());
        let realtime = Arc::new(RecordingRealtime::new());
        let tier = Arc::new(InMemoryTier::new());
        let engine = Arc::new(PermissionEngine::new(
            EngineConfig::default(),
            store.clone(),
            audit.clone(),
            realtime.clone(),
            Some(tier.clone() as Arc<dyn CacheTier>),
        ));

        Harness {
            engine,
            store,
            audit,
            realtime,
            tier,
        }
    }

    fn ctx_for(user: &str) -> AuthContext {
        let session = VerifiedSession::new(user.into(), Uuid::new_v4());
        AuthContext::from_verified_session(&session)
    }

    fn grant_body(target: &str, page: &str, flags: serde_json::Value) -> serde_json::Value {
        json!({ "targetUserId": target, "pageId": page, "flags": flags })
    }

    fn view_only_flags() -> serde_json::Value {
        json!({ "canView": true, "canEdit": false, "canShare": false, "canDelete": false })
    }

    /// Spawned side effects land asynchronously; poll briefly.
    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within deadline");
    }

    #[tokio::test]
    async fn test_owner_grants_and_target_resolves() {
        let h = harness().await;

        let receipt = h
            .engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await
            .unwrap();
        assert!(receipt.created);
        assert_eq!(receipt.flags, PermissionFlags::view_only());

        let access = h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .unwrap();
        assert!(access.can_view);
        assert!(!access.can_edit && !access.can_share && !access.can_delete);
        assert!(!access.is_owner);
    }

    #[tokio::test]
    async fn test_malformed_input_is_validation_failed() {
        let h = harness().await;

        for bad in [
            json!({ "pageId": "p1" }),
            json!({ "targetUserId": "target", "pageId": "p1", "flags": { "canView": "yes" } }),
            json!({ "targetUserId": "target", "pageId": "p1", "flags": {}, "extra": 1 }),
            json!("not an object"),
        ] {
            let err = h
                .engine
                .grant_page_permission(&ctx_for("owner"), bad)
                .await
                .unwrap_err();
            assert!(matches!(err, MutationError::ValidationFailed(_)));
        }
    }

    #[tokio::test]
    async fn test_nonsensical_flag_combination_rejected() {
        let h = harness().await;

        let err = h
            .engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body(
                    "target",
                    "p1",
                    json!({ "canView": false, "canEdit": false, "canShare": false, "canDelete": true }),
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::InvalidPermissionCombination);
    }

    #[tokio::test]
    async fn test_self_grant_rejected_without_store_contact() {
        let h = harness().await;

        let err = h
            .engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("owner", "p1", view_only_flags()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::SelfPermissionDenied);
        assert_eq!(h.store.grant_count().await, 0);

        let err = h
            .engine
            .revoke_page_permission(
                &ctx_for("owner"),
                json!({ "targetUserId": "owner", "pageId": "p1" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::SelfPermissionDenied);
    }

    #[tokio::test]
    async fn test_missing_page_and_unshareable_page_are_indistinguishable() {
        let h = harness().await;

        // outsider has no rights on p1; ghost-page does not exist.
        let on_real_page = h
            .engine
            .grant_page_permission(
                &ctx_for("outsider"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await
            .unwrap_err();
        let on_ghost_page = h
            .engine
            .grant_page_permission(
                &ctx_for("outsider"),
                grant_body("target", "ghost-page", view_only_flags()),
            )
            .await
            .unwrap_err();

        assert_eq!(on_real_page, MutationError::PageNotAccessible);
        assert_eq!(on_ghost_page, on_real_page);
    }

    #[tokio::test]
    async fn test_unknown_target_is_user_not_found() {
        let h = harness().await;

        let err = h
            .engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("nobody", "p1", view_only_flags()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::UserNotFound);
    }

    #[tokio::test]
    async fn test_regrant_overwrites_flags_and_reports_previous() {
        let h = harness().await;
        let ctx = ctx_for("owner");

        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();

        let receipt = h
            .engine
            .grant_page_permission(
                &ctx,
                grant_body(
                    "target",
                    "p1",
                    json!({ "canView": true, "canEdit": true, "canShare": false, "canDelete": false }),
                ),
            )
            .await
            .unwrap();

        assert!(!receipt.created);
        assert_eq!(receipt.previous, Some(PermissionFlags::view_only()));
        assert_eq!(h.store.grant_count().await, 1);
    }

    #[tokio::test]
    async fn test_grantee_with_share_flag_can_grant_onward() {
        let h = harness().await;

        h.engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body(
                    "target",
                    "p1",
                    json!({ "canView": true, "canEdit": false, "canShare": true, "canDelete": false }),
                ),
            )
            .await
            .unwrap();

        // target now holds canShare and may grant outsider view access.
        h.engine
            .grant_page_permission(
                &ctx_for("target"),
                grant_body("outsider", "p1", view_only_flags()),
            )
            .await
            .unwrap();

        assert!(h
            .engine
            .resolve_access(&"outsider".into(), &"p1".into())
            .await
            .unwrap()
            .can_view);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let h = harness().await;
        let ctx = ctx_for("owner");

        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();

        let body = json!({ "targetUserId": "target", "pageId": "p1" });
        let first = h
            .engine
            .revoke_page_permission(&ctx, body.clone())
            .await
            .unwrap();
        assert_eq!(
            first,
            RevokeOutcome::Revoked {
                previous: PermissionFlags::view_only()
            }
        );

        let second = h.engine.revoke_page_permission(&ctx, body).await.unwrap();
        assert_eq!(second, RevokeOutcome::AlreadyAbsent);
        assert_eq!(h.store.grant_count().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_evicts_target_from_room() {
        let h = harness().await;
        let ctx = ctx_for("owner");

        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();
        h.engine
            .revoke_page_permission(&ctx, json!({ "targetUserId": "target", "pageId": "p1" }))
            .await
            .unwrap();

        let realtime = h.realtime.clone();
        wait_for(|| {
            let realtime = realtime.clone();
            async move { !realtime.evictions.read().await.is_empty() }
        })
        .await;

        let evictions = h.realtime.evictions.read().await;
        assert_eq!(evictions[0], ("target".into(), "p1".into()));
    }

    #[tokio::test]
    async fn test_idempotent_revoke_does_not_evict() {
        let h = harness().await;
        let ctx = ctx_for("owner");

        h.engine
            .revoke_page_permission(&ctx, json!({ "targetUserId": "target", "pageId": "p1" }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.realtime.evictions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_coherent_immediately_after_mutations() {
        let h = harness().await;
        let ctx = ctx_for("owner");
        let target: UserId = "target".into();
        let page: PageId = "p1".into();

        // Prime a denial into both tiers.
        assert!(h.engine.resolve_access(&target, &page).await.is_none());

        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();
        assert!(h.engine.resolve_access(&target, &page).await.is_some());

        h.engine
            .revoke_page_permission(&ctx, json!({ "targetUserId": "target", "pageId": "p1" }))
            .await
            .unwrap();
        assert!(h.engine.resolve_access(&target, &page).await.is_none());
    }

    #[tokio::test]
    async fn test_coherence_across_engines_sharing_a_tier() {
        let h = harness().await;

        // Second engine over the same store and shared tier: another process.
        let other = PermissionEngine::new(
            EngineConfig::default(),
            h.store.clone(),
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(crate::realtime::NoopRealtime),
            Some(h.tier.clone() as Arc<dyn CacheTier>),
        );

        let target: UserId = "target".into();
        let page: PageId = "p1".into();

        // The other process primes its caches with the pre-mutation denial.
        assert!(other.resolve_access(&target, &page).await.is_none());

        h.engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await
            .unwrap();

        // Its L1 still holds the stale denial, but the shared tier was
        // invalidated before the grant returned; a fresh engine sees through.
        let fresh = PermissionEngine::new(
            EngineConfig::default(),
            h.store.clone(),
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(crate::realtime::NoopRealtime),
            Some(h.tier.clone() as Arc<dyn CacheTier>),
        );
        assert!(fresh.resolve_access(&target, &page).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_grants_leave_one_row_last_writer_wins() {
        let h = harness().await;

        let flag_sets: Vec<PermissionFlags> = (0..8)
            .map(|i| PermissionFlags {
                can_view: true,
                can_edit: i % 2 == 0,
                can_share: i % 4 < 2,
                can_delete: false,
            })
            .collect();

        let mut handles = Vec::new();
        for flags in flag_sets.clone() {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .grant_page_permission(
                        &ctx_for("owner"),
                        grant_body("target", "p1", serde_json::to_value(flags).unwrap()),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(h.store.grant_count().await, 1);
        let row = h
            .store
            .find_grant(&"target".into(), &"p1".into())
            .await
            .unwrap()
            .unwrap();
        // Exactly one of the requested sets, never a merge.
        assert!(flag_sets.contains(&row.flags));
    }

    #[tokio::test]
    async fn test_mutations_succeed_with_shared_tier_down() {
        let h = harness().await;
        h.tier.set_available(false);

        let ctx = ctx_for("owner");
        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();
        assert!(h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .is_some());
        h.engine
            .revoke_page_permission(&ctx, json!({ "targetUserId": "target", "pageId": "p1" }))
            .await
            .unwrap();
        assert!(h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .is_none());
    }

    /// Store whose reads all fail, for infrastructure-fault paths.
    struct DownStore;

    #[async_trait]
    impl crate::store::PermissionStore for DownStore {
        async fn find_grant(
            &self,
            _: &UserId,
            _: &PageId,
        ) -> Result<Option<PermissionGrant>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn find_page_ownership(
            &self,
            _: &PageId,
        ) -> Result<Option<crate::types::PageOwnership>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn find_user(&self, _: &UserId) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn upsert_grant(
            &self,
            _: &PermissionGrant,
        ) -> Result<crate::store::GrantUpsert, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn delete_grant(
            &self,
            _: &UserId,
            _: &PageId,
        ) -> Result<Option<PermissionFlags>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn pages_in_drive(&self, _: &DriveId) -> Result<Vec<PageId>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_fault_surfaces_as_retryable_error() {
        let engine = PermissionEngine::new(
            EngineConfig::default(),
            Arc::new(DownStore),
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(crate::realtime::NoopRealtime),
            None,
        );

        let err = engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await
            .unwrap_err();

        // Distinct from every business denial, and the only retryable kind.
        assert!(matches!(err, MutationError::Store(_)));
        assert!(err.is_retryable());
        assert_eq!(mutation_audit_result(&err), AuditResult::Error);
        assert_eq!(
            mutation_audit_result(&MutationError::PageNotAccessible),
            AuditResult::Denied
        );

        // A read against the same dead store fails closed instead.
        assert!(engine
            .resolve_access(&"owner".into(), &"p1".into())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_denied_attempts_are_audited() {
        let h = harness().await;

        let _ = h
            .engine
            .grant_page_permission(
                &ctx_for("outsider"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await;

        let audit = h.audit.clone();
        wait_for(|| {
            let audit = audit.clone();
            async move { !audit.records().await.is_empty() }
        })
        .await;

        let records = h.audit.records().await;
        assert_eq!(records[0].action, AuditAction::Grant);
        assert_eq!(records[0].result, AuditResult::Denied);
        assert_eq!(records[0].actor_id, "outsider".into());
    }

    #[tokio::test]
    async fn test_successful_mutations_are_audited_with_flag_history() {
        let h = harness().await;
        let ctx = ctx_for("owner");

        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();
        h.engine
            .revoke_page_permission(&ctx, json!({ "targetUserId": "target", "pageId": "p1" }))
            .await
            .unwrap();

        let audit = h.audit.clone();
        wait_for(|| {
            let audit = audit.clone();
            async move { audit.records().await.len() >= 2 }
        })
        .await;

        let records = h.audit.records().await;
        let grant = records
            .iter()
            .find(|r| r.action == AuditAction::Grant)
            .unwrap();
        assert_eq!(grant.result, AuditResult::Success);
        assert_eq!(grant.new_flags, Some(PermissionFlags::view_only()));
        assert!(grant.previous_flags.is_none());

        let revoke = records
            .iter()
            .find(|r| r.action == AuditAction::Revoke)
            .unwrap();
        assert_eq!(revoke.result, AuditResult::Success);
        assert_eq!(revoke.previous_flags, Some(PermissionFlags::view_only()));
    }

    #[tokio::test]
    async fn test_invalidate_for_user_drops_cached_entries() {
        let h = harness().await;

        h.engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await
            .unwrap();
        assert!(h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .is_some());

        // Pull the row out from under the cache, then invalidate.
        h.store
            .delete_grant(&"target".into(), &"p1".into())
            .await
            .unwrap();
        h.engine.invalidate_for_user(&"target".into()).await;

        assert!(h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_invalidate_for_drive_covers_every_user() {
        let h = harness().await;
        let ctx = ctx_for("owner");

        h.engine
            .grant_page_permission(&ctx, grant_body("target", "p1", view_only_flags()))
            .await
            .unwrap();
        assert!(h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .is_some());
        assert!(h
            .engine
            .resolve_access(&"owner".into(), &"p1".into())
            .await
            .is_some());

        h.store
            .delete_grant(&"target".into(), &"p1".into())
            .await
            .unwrap();
        h.engine.invalidate_for_drive(&"d1".into()).await.unwrap();

        assert!(h
            .engine
            .resolve_access(&"target".into(), &"p1".into())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_resolution_matches_single_resolution() {
        let h = harness().await;
        h.store.add_page("p2".into(), "d1".into()).await;

        h.engine
            .grant_page_permission(
                &ctx_for("owner"),
                grant_body("target", "p1", view_only_flags()),
            )
            .await
            .unwrap();

        let pages = vec![PageId::from("p1"), PageId::from("p2")];
        let batch = h.engine.resolve_access_batch(&"target".into(), &pages).await;

        assert_eq!(
            batch[&PageId::from("p1")],
            h.engine.resolve_access(&"target".into(), &"p1".into()).await
        );
        assert_eq!(
            batch[&PageId::from("p2")],
            h.engine.resolve_access(&"target".into(), &"p2".into()).await
        );
    }
}
