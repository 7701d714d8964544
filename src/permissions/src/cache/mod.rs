//! Two-tier keyed cache with graceful degradation
//!
//! One generic implementation serves every consumer that needs the
//! local + distributed pattern (permission resolution here; rate limiting
//! and tree caches elsewhere): a bounded, TTL'd in-process map (L1) in front
//! of an optional shared tier (L2). Reads fall through L1 → L2 and repopulate
//! the closer tier; writes populate both.
//!
//! The degradation contract is enforced centrally: an unreachable L2 is a
//! soft miss / no-op, logged and never surfaced. This cache sits on the
//! authorization hot path, so no operation may fail because the shared tier
//! is down.

use crate::error::TierUnavailable;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisTier;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of L1 entries; inserting past the bound evicts the
    /// least-recently-set entry
    pub capacity: usize,

    /// Time-to-live for cached values
    pub ttl: Duration,

    /// Interval of the background sweep that drops expired L1 entries
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Shared (distributed) cache tier.
///
/// Every method reports unreachability as [`TierUnavailable`] instead of
/// panicking or hanging; [`TieredCache`] converts that signal into a soft
/// miss so callers never see it.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TierUnavailable>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TierUnavailable>;

    async fn del(&self, key: &str) -> Result<(), TierUnavailable>;

    /// Single multi-key fetch; result is positional, one slot per key
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, TierUnavailable>;

    /// Delete every key matching a `*`-wildcard pattern
    async fn del_matching(&self, pattern: &str) -> Result<(), TierUnavailable>;
}

/// Match a key against a pattern where `*` spans any run of characters.
pub(crate) fn key_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return part.is_empty() || rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

struct Entry<V> {
    value: V,
    cached_at: Instant,
    ttl: Duration,
    /// Insertion order, for least-recently-set eviction
    seq: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Generic two-tier cache.
///
/// `V` is any serde-serializable value; consumers caching a nullable result
/// use `Option<T>` as `V`, which keeps "cached as absent" distinct from
/// "not cached".
pub struct TieredCache<V> {
    l1: DashMap<String, Entry<V>>,
    l2: Option<Arc<dyn CacheTier>>,
    config: CacheConfig,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create the cache and start its background sweep task.
    ///
    /// The sweeper holds only a weak reference; dropping the last `Arc`
    /// stops it.
    pub fn new(config: CacheConfig, l2: Option<Arc<dyn CacheTier>>) -> Arc<Self> {
        let cache = Arc::new(Self {
            l1: DashMap::new(),
            l2,
            config,
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&cache);
        let interval = cache.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.sweep();
            }
        });

        cache
    }

    /// Look up a key, falling through L1 → L2.
    ///
    /// `None` means "not cached"; a present value may itself encode a cached
    /// negative result depending on `V`.
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.l1.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.l1.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        if let Some(l2) = &self.l2 {
            match l2.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str::<V>(&raw) {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        self.insert_l1(key.to_string(), value.clone());
                        return Some(value);
                    }
                    Err(e) => {
                        warn!("Discarding undecodable shared-tier entry {}: {}", key, e);
                        let _ = l2.del(key).await;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    debug!("Shared tier degraded on get, serving without it: {}", e);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Multi-key lookup: one L1 pass, then a single `mget` for the rest.
    ///
    /// Keys absent from the returned map are not cached in either tier.
    pub async fn get_many(&self, keys: &[String]) -> HashMap<String, V> {
        let mut found = HashMap::new();
        let mut unresolved = Vec::new();

        for key in keys {
            // Guard must drop before the expired-entry removal below.
            let hit = match self.l1.get(key) {
                Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
                Some(_) => None,
                None => {
                    unresolved.push(key.clone());
                    continue;
                }
            };
            match hit {
                Some(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(key.clone(), value);
                }
                None => {
                    self.l1.remove(key);
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    unresolved.push(key.clone());
                }
            }
        }

        if unresolved.is_empty() {
            return found;
        }

        if let Some(l2) = &self.l2 {
            match l2.mget(&unresolved).await {
                Ok(values) => {
                    for (key, raw) in unresolved.iter().zip(values) {
                        let Some(raw) = raw else {
                            self.misses.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };
                        match serde_json::from_str::<V>(&raw) {
                            Ok(value) => {
                                self.hits.fetch_add(1, Ordering::Relaxed);
                                self.insert_l1(key.clone(), value.clone());
                                found.insert(key.clone(), value);
                            }
                            Err(e) => {
                                warn!("Discarding undecodable shared-tier entry {}: {}", key, e);
                                self.misses.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("Shared tier degraded on mget, serving without it: {}", e);
                    self.misses
                        .fetch_add(unresolved.len() as u64, Ordering::Relaxed);
                }
            }
        } else {
            self.misses
                .fetch_add(unresolved.len() as u64, Ordering::Relaxed);
        }

        found
    }

    /// Store a value in both tiers with the configured TTL.
    pub async fn set(&self, key: String, value: V) {
        if let Some(l2) = &self.l2 {
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    if let Err(e) = l2.set(&key, &raw, self.config.ttl).await {
                        debug!("Shared tier degraded on set, keeping L1 only: {}", e);
                    }
                }
                Err(e) => warn!("Unserializable cache value for {}: {}", key, e),
            }
        }
        self.insert_l1(key, value);
    }

    /// Remove one key from both tiers.
    ///
    /// Awaited on mutation paths before the mutation reports success, so a
    /// racing reader cannot pair a success response with a stale read.
    pub async fn delete(&self, key: &str) {
        self.l1.remove(key);
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.del(key).await {
                debug!("Shared tier degraded on delete of {}: {}", key, e);
            }
        }
    }

    /// Remove every key matching a `*`-wildcard pattern from both tiers.
    pub async fn delete_matching(&self, pattern: &str) {
        self.l1.retain(|key, _| !key_matches(pattern, key));
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.del_matching(pattern).await {
                debug!("Shared tier degraded on pattern delete {}: {}", pattern, e);
            }
        }
    }

    /// Drop expired L1 entries regardless of access patterns.
    ///
    /// Runs from the background task; public so tests can trigger it
    /// deterministically.
    pub fn sweep(&self) {
        // Counted inside the retain closure: concurrent sets make any
        // before/after length arithmetic unreliable.
        let mut swept: u64 = 0;
        self.l1.retain(|_, entry| {
            if entry.is_expired() {
                swept += 1;
                false
            } else {
                true
            }
        });
        if swept > 0 {
            self.expirations.fetch_add(swept, Ordering::Relaxed);
            debug!("Cache sweep removed {} expired entries", swept);
        }
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.l1.len(),
            max_entries: self.config.capacity,
        }
    }

    fn insert_l1(&self, key: String, value: V) {
        if !self.l1.contains_key(&key) && self.l1.len() >= self.config.capacity {
            self.evict_least_recently_set();
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.l1.insert(
            key,
            Entry {
                value,
                cached_at: Instant::now(),
                ttl: self.config.ttl,
                seq,
            },
        );
    }

    fn evict_least_recently_set(&self) {
        let oldest = self
            .l1
            .iter()
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.l1.remove(&key);
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-local [`CacheTier`] implementation.
///
/// Used by tests to model the shared tier (two caches over one
/// `InMemoryTier` behave like two processes over one Redis) and to force
/// outages via [`set_available`](InMemoryTier::set_available).
pub struct InMemoryTier {
    entries: DashMap<String, (String, Instant)>,
    available: std::sync::atomic::AtomicBool,
}

impl InMemoryTier {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Simulate the tier going down (`false`) or recovering (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), TierUnavailable> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TierUnavailable("tier marked unavailable".to_string()))
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.1 > Instant::now() {
                    return Some(entry.0.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for InMemoryTier {
    async fn get(&self, key: &str) -> Result<Option<String>, TierUnavailable> {
        self.check_available()?;
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TierUnavailable> {
        self.check_available()?;
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), TierUnavailable> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, TierUnavailable> {
        self.check_available()?;
        Ok(keys.iter().map(|key| self.live_value(key)).collect())
    }

    async fn del_matching(&self, pattern: &str) -> Result<(), TierUnavailable> {
        self.check_available()?;
        self.entries.retain(|key, _| !key_matches(pattern, key));
        Ok(())
    }
}
