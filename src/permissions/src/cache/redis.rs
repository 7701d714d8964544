//! Redis-backed shared cache tier
//!
//! Every command runs under a short timeout; a timeout or command error maps
//! to [`TierUnavailable`], which the [`TieredCache`](super::TieredCache)
//! downgrades to a soft miss. A Redis outage therefore slows nothing on the
//! authorization path beyond the timeout itself.

use crate::cache::CacheTier;
use crate::error::TierUnavailable;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::info;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(250);

/// Shared tier over a Redis deployment
pub struct RedisTier {
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisTier {
    /// Connect to Redis; the connection manager reconnects on its own after
    /// transient drops.
    pub async fn connect(url: &str) -> Result<Self, TierUnavailable> {
        let client = redis::Client::open(url).map_err(|e| TierUnavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| TierUnavailable(e.to_string()))?;

        info!("Connected shared cache tier at {}", url);
        Ok(Self {
            manager,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Override the per-command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, TierUnavailable>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TierUnavailable(e.to_string())),
            Err(_) => Err(TierUnavailable("command timed out".to_string())),
        }
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<String>, TierUnavailable> {
        let mut conn = self.manager.clone();
        self.run(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TierUnavailable> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        self.run(async move { conn.set_ex::<_, _, ()>(key, value, seconds).await })
            .await
    }

    async fn del(&self, key: &str) -> Result<(), TierUnavailable> {
        let mut conn = self.manager.clone();
        self.run(async move { conn.del::<_, ()>(key).await }).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, TierUnavailable> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let keys = keys.to_vec();
        self.run(async move { conn.mget::<_, Vec<Option<String>>>(keys).await })
            .await
    }

    async fn del_matching(&self, pattern: &str) -> Result<(), TierUnavailable> {
        let mut conn = self.manager.clone();
        let pattern = pattern.to_string();
        self.run(async move {
            let keys: Vec<String> = {
                let mut iter = conn.scan_match::<_, String>(&pattern).await?;
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                keys
            };
            if !keys.is_empty() {
                conn.del::<_, ()>(keys).await?;
            }
            Ok(())
        })
        .await
    }
}
