//! In-process key-value store backed by Moka.
//!
//! Each entry carries its own TTL. Used for tests and single-node
//! deployments where a shared Redis is not available.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use crate::cache::KeyValueStore;
use crate::error::InfraResult;

const DEFAULT_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-backed [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct MokaStore {
    cache: Cache<String, CachedValue>,
}

impl Default for MokaStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

impl MokaStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    /// Runs pending evictions and returns the entry count.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl KeyValueStore for MokaStore {
    fn vendor(&self) -> &'static str {
        "memory"
    }

    async fn configure(&self) -> InfraResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> InfraResult<Option<String>> {
        Ok(self.cache.get(key).await.map(|cached| cached.value))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> InfraResult<()> {
        self.cache
            .insert(key.to_string(), CachedValue { value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> InfraResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn destroy(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}
