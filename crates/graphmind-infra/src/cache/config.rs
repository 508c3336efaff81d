//! Cache settings and vendor dispatch.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::memory::MokaStore;
use crate::cache::redis::RedisStore;
use crate::cache::{CacheFacade, KeyValueStore, PopulatorSettings};
use crate::error::{InfraError, InfraResult};
use crate::vendor::VendorRegistry;

/// Cache configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// `redis` or `memory`.
    pub vendor: String,

    /// Connection url, required for `redis`.
    #[serde(default)]
    pub url: Option<String>,

    /// Entry limit for the `memory` vendor.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_populate_queue_capacity")]
    pub populate_queue_capacity: usize,

    #[serde(default = "default_populate_concurrency")]
    pub populate_concurrency: usize,
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_populate_queue_capacity() -> usize {
    PopulatorSettings::default().queue_capacity
}

fn default_populate_concurrency() -> usize {
    PopulatorSettings::default().concurrency
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("vendor", &self.vendor)
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("max_capacity", &self.max_capacity)
            .field("populate_queue_capacity", &self.populate_queue_capacity)
            .field("populate_concurrency", &self.populate_concurrency)
            .finish()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl CacheConfig {
    pub fn memory() -> Self {
        Self {
            vendor: "memory".to_string(),
            url: None,
            max_capacity: default_max_capacity(),
            populate_queue_capacity: default_populate_queue_capacity(),
            populate_concurrency: default_populate_concurrency(),
        }
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            vendor: "redis".to_string(),
            url: Some(url.into()),
            ..Self::memory()
        }
    }

    pub fn validate(&self) -> InfraResult<()> {
        let invalid = |message: &str| InfraError::Configuration {
            backend: "cache".to_string(),
            message: message.to_string(),
        };

        if self.vendor == "redis" && self.url.as_deref().map_or(true, str::is_empty) {
            return Err(invalid("url is required for the redis vendor"));
        }
        if self.populate_queue_capacity == 0 {
            return Err(invalid("populate_queue_capacity must be greater than 0"));
        }
        if self.populate_concurrency == 0 {
            return Err(invalid("populate_concurrency must be greater than 0"));
        }
        Ok(())
    }

    fn populator_settings(&self) -> PopulatorSettings {
        PopulatorSettings {
            queue_capacity: self.populate_queue_capacity,
            concurrency: self.populate_concurrency,
        }
    }
}

type StoreConstructor = fn(&CacheConfig) -> Arc<dyn KeyValueStore>;

fn build_redis(config: &CacheConfig) -> Arc<dyn KeyValueStore> {
    Arc::new(RedisStore::new(config.url.clone().unwrap_or_default()))
}

fn build_memory(config: &CacheConfig) -> Arc<dyn KeyValueStore> {
    Arc::new(MokaStore::new(config.max_capacity))
}

const CACHE: VendorRegistry<StoreConstructor> = VendorRegistry {
    family: "cache",
    supported: &[("redis", build_redis), ("memory", build_memory)],
    placeholders: &[],
};

/// Builds an unconfigured [`CacheFacade`] for `config.vendor`.
pub fn create_cache(config: &CacheConfig) -> InfraResult<CacheFacade> {
    let constructor = CACHE.lookup(&config.vendor)?;
    config.validate()?;
    Ok(CacheFacade::new(
        constructor(config),
        config.populator_settings(),
    ))
}

pub fn check_cache_vendor(vendor: &str) -> InfraResult<()> {
    CACHE.lookup(vendor).map(|_| ())
}
