//! Read-through cache with explicit invalidation.
//!
//! Reads go through [`CacheFacade::get_or_load`]: a hit is served from the
//! key-value store; a miss calls the loader and hands the value to a
//! background populator so the caller never waits on the cache write.
//! Mutations call [`CacheFacade::invalidate`], which deletes synchronously.
//!
//! Population is best effort. A full queue or a failed write is logged and
//! dropped; the next miss will try again.

pub mod config;
pub mod memory;
pub mod redis;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{InfraError, InfraResult};

pub use config::{check_cache_vendor, create_cache, CacheConfig};
pub use memory::MokaStore;
pub use redis::RedisStore;

/// Minimal key-value contract the facade needs. Values are JSON text.
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn vendor(&self) -> &'static str;

    /// Connects and checks liveness. Idempotent.
    async fn configure(&self) -> InfraResult<()>;

    async fn get(&self, key: &str) -> InfraResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> InfraResult<()>;

    /// Deletes `keys` and returns how many existed.
    async fn delete(&self, keys: &[String]) -> InfraResult<u64>;

    /// Closes the connection. Idempotent.
    async fn destroy(&self);
}

/// Builds namespaced cache keys.
pub struct CacheKeys;

impl CacheKeys {
    pub const NAMESPACE: &'static str = "business";

    /// `business:users:id:<id>`
    pub fn user_by_id(id: &str) -> String {
        format!("{}:users:id:{id}", Self::NAMESPACE)
    }
}

/// Standard time-to-live values.
pub struct CacheTtl;

impl CacheTtl {
    pub const ONE_MINUTE: Duration = Duration::from_secs(60);
    pub const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
    pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);
    pub const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);
}

/// A value waiting to be written by the populator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
}

/// Populator sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulatorSettings {
    /// Entries that may wait for a write before new ones are dropped.
    pub queue_capacity: usize,
    /// Writes in flight at once.
    pub concurrency: usize,
}

impl Default for PopulatorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            concurrency: 8,
        }
    }
}

struct Populator {
    tx: mpsc::Sender<CacheEntry>,
    task: JoinHandle<()>,
}

/// Read-through cache over a [`KeyValueStore`].
pub struct CacheFacade {
    store: Arc<dyn KeyValueStore>,
    settings: PopulatorSettings,
    populator: Mutex<Option<Populator>>,
}

impl fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFacade")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl CacheFacade {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: PopulatorSettings) -> Self {
        Self {
            store,
            settings,
            populator: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn is_configured(&self) -> bool {
        self.slot().is_some()
    }

    /// Connects the store and starts the background populator. Idempotent.
    #[instrument(skip(self), fields(vendor = self.store.vendor()))]
    pub async fn configure(&self) -> InfraResult<()> {
        self.store.configure().await?;

        let mut slot = self.slot();
        if slot.is_none() {
            let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
            let task = tokio::spawn(run_populator(
                Arc::clone(&self.store),
                rx,
                self.settings.concurrency.max(1),
            ));
            *slot = Some(Populator { tx, task });
            info!("Cache is ready");
        }
        Ok(())
    }

    /// Returns the cached value for `key`, or loads it.
    ///
    /// A cache read failure or an undecodable entry is logged and treated as
    /// a miss. A loaded `Some` value is queued for population with `ttl`;
    /// the call returns without waiting for the write.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<InfraError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let tx = self.sender()?;

        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(key, "Cache hit");
                    metrics::counter!("graphmind_cache_requests_total", "result" => "hit")
                        .increment(1);
                    return Ok(Some(value));
                }
                Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => debug!(key, "Cache miss"),
            Err(e) => warn!(key, error = %e, "Cache read failed, using loader"),
        }
        metrics::counter!("graphmind_cache_requests_total", "result" => "miss").increment(1);

        let value = loader().await?;
        if let Some(value) = &value {
            match serde_json::to_string(value) {
                Ok(raw) => {
                    enqueue(
                        &tx,
                        CacheEntry {
                            key: key.to_string(),
                            value: raw,
                            ttl,
                        },
                    );
                }
                Err(e) => warn!(key, error = %e, "Value is not cacheable"),
            }
        }
        Ok(value)
    }

    /// Deletes `keys` from the store before returning.
    pub async fn invalidate(&self, keys: &[String]) -> InfraResult<u64> {
        self.sender()?;
        let removed = self.store.delete(keys).await?;
        debug!(keys = keys.len(), removed, "Cache invalidated");
        Ok(removed)
    }

    /// Stops accepting populations and waits for queued writes to finish.
    pub async fn shutdown(&self) {
        let populator = self.slot().take();
        if let Some(Populator { tx, task }) = populator {
            drop(tx);
            if let Err(e) = task.await {
                warn!(error = %e, "Cache populator ended abnormally");
            }
        }
    }

    /// Drains the populator and closes the store. Idempotent.
    pub async fn destroy(&self) {
        self.shutdown().await;
        self.store.destroy().await;
    }

    fn sender(&self) -> InfraResult<mpsc::Sender<CacheEntry>> {
        self.slot()
            .as_ref()
            .map(|p| p.tx.clone())
            .ok_or_else(|| InfraError::not_ready("cache"))
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Populator>> {
        self.populator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queues `entry` without waiting. Returns `false` if it was dropped.
fn enqueue(tx: &mpsc::Sender<CacheEntry>, entry: CacheEntry) -> bool {
    match tx.try_send(entry) {
        Ok(()) => true,
        Err(TrySendError::Full(entry)) => {
            warn!(key = %entry.key, "Cache population queue is full, dropping write");
            false
        }
        Err(TrySendError::Closed(entry)) => {
            warn!(key = %entry.key, "Cache populator has stopped, dropping write");
            false
        }
    }
}

async fn run_populator(
    store: Arc<dyn KeyValueStore>,
    rx: mpsc::Receiver<CacheEntry>,
    concurrency: usize,
) {
    let entries = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|entry| (entry, rx))
    });

    entries
        .for_each_concurrent(concurrency, |entry| {
            let store = Arc::clone(&store);
            async move {
                match store.set_with_ttl(&entry.key, entry.value, entry.ttl).await {
                    Ok(()) => debug!(key = %entry.key, "Cache populated"),
                    Err(e) => warn!(key = %entry.key, error = %e, "Cache write failed"),
                }
            }
        })
        .await;

    debug!("Cache populator stopped");
}
