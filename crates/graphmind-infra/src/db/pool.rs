//! Connection pool lifecycle shared by every SQL backend.
//!
//! A [`PoolManager`] owns at most one live pool for one backend kind. It moves
//! between two states:
//!
//! ```text
//! Unconfigured --configure()--> Configured --destroy()--> Unconfigured
//! ```
//!
//! The pool itself is abstracted behind [`ConnectionPool`] / [`PooledConnection`]
//! so the lifecycle and transaction logic can run against fakes in tests. The
//! production implementation for PostgreSQL lives in `db::postgres`.

use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::error::{InfraError, InfraResult};

/// Statement used as the liveness probe on `configure()`.
pub const PROBE_STATEMENT: &str = "SELECT 1";

/// A connection borrowed from a [`ConnectionPool`].
///
/// Dropping the connection returns it to its pool.
#[async_trait]
pub trait PooledConnection: Send {
    /// Executes a statement without parameters or result rows.
    async fn execute_raw(&mut self, sql: &str) -> InfraResult<()>;

    /// Closes the connection when it is dropped instead of returning it to
    /// the pool.
    fn discard(&mut self);
}

/// A bounded set of reusable connections.
///
/// Clones share the same underlying pool.
#[async_trait]
pub trait ConnectionPool: Clone + Send + Sync + 'static {
    type Connection: PooledConnection + 'static;

    /// Borrows a connection, waiting up to the pool's acquire timeout.
    async fn acquire(&self) -> InfraResult<Self::Connection>;

    /// Drains and closes the pool.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Builds pools from [`PoolOptions`]. Building must not perform I/O.
pub trait PoolConnector: Send + Sync + 'static {
    type Pool: ConnectionPool;

    fn build(&self, options: &PoolOptions) -> InfraResult<Self::Pool>;
}

/// Pool-shaping options.
#[derive(Clone, PartialEq)]
pub struct PoolOptions {
    pub url: String,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

// Custom Debug implementation to hide credentials in url
impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl PoolOptions {
    /// Returns a copy with every `Some` field of `overrides` applied.
    pub fn merged(&self, overrides: &PoolOverrides) -> PoolOptions {
        PoolOptions {
            url: overrides.url.clone().unwrap_or_else(|| self.url.clone()),
            max_connections: overrides.max_connections.unwrap_or(self.max_connections),
            idle_timeout: overrides.idle_timeout.unwrap_or(self.idle_timeout),
            max_lifetime: overrides.max_lifetime.unwrap_or(self.max_lifetime),
            acquire_timeout: overrides.acquire_timeout.unwrap_or(self.acquire_timeout),
        }
    }
}

/// Field-level overrides for [`PoolManager::new_pool`].
#[derive(Clone, Default, PartialEq)]
pub struct PoolOverrides {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Option<Duration>,
}

impl fmt::Debug for PoolOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOverrides")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl PoolOverrides {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = Some(max_lifetime);
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = Some(acquire_timeout);
        self
    }
}

/// Lifecycle state of a [`PoolManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Unconfigured,
    Configured,
}

/// Owns the single shared pool of one backend.
///
/// `configure()` and `destroy()` are serialised by an async gate, so two
/// concurrent first-time `configure()` calls still create exactly one pool.
/// `pool()` never waits on the gate.
pub struct PoolManager<C: PoolConnector> {
    backend: &'static str,
    connector: C,
    options: PoolOptions,
    slot: RwLock<Option<C::Pool>>,
    gate: Mutex<()>,
}

impl<C: PoolConnector> fmt::Debug for PoolManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("backend", &self.backend)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: PoolConnector> PoolManager<C> {
    pub fn new(backend: &'static str, connector: C, options: PoolOptions) -> Self {
        Self {
            backend,
            connector,
            options,
            slot: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Human-readable backend label used in logs and errors.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Base options every pool of this manager is built from.
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn state(&self) -> PoolState {
        if self.read_slot().is_some() {
            PoolState::Configured
        } else {
            PoolState::Unconfigured
        }
    }

    /// Creates the shared pool and probes it, unless it already exists.
    ///
    /// The probe borrows one connection, runs [`PROBE_STATEMENT`], and
    /// returns the connection whatever the outcome. A failed probe closes
    /// the new pool and leaves the manager unconfigured.
    #[instrument(skip(self), fields(backend = self.backend))]
    pub async fn configure(&self) -> InfraResult<()> {
        let _gate = self.gate.lock().await;

        if self.read_slot().is_some() {
            debug!("Pool already configured");
            return Ok(());
        }

        let pool = self.connector.build(&self.options)?;

        if let Err(e) = probe(&pool).await {
            pool.close().await;
            error!(error = %e, "{} is not ready", self.backend);
            metrics::counter!(
                "graphmind_pool_configure_total",
                "backend" => self.backend,
                "status" => "error"
            )
            .increment(1);
            return Err(InfraError::Connection {
                backend: self.backend.to_string(),
                message: connection_message(e),
            });
        }

        *self.write_slot() = Some(pool);
        metrics::counter!(
            "graphmind_pool_configure_total",
            "backend" => self.backend,
            "status" => "success"
        )
        .increment(1);
        info!("{} is ready", self.backend);
        Ok(())
    }

    /// Returns the live shared pool.
    pub fn pool(&self) -> InfraResult<C::Pool> {
        self.read_slot()
            .clone()
            .ok_or_else(|| InfraError::not_ready(self.backend))
    }

    /// Builds a separate pool from the base options with `overrides` merged
    /// in. The shared pool is left untouched and the new pool is not probed.
    pub fn new_pool(&self, overrides: &PoolOverrides) -> InfraResult<C::Pool> {
        if self.read_slot().is_none() {
            return Err(InfraError::Configuration {
                backend: self.backend.to_string(),
                message: "cannot create a new pool before the shared pool is configured"
                    .to_string(),
            });
        }

        debug!(backend = self.backend, ?overrides, "Creating dedicated pool");
        self.connector.build(&self.options.merged(overrides))
    }

    /// Closes the shared pool if it is still open and resets to unconfigured.
    #[instrument(skip(self), fields(backend = self.backend))]
    pub async fn destroy(&self) {
        let _gate = self.gate.lock().await;

        let pool = self.write_slot().take();
        if let Some(pool) = pool {
            if !pool.is_closed() {
                pool.close().await;
            }
            info!("{} pool closed", self.backend);
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<C::Pool>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<C::Pool>> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn probe<P: ConnectionPool>(pool: &P) -> InfraResult<()> {
    let mut conn = pool.acquire().await?;
    let result = conn.execute_raw(PROBE_STATEMENT).await;
    drop(conn);
    result
}

fn connection_message(e: InfraError) -> String {
    match e {
        InfraError::Connection { message, .. } | InfraError::Query { message } => message,
        other => other.to_string(),
    }
}
