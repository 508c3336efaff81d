//! Database adapters for the relational, graph and vector backends.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, Postgres};
use tracing::instrument;

use crate::db::config::BackendConfig;
use crate::db::pool::{PoolManager, PoolOverrides, PoolState};
use crate::db::postgres::{PgConnector, AGE_SESSION_INIT};
use crate::db::statement::Statement;
use crate::db::transaction::TransactionExecutor;
use crate::error::{InfraError, InfraResult};

/// Role a SQL backend plays in the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Relational,
    Graph,
    Vector,
}

impl BackendKind {
    /// Name used in logs, errors and configuration sections.
    pub fn family(&self) -> &'static str {
        match self {
            BackendKind::Relational => "rel-db",
            BackendKind::Graph => "graph-db",
            BackendKind::Vector => "vector-db",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.family())
    }
}

/// Vendor-specific adapter for one SQL backend.
///
/// Implementations own the backend's [`PoolManager`]. Statement helpers live
/// on `dyn DatabaseAdapter` so they work through `Arc<dyn DatabaseAdapter>`.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn vendor(&self) -> &'static str;

    /// Creates and probes the shared pool. Idempotent.
    async fn configure(&self) -> InfraResult<()>;

    /// The shared pool. Fails before `configure()` and after `destroy()`.
    fn pool(&self) -> InfraResult<PgPool>;

    /// A dedicated pool built from the base settings plus `overrides`.
    fn new_pool(&self, overrides: &PoolOverrides) -> InfraResult<PgPool>;

    /// Closes the shared pool. Idempotent.
    async fn destroy(&self);

    fn state(&self) -> PoolState;
}

/// PostgreSQL wire-protocol adapter.
///
/// The graph flavour loads Apache AGE on every connection; the vector
/// flavour relies on the pgvector extension being installed in the
/// database.
pub struct PostgresAdapter {
    kind: BackendKind,
    vendor: &'static str,
    manager: PoolManager<PgConnector>,
}

impl fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresAdapter")
            .field("kind", &self.kind)
            .field("vendor", &self.vendor)
            .field("manager", &self.manager)
            .finish()
    }
}

impl PostgresAdapter {
    fn build(
        kind: BackendKind,
        vendor: &'static str,
        connector: PgConnector,
        config: &BackendConfig,
    ) -> InfraResult<Self> {
        config.validate(kind.family())?;
        Ok(Self {
            kind,
            vendor,
            manager: PoolManager::new(kind.family(), connector, config.to_pool_options()),
        })
    }

    /// Relational backend on plain PostgreSQL.
    pub fn relational(config: &BackendConfig) -> InfraResult<Self> {
        Self::build(BackendKind::Relational, "postgres", PgConnector::new(), config)
    }

    /// Graph backend on PostgreSQL with Apache AGE.
    pub fn age(config: &BackendConfig) -> InfraResult<Self> {
        Self::build(
            BackendKind::Graph,
            "age",
            PgConnector::with_session_init(AGE_SESSION_INIT),
            config,
        )
    }

    /// Vector backend on PostgreSQL with pgvector.
    pub fn pgvector(config: &BackendConfig) -> InfraResult<Self> {
        Self::build(BackendKind::Vector, "pgvector", PgConnector::new(), config)
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn vendor(&self) -> &'static str {
        self.vendor
    }

    async fn configure(&self) -> InfraResult<()> {
        self.manager.configure().await
    }

    fn pool(&self) -> InfraResult<PgPool> {
        self.manager.pool()
    }

    fn new_pool(&self, overrides: &PoolOverrides) -> InfraResult<PgPool> {
        self.manager.new_pool(overrides)
    }

    async fn destroy(&self) {
        self.manager.destroy().await
    }

    fn state(&self) -> PoolState {
        self.manager.state()
    }
}

impl dyn DatabaseAdapter {
    /// Runs `statement` on the shared pool and decodes the rows.
    #[instrument(skip_all, fields(backend = self.kind().family()))]
    pub async fn query<T>(&self, statement: &Statement) -> InfraResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let pool = self.pool()?;
        statement.fetch_all(&pool).await
    }

    /// Runs `statement` on the shared pool and returns rows affected.
    #[instrument(skip_all, fields(backend = self.kind().family()))]
    pub async fn execute(&self, statement: &Statement) -> InfraResult<u64> {
        let pool = self.pool()?;
        statement.execute(&pool).await
    }

    /// Transaction executor bound to the shared pool.
    pub fn transaction(&self) -> InfraResult<TransactionExecutor<PgPool>> {
        Ok(TransactionExecutor::new(self.pool()?, self.kind().family()))
    }

    /// Runs `handler` inside BEGIN / COMMIT on the shared pool.
    pub async fn run_in_transaction<T, E, F>(&self, handler: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PoolConnection<Postgres>) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<InfraError> + fmt::Display + Send,
    {
        self.transaction()?.run(handler).await
    }
}
