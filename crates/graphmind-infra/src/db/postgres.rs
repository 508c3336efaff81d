//! PostgreSQL-backed pools for the relational, graph (AGE) and vector
//! (pgvector) backends.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use tracing::debug;

use crate::db::pool::{ConnectionPool, PoolConnector, PoolOptions, PooledConnection};
use crate::error::{InfraError, InfraResult};

/// Session setup for Apache AGE, run on every new physical connection.
pub const AGE_SESSION_INIT: &str = r#"LOAD 'age'; SET search_path = ag_catalog, "$user", public;"#;

#[async_trait]
impl ConnectionPool for PgPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> InfraResult<PoolConnection<Postgres>> {
        sqlx::Pool::acquire(self)
            .await
            .map_err(|e| InfraError::Connection {
                backend: "postgres".to_string(),
                message: e.to_string(),
            })
    }

    async fn close(&self) {
        sqlx::Pool::close(self).await;
    }

    fn is_closed(&self) -> bool {
        sqlx::Pool::is_closed(self)
    }
}

#[async_trait]
impl PooledConnection for PoolConnection<Postgres> {
    async fn execute_raw(&mut self, sql: &str) -> InfraResult<()> {
        (&mut **self).execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    fn discard(&mut self) {
        // The pool opens a replacement once this one is closed.
        self.close_on_drop();
    }
}

/// Builds lazily-connecting [`PgPool`]s.
///
/// `session_init` is executed on every connection the pool opens, before
/// the connection is handed out.
#[derive(Debug, Clone, Copy)]
pub struct PgConnector {
    session_init: Option<&'static str>,
}

impl PgConnector {
    pub fn new() -> Self {
        Self { session_init: None }
    }

    pub fn with_session_init(session_init: &'static str) -> Self {
        Self {
            session_init: Some(session_init),
        }
    }

    pub fn session_init(&self) -> Option<&'static str> {
        self.session_init
    }
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConnector for PgConnector {
    type Pool = PgPool;

    fn build(&self, options: &PoolOptions) -> InfraResult<PgPool> {
        let mut pool_options = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .idle_timeout(Some(options.idle_timeout))
            .max_lifetime(Some(options.max_lifetime))
            .acquire_timeout(options.acquire_timeout);

        if let Some(init) = self.session_init {
            pool_options = pool_options.after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(sqlx::raw_sql(init)).await?;
                    Ok(())
                })
            });
        }

        debug!(?options, "Building PostgreSQL pool");
        pool_options
            .connect_lazy(&options.url)
            .map_err(|e| InfraError::Configuration {
                backend: "postgres".to_string(),
                message: format!("invalid connection settings: {e}"),
            })
    }
}
