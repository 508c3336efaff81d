//! Application context: every backend handle the process owns.
//!
//! Repositories receive handles from here instead of reaching for globals.
//! [`AppContext::prepare`] configures every backend concurrently before the
//! process reports ready; [`AppContext::shutdown`] tears them down
//! concurrently on exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use graphmind_infra::cache::{create_cache, CacheFacade};
use graphmind_infra::db::{create_database_adapter, BackendKind, DatabaseAdapter};
use graphmind_infra::storage::{create_object_storages, ObjectStorages};
use graphmind_infra::{InfraError, InfraResult};
use tracing::{error, info, instrument};

use crate::config::ServerConfig;

/// Upper bound on each component's teardown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

type Step<'a> = BoxFuture<'a, (&'static str, InfraResult<()>)>;

/// Backend handles shared across the application.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub rel_db: Arc<dyn DatabaseAdapter>,
    pub graph_db: Arc<dyn DatabaseAdapter>,
    pub vector_db: Arc<dyn DatabaseAdapter>,
    pub storage: ObjectStorages,
    pub cache: Arc<CacheFacade>,
    /// Provision buckets during `prepare()`.
    pub ensure_buckets_on_boot: bool,
    pub shutdown_timeout: Duration,
}

impl AppContext {
    /// Builds every adapter from `config`. Performs no I/O.
    pub fn from_config(config: &ServerConfig) -> InfraResult<Self> {
        Ok(Self {
            rel_db: create_database_adapter(BackendKind::Relational, &config.rel_db)?,
            graph_db: create_database_adapter(BackendKind::Graph, &config.graph_db)?,
            vector_db: create_database_adapter(BackendKind::Vector, &config.vector_db)?,
            storage: create_object_storages(&config.storage)?,
            cache: Arc::new(create_cache(&config.cache)?),
            ensure_buckets_on_boot: config.storage.ensure_buckets_on_boot,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    fn databases(&self) -> [&Arc<dyn DatabaseAdapter>; 3] {
        [&self.rel_db, &self.graph_db, &self.vector_db]
    }

    /// Configures every backend concurrently.
    ///
    /// All configures run to completion even when one fails. Every failure
    /// is logged and the first one is returned.
    #[instrument(skip(self))]
    pub async fn prepare(&self) -> InfraResult<()> {
        let mut steps: Vec<Step<'_>> = Vec::new();
        for adapter in self.databases() {
            steps.push(Box::pin(async move {
                (adapter.kind().family(), adapter.configure().await)
            }));
        }
        steps.push(Box::pin(async { ("cache", self.cache.configure().await) }));
        if self.ensure_buckets_on_boot {
            steps.push(Box::pin(async {
                ("storage", self.storage.ensure_buckets().await.map(|_| ()))
            }));
        }

        first_error(join_all(steps).await, "Backend failed to start")?;
        info!("All backends ready");
        Ok(())
    }

    /// Destroys every backend concurrently.
    ///
    /// A component that does not finish within `shutdown_timeout` is
    /// reported as failed; the others still complete.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> InfraResult<()> {
        let limit = self.shutdown_timeout;
        let mut steps: Vec<Step<'_>> = Vec::new();
        for adapter in self.databases() {
            let backend = adapter.kind().family();
            steps.push(Box::pin(bounded(backend, limit, adapter.destroy())));
        }
        steps.push(Box::pin(bounded("cache", limit, self.cache.destroy())));
        steps.push(Box::pin(bounded("storage", limit, self.storage.destroy())));

        first_error(join_all(steps).await, "Backend failed to shut down")?;
        info!("All backends released");
        Ok(())
    }
}

async fn bounded(
    backend: &'static str,
    limit: Duration,
    teardown: impl Future<Output = ()>,
) -> (&'static str, InfraResult<()>) {
    let result = tokio::time::timeout(limit, teardown)
        .await
        .map_err(|_| InfraError::Connection {
            backend: backend.to_string(),
            message: format!("shutdown did not finish within {}ms", limit.as_millis()),
        });
    (backend, result)
}

fn first_error(
    results: Vec<(&'static str, InfraResult<()>)>,
    message: &'static str,
) -> InfraResult<()> {
    let mut first = None;
    for (backend, result) in results {
        if let Err(e) = result {
            error!(backend, error = %e, "{message}");
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}
