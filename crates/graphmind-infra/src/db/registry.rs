//! Vendor dispatch for SQL backends.

use std::sync::Arc;

use tracing::debug;

use crate::db::adapter::{BackendKind, DatabaseAdapter, PostgresAdapter};
use crate::db::config::BackendConfig;
use crate::error::InfraResult;
use crate::vendor::VendorRegistry;

type AdapterConstructor = fn(&BackendConfig) -> InfraResult<Arc<dyn DatabaseAdapter>>;

fn build_postgres(config: &BackendConfig) -> InfraResult<Arc<dyn DatabaseAdapter>> {
    Ok(Arc::new(PostgresAdapter::relational(config)?))
}

fn build_age(config: &BackendConfig) -> InfraResult<Arc<dyn DatabaseAdapter>> {
    Ok(Arc::new(PostgresAdapter::age(config)?))
}

fn build_pgvector(config: &BackendConfig) -> InfraResult<Arc<dyn DatabaseAdapter>> {
    Ok(Arc::new(PostgresAdapter::pgvector(config)?))
}

const RELATIONAL: VendorRegistry<AdapterConstructor> = VendorRegistry {
    family: "rel-db",
    supported: &[("postgres", build_postgres)],
    placeholders: &[],
};

const GRAPH: VendorRegistry<AdapterConstructor> = VendorRegistry {
    family: "graph-db",
    supported: &[("age", build_age)],
    placeholders: &[],
};

const VECTOR: VendorRegistry<AdapterConstructor> = VendorRegistry {
    family: "vector-db",
    supported: &[("pgvector", build_pgvector)],
    placeholders: &[],
};

fn registry(kind: BackendKind) -> &'static VendorRegistry<AdapterConstructor> {
    match kind {
        BackendKind::Relational => &RELATIONAL,
        BackendKind::Graph => &GRAPH,
        BackendKind::Vector => &VECTOR,
    }
}

/// Builds the adapter for `config.vendor`. Performs no I/O.
pub fn create_database_adapter(
    kind: BackendKind,
    config: &BackendConfig,
) -> InfraResult<Arc<dyn DatabaseAdapter>> {
    let constructor = registry(kind).lookup(&config.vendor)?;
    debug!(backend = kind.family(), vendor = %config.vendor, "Creating database adapter");
    constructor(config)
}

/// Fails with `UnsupportedVendor` unless `vendor` is supported for `kind`.
pub fn check_vendor(kind: BackendKind, vendor: &str) -> InfraResult<()> {
    registry(kind).lookup(vendor).map(|_| ())
}

pub fn supported_vendors(kind: BackendKind) -> Vec<&'static str> {
    registry(kind).tags()
}
