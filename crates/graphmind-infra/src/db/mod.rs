//! SQL backends: pool lifecycle, transactions and statement execution.

pub mod adapter;
pub mod config;
pub mod pool;
pub mod postgres;
pub mod registry;
pub mod statement;
pub mod transaction;

#[cfg(test)]
pub(crate) mod mocks;

pub use adapter::{BackendKind, DatabaseAdapter, PostgresAdapter};
pub use config::BackendConfig;
pub use pool::{
    ConnectionPool, PoolConnector, PoolManager, PoolOptions, PoolOverrides, PoolState,
    PooledConnection, PROBE_STATEMENT,
};
pub use postgres::{PgConnector, AGE_SESSION_INIT};
pub use registry::{check_vendor, create_database_adapter, supported_vendors};
pub use statement::{SqlParam, Statement};
pub use transaction::TransactionExecutor;
