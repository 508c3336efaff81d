//! graphmind-infra: infrastructure adapters for the graphmind backend.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     graphmind-infra                        │
//! ├───────────────────────────────────────────────────────────┤
//! │  db/       - rel-db, graph-db and vector-db pools,         │
//! │              transactions and statement execution          │
//! │  storage/  - bucket-scoped object storage (S3, memory)     │
//! │  cache/    - read-through cache over Redis or Moka         │
//! │  vendor.rs - vendor-tag dispatch shared by every family    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Every adapter follows the same lifecycle: construct from config without
//! I/O, `configure()` to connect and probe, use, then `destroy()`.

pub mod cache;
pub mod db;
pub mod error;
pub mod storage;
mod vendor;

pub use cache::{CacheConfig, CacheFacade, CacheKeys, CacheTtl, KeyValueStore};
pub use db::{BackendConfig, BackendKind, DatabaseAdapter, SqlParam, Statement};
pub use error::{InfraError, InfraResult};
pub use storage::{ObjectStorage, ObjectStorages, StorageConfig};
