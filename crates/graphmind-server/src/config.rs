//! Configuration management for the graphmind server.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use graphmind_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use graphmind_infra::cache::{check_cache_vendor, CacheConfig};
use graphmind_infra::db::{check_vendor, BackendConfig, BackendKind};
use graphmind_infra::storage::{check_storage_vendor, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "GRAPHMIND";

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Relational database (`postgres`).
    #[serde(default = "default_rel_db")]
    pub rel_db: BackendConfig,

    /// Graph database (`age`).
    #[serde(default = "default_graph_db")]
    pub graph_db: BackendConfig,

    /// Vector database (`pgvector`).
    #[serde(default = "default_vector_db")]
    pub vector_db: BackendConfig,

    /// Object storage with its public and private buckets.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    /// Read-through cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rel_db: default_rel_db(),
            graph_db: default_graph_db(),
            vector_db: default_vector_db(),
            storage: default_storage(),
            cache: CacheConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

fn default_rel_db() -> BackendConfig {
    BackendConfig::new("postgres", "postgres://postgres@localhost:5432/graphmind")
}

fn default_graph_db() -> BackendConfig {
    BackendConfig::new("age", "postgres://postgres@localhost:5433/graphmind")
}

fn default_vector_db() -> BackendConfig {
    BackendConfig::new("pgvector", "postgres://postgres@localhost:5434/graphmind")
}

fn default_storage() -> StorageConfig {
    StorageConfig::memory("graphmind-public", "graphmind-private")
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl From<graphmind_infra::InfraError> for ConfigLoadError {
    fn from(e: graphmind_infra::InfraError) -> Self {
        ConfigLoadError::Invalid {
            message: e.to_string(),
        }
    }
}

fn environment() -> Environment {
    // GRAPHMIND_REL_DB__URL -> rel_db.url
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `GRAPHMIND_` and use `__` as
    /// separator. For example:
    /// - `GRAPHMIND_REL_DB__URL=...` overrides `rel_db.url`
    /// - `GRAPHMIND_GRAPH_DB__POOL_MAX_CONNECTIONS=20` overrides
    ///   `graph_db.pool_max_connections`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    ///
    /// Vendor tags are checked against the same registries the adapters are
    /// built from, so an unsupported vendor fails here rather than at first use.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        for (kind, backend) in [
            (BackendKind::Relational, &self.rel_db),
            (BackendKind::Graph, &self.graph_db),
            (BackendKind::Vector, &self.vector_db),
        ] {
            check_vendor(kind, &backend.vendor)?;
            backend.validate(kind.family())?;
        }

        check_storage_vendor(&self.storage.vendor)?;
        self.storage.validate()?;

        check_cache_vendor(&self.cache.vendor)?;
        self.cache.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
rel_db:
  vendor: postgres
  url: "postgres://app:pw@db:5432/graphmind"
  pool_max_connections: 20

graph_db:
  vendor: age
  url: "postgres://app:pw@age:5432/graphmind"
  pool_idle_timeout_millis: 5000

storage:
  vendor: minio
  access_key: minio
  secret_key: minio123
  force_path_style: true
  internal_endpoint: "http://minio:9000"
  external_endpoint: "https://cdn.example.com"
  public_bucket_name: assets
  private_bucket_name: uploads

cache:
  vendor: redis
  url: "redis://cache:6379/0"
  populate_concurrency: 4

logging:
  level: debug
  json: true
"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();

        assert_eq!(config.rel_db.url, "postgres://app:pw@db:5432/graphmind");
        assert_eq!(config.rel_db.pool_max_connections, 20);
        assert_eq!(config.graph_db.pool_idle_timeout_millis, 5000);
        assert_eq!(config.graph_db.pool_max_lifetime_seconds, 21_600);
        assert_eq!(config.vector_db.vendor, "pgvector");
        assert_eq!(config.storage.vendor, "minio");
        assert_eq!(config.storage.public_bucket_name, "assets");
        assert_eq!(
            config.storage.client_facing_endpoint(),
            Some("https://cdn.example.com")
        );
        assert_eq!(config.cache.vendor, "redis");
        assert_eq!(config.cache.populate_concurrency, 4);
        assert_eq!(config.cache.populate_queue_capacity, 1024);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
rel_db:
  vendor: postgres
  url: "postgres://localhost/from-file"
"#
        )
        .unwrap();

        std::env::set_var("GRAPHMIND_REL_DB__URL", "postgres://localhost/from-env");
        std::env::set_var("GRAPHMIND_GRAPH_DB__POOL_MAX_CONNECTIONS", "25");
        std::env::set_var("GRAPHMIND_LOGGING__LEVEL", "warn");

        let config = ServerConfig::load(file.path());

        std::env::remove_var("GRAPHMIND_REL_DB__URL");
        std::env::remove_var("GRAPHMIND_GRAPH_DB__POOL_MAX_CONNECTIONS");
        std::env::remove_var("GRAPHMIND_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.rel_db.url, "postgres://localhost/from-env");
        assert_eq!(config.graph_db.pool_max_connections, 25);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_config_validation_catches_errors() {
        let mut config = ServerConfig::default();
        config.graph_db.vendor = "neo4j".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported graph-db vendor 'neo4j'"));

        let mut config = ServerConfig::default();
        config.rel_db.url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigLoadError::Invalid { .. })
        ));

        let mut config = ServerConfig::default();
        config.storage.vendor = "r2".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not implemented"));

        let mut config = ServerConfig::default();
        config.storage.private_bucket_name = config.storage.public_bucket_name.clone();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.cache.vendor = "redis".to_string();
        config.cache.url = None;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.logging.level = "invalid".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_invalid_config_returns_clear_error() {
        let result = ServerConfig::load("/nonexistent/path/config.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.rel_db.vendor, "postgres");
        assert_eq!(config.graph_db.vendor, "age");
        assert_eq!(config.vector_db.vendor, "pgvector");
        assert_eq!(config.storage.vendor, "memory");
        assert_eq!(config.cache.vendor, "memory");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("GRAPHMIND_STORAGE__PUBLIC_BUCKET_NAME", "env-public");

        let config = ServerConfig::from_env();

        std::env::remove_var("GRAPHMIND_STORAGE__PUBLIC_BUCKET_NAME");

        let config = config.unwrap();
        assert_eq!(config.storage.public_bucket_name, "env-public");
        assert_eq!(config.storage.private_bucket_name, "graphmind-private");
    }

    #[test]
    fn test_debug_output_hides_credentials() {
        let mut config = ServerConfig::default();
        config.rel_db.url = "postgres://app:hunter2@db/graphmind".to_string();
        config.storage.secret_key = "s3cr3t".to_string();

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
