//! Per-backend settings for SQL-speaking backends.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::pool::PoolOptions;
use crate::error::{InfraError, InfraResult};

fn default_max_connections() -> u32 {
    10
}

fn default_idle_timeout_millis() -> u64 {
    60_000
}

fn default_max_lifetime_seconds() -> u64 {
    21_600
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

/// Settings for one relational, graph or vector backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Vendor tag, e.g. `postgres`, `age`, `pgvector`.
    pub vendor: String,

    /// Connection URL. May carry credentials.
    #[serde(default)]
    pub url: String,

    /// Upper bound on open connections.
    #[serde(default = "default_max_connections")]
    pub pool_max_connections: u32,

    /// Idle connections older than this are closed.
    #[serde(default = "default_idle_timeout_millis")]
    pub pool_idle_timeout_millis: u64,

    /// Connections are recycled after this long.
    #[serde(default = "default_max_lifetime_seconds")]
    pub pool_max_lifetime_seconds: u64,

    /// How long `acquire` waits for a free connection.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("vendor", &self.vendor)
            .field("url", &"[REDACTED]")
            .field("pool_max_connections", &self.pool_max_connections)
            .field("pool_idle_timeout_millis", &self.pool_idle_timeout_millis)
            .field("pool_max_lifetime_seconds", &self.pool_max_lifetime_seconds)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    /// Settings with pool defaults for the given vendor and URL.
    pub fn new(vendor: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            url: url.into(),
            pool_max_connections: default_max_connections(),
            pool_idle_timeout_millis: default_idle_timeout_millis(),
            pool_max_lifetime_seconds: default_max_lifetime_seconds(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }

    /// Checks the fields that a pool cannot be built without.
    pub fn validate(&self, family: &str) -> InfraResult<()> {
        if self.url.trim().is_empty() {
            return Err(InfraError::Configuration {
                backend: family.to_string(),
                message: "url is required".to_string(),
            });
        }
        if self.pool_max_connections == 0 {
            return Err(InfraError::Configuration {
                backend: family.to_string(),
                message: "pool_max_connections must be greater than 0".to_string(),
            });
        }
        if self.acquire_timeout_secs == 0 {
            return Err(InfraError::Configuration {
                backend: family.to_string(),
                message: "acquire_timeout_secs must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_pool_options(&self) -> PoolOptions {
        PoolOptions {
            url: self.url.clone(),
            max_connections: self.pool_max_connections,
            idle_timeout: Duration::from_millis(self.pool_idle_timeout_millis),
            max_lifetime: Duration::from_secs(self.pool_max_lifetime_seconds),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_when_fields_missing() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"vendor": "postgres", "url": "postgres://localhost/app"}"#)
                .unwrap();

        assert_eq!(config.pool_max_connections, 10);
        assert_eq!(config.pool_idle_timeout_millis, 60_000);
        assert_eq!(config.pool_max_lifetime_seconds, 21_600);
        assert_eq!(config.acquire_timeout_secs, 30);
        assert_eq!(config, BackendConfig::new("postgres", "postgres://localhost/app"));
    }

    #[test]
    fn test_to_pool_options_converts_units() {
        let mut config = BackendConfig::new("age", "postgres://localhost/graph");
        config.pool_idle_timeout_millis = 1_500;
        config.pool_max_lifetime_seconds = 120;

        let options = config.to_pool_options();
        assert_eq!(options.idle_timeout, Duration::from_millis(1_500));
        assert_eq!(options.max_lifetime, Duration::from_secs(120));
        assert_eq!(options.acquire_timeout, Duration::from_secs(30));
        assert_eq!(options.max_connections, 10);
    }

    #[test]
    fn test_validate_rejects_empty_url_and_zero_pool() {
        let config = BackendConfig::new("postgres", "");
        assert!(matches!(
            config.validate("rel-db"),
            Err(InfraError::Configuration { .. })
        ));

        let mut config = BackendConfig::new("postgres", "postgres://localhost/app");
        config.pool_max_connections = 0;
        let err = config.validate("rel-db").unwrap_err();
        assert!(err.to_string().contains("pool_max_connections"));

        let config = BackendConfig::new("postgres", "postgres://localhost/app");
        assert!(config.validate("rel-db").is_ok());
    }

    #[test]
    fn test_debug_redacts_url() {
        let config = BackendConfig::new("postgres", "postgres://user:hunter2@db/app");
        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("hunter2"));
    }
}
