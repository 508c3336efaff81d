//! Infrastructure error types.

use thiserror::Error;

/// Errors raised by the infrastructure adapters.
#[derive(Debug, Error)]
pub enum InfraError {
    /// A handle was requested before `configure()` or after `destroy()`,
    /// or the settings for a backend are unusable.
    #[error("{backend} is not ready: {message}")]
    Configuration { backend: String, message: String },

    /// Backend unreachable during the liveness probe.
    #[error("{backend} connection error: {message}")]
    Connection { backend: String, message: String },

    /// BEGIN or COMMIT could not be issued.
    ///
    /// Errors raised by a transaction handler are never wrapped in this
    /// variant; they are returned to the caller unchanged.
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// Vendor tag not recognised, or recognised but not implemented.
    #[error("unsupported {family} vendor '{vendor}': {reason}")]
    UnsupportedVendor {
        family: &'static str,
        vendor: String,
        reason: String,
    },

    /// The vendor reported the resource as absent.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Statement execution failed.
    #[error("query error: {message}")]
    Query { message: String },

    /// Object storage call failed.
    #[error("storage {operation} failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Storage {
        operation: &'static str,
        message: String,
        status: Option<u16>,
    },

    /// Downloaded object had no body.
    #[error("object '{key}' has an empty body")]
    EmptyBody { key: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Key-value cache error.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl InfraError {
    pub(crate) fn not_ready(backend: impl Into<String>) -> Self {
        InfraError::Configuration {
            backend: backend.into(),
            message: "not configured".to_string(),
        }
    }

    /// Returns true for the vendor-agnostic "absent" classification.
    pub fn is_not_found(&self) -> bool {
        matches!(self, InfraError::NotFound { .. })
    }
}

/// Result type for infrastructure operations.
pub type InfraResult<T> = Result<T, InfraError>;

impl From<sqlx::Error> for InfraError {
    fn from(e: sqlx::Error) -> Self {
        InfraError::Query {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(e: serde_json::Error) -> Self {
        InfraError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(e: redis::RedisError) -> Self {
        InfraError::Cache {
            message: e.to_string(),
        }
    }
}
