//! Object storage settings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InfraError, InfraResult};

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Settings shared by the public and private bucket adapters.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `aws-s3`, `minio`, `rustfs` or `memory`.
    pub vendor: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Address buckets as `<endpoint>/<bucket>` instead of `<bucket>.<host>`.
    #[serde(default)]
    pub force_path_style: bool,

    /// Endpoint the server itself talks to.
    #[serde(default)]
    pub internal_endpoint: Option<String>,

    /// Endpoint clients see in presigned and public URLs.
    #[serde(default)]
    pub external_endpoint: Option<String>,

    pub public_bucket_name: String,

    pub private_bucket_name: String,

    /// Provision both buckets (and the public-read policy where supported)
    /// during startup.
    #[serde(default)]
    pub ensure_buckets_on_boot: bool,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("vendor", &self.vendor)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .field("internal_endpoint", &self.internal_endpoint)
            .field("external_endpoint", &self.external_endpoint)
            .field("public_bucket_name", &self.public_bucket_name)
            .field("private_bucket_name", &self.private_bucket_name)
            .field("ensure_buckets_on_boot", &self.ensure_buckets_on_boot)
            .finish()
    }
}

impl StorageConfig {
    /// In-process storage, handy for tests.
    pub fn memory(public_bucket: impl Into<String>, private_bucket: impl Into<String>) -> Self {
        Self {
            vendor: "memory".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            region: default_region(),
            force_path_style: true,
            internal_endpoint: None,
            external_endpoint: None,
            public_bucket_name: public_bucket.into(),
            private_bucket_name: private_bucket.into(),
            ensure_buckets_on_boot: false,
        }
    }

    /// Endpoint used for presigning and public URLs.
    pub fn client_facing_endpoint(&self) -> Option<&str> {
        self.external_endpoint
            .as_deref()
            .or(self.internal_endpoint.as_deref())
    }

    pub fn validate(&self) -> InfraResult<()> {
        let invalid = |message: &str| InfraError::Configuration {
            backend: "storage".to_string(),
            message: message.to_string(),
        };

        if self.public_bucket_name.trim().is_empty() {
            return Err(invalid("public_bucket_name is required"));
        }
        if self.private_bucket_name.trim().is_empty() {
            return Err(invalid("private_bucket_name is required"));
        }
        if self.public_bucket_name == self.private_bucket_name {
            return Err(invalid(
                "public_bucket_name and private_bucket_name must differ",
            ));
        }
        if self.vendor != "memory" {
            if self.access_key.is_empty() || self.secret_key.is_empty() {
                return Err(invalid("access_key and secret_key are required"));
            }
            if self.vendor != "aws-s3" && self.internal_endpoint.is_none() {
                return Err(invalid("internal_endpoint is required for self-hosted vendors"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minio() -> StorageConfig {
        StorageConfig {
            vendor: "minio".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minio-secret".to_string(),
            internal_endpoint: Some("http://minio:9000".to_string()),
            ..StorageConfig::memory("public", "private")
        }
    }

    #[test]
    fn test_external_endpoint_wins_for_client_urls() {
        let mut config = minio();
        assert_eq!(config.client_facing_endpoint(), Some("http://minio:9000"));

        config.external_endpoint = Some("https://files.example.com".to_string());
        assert_eq!(
            config.client_facing_endpoint(),
            Some("https://files.example.com")
        );
    }

    #[test]
    fn test_validate_requires_credentials_and_endpoint() {
        assert!(minio().validate().is_ok());

        let mut config = minio();
        config.secret_key.clear();
        assert!(config.validate().is_err());

        let mut config = minio();
        config.internal_endpoint = None;
        assert!(config.validate().is_err());

        assert!(StorageConfig::memory("a", "b").validate().is_ok());
        assert!(StorageConfig::memory("a", "a").validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug_str = format!("{:?}", minio());
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("minio-secret"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: StorageConfig = serde_json::from_str(
            r#"{"vendor": "memory", "public_bucket_name": "pub", "private_bucket_name": "priv"}"#,
        )
        .unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(!config.force_path_style);
        assert!(!config.ensure_buckets_on_boot);
    }
}
