//! Vendor dispatch for object storage.

use std::sync::Arc;

use futures::future::join;
use tracing::{info, instrument};

use crate::error::InfraResult;
use crate::storage::config::StorageConfig;
use crate::storage::memory::MemoryObjectStorage;
use crate::storage::s3::{S3ObjectStorage, S3Vendor};
use crate::storage::types::EnsureBucketResult;
use crate::storage::ObjectStorage;
use crate::vendor::VendorRegistry;

/// Adapters for the public and private buckets. Both share one vendor client.
#[derive(Debug, Clone)]
pub struct ObjectStorages {
    pub public: Arc<dyn ObjectStorage>,
    pub private: Arc<dyn ObjectStorage>,
}

impl ObjectStorages {
    /// Ensures both buckets exist and, where the vendor supports it, makes
    /// the public bucket world-readable.
    #[instrument(skip(self), fields(vendor = self.public.vendor()))]
    pub async fn ensure_buckets(&self) -> InfraResult<(EnsureBucketResult, EnsureBucketResult)> {
        let (public, private) = join(self.public.ensure_bucket(), self.private.ensure_bucket()).await;
        let (public, private) = (public?, private?);

        if let Some(policy) = self.public.public_policy() {
            policy.ensure_public_bucket_policy().await?;
        }

        info!(
            public = %public.bucket,
            private = %private.bucket,
            "Buckets ready"
        );
        Ok((public, private))
    }

    /// Releases the vendor client shared by both adapters.
    pub async fn destroy(&self) {
        join(self.public.destroy(), self.private.destroy()).await;
    }
}

type StorageConstructor = fn(&StorageConfig) -> ObjectStorages;

fn s3_pair(vendor: S3Vendor, config: &StorageConfig) -> ObjectStorages {
    let public = S3ObjectStorage::new(vendor, config, config.public_bucket_name.clone());
    let private = public.sibling(config.private_bucket_name.clone());
    ObjectStorages {
        public: Arc::new(public),
        private: Arc::new(private),
    }
}

fn build_aws_s3(config: &StorageConfig) -> ObjectStorages {
    s3_pair(S3Vendor::AwsS3, config)
}

fn build_minio(config: &StorageConfig) -> ObjectStorages {
    s3_pair(S3Vendor::Minio, config)
}

fn build_rustfs(config: &StorageConfig) -> ObjectStorages {
    s3_pair(S3Vendor::RustFs, config)
}

fn build_memory(config: &StorageConfig) -> ObjectStorages {
    let mut public = MemoryObjectStorage::new(config.public_bucket_name.clone());
    if let Some(endpoint) = config.client_facing_endpoint() {
        public = public.with_endpoint(endpoint, config.force_path_style);
    }
    let private = public.sibling(config.private_bucket_name.clone());
    ObjectStorages {
        public: Arc::new(public),
        private: Arc::new(private),
    }
}

const STORAGE: VendorRegistry<StorageConstructor> = VendorRegistry {
    family: "storage",
    supported: &[
        ("aws-s3", build_aws_s3),
        ("minio", build_minio),
        ("rustfs", build_rustfs),
        ("memory", build_memory),
    ],
    placeholders: &["r2", "oss", "cos"],
};

/// Builds the public and private bucket adapters for `config.vendor`.
///
/// No network calls are made; S3 clients connect on first use.
pub fn create_object_storages(config: &StorageConfig) -> InfraResult<ObjectStorages> {
    let constructor = STORAGE.lookup(&config.vendor)?;
    config.validate()?;
    Ok(constructor(config))
}

/// Fails with `UnsupportedVendor` unless `vendor` is a usable storage vendor.
pub fn check_storage_vendor(vendor: &str) -> InfraResult<()> {
    STORAGE.lookup(vendor).map(|_| ())
}

pub fn supported_storage_vendors() -> Vec<&'static str> {
    STORAGE.tags()
}
