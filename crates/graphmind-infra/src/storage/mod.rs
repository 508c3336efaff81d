//! Object storage across S3-compatible vendors.
//!
//! Every adapter is scoped to one bucket and implements [`ObjectStorage`].
//! Application code never talks to a vendor SDK directly.
//!
//! | vendor   | adapter                | public bucket policy |
//! |----------|------------------------|----------------------|
//! | `aws-s3` | [`S3ObjectStorage`]    | no                   |
//! | `minio`  | [`S3ObjectStorage`]    | yes                  |
//! | `rustfs` | [`S3ObjectStorage`]    | yes                  |
//! | `memory` | [`MemoryObjectStorage`]| no                   |

pub mod bulk;
pub mod config;
pub mod factory;
pub mod memory;
pub mod s3;
pub mod types;
pub mod url;

use std::fmt;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{info, instrument};

use crate::error::InfraResult;

pub use config::StorageConfig;
pub use factory::{
    check_storage_vendor, create_object_storages, supported_storage_vendors, ObjectStorages,
};
pub use memory::MemoryObjectStorage;
pub use s3::{S3ObjectStorage, S3Vendor};
pub use types::*;

/// Maximum concurrent HEAD probes issued by `check_object_if_exists`.
pub const MAX_CONCURRENT_PROBES: usize = 16;

/// Bucket-scoped object storage operations.
#[async_trait]
pub trait ObjectStorage: Send + Sync + fmt::Debug {
    fn vendor(&self) -> &'static str;

    fn bucket(&self) -> &str;

    /// Creates the bucket unless it already exists.
    ///
    /// Losing a creation race to another process counts as
    /// `{existed: true, created: false}`.
    async fn ensure_bucket(&self) -> InfraResult<EnsureBucketResult>;

    /// Public-read policy support, when the vendor has it.
    fn public_policy(&self) -> Option<&dyn PublicBucketPolicy> {
        None
    }

    async fn upload_object(&self, params: UploadObjectParams) -> InfraResult<UploadObjectResult>;

    async fn generate_presigned_put_url(
        &self,
        params: PresignedPutParams,
    ) -> InfraResult<PresignedUrlGrant>;

    async fn generate_presigned_get_url(
        &self,
        params: PresignedGetParams,
    ) -> InfraResult<PresignedUrlGrant>;

    /// Unauthenticated URL for `key`. Makes no vendor call.
    fn generate_public_get_url(&self, key: &str) -> InfraResult<PublicUrl>;

    /// Downloads `key` with its body converted to `format`.
    ///
    /// A missing key is [`InfraError::NotFound`](crate::InfraError::NotFound);
    /// an empty body is [`InfraError::EmptyBody`](crate::InfraError::EmptyBody).
    async fn download_object(&self, key: &str, format: BodyFormat)
        -> InfraResult<DownloadedObject>;

    async fn delete_object(&self, key: &str) -> InfraResult<DeleteObjectResult>;

    /// Deletes many keys, at most [`bulk::DELETE_BATCH_SIZE`] per vendor call.
    ///
    /// Per-key failures are reported in the result, not as an error.
    async fn delete_object_by_multi_keys(&self, keys: &[String]) -> InfraResult<BulkDeleteResult>;

    /// Lists every key, following continuation tokens to the end.
    async fn list_all_object_keys(
        &self,
        params: ListObjectsParams,
    ) -> InfraResult<ListAllObjectKeysResult>;

    /// HEAD of `key`. A missing key is `NotFound`.
    async fn get_object_metadata(&self, key: &str) -> InfraResult<ObjectMetadata>;

    /// Drops the vendor client. Later calls fail with a configuration error.
    async fn destroy(&self);

    /// Deletes every object under `prefix`.
    #[instrument(skip(self), fields(bucket = self.bucket()))]
    async fn delete_object_by_prefix(&self, prefix: &str) -> InfraResult<DeleteByPrefixResult> {
        let listing = self
            .list_all_object_keys(ListObjectsParams::with_prefix(prefix))
            .await?;
        let outcome = self.delete_object_by_multi_keys(&listing.keys).await?;

        info!(
            prefix,
            deleted = outcome.deleted_keys.len(),
            failed = outcome.failed.len(),
            "Deleted objects by prefix"
        );
        Ok(DeleteByPrefixResult {
            prefix: prefix.to_string(),
            deleted_count: outcome.deleted_keys.len(),
            deleted_keys: outcome.deleted_keys,
            failed: outcome.failed,
        })
    }

    /// Probes every key, at most [`MAX_CONCURRENT_PROBES`] at a time.
    ///
    /// Not-found classifies the key as missing; any other error aborts the
    /// whole check.
    async fn check_object_if_exists(&self, keys: &[String]) -> InfraResult<ObjectExistence> {
        let probes: Vec<(String, bool)> = stream::iter(keys.iter().cloned())
            .map(|key| async move {
                match self.get_object_metadata(&key).await {
                    Ok(_) => Ok((key, true)),
                    Err(e) if e.is_not_found() => Ok((key, false)),
                    Err(e) => Err(e),
                }
            })
            .buffered(MAX_CONCURRENT_PROBES)
            .try_collect()
            .await?;

        let mut existence = ObjectExistence::default();
        for (key, exists) in probes {
            if exists {
                existence.exists_keys.push(key);
            } else {
                existence.missing_keys.push(key);
            }
        }
        Ok(existence)
    }
}

/// Attaches a public-read policy to the adapter's bucket.
#[async_trait]
pub trait PublicBucketPolicy: Send + Sync {
    async fn ensure_public_bucket_policy(&self) -> InfraResult<()>;
}

/// Bucket policy allowing anonymous `s3:GetObject` on every object.
pub fn public_read_policy(bucket: &str) -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "AWS": ["*"] },
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{bucket}/*")],
        }],
    })
}
