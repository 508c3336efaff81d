//! S3-compatible adapter for AWS S3, MinIO and RustFS.
//!
//! The three vendors share one implementation over `aws-sdk-s3`; they differ
//! only in default endpoint, bucket-creation location constraint and whether
//! a public-read bucket policy may be attached.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{InfraError, InfraResult};
use crate::storage::bulk::{collect_pages, delete_in_chunks, ChunkOutcome, ListPage};
use crate::storage::config::StorageConfig;
use crate::storage::types::*;
use crate::storage::url::{aws_default_endpoint, public_object_url};
use crate::storage::{public_read_policy, ObjectStorage, PublicBucketPolicy};

/// Bodies up to this size go through a single PutObject; larger ones are
/// uploaded in parts of at least this size.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

const AWS_DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible vendor flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Vendor {
    AwsS3,
    Minio,
    RustFs,
}

impl S3Vendor {
    pub fn tag(&self) -> &'static str {
        match self {
            S3Vendor::AwsS3 => "aws-s3",
            S3Vendor::Minio => "minio",
            S3Vendor::RustFs => "rustfs",
        }
    }

    /// AWS accounts block public bucket policies by default, so only the
    /// self-hosted vendors expose the capability.
    pub fn supports_public_policy(&self) -> bool {
        matches!(self, S3Vendor::Minio | S3Vendor::RustFs)
    }
}

#[derive(Clone)]
struct S3Clients {
    /// Server-side operations, against the internal endpoint.
    internal: Client,
    /// Presigning, against the endpoint clients will use.
    presign: Client,
}

/// State shared by every bucket adapter built from one configuration.
struct S3Shared {
    vendor: S3Vendor,
    region: String,
    force_path_style: bool,
    public_endpoint: String,
    clients: RwLock<Option<S3Clients>>,
}

impl S3Shared {
    fn read_clients(&self) -> RwLockReadGuard<'_, Option<S3Clients>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, Option<S3Clients>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_client(config: &StorageConfig, endpoint: Option<&str>) -> Client {
    let credentials = Credentials::new(
        config.access_key.clone(),
        config.secret_key.clone(),
        None,
        None,
        "graphmind-config",
    );

    let mut builder = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .force_path_style(config.force_path_style);
    if let Some(endpoint) = endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    Client::from_conf(builder.build())
}

/// Object storage on one bucket of an S3-compatible vendor.
pub struct S3ObjectStorage {
    shared: Arc<S3Shared>,
    bucket: String,
}

impl fmt::Debug for S3ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ObjectStorage")
            .field("vendor", &self.shared.vendor)
            .field("bucket", &self.bucket)
            .field("region", &self.shared.region)
            .field("force_path_style", &self.shared.force_path_style)
            .field("ready", &self.shared.read_clients().is_some())
            .finish()
    }
}

impl S3ObjectStorage {
    /// Builds the SDK clients. Does not contact the endpoint.
    pub fn new(vendor: S3Vendor, config: &StorageConfig, bucket: impl Into<String>) -> Self {
        let internal = build_client(config, config.internal_endpoint.as_deref());
        let presign = match config.external_endpoint.as_deref() {
            Some(external) => build_client(config, Some(external)),
            None => internal.clone(),
        };
        let public_endpoint = config
            .client_facing_endpoint()
            .map(str::to_string)
            .unwrap_or_else(|| aws_default_endpoint(&config.region));

        Self {
            shared: Arc::new(S3Shared {
                vendor,
                region: config.region.clone(),
                force_path_style: config.force_path_style,
                public_endpoint,
                clients: RwLock::new(Some(S3Clients { internal, presign })),
            }),
            bucket: bucket.into(),
        }
    }

    /// An adapter for another bucket on the same clients.
    pub fn sibling(&self, bucket: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            bucket: bucket.into(),
        }
    }

    pub fn s3_vendor(&self) -> S3Vendor {
        self.shared.vendor
    }

    fn clients(&self) -> InfraResult<S3Clients> {
        self.shared
            .read_clients()
            .clone()
            .ok_or_else(|| InfraError::not_ready("storage"))
    }

    fn object_ref(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }

    async fn multipart_upload(
        &self,
        client: &Client,
        key: &str,
        content_type: Option<String>,
        metadata: Option<HashMap<String, String>>,
        first: BytesMut,
        mut body: BoxStream<'static, io::Result<Bytes>>,
    ) -> InfraResult<Option<String>> {
        let created = client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| sdk_error("create_multipart_upload", e))?;
        let upload_id = created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| InfraError::Storage {
                operation: "create_multipart_upload",
                message: "vendor returned no upload id".to_string(),
                status: None,
            })?;
        debug!(%upload_id, "Started multipart upload");

        let parts = match self
            .upload_parts(client, key, &upload_id, first, &mut body)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(client, key, &upload_id).await;
                return Err(e);
            }
        };

        let completed = client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;

        match completed {
            Ok(output) => Ok(output.e_tag().map(str::to_string)),
            Err(e) => {
                let err = sdk_error("complete_multipart_upload", e);
                self.abort_multipart(client, key, &upload_id).await;
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        client: &Client,
        key: &str,
        upload_id: &str,
        first: BytesMut,
        body: &mut BoxStream<'static, io::Result<Bytes>>,
    ) -> InfraResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut buf = first;
        let mut exhausted = false;
        let mut part_number = 1;

        loop {
            if !buf.is_empty() {
                let output = client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(buf.split().freeze()))
                    .send()
                    .await
                    .map_err(|e| sdk_error("upload_part", e))?;
                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .part_number(part_number)
                        .build(),
                );
                part_number += 1;
            }
            if exhausted {
                break;
            }
            exhausted = fill_part(body, &mut buf)
                .await
                .map_err(|e| body_read_error(key, e))?;
        }

        Ok(parts)
    }

    async fn abort_multipart(&self, client: &Client, key: &str, upload_id: &str) {
        if let Err(e) = client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(error = %DisplayErrorContext(&e), upload_id, "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    fn vendor(&self) -> &'static str {
        self.shared.vendor.tag()
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, vendor = self.vendor()))]
    async fn ensure_bucket(&self) -> InfraResult<EnsureBucketResult> {
        let clients = self.clients()?;

        match clients.internal.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Bucket already exists");
                return Ok(EnsureBucketResult {
                    bucket: self.bucket.clone(),
                    existed: true,
                    created: false,
                });
            }
            Err(e) if is_not_found(&e) => info!("Bucket does not exist, creating it"),
            Err(e) => {
                error!(error = %DisplayErrorContext(&e), "Failed to check bucket");
                return Err(sdk_error("head_bucket", e));
            }
        }

        let mut request = clients.internal.create_bucket().bucket(&self.bucket);
        if self.shared.vendor == S3Vendor::AwsS3 && self.shared.region != AWS_DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(
                        self.shared.region.as_str(),
                    ))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!("Bucket created");
                Ok(EnsureBucketResult {
                    bucket: self.bucket.clone(),
                    existed: false,
                    created: true,
                })
            }
            Err(e)
                if matches!(
                    e.code(),
                    Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists")
                ) =>
            {
                warn!("Bucket was created concurrently by someone else");
                Ok(EnsureBucketResult {
                    bucket: self.bucket.clone(),
                    existed: true,
                    created: false,
                })
            }
            Err(e) => {
                error!(error = %DisplayErrorContext(&e), "Failed to create bucket");
                Err(sdk_error("create_bucket", e))
            }
        }
    }

    fn public_policy(&self) -> Option<&dyn PublicBucketPolicy> {
        if self.shared.vendor.supports_public_policy() {
            Some(self as &dyn PublicBucketPolicy)
        } else {
            None
        }
    }

    #[instrument(skip(self, params), fields(bucket = %self.bucket, key = %params.key))]
    async fn upload_object(&self, params: UploadObjectParams) -> InfraResult<UploadObjectResult> {
        let clients = self.clients()?;
        let UploadObjectParams {
            key,
            body,
            content_type,
            metadata,
        } = params;
        let metadata = (!metadata.is_empty()).then_some(metadata);

        let mut body = body.into_stream();
        let mut first = BytesMut::new();
        let exhausted = fill_part(&mut body, &mut first)
            .await
            .map_err(|e| body_read_error(&key, e))?;

        let etag = if exhausted {
            clients
                .internal
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(first.freeze()))
                .set_content_type(content_type)
                .set_metadata(metadata)
                .send()
                .await
                .map_err(|e| sdk_error("put_object", e))?
                .e_tag()
                .map(str::to_string)
        } else {
            self.multipart_upload(&clients.internal, &key, content_type, metadata, first, body)
                .await?
        };

        debug!("Object uploaded");
        Ok(UploadObjectResult {
            bucket: self.bucket.clone(),
            key,
            etag,
            upload_time: Utc::now(),
        })
    }

    async fn generate_presigned_put_url(
        &self,
        params: PresignedPutParams,
    ) -> InfraResult<PresignedUrlGrant> {
        let clients = self.clients()?;
        let expires_in = params.expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY);
        let presigning = presigning_config(expires_in)?;

        let issued_at = Utc::now();
        let request = clients
            .presign
            .put_object()
            .bucket(&self.bucket)
            .key(&params.key)
            .set_content_type(params.content_type.clone())
            .presigned(presigning)
            .await
            .map_err(|e| sdk_error("presign_put_object", e))?;

        Ok(PresignedUrlGrant {
            url: request.uri().to_string(),
            bucket: self.bucket.clone(),
            key: params.key,
            expires_at: expires_at(issued_at, expires_in)?,
        })
    }

    async fn generate_presigned_get_url(
        &self,
        params: PresignedGetParams,
    ) -> InfraResult<PresignedUrlGrant> {
        let clients = self.clients()?;
        let expires_in = params.expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY);
        let presigning = presigning_config(expires_in)?;

        let issued_at = Utc::now();
        let request = clients
            .presign
            .get_object()
            .bucket(&self.bucket)
            .key(&params.key)
            .presigned(presigning)
            .await
            .map_err(|e| sdk_error("presign_get_object", e))?;

        Ok(PresignedUrlGrant {
            url: request.uri().to_string(),
            bucket: self.bucket.clone(),
            key: params.key,
            expires_at: expires_at(issued_at, expires_in)?,
        })
    }

    fn generate_public_get_url(&self, key: &str) -> InfraResult<PublicUrl> {
        self.clients()?;
        Ok(PublicUrl {
            url: public_object_url(
                &self.shared.public_endpoint,
                &self.bucket,
                key,
                self.shared.force_path_style,
            ),
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn download_object(
        &self,
        key: &str,
        format: BodyFormat,
    ) -> InfraResult<DownloadedObject> {
        let clients = self.clients()?;
        let output = clients
            .internal
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| not_found_or("get_object", self.object_ref(key), e))?;

        let content_length = output.content_length();
        if content_length == Some(0) {
            return Err(InfraError::EmptyBody {
                key: key.to_string(),
            });
        }
        let content_type = output.content_type().map(str::to_string);
        let etag = output.e_tag().map(str::to_string);
        let body = ObjectBody::Stream(byte_stream(output.body))
            .into_format(format, key)
            .await?;

        Ok(DownloadedObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type,
            content_length,
            etag,
            body,
        })
    }

    async fn delete_object(&self, key: &str) -> InfraResult<DeleteObjectResult> {
        let clients = self.clients()?;
        clients
            .internal
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("delete_object", e))?;

        Ok(DeleteObjectResult {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    #[instrument(skip(self, keys), fields(bucket = %self.bucket, keys = keys.len()))]
    async fn delete_object_by_multi_keys(&self, keys: &[String]) -> InfraResult<BulkDeleteResult> {
        let clients = self.clients()?;
        let client = &clients.internal;
        let bucket = self.bucket.as_str();

        Ok(delete_in_chunks(keys, move |chunk| async move {
            delete_chunk(client, bucket, chunk).await
        })
        .await)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_all_object_keys(
        &self,
        params: ListObjectsParams,
    ) -> InfraResult<ListAllObjectKeysResult> {
        let clients = self.clients()?;
        let client = &clients.internal;
        let bucket = self.bucket.as_str();

        collect_pages(move |token| {
            let request = client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(params.prefix.clone())
                .set_delimiter(params.delimiter.clone())
                .set_continuation_token(token);
            async move {
                let output = request
                    .send()
                    .await
                    .map_err(|e| sdk_error("list_objects_v2", e))?;
                Ok(ListPage {
                    keys: output
                        .contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string))
                        .collect(),
                    common_prefixes: output
                        .common_prefixes()
                        .iter()
                        .filter_map(|prefix| prefix.prefix().map(str::to_string))
                        .collect(),
                    next_token: output.next_continuation_token().map(str::to_string),
                })
            }
        })
        .await
    }

    async fn get_object_metadata(&self, key: &str) -> InfraResult<ObjectMetadata> {
        let clients = self.clients()?;
        let output = clients
            .internal
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| not_found_or("head_object", self.object_ref(key), e))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            content_type: output.content_type().map(str::to_string),
            content_length: output.content_length(),
            etag: output.e_tag().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn destroy(&self) {
        if self.shared.write_clients().take().is_some() {
            info!(vendor = self.vendor(), "Storage clients released");
        }
    }
}

#[async_trait]
impl PublicBucketPolicy for S3ObjectStorage {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn ensure_public_bucket_policy(&self) -> InfraResult<()> {
        if !self.shared.vendor.supports_public_policy() {
            return Err(InfraError::UnsupportedVendor {
                family: "storage",
                vendor: self.vendor().to_string(),
                reason: "public bucket policy not supported".to_string(),
            });
        }

        let clients = self.clients()?;
        clients
            .internal
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(public_read_policy(&self.bucket).to_string())
            .send()
            .await
            .map_err(|e| sdk_error("put_bucket_policy", e))?;

        info!("Public-read bucket policy applied");
        Ok(())
    }
}

async fn delete_chunk(client: &Client, bucket: &str, chunk: Vec<String>) -> InfraResult<ChunkOutcome> {
    let objects = chunk
        .iter()
        .map(|key| ObjectIdentifier::builder().key(key).build())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| InfraError::InvalidInput {
            message: e.to_string(),
        })?;
    let delete = Delete::builder()
        .set_objects(Some(objects))
        .quiet(false)
        .build()
        .map_err(|e| InfraError::InvalidInput {
            message: e.to_string(),
        })?;

    let output = client
        .delete_objects()
        .bucket(bucket)
        .delete(delete)
        .send()
        .await
        .map_err(|e| sdk_error("delete_objects", e))?;

    Ok(ChunkOutcome {
        deleted: output
            .deleted()
            .iter()
            .filter_map(|d| d.key().map(str::to_string))
            .collect(),
        failed: output
            .errors()
            .iter()
            .filter_map(|e| {
                e.key().map(|key| FailedDeletion {
                    key: key.to_string(),
                    error: format!(
                        "{}: {}",
                        e.code().unwrap_or("Unknown"),
                        e.message().unwrap_or_default()
                    ),
                })
            })
            .collect(),
    })
}

/// Pulls chunks into `buf` until it holds at least [`PART_SIZE`] bytes.
/// Returns `true` once the body is exhausted.
async fn fill_part(
    body: &mut BoxStream<'static, io::Result<Bytes>>,
    buf: &mut BytesMut,
) -> io::Result<bool> {
    while buf.len() < PART_SIZE {
        match body.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

fn byte_stream(body: ByteStream) -> BoxStream<'static, io::Result<Bytes>> {
    stream::unfold(body, |mut body| async move {
        body.next()
            .await
            .map(|chunk| (chunk.map_err(io::Error::other), body))
    })
    .boxed()
}

fn presigning_config(expires_in: Duration) -> InfraResult<PresigningConfig> {
    PresigningConfig::expires_in(expires_in).map_err(|e| InfraError::InvalidInput {
        message: format!("invalid presign expiry: {e}"),
    })
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn body_read_error(key: &str, e: io::Error) -> InfraError {
    InfraError::Storage {
        operation: "upload_object",
        message: format!("failed to read body of '{key}': {e}"),
        status: None,
    }
}

fn http_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn is_not_found<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    signals_not_found(http_status(err), err.code())
}

fn signals_not_found(status: Option<u16>, code: Option<&str>) -> bool {
    status == Some(404) || matches!(code, Some("NotFound" | "NoSuchKey" | "NoSuchBucket"))
}

fn sdk_error<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> InfraError
where
    E: std::error::Error + 'static,
{
    InfraError::Storage {
        operation,
        status: http_status(&err),
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn not_found_or<E>(operation: &'static str, resource: String, err: SdkError<E, HttpResponse>) -> InfraError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if is_not_found(&err) {
        InfraError::NotFound { resource }
    } else {
        sdk_error(operation, err)
    }
}
