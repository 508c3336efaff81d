//! In-process object storage for tests and single-node development.
//!
//! Mirrors S3 semantics closely enough for the adapter contract: buckets must
//! exist before objects are written, listings are paginated by key order,
//! and multi-key deletes report every requested key as deleted.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::error::{InfraError, InfraResult};
use crate::storage::bulk::{collect_pages, delete_in_chunks, ChunkOutcome, ListPage};
use crate::storage::types::*;
use crate::storage::url::{encode_key, public_object_url};
use crate::storage::ObjectStorage;

/// Keys per listing page, matching the S3 default.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

#[derive(Debug)]
struct MemoryBackend {
    buckets: DashMap<String, BTreeMap<String, StoredObject>>,
    /// HTTP status returned by HEAD and GET for a key.
    faults: DashMap<String, u16>,
    page_size: usize,
    closed: AtomicBool,
    batch_delete_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

/// Object storage on one bucket of an in-process store.
#[derive(Debug, Clone)]
pub struct MemoryObjectStorage {
    backend: Arc<MemoryBackend>,
    bucket: String,
    endpoint: Option<String>,
    path_style: bool,
}

impl MemoryObjectStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::with_page_size(bucket, DEFAULT_PAGE_SIZE)
    }

    /// Same as [`new`](Self::new) with a custom listing page size.
    pub fn with_page_size(bucket: impl Into<String>, page_size: usize) -> Self {
        Self {
            backend: Arc::new(MemoryBackend {
                buckets: DashMap::new(),
                faults: DashMap::new(),
                page_size: page_size.max(1),
                closed: AtomicBool::new(false),
                batch_delete_calls: AtomicUsize::new(0),
                list_calls: AtomicUsize::new(0),
            }),
            bucket: bucket.into(),
            endpoint: None,
            path_style: true,
        }
    }

    /// Public URLs are built against `endpoint` instead of `memory://`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, path_style: bool) -> Self {
        self.endpoint = Some(endpoint.into());
        self.path_style = path_style;
        self
    }

    /// An adapter for another bucket of the same store.
    pub fn sibling(&self, bucket: impl Into<String>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            bucket: bucket.into(),
            endpoint: self.endpoint.clone(),
            path_style: self.path_style,
        }
    }

    /// Makes HEAD and GET of `key` fail with the given HTTP status.
    pub fn inject_failure(&self, key: impl Into<String>, status: u16) {
        self.backend.faults.insert(key.into(), status);
    }

    /// Number of DeleteObjects-equivalent calls made so far.
    pub fn batch_delete_calls(&self) -> usize {
        self.backend.batch_delete_calls.load(Ordering::SeqCst)
    }

    /// Number of listing pages served so far.
    pub fn list_calls(&self) -> usize {
        self.backend.list_calls.load(Ordering::SeqCst)
    }

    fn ensure_ready(&self) -> InfraResult<()> {
        if self.backend.closed.load(Ordering::SeqCst) {
            Err(InfraError::not_ready("storage"))
        } else {
            Ok(())
        }
    }

    fn no_such_bucket(&self) -> InfraError {
        InfraError::NotFound {
            resource: format!("bucket {}", self.bucket),
        }
    }

    fn check_fault(&self, operation: &'static str, key: &str) -> InfraResult<()> {
        match self.backend.faults.get(key).map(|status| *status) {
            None => Ok(()),
            Some(404) => Err(InfraError::NotFound {
                resource: format!("{}/{}", self.bucket, key),
            }),
            Some(status) => Err(InfraError::Storage {
                operation,
                message: format!("injected failure for '{key}'"),
                status: Some(status),
            }),
        }
    }

    fn get_object(&self, operation: &'static str, key: &str) -> InfraResult<StoredObject> {
        self.check_fault(operation, key)?;
        let bucket = self
            .backend
            .buckets
            .get(&self.bucket)
            .ok_or_else(|| self.no_such_bucket())?;
        bucket
            .get(key)
            .cloned()
            .ok_or_else(|| InfraError::NotFound {
                resource: format!("{}/{}", self.bucket, key),
            })
    }

    fn public_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => public_object_url(endpoint, &self.bucket, key, self.path_style),
            None => format!("memory://{}/{}", self.bucket, encode_key(key)),
        }
    }

    fn presign(&self, key: String, expires_in: std::time::Duration) -> InfraResult<PresignedUrlGrant> {
        self.ensure_ready()?;
        let issued_at = Utc::now();
        Ok(PresignedUrlGrant {
            url: format!(
                "{}?X-Amz-Expires={}&X-Amz-Signature=memory",
                self.public_url(&key),
                expires_in.as_secs()
            ),
            bucket: self.bucket.clone(),
            key,
            expires_at: expires_at(issued_at, expires_in)?,
        })
    }

    fn delete_chunk(&self, chunk: Vec<String>) -> InfraResult<ChunkOutcome> {
        self.ensure_ready()?;
        self.backend.batch_delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut bucket = self
            .backend
            .buckets
            .get_mut(&self.bucket)
            .ok_or_else(|| self.no_such_bucket())?;
        for key in &chunk {
            bucket.remove(key);
        }
        Ok(ChunkOutcome {
            deleted: chunk,
            failed: Vec::new(),
        })
    }

    fn list_page(
        &self,
        params: &ListObjectsParams,
        token: Option<String>,
    ) -> InfraResult<ListPage> {
        self.ensure_ready()?;
        self.backend.list_calls.fetch_add(1, Ordering::SeqCst);
        let bucket = self
            .backend
            .buckets
            .get(&self.bucket)
            .ok_or_else(|| self.no_such_bucket())?;

        let prefix = params.prefix.as_deref().unwrap_or("");
        let mut page = ListPage::default();
        let mut taken = 0;
        let mut last_key: Option<&String> = None;

        let candidates = bucket
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| token.as_deref().map_or(true, |t| key.as_str() > t));

        for key in candidates {
            if taken == self.backend.page_size {
                page.next_token = last_key.cloned();
                break;
            }
            taken += 1;
            last_key = Some(key);

            let rest = &key[prefix.len()..];
            match params
                .delimiter
                .as_deref()
                .and_then(|d| rest.find(d).map(|i| (i, d)))
            {
                Some((i, d)) => page
                    .common_prefixes
                    .push(format!("{prefix}{}{d}", &rest[..i])),
                None => page.keys.push(key.clone()),
            }
        }

        Ok(page)
    }
}

fn etag_of(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    fn vendor(&self) -> &'static str {
        "memory"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> InfraResult<EnsureBucketResult> {
        self.ensure_ready()?;
        let existed = self.backend.buckets.contains_key(&self.bucket);
        if !existed {
            self.backend
                .buckets
                .entry(self.bucket.clone())
                .or_default();
            info!(bucket = %self.bucket, "Bucket created");
        }
        Ok(EnsureBucketResult {
            bucket: self.bucket.clone(),
            existed,
            created: !existed,
        })
    }

    #[instrument(skip(self, params), fields(bucket = %self.bucket, key = %params.key))]
    async fn upload_object(&self, params: UploadObjectParams) -> InfraResult<UploadObjectResult> {
        self.ensure_ready()?;
        let data = params
            .body
            .collect_bytes()
            .await
            .map_err(|e| InfraError::Storage {
                operation: "upload_object",
                message: format!("failed to read body of '{}': {e}", params.key),
                status: None,
            })?;

        let object = StoredObject {
            etag: etag_of(&data),
            data,
            content_type: params.content_type,
            last_modified: Utc::now(),
            metadata: params.metadata,
        };
        let etag = object.etag.clone();
        let upload_time = object.last_modified;

        self.backend
            .buckets
            .get_mut(&self.bucket)
            .ok_or_else(|| self.no_such_bucket())?
            .insert(params.key.clone(), object);

        debug!("Object stored");
        Ok(UploadObjectResult {
            bucket: self.bucket.clone(),
            key: params.key,
            etag: Some(etag),
            upload_time,
        })
    }

    async fn generate_presigned_put_url(
        &self,
        params: PresignedPutParams,
    ) -> InfraResult<PresignedUrlGrant> {
        self.presign(
            params.key,
            params.expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY),
        )
    }

    async fn generate_presigned_get_url(
        &self,
        params: PresignedGetParams,
    ) -> InfraResult<PresignedUrlGrant> {
        self.presign(
            params.key,
            params.expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY),
        )
    }

    fn generate_public_get_url(&self, key: &str) -> InfraResult<PublicUrl> {
        self.ensure_ready()?;
        Ok(PublicUrl {
            url: self.public_url(key),
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn download_object(
        &self,
        key: &str,
        format: BodyFormat,
    ) -> InfraResult<DownloadedObject> {
        self.ensure_ready()?;
        let object = self.get_object("get_object", key)?;
        if object.data.is_empty() {
            return Err(InfraError::EmptyBody {
                key: key.to_string(),
            });
        }

        Ok(DownloadedObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: object.content_type,
            content_length: Some(object.data.len() as i64),
            etag: Some(object.etag),
            body: ObjectBody::Bytes(object.data).into_format(format, key).await?,
        })
    }

    async fn delete_object(&self, key: &str) -> InfraResult<DeleteObjectResult> {
        self.ensure_ready()?;
        self.backend
            .buckets
            .get_mut(&self.bucket)
            .ok_or_else(|| self.no_such_bucket())?
            .remove(key);

        Ok(DeleteObjectResult {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn delete_object_by_multi_keys(&self, keys: &[String]) -> InfraResult<BulkDeleteResult> {
        self.ensure_ready()?;
        Ok(delete_in_chunks(keys, |chunk| {
            let outcome = self.delete_chunk(chunk);
            async move { outcome }
        })
        .await)
    }

    async fn list_all_object_keys(
        &self,
        params: ListObjectsParams,
    ) -> InfraResult<ListAllObjectKeysResult> {
        self.ensure_ready()?;
        collect_pages(|token| {
            let page = self.list_page(&params, token);
            async move { page }
        })
        .await
    }

    async fn get_object_metadata(&self, key: &str) -> InfraResult<ObjectMetadata> {
        self.ensure_ready()?;
        let object = self.get_object("head_object", key)?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            content_type: object.content_type,
            content_length: Some(object.data.len() as i64),
            etag: Some(object.etag),
            last_modified: Some(object.last_modified),
            metadata: object.metadata,
        })
    }

    async fn destroy(&self) {
        if !self.backend.closed.swap(true, Ordering::SeqCst) {
            info!("Memory storage closed");
        }
    }
}
