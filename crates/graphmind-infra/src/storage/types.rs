//! Request and result types shared by every object storage adapter.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};

use crate::error::{InfraError, InfraResult};

/// Presigned URLs are valid for 15 minutes unless the caller asks otherwise.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(900);

/// Object payload.
pub enum ObjectBody {
    Bytes(Bytes),
    Text(String),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ObjectBody::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
            ObjectBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(value: Bytes) -> Self {
        ObjectBody::Bytes(value)
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(value: Vec<u8>) -> Self {
        ObjectBody::Bytes(Bytes::from(value))
    }
}

impl From<String> for ObjectBody {
    fn from(value: String) -> Self {
        ObjectBody::Text(value)
    }
}

impl From<&str> for ObjectBody {
    fn from(value: &str) -> Self {
        ObjectBody::Text(value.to_string())
    }
}

impl ObjectBody {
    /// Turns any body into a chunk stream.
    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        match self {
            ObjectBody::Bytes(b) => stream::once(async move { Ok(b) }).boxed(),
            ObjectBody::Text(t) => stream::once(async move { Ok(Bytes::from(t)) }).boxed(),
            ObjectBody::Stream(s) => s,
        }
    }

    /// Reads the whole body into memory.
    pub async fn collect_bytes(self) -> io::Result<Bytes> {
        match self {
            ObjectBody::Bytes(b) => Ok(b),
            ObjectBody::Text(t) => Ok(Bytes::from(t)),
            ObjectBody::Stream(s) => {
                let buf = s
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// Converts a downloaded body into the representation the caller asked for.
    ///
    /// Buffered formats reject empty payloads with [`InfraError::EmptyBody`];
    /// text must be valid UTF-8.
    pub async fn into_format(self, format: BodyFormat, key: &str) -> InfraResult<ObjectBody> {
        if format == BodyFormat::Stream {
            return Ok(ObjectBody::Stream(self.into_stream()));
        }

        let bytes = self.collect_bytes().await.map_err(|e| InfraError::Storage {
            operation: "download_object",
            message: format!("failed to read body of '{key}': {e}"),
            status: None,
        })?;
        if bytes.is_empty() {
            return Err(InfraError::EmptyBody {
                key: key.to_string(),
            });
        }

        match format {
            BodyFormat::Text => String::from_utf8(bytes.to_vec())
                .map(ObjectBody::Text)
                .map_err(|e| InfraError::InvalidInput {
                    message: format!("object '{key}' is not valid UTF-8: {e}"),
                }),
            _ => Ok(ObjectBody::Bytes(bytes)),
        }
    }
}

/// Representation requested for a downloaded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyFormat {
    #[default]
    Bytes,
    Text,
    Stream,
}

/// Bucket provisioning outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureBucketResult {
    pub bucket: String,
    pub existed: bool,
    pub created: bool,
}

#[derive(Debug)]
pub struct UploadObjectParams {
    pub key: String,
    pub body: ObjectBody,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl UploadObjectParams {
    pub fn new(key: impl Into<String>, body: impl Into<ObjectBody>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            content_type: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadObjectResult {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    pub upload_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PresignedPutParams {
    pub key: String,
    pub expires_in: Option<Duration>,
    pub content_type: Option<String>,
}

impl PresignedPutParams {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresignedGetParams {
    pub key: String,
    pub expires_in: Option<Duration>,
}

impl PresignedGetParams {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expires_in: None,
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

/// A time-boxed URL. `expires_at` is the generation time plus the validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrlGrant {
    pub url: String,
    pub bucket: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

pub(crate) fn expires_at(issued_at: DateTime<Utc>, expires_in: Duration) -> InfraResult<DateTime<Utc>> {
    chrono::Duration::from_std(expires_in)
        .ok()
        .and_then(|validity| issued_at.checked_add_signed(validity))
        .ok_or_else(|| InfraError::InvalidInput {
            message: format!("presign expiry out of range: {expires_in:?}"),
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrl {
    pub url: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug)]
pub struct DownloadedObject {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub etag: Option<String>,
    pub body: ObjectBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObjectResult {
    pub bucket: String,
    pub key: String,
}

/// A key the vendor refused to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDeletion {
    pub key: String,
    pub error: String,
}

/// Outcome of a multi-key delete.
///
/// `deleted_keys.len() + failed.len() <= total`. Keys the vendor neither
/// confirmed nor rejected are in neither set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteResult {
    pub deleted_keys: BTreeSet<String>,
    pub failed: Vec<FailedDeletion>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteByPrefixResult {
    pub prefix: String,
    pub deleted_count: usize,
    pub deleted_keys: BTreeSet<String>,
    pub failed: Vec<FailedDeletion>,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
}

impl ListObjectsParams {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            delimiter: None,
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListAllObjectKeysResult {
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
}

/// Split of probed keys by presence, each in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectExistence {
    pub exists_keys: Vec<String>,
    pub missing_keys: Vec<String>,
}
