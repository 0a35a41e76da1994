//! Storage types and response structures

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Result, StorageError};

/// Smallest part size accepted by S3-compatible providers (except the last part)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Largest part number accepted by S3-compatible providers
pub const MAX_PART_NUMBER: u32 = 10_000;

/// A bucket scoped to an account.
///
/// The provider-visible identifier is always `<name>-<account_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketRef {
    name: String,
    account_id: String,
    id: String,
}

impl BucketRef {
    /// Create a bucket reference from its logical name.
    ///
    /// A name that already carries the `-<account_id>` suffix is accepted as
    /// is, so deriving twice never produces `name-acct-acct`.
    pub fn new(name: &str, account_id: &str) -> Result<Self> {
        let suffix = format!("-{}", account_id);
        let logical = name.strip_suffix(&suffix).unwrap_or(name);
        if logical.is_empty() {
            return Err(StorageError::client(
                "InvalidBucketName",
                "bucket name must not be empty",
            ));
        }

        let id = format!("{}{}", logical, suffix);
        validate_bucket_id(&id)?;

        Ok(Self {
            name: logical.to_string(),
            account_id: account_id.to_string(),
            id,
        })
    }

    /// Logical bucket name (without the account suffix)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning account id
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Full provider-visible identifier: `name-accountid`
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for BucketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn validate_bucket_id(id: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(StorageError::client(
            "InvalidBucketName",
            format!("bucket id {:?} {}", id, reason),
        ))
    };

    if !(3..=63).contains(&id.len()) {
        return invalid("must be 3 to 63 characters long");
    }
    if !id
        .bytes()
        .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'))
    {
        return invalid("may only contain lowercase letters, digits and '-'");
    }
    if id.starts_with('-') || id.ends_with('-') {
        return invalid("must start and end with a letter or digit");
    }
    Ok(())
}

/// Object key within a bucket. Opaque, but never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(StorageError::client(
                "InvalidObjectKey",
                "object key must not be empty",
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the bytes of an upload come from
#[derive(Debug, Clone)]
pub enum ObjectSource {
    /// A local file
    Path(PathBuf),
    /// An in-memory buffer
    Bytes(Bytes),
}

impl ObjectSource {
    /// Total size in bytes
    pub async fn len(&self) -> Result<u64> {
        match self {
            ObjectSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
            ObjectSource::Bytes(data) => Ok(data.len() as u64),
        }
    }

    /// Read the whole source into memory
    pub async fn read_all(&self) -> Result<Bytes> {
        match self {
            ObjectSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            ObjectSource::Bytes(data) => Ok(data.clone()),
        }
    }

    /// Read one byte range. Files are opened per call so parts can be read
    /// concurrently without sharing a cursor.
    pub async fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        match self {
            ObjectSource::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                let mut buffer = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
            ObjectSource::Bytes(data) => Ok(data.slice(range.start as usize..range.end as usize)),
        }
    }
}

impl From<PathBuf> for ObjectSource {
    fn from(path: PathBuf) -> Self {
        ObjectSource::Path(path)
    }
}

impl From<Bytes> for ObjectSource {
    fn from(data: Bytes) -> Self {
        ObjectSource::Bytes(data)
    }
}

impl From<Vec<u8>> for ObjectSource {
    fn from(data: Vec<u8>) -> Self {
        ObjectSource::Bytes(Bytes::from(data))
    }
}

/// Bucket metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    /// Full bucket identifier
    pub name: String,
    /// Creation timestamp (optional)
    pub creation_date: Option<String>,
    /// Location returned by the provider on creation (optional)
    pub location: Option<String>,
}

impl BucketInfo {
    pub fn new(name: String) -> Self {
        Self {
            name,
            creation_date: None,
            location: None,
        }
    }
}

/// Object entry in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
    /// ETag (optional)
    pub etag: Option<String>,
    /// Storage class (STANDARD, STANDARD_IA, ...)
    pub storage_class: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
            storage_class: None,
        }
    }
}

/// Parameters of one ListObjectsV2 request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    /// Page size, capped by the provider at 1000
    pub max_keys: Option<u32>,
    pub continuation_token: Option<String>,
}

impl ListObjectsOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }
}

/// One page of a bucket listing.
///
/// `is_truncated` tells the caller that more pages exist; pass
/// `next_continuation_token` back to fetch the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObjectsPage {
    pub bucket: String,
    pub prefix: Option<String>,
    pub objects: Vec<ObjectInfo>,
    /// Common prefixes (subdirectories when using a delimiter)
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// Metadata of a stored object, returned by put, get and multipart completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Location URL (multipart completion only)
    pub location: Option<String>,
}

impl ObjectMetadata {
    pub fn new(bucket: String, key: String, size: u64) -> Self {
        Self {
            bucket,
            key,
            size,
            etag: None,
            content_type: None,
            location: None,
        }
    }
}

/// Deleted object information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedObject {
    pub bucket: String,
    pub key: String,
}

/// Result of downloading an object to a local file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub object: ObjectMetadata,
}

/// Result of a completed chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub upload_id: String,
    pub parts: u32,
    pub object: ObjectMetadata,
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

/// Configuration for chunked uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultipartConfig {
    /// Part size in bytes (default: 8MB)
    pub part_size: usize,
    /// Maximum concurrent part uploads (default: 4)
    pub concurrency: usize,
    /// Attempts per part before giving up on a retryable fault (default: 3)
    pub max_part_attempts: u32,
    /// Base delay of the exponential backoff between part attempts
    #[serde(with = "duration_millis")]
    pub retry_base_delay: Duration,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            concurrency: 4,
            max_part_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl MultipartConfig {
    /// Set the part size, raised to the provider minimum of 5MB
    pub fn with_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(MIN_PART_SIZE);
        self
    }

    /// Set the part size without applying the provider minimum.
    ///
    /// Only useful against transports that do not enforce one, such as
    /// `MemoryTransport`.
    pub fn with_exact_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_part_attempts(mut self, attempts: u32) -> Self {
        self.max_part_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_id_derivation() {
        let bucket = BucketRef::new("media", "1250000000").unwrap();
        assert_eq!(bucket.id(), "media-1250000000");
        assert_eq!(bucket.name(), "media");
        assert_eq!(bucket.to_string(), "media-1250000000");
    }

    #[test]
    fn test_bucket_id_no_double_suffix() {
        let first = BucketRef::new("media", "1250000000").unwrap();
        let again = BucketRef::new(first.id(), "1250000000").unwrap();
        assert_eq!(again.id(), "media-1250000000");
        assert_eq!(again, first);
    }

    #[test]
    fn test_bucket_name_rules() {
        assert!(BucketRef::new("Media", "125").is_err());
        assert!(BucketRef::new("", "125").is_err());
        assert!(BucketRef::new("-media", "125").is_err());
        assert!(BucketRef::new("me_dia", "125").is_err());
        assert!(BucketRef::new(&"a".repeat(70), "125").is_err());
        assert!(BucketRef::new("a", "1").is_ok());
    }

    #[test]
    fn test_object_key_not_empty() {
        assert!(ObjectKey::new("").is_err());
        assert_eq!(ObjectKey::new("a/b.txt").unwrap().as_str(), "a/b.txt");
    }

    #[test]
    fn test_multipart_config_part_size_floor() {
        let config = MultipartConfig::default().with_part_size(1024);
        assert_eq!(config.part_size, MIN_PART_SIZE);

        let config = MultipartConfig::default().with_exact_part_size(1024);
        assert_eq!(config.part_size, 1024);

        let config = MultipartConfig::default().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[tokio::test]
    async fn test_source_read_range() {
        let source = ObjectSource::from(b"hello world".to_vec());
        assert_eq!(source.len().await.unwrap(), 11);
        assert_eq!(&source.read_range(6..11).await.unwrap()[..], b"world");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let source = ObjectSource::from(path);
        assert_eq!(&source.read_range(0..5).await.unwrap()[..], b"hello");
    }
}
