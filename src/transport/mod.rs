//! Storage transport abstraction
//!
//! A `Transport` performs signed requests against a storage provider. Every
//! call takes the signing validity window it should use; bucket arguments are
//! full provider ids (`name-accountid`).

pub mod http;
pub mod memory;
pub mod signer;
pub mod xml;

pub use http::HttpTransport;
pub use memory::{Fault, MemoryTransport, Operation};

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::progress::ProgressObserver;
use crate::types::{BucketInfo, CompletedPart, ListObjectsOptions, ListObjectsPage, ObjectMetadata};

/// Exponential backoff: `base * 2^attempt` plus up to 20% jitter
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64 * (1u64 << attempt.min(16));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 5);
    Duration::from_millis(base_ms + jitter)
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_bucket(&self, bucket: &str, validity: Duration) -> Result<BucketInfo>;

    async fn list_buckets(&self, validity: Duration) -> Result<Vec<BucketInfo>>;

    /// Upload a whole object in one request, reporting upload progress
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        validity: Duration,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<ObjectMetadata>;

    /// Stream an object into `destination`, reporting download progress
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        validity: Duration,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<ObjectMetadata>;

    async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        validity: Duration,
    ) -> Result<ListObjectsPage>;

    async fn delete_object(&self, bucket: &str, key: &str, validity: Duration) -> Result<()>;

    /// Start a multipart upload and return its upload id
    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        validity: Duration,
    ) -> Result<String>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        validity: Duration,
    ) -> Result<String>;

    /// Assemble the object from `parts`, which must be sorted by part number
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        validity: Duration,
    ) -> Result<ObjectMetadata>;

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        validity: Duration,
    ) -> Result<()>;
}
