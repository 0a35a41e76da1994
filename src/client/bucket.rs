//! Object operations scoped to one bucket

use futures::stream::{self, Stream, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{report, respond};
use crate::encoding::decode_data_uri;
use crate::envelope::{Payload, ResponseEnvelope};
use crate::error::{Result, StorageError};
use crate::multipart::UploadCoordinator;
use crate::progress::{LogProgress, ProgressObserver};
use crate::transport::Transport;
use crate::types::{
    BucketRef, DeletedObject, DownloadResult, ListObjectsOptions, MultipartConfig, ObjectInfo,
    ObjectKey, ObjectSource,
};

/// Client for the objects of one bucket (`name-accountid`)
#[derive(Clone)]
pub struct BucketClient {
    bucket: BucketRef,
    transport: Arc<dyn Transport>,
    validity: Duration,
    multipart: MultipartConfig,
    progress: Arc<dyn ProgressObserver>,
}

impl BucketClient {
    pub(crate) fn new(
        bucket: BucketRef,
        transport: Arc<dyn Transport>,
        validity: Duration,
        multipart: MultipartConfig,
    ) -> Self {
        Self {
            bucket,
            transport,
            validity,
            multipart,
            progress: Arc::new(LogProgress),
        }
    }

    /// Observer for put, get and chunked upload progress
    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = observer;
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn bucket(&self) -> &BucketRef {
        &self.bucket
    }

    /// Upload an object in a single request
    pub async fn put_object(
        &self,
        key: &str,
        source: impl Into<ObjectSource>,
        content_type: Option<&str>,
    ) -> ResponseEnvelope {
        respond("put_object", self.try_put(key, source.into(), content_type).await)
    }

    /// Decode a data-URI payload and upload it with its declared content type
    pub async fn put_object_from_encoded(&self, key: &str, encoded: &str) -> ResponseEnvelope {
        let result = match decode_data_uri(encoded) {
            Ok(decoded) => {
                self.try_put(key, ObjectSource::Bytes(decoded.data), Some(&decoded.content_type))
                    .await
            }
            Err(e) => Err(e),
        };
        respond("put_object_from_encoded", result)
    }

    async fn try_put(
        &self,
        key: &str,
        source: ObjectSource,
        content_type: Option<&str>,
    ) -> Result<Payload> {
        let key = ObjectKey::new(key)?;
        let data = source.read_all().await?;
        info!(bucket = %self.bucket, key = %key, size = data.len(), "Uploading object");

        let object = self
            .transport
            .put_object(
                self.bucket.id(),
                key.as_str(),
                data,
                content_type,
                self.validity,
                self.progress.clone(),
            )
            .await?;
        Ok(Payload::Object(object))
    }

    /// First page of the bucket listing (up to 1000 keys).
    ///
    /// Check `is_truncated` on the page; use `list_objects_page` or `objects`
    /// to read further.
    pub async fn list_objects(&self) -> ResponseEnvelope {
        self.list_objects_page(ListObjectsOptions::default()).await
    }

    /// One explicit page of the bucket listing
    pub async fn list_objects_page(&self, options: ListObjectsOptions) -> ResponseEnvelope {
        let result = self
            .transport
            .list_objects(self.bucket.id(), &options, self.validity)
            .await
            .map(Payload::Objects);
        respond("list_objects", result)
    }

    /// Every object under `prefix`, fetching pages lazily as the stream is
    /// consumed
    pub fn objects(
        &self,
        prefix: Option<String>,
    ) -> impl Stream<Item = Result<ObjectInfo>> + Send + '_ {
        let first = ListObjectsOptions {
            prefix,
            ..Default::default()
        };

        stream::try_unfold(Some(first), move |next| async move {
            let Some(options) = next else {
                return Ok(None);
            };

            let page = self
                .transport
                .list_objects(self.bucket.id(), &options, self.validity)
                .await?;

            let following = match page.next_continuation_token {
                Some(token) if page.is_truncated => Some(ListObjectsOptions {
                    continuation_token: Some(token),
                    ..options
                }),
                _ => None,
            };

            let objects = stream::iter(page.objects.into_iter().map(Ok));
            Ok::<_, StorageError>(Some((objects, following)))
        })
        .try_flatten()
    }

    /// Download an object to `dir/file_name`, creating `dir` when missing
    pub async fn get_object(
        &self,
        key: &str,
        dir: impl AsRef<Path>,
        file_name: &str,
    ) -> ResponseEnvelope {
        respond("get_object", self.try_get(key, dir.as_ref(), file_name).await)
    }

    async fn try_get(&self, key: &str, dir: &Path, file_name: &str) -> Result<Payload> {
        let key = ObjectKey::new(key)?;
        if file_name.is_empty() {
            return Err(StorageError::client(
                "InvalidArgument",
                "destination file name must not be empty",
            ));
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(file_name);
        info!(bucket = %self.bucket, key = %key, path = %path.display(), "Downloading object");

        let object = self
            .transport
            .get_object(
                self.bucket.id(),
                key.as_str(),
                &path,
                self.validity,
                self.progress.clone(),
            )
            .await?;
        Ok(Payload::Download(DownloadResult { path, object }))
    }

    /// Delete exactly `key`
    pub async fn delete_object(&self, key: &str) -> ResponseEnvelope {
        respond("delete_object", self.try_delete(key).await)
    }

    async fn try_delete(&self, key: &str) -> Result<Payload> {
        let key = ObjectKey::new(key)?;
        info!(bucket = %self.bucket, key = %key, "Deleting object");
        self.transport
            .delete_object(self.bucket.id(), key.as_str(), self.validity)
            .await?;
        Ok(Payload::Deleted(DeletedObject {
            bucket: self.bucket.id().to_string(),
            key: key.to_string(),
        }))
    }

    /// Upload a large object in parts through the chunked upload coordinator
    pub async fn put_large_object(
        &self,
        key: &str,
        source: impl Into<ObjectSource>,
        content_type: Option<&str>,
    ) -> ResponseEnvelope {
        let key = match ObjectKey::new(key) {
            Ok(key) => key,
            Err(e) => return respond("put_large_object", Err(e)),
        };
        let envelope = self
            .coordinator()
            .upload(&self.bucket, &key, &source.into(), content_type)
            .await;
        report("put_large_object", envelope)
    }

    /// Coordinator sharing this client's transport, validity and progress
    /// observer, for driving a chunked upload by hand
    pub fn coordinator(&self) -> UploadCoordinator {
        UploadCoordinator::new(self.transport.clone(), self.multipart.clone(), self.validity)
            .with_progress(self.progress.clone())
    }
}
