//! In-process storage provider
//!
//! `MemoryTransport` behaves like an S3-compatible service held in memory. It
//! can inject faults per operation or per part number, delay individual parts,
//! and reports what it was asked to do, so client and upload behaviour can be
//! exercised without a network.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::Transport;
use crate::error::{Result, StorageError};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::types::{
    BucketInfo, CompletedPart, ListObjectsOptions, ListObjectsPage, ObjectInfo, ObjectMetadata,
};

/// Chunk size used to simulate transfer progress
const PROGRESS_CHUNK_SIZE: usize = 64 * 1024;

const MAX_KEYS: u32 = 1000;

/// Transport operations, used to target injected faults and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateBucket,
    ListBuckets,
    PutObject,
    GetObject,
    ListObjects,
    DeleteObject,
    InitiateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
}

/// A failure the transport should produce instead of serving the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Provider error response, classified by its code like a real one
    Provider { status: u16, code: String },
    /// Connection failure
    Transport,
}

impl Fault {
    pub fn provider(status: u16, code: impl Into<String>) -> Self {
        Fault::Provider {
            status,
            code: code.into(),
        }
    }

    fn to_error(&self) -> StorageError {
        match self {
            Fault::Provider { status, code } => StorageError::from_provider(
                *status,
                code.clone(),
                "injected fault".to_string(),
                Some("memory-request".to_string()),
            ),
            Fault::Transport => StorageError::Transport("connection reset (injected)".to_string()),
        }
    }
}

struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    last_modified: String,
}

struct MemoryBucket {
    info: BucketInfo,
    objects: BTreeMap<String, StoredObject>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, MemoryBucket>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
}

#[derive(Default)]
struct Faults {
    /// One-shot faults, consumed in order by the next calls of an operation
    operations: HashMap<Operation, VecDeque<Fault>>,
    /// Part faults with the number of times they still fire
    parts: HashMap<u32, (Fault, u32)>,
    part_delays: HashMap<u32, Duration>,
}

#[derive(Default)]
struct Journal {
    calls: HashMap<Operation, usize>,
    last_validity: Option<Duration>,
}

/// In-memory S3-compatible provider
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    journal: Mutex<Journal>,
    in_flight_parts: AtomicUsize,
    max_in_flight_parts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn provider_error(status: u16, code: &str, message: String) -> StorageError {
    StorageError::from_provider(status, code.to_string(), message, None)
}

fn no_such_bucket(bucket: &str) -> StorageError {
    provider_error(404, "NoSuchBucket", format!("bucket {} does not exist", bucket))
}

fn no_such_upload(upload_id: &str) -> StorageError {
    provider_error(404, "NoSuchUpload", format!("upload {} does not exist", upload_id))
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Report progress over `len` bytes in fixed chunks, then the final value
fn simulate_progress(observer: Arc<dyn ProgressObserver>, len: u64) {
    let tracker = ProgressTracker::new(observer, len);
    let mut done = 0u64;
    while done < len {
        done = (done + PROGRESS_CHUNK_SIZE as u64).min(len);
        tracker.report(done);
    }
    tracker.finish(len);
}

/// Decrements the in-flight part counter when the upload call ends, however
/// it ends
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a bucket
    pub fn with_bucket(self, bucket: &str) -> Self {
        lock(&self.state).buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                info: BucketInfo::new(bucket.to_string()),
                objects: BTreeMap::new(),
            },
        );
        self
    }

    /// Fail the next call of `operation` with `fault`. Repeated injections
    /// queue up and fire in order.
    pub fn inject(&self, operation: Operation, fault: Fault) {
        lock(&self.faults)
            .operations
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Fail the next `times` uploads of `part_number` with `fault`
    pub fn fail_part(&self, part_number: u32, fault: Fault, times: u32) {
        lock(&self.faults).parts.insert(part_number, (fault, times));
    }

    /// Hold every upload of `part_number` for `delay` before serving it
    pub fn delay_part(&self, part_number: u32, delay: Duration) {
        lock(&self.faults).part_delays.insert(part_number, delay);
    }

    /// Number of calls made to `operation`, including failed ones
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.journal).calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn complete_calls(&self) -> usize {
        self.calls(Operation::CompleteMultipart)
    }

    pub fn abort_calls(&self) -> usize {
        self.calls(Operation::AbortMultipart)
    }

    /// Validity window of the most recent call
    pub fn last_validity(&self) -> Option<Duration> {
        lock(&self.journal).last_validity
    }

    /// Part uploads currently being served
    pub fn in_flight_parts(&self) -> usize {
        self.in_flight_parts.load(Ordering::SeqCst)
    }

    /// Highest number of part uploads ever served at once
    pub fn max_in_flight_parts(&self) -> usize {
        self.max_in_flight_parts.load(Ordering::SeqCst)
    }

    /// Parts stored for a pending upload (0 once it is completed or aborted)
    pub fn stored_part_count(&self, upload_id: &str) -> usize {
        lock(&self.state)
            .uploads
            .get(upload_id)
            .map_or(0, |upload| upload.parts.len())
    }

    /// Number of multipart uploads neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        lock(&self.state).uploads.len()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        lock(&self.state)
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
    }

    pub fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        lock(&self.state)
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .and_then(|o| o.content_type.clone())
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        lock(&self.state).buckets.contains_key(bucket)
    }

    /// Journal the call and fire a queued fault for it, if any
    fn enter(&self, operation: Operation, validity: Duration) -> Result<()> {
        {
            let mut journal = lock(&self.journal);
            *journal.calls.entry(operation).or_insert(0) += 1;
            journal.last_validity = Some(validity);
        }

        let fault = lock(&self.faults)
            .operations
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }

    fn part_fault(&self, part_number: u32) -> Option<Fault> {
        let mut faults = lock(&self.faults);
        let (fault, remaining) = faults.parts.get_mut(&part_number)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(fault.clone())
    }

    fn store_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        etag: String,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        let bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        bucket.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type,
                etag,
                last_modified: now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_bucket(&self, bucket: &str, validity: Duration) -> Result<BucketInfo> {
        self.enter(Operation::CreateBucket, validity)?;

        let mut state = lock(&self.state);
        if state.buckets.contains_key(bucket) {
            return Err(provider_error(
                409,
                "BucketAlreadyExists",
                format!("bucket {} already exists", bucket),
            ));
        }

        let mut info = BucketInfo::new(bucket.to_string());
        info.creation_date = Some(now());
        info.location = Some(format!("/{}", bucket));
        state.buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                info: info.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn list_buckets(&self, validity: Duration) -> Result<Vec<BucketInfo>> {
        self.enter(Operation::ListBuckets, validity)?;
        let state = lock(&self.state);
        Ok(state.buckets.values().map(|b| b.info.clone()).collect())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        validity: Duration,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<ObjectMetadata> {
        self.enter(Operation::PutObject, validity)?;
        if !self.has_bucket(bucket) {
            return Err(no_such_bucket(bucket));
        }

        let size = data.len() as u64;
        simulate_progress(progress, size);

        let etag = etag_of(&data);
        self.store_object(bucket, key, data, content_type.map(str::to_string), etag.clone())?;

        let mut object = ObjectMetadata::new(bucket.to_string(), key.to_string(), size);
        object.etag = Some(etag);
        object.content_type = content_type.map(str::to_string);
        Ok(object)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        validity: Duration,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<ObjectMetadata> {
        self.enter(Operation::GetObject, validity)?;

        let (data, content_type, etag) = {
            let state = lock(&self.state);
            let stored = state
                .buckets
                .get(bucket)
                .ok_or_else(|| no_such_bucket(bucket))?
                .objects
                .get(key)
                .ok_or_else(|| {
                    provider_error(404, "NoSuchKey", format!("key {} does not exist", key))
                })?;
            (stored.data.clone(), stored.content_type.clone(), stored.etag.clone())
        };

        tokio::fs::write(destination, &data).await?;
        simulate_progress(progress, data.len() as u64);

        let mut object = ObjectMetadata::new(bucket.to_string(), key.to_string(), data.len() as u64);
        object.etag = Some(etag);
        object.content_type = content_type;
        Ok(object)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        validity: Duration,
    ) -> Result<ListObjectsPage> {
        self.enter(Operation::ListObjects, validity)?;

        let state = lock(&self.state);
        let stored = state.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;

        let prefix = options.prefix.as_deref().unwrap_or("");
        let max_keys = options.max_keys.unwrap_or(MAX_KEYS).clamp(1, MAX_KEYS) as usize;
        let mut page = ListObjectsPage {
            bucket: bucket.to_string(),
            prefix: options.prefix.clone(),
            ..Default::default()
        };

        // The continuation token is the last key of the previous page
        let mut keys = stored
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| {
                options
                    .continuation_token
                    .as_deref()
                    .map_or(true, |token| key.as_str() > token)
            })
            .peekable();

        let mut entries = 0usize;
        let mut last_key: Option<String> = None;
        while entries < max_keys {
            let Some((key, object)) = keys.next() else { break };
            last_key = Some(key.clone());

            let rolled_up = options.delimiter.as_deref().and_then(|delimiter| {
                key[prefix.len()..]
                    .find(delimiter)
                    .map(|idx| key[..prefix.len() + idx + delimiter.len()].to_string())
            });

            match rolled_up {
                Some(common) => {
                    // Consume every key under the same common prefix
                    while let Some((next, _)) = keys.peek() {
                        if !next.starts_with(&common) {
                            break;
                        }
                        last_key = Some(next.to_string());
                        keys.next();
                    }
                    page.common_prefixes.push(common);
                }
                None => {
                    let mut info = ObjectInfo::new(key.clone(), object.data.len() as u64);
                    info.etag = Some(object.etag.clone());
                    info.last_modified = Some(object.last_modified.clone());
                    info.storage_class = Some("STANDARD".to_string());
                    page.objects.push(info);
                }
            }
            entries += 1;
        }

        if keys.peek().is_some() {
            page.is_truncated = true;
            page.next_continuation_token = last_key;
        }
        Ok(page)
    }

    async fn delete_object(&self, bucket: &str, key: &str, validity: Duration) -> Result<()> {
        self.enter(Operation::DeleteObject, validity)?;

        // Deleting a missing key succeeds, as on S3
        let mut state = lock(&self.state);
        let bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        bucket.objects.remove(key);
        Ok(())
    }

    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        validity: Duration,
    ) -> Result<String> {
        self.enter(Operation::InitiateMultipart, validity)?;

        let mut state = lock(&self.state);
        if !state.buckets.contains_key(bucket) {
            return Err(no_such_bucket(bucket));
        }
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        validity: Duration,
    ) -> Result<String> {
        self.enter(Operation::UploadPart, validity)?;

        let now_in_flight = self.in_flight_parts.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight_parts);
        self.max_in_flight_parts.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = lock(&self.faults).part_delays.get(&part_number).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(fault) = self.part_fault(part_number) {
            return Err(fault.to_error());
        }

        let etag = etag_of(&data);
        let mut state = lock(&self.state);
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        validity: Duration,
    ) -> Result<ObjectMetadata> {
        self.enter(Operation::CompleteMultipart, validity)?;

        let upload = {
            let mut state = lock(&self.state);
            let upload = state
                .uploads
                .get(upload_id)
                .ok_or_else(|| no_such_upload(upload_id))?;

            if parts.is_empty() {
                return Err(provider_error(
                    400,
                    "MalformedXML",
                    "completion lists no parts".to_string(),
                ));
            }
            if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
                return Err(provider_error(
                    400,
                    "InvalidPartOrder",
                    "parts must be listed in ascending order".to_string(),
                ));
            }
            for part in parts {
                match upload.parts.get(&part.part_number) {
                    Some((_, etag)) if *etag == part.etag.trim_matches('"') => {}
                    _ => {
                        return Err(provider_error(
                            400,
                            "InvalidPart",
                            format!("part {} was not uploaded", part.part_number),
                        ))
                    }
                }
            }
            // Validated above, so the upload is present
            match state.uploads.remove(upload_id) {
                Some(upload) => upload,
                None => return Err(no_such_upload(upload_id)),
            }
        };

        let mut data = BytesMut::new();
        let mut etags = Vec::with_capacity(parts.len() * 16);
        for part in parts {
            if let Some((bytes, etag)) = upload.parts.get(&part.part_number) {
                data.extend_from_slice(bytes);
                etags.extend_from_slice(&hex::decode(etag).unwrap_or_default());
            }
        }
        let etag = format!("{}-{}", etag_of(&etags), parts.len());
        let data = data.freeze();
        let size = data.len() as u64;

        self.store_object(&upload.bucket, &upload.key, data, upload.content_type.clone(), etag.clone())?;

        let mut object = ObjectMetadata::new(bucket.to_string(), key.to_string(), size);
        object.etag = Some(etag);
        object.content_type = upload.content_type;
        object.location = Some(format!("memory://{}/{}", bucket, key));
        Ok(object)
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        validity: Duration,
    ) -> Result<()> {
        self.enter(Operation::AbortMultipart, validity)?;
        lock(&self.state)
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload_id))
    }
}
