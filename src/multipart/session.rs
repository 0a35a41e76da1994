//! Multipart upload session state
//!
//! A session moves through four states:
//! - Created: the provider issued an upload id, no part has started
//! - PartsInFlight: at least one part upload has started
//! - Completed: the provider assembled the object
//! - Aborted: the remote upload was cancelled and its parts released
//!
//! Completed and Aborted are terminal. Parts are only ever recorded by the
//! part-completion path, under the session's write lock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::progress::{Progress, ProgressObserver};
use crate::types::{BucketRef, CompletedPart, ObjectKey, MAX_PART_NUMBER};

/// Upload session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Created,
    PartsInFlight,
    Completed,
    Aborted,
}

impl UploadState {
    /// Completed and Aborted accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }

    pub fn name(self) -> &'static str {
        match self {
            UploadState::Created => "Created",
            UploadState::PartsInFlight => "PartsInFlight",
            UploadState::Completed => "Completed",
            UploadState::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An acknowledged part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    /// 1-based part number
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
}

/// How a payload of `total` bytes splits into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    part_size: u64,
    total: u64,
}

impl PartPlan {
    /// Split `total` bytes into parts of `part_size`, growing the part size
    /// when the payload would otherwise need more than 10000 parts
    pub fn new(total: u64, part_size: usize) -> Self {
        let part_size = (part_size.max(1) as u64).max(total.div_ceil(MAX_PART_NUMBER as u64));
        Self { part_size, total }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of parts; an empty payload is still one (empty) part
    pub fn part_count(&self) -> u32 {
        self.total.div_ceil(self.part_size).max(1) as u32
    }

    /// Byte range of a 1-based part
    pub fn range(&self, part_number: u32) -> Range<u64> {
        let start = (part_number.saturating_sub(1) as u64 * self.part_size).min(self.total);
        let end = (start + self.part_size).min(self.total);
        start..end
    }

    /// Every part number with its byte range, in order
    pub fn parts(&self) -> impl Iterator<Item = (u32, Range<u64>)> + '_ {
        (1..=self.part_count()).map(move |n| (n, self.range(n)))
    }
}

pub(crate) struct SessionState {
    pub(crate) phase: UploadState,
    pub(crate) parts: BTreeMap<u32, UploadPart>,
    /// Every part number an upload was started for, successful or not
    pub(crate) requested: BTreeSet<u32>,
    /// Planned number of parts, when known
    pub(crate) expected_parts: Option<u32>,
    pub(crate) total_bytes: Option<u64>,
    transferred: u64,
    reported: Option<u64>,
}

pub(crate) struct SessionInner {
    pub(crate) upload_id: String,
    pub(crate) bucket: BucketRef,
    pub(crate) key: ObjectKey,
    pub(crate) content_type: Option<String>,
    pub(crate) state: RwLock<SessionState>,
    /// One permit per concurrent part; completion and abort take them all
    pub(crate) permits: Semaphore,
    pub(crate) concurrency: u32,
    pub(crate) cancelled: AtomicBool,
    progress: Arc<dyn ProgressObserver>,
}

/// Handle to one multipart upload. Clones share the same session.
#[derive(Clone)]
pub struct UploadSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSession")
            .field("upload_id", &self.inner.upload_id)
            .field("bucket", &self.inner.bucket.id())
            .field("key", &self.inner.key.as_str())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl UploadSession {
    pub(crate) fn new(
        upload_id: String,
        bucket: BucketRef,
        key: ObjectKey,
        content_type: Option<String>,
        concurrency: usize,
        progress: Arc<dyn ProgressObserver>,
    ) -> Self {
        let concurrency = concurrency.clamp(1, u16::MAX as usize) as u32;
        Self {
            inner: Arc::new(SessionInner {
                upload_id,
                bucket,
                key,
                content_type,
                state: RwLock::new(SessionState {
                    phase: UploadState::Created,
                    parts: BTreeMap::new(),
                    requested: BTreeSet::new(),
                    expected_parts: None,
                    total_bytes: None,
                    transferred: 0,
                    reported: None,
                }),
                permits: Semaphore::new(concurrency as usize),
                concurrency,
                cancelled: AtomicBool::new(false),
                progress,
            }),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.inner.upload_id
    }

    pub fn bucket(&self) -> &BucketRef {
        &self.inner.bucket
    }

    pub fn key(&self) -> &ObjectKey {
        &self.inner.key
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    pub async fn state(&self) -> UploadState {
        self.inner.state.read().await.phase
    }

    /// Acknowledged parts, ordered by part number
    pub async fn parts(&self) -> Vec<UploadPart> {
        self.inner.state.read().await.parts.values().cloned().collect()
    }

    /// Cumulative bytes of acknowledged parts
    pub async fn transferred(&self) -> u64 {
        self.inner.state.read().await.transferred
    }

    /// Whether an abort has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Declare how many parts the upload will have and its total size.
    ///
    /// Completion then requires exactly parts `1..=part_count`, and progress
    /// reports `total_bytes` as the total.
    pub async fn set_plan(&self, part_count: u32, total_bytes: u64) {
        let mut state = self.inner.state.write().await;
        state.expected_parts = Some(part_count);
        state.total_bytes = Some(total_bytes);
    }

    /// Stop issuing new parts
    pub(crate) fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Parts `1..=expected` ready for completion, or the reason they are not.
    ///
    /// `expected` is the largest of the planned count, the highest requested
    /// part and the highest recorded part, so a part that was attempted but
    /// never acknowledged always counts as missing.
    pub(crate) fn completion_list(state: &SessionState) -> Result<(Vec<CompletedPart>, u64)> {
        let expected = [
            state.expected_parts,
            state.requested.last().copied(),
            state.parts.keys().next_back().copied(),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(1);

        let missing: Vec<u32> = (1..=expected)
            .filter(|n| !state.parts.contains_key(n))
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::IncompleteUpload {
                expected,
                received: expected - missing.len() as u32,
                missing,
            });
        }

        let parts = state.parts.range(1..=expected);
        let size: u64 = parts.clone().map(|(_, p)| p.size).sum();
        let list = parts
            .map(|(n, p)| CompletedPart::new(*n, p.etag.clone()))
            .collect();
        Ok((list, size))
    }

    /// Record an acknowledged part and emit cumulative progress.
    ///
    /// A part that lands after the session was cancelled or finished is
    /// discarded.
    pub(crate) async fn record(&self, part: UploadPart) -> Result<()> {
        let mut state = self.inner.state.write().await;

        if state.phase.is_terminal() {
            return Err(StorageError::InvalidState {
                operation: "record a part of",
                state: state.phase,
            });
        }
        if self.is_cancelled() {
            debug!(
                upload_id = %self.inner.upload_id,
                part_number = part.part_number,
                "discarding part of cancelled upload"
            );
            return Err(StorageError::Cancelled {
                upload_id: self.inner.upload_id.clone(),
            });
        }

        let size = part.size;
        if let Some(previous) = state.parts.insert(part.part_number, part) {
            state.transferred -= previous.size;
        }
        state.transferred += size;

        let transferred = state.transferred;
        if state.reported.map_or(true, |last| transferred > last) {
            state.reported = Some(transferred);
            let total = state.total_bytes.unwrap_or(0).max(transferred);
            self.inner.progress.on_progress(Progress { transferred, total });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    fn session() -> UploadSession {
        UploadSession::new(
            "upload-1".to_string(),
            BucketRef::new("media", "125").unwrap(),
            ObjectKey::new("video.mp4").unwrap(),
            None,
            2,
            Arc::new(NoProgress),
        )
    }

    fn part(n: u32, size: u64) -> UploadPart {
        UploadPart {
            part_number: n,
            size,
            etag: format!("etag-{}", n),
        }
    }

    #[test]
    fn test_part_plan() {
        let plan = PartPlan::new(25, 10);
        assert_eq!(plan.part_count(), 3);
        let parts: Vec<_> = plan.parts().collect();
        assert_eq!(parts, vec![(1, 0..10), (2, 10..20), (3, 20..25)]);

        let empty = PartPlan::new(0, 10);
        assert_eq!(empty.part_count(), 1);
        assert_eq!(empty.range(1), 0..0);
    }

    #[test]
    fn test_part_plan_caps_part_count() {
        let plan = PartPlan::new(100_000, 1);
        assert_eq!(plan.part_size(), 10);
        assert_eq!(plan.part_count(), MAX_PART_NUMBER);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(UploadState::PartsInFlight.to_string(), "PartsInFlight");
        assert!(UploadState::Aborted.is_terminal());
        assert!(!UploadState::Created.is_terminal());
    }

    #[tokio::test]
    async fn test_completion_list_requires_contiguous_parts() {
        let session = session();
        session.record(part(1, 10)).await.unwrap();
        session.record(part(3, 5)).await.unwrap();

        let state = session.inner.state.read().await;
        match UploadSession::completion_list(&state) {
            Err(StorageError::IncompleteUpload {
                expected,
                received,
                missing,
            }) => {
                assert_eq!(expected, 3);
                assert_eq!(received, 2);
                assert_eq!(missing, vec![2]);
            }
            other => panic!("unexpected: {:?}", other.map(|(parts, _)| parts)),
        }
    }

    #[tokio::test]
    async fn test_requested_part_without_result_is_missing() {
        let session = session();
        session.record(part(1, 10)).await.unwrap();
        session.inner.state.write().await.requested.extend([1, 2]);

        let state = session.inner.state.read().await;
        match UploadSession::completion_list(&state) {
            Err(StorageError::IncompleteUpload {
                expected, missing, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(missing, vec![2]);
            }
            other => panic!("unexpected: {:?}", other.map(|(parts, _)| parts)),
        }
    }

    #[tokio::test]
    async fn test_record_after_cancel_is_discarded() {
        let session = session();
        session.record(part(1, 10)).await.unwrap();
        session.cancel();
        assert!(matches!(
            session.record(part(2, 10)).await,
            Err(StorageError::Cancelled { .. })
        ));
        assert_eq!(session.parts().await.len(), 1);
        assert_eq!(session.transferred().await, 10);
    }

    #[tokio::test]
    async fn test_replaced_part_is_not_counted_twice() {
        let session = session();
        session.set_plan(2, 20).await;
        session.record(part(1, 10)).await.unwrap();
        session.record(part(1, 10)).await.unwrap();
        session.record(part(2, 10)).await.unwrap();
        assert_eq!(session.transferred().await, 20);

        let state = session.inner.state.read().await;
        let (parts, size) = UploadSession::completion_list(&state).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(size, 20);
    }
}
