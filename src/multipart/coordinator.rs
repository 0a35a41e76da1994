//! Chunked upload coordinator
//!
//! Drives the multipart protocol over a `Transport`: parts upload in
//! parallel, bounded by the session's permits. Completion and abort act as a
//! barrier by taking every permit, so they only run once in-flight parts
//! have settled.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::session::{PartPlan, UploadPart, UploadSession, UploadState};
use crate::envelope::{Payload, ResponseEnvelope};
use crate::error::{Result, StorageError};
use crate::progress::{LogProgress, ProgressObserver};
use crate::transport::{backoff_delay, Transport};
use crate::types::{BucketRef, MultipartConfig, ObjectKey, ObjectSource, UploadResult, MAX_PART_NUMBER};

/// Coordinates chunked uploads against one transport
#[derive(Clone)]
pub struct UploadCoordinator {
    transport: Arc<dyn Transport>,
    config: MultipartConfig,
    /// Signing validity window for every request
    validity: Duration,
    progress: Arc<dyn ProgressObserver>,
}

impl UploadCoordinator {
    pub fn new(transport: Arc<dyn Transport>, config: MultipartConfig, validity: Duration) -> Self {
        Self {
            transport,
            config,
            validity,
            progress: Arc::new(LogProgress),
        }
    }

    /// Observer for the cumulative progress of sessions begun afterwards
    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = observer;
        self
    }

    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    /// Open a multipart upload with the provider
    pub async fn begin_upload(
        &self,
        bucket: &BucketRef,
        key: &ObjectKey,
        content_type: Option<&str>,
    ) -> Result<UploadSession> {
        let upload_id = self
            .transport
            .initiate_multipart(bucket.id(), key.as_str(), content_type, self.validity)
            .await?;

        info!(
            bucket = %bucket,
            key = %key,
            upload_id = %upload_id,
            concurrency = self.config.concurrency,
            "Multipart upload started"
        );

        Ok(UploadSession::new(
            upload_id,
            bucket.clone(),
            key.clone(),
            content_type.map(str::to_string),
            self.config.concurrency,
            self.progress.clone(),
        ))
    }

    /// Upload one part, retrying retryable faults with exponential backoff.
    ///
    /// Waits for a free permit first. Fails with `Cancelled` once an abort
    /// was requested, and with `InvalidState` on a finished session.
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPart> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::client(
                "InvalidArgument",
                format!("part number {} is outside 1..={}", part_number, MAX_PART_NUMBER),
            ));
        }
        self.ensure_not_cancelled(session)?;

        let _permit = match session.inner.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(StorageError::InvalidState {
                    operation: "upload a part to",
                    state: session.state().await,
                })
            }
        };
        // An abort may have been requested while this part waited
        self.ensure_not_cancelled(session)?;

        {
            let mut state = session.inner.state.write().await;
            if state.phase.is_terminal() {
                return Err(StorageError::InvalidState {
                    operation: "upload a part to",
                    state: state.phase,
                });
            }
            state.phase = UploadState::PartsInFlight;
            state.requested.insert(part_number);
        }

        let size = data.len() as u64;
        let max_attempts = self.config.max_part_attempts.max(1);
        let mut attempt = 0u32;
        let etag = loop {
            attempt += 1;
            let result = self
                .transport
                .upload_part(
                    session.bucket().id(),
                    session.key().as_str(),
                    session.upload_id(),
                    part_number,
                    data.clone(),
                    self.validity,
                )
                .await;

            match result {
                Ok(etag) => break etag,
                Err(e) if e.is_retryable() && attempt < max_attempts && !session.is_cancelled() => {
                    let delay = backoff_delay(self.config.retry_base_delay, attempt - 1);
                    warn!(
                        upload_id = %session.upload_id(),
                        part_number,
                        attempt,
                        error = %e,
                        ?delay,
                        "Part upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(StorageError::PartUploadFailed {
                        part_number,
                        attempts: attempt,
                        source: Box::new(e),
                    })
                }
            }
        };

        let part = UploadPart {
            part_number,
            size,
            etag,
        };
        session.record(part.clone()).await?;
        debug!(upload_id = %session.upload_id(), part_number, size, "Part uploaded");
        Ok(part)
    }

    /// Finalize the upload once every planned part has succeeded
    pub async fn complete_upload(&self, session: &UploadSession) -> ResponseEnvelope {
        ResponseEnvelope::from_result(self.try_complete(session).await.map(Payload::Upload))
    }

    async fn try_complete(&self, session: &UploadSession) -> Result<UploadResult> {
        // Barrier: every permit means no part is in flight
        let _all = match session.inner.permits.acquire_many(session.inner.concurrency).await {
            Ok(permits) => permits,
            Err(_) => {
                return Err(StorageError::InvalidState {
                    operation: "complete",
                    state: session.state().await,
                })
            }
        };

        let (parts, size) = {
            let state = session.inner.state.read().await;
            if state.phase.is_terminal() {
                return Err(StorageError::InvalidState {
                    operation: "complete",
                    state: state.phase,
                });
            }
            self.ensure_not_cancelled(session)?;
            UploadSession::completion_list(&state)?
        };

        let mut object = self
            .transport
            .complete_multipart(
                session.bucket().id(),
                session.key().as_str(),
                session.upload_id(),
                &parts,
                self.validity,
            )
            .await?;

        session.inner.state.write().await.phase = UploadState::Completed;
        session.inner.permits.close();

        object.size = size;
        if object.content_type.is_none() {
            object.content_type = session.content_type().map(str::to_string);
        }
        info!(
            bucket = %session.bucket(),
            key = %session.key(),
            upload_id = %session.upload_id(),
            parts = parts.len(),
            size,
            "Multipart upload completed"
        );

        Ok(UploadResult {
            upload_id: session.upload_id().to_string(),
            parts: parts.len() as u32,
            object,
        })
    }

    /// Abort the upload because a part failed irrecoverably.
    ///
    /// Stops new parts, waits for in-flight ones, releases the remote upload
    /// and reports `cause`.
    pub async fn fail_upload(&self, session: &UploadSession, cause: StorageError) -> ResponseEnvelope {
        error!(upload_id = %session.upload_id(), error = %cause, "Multipart upload failed");
        match self.abort_session(session, "fail").await {
            Ok(()) => ResponseEnvelope::failure(&cause),
            Err(e @ StorageError::InvalidState { .. }) => ResponseEnvelope::failure(&e),
            Err(e) => {
                warn!(
                    upload_id = %session.upload_id(),
                    error = %e,
                    "Remote abort failed, uploaded parts may still be stored"
                );
                ResponseEnvelope::failure(&cause)
            }
        }
    }

    /// Caller-initiated cancel: same barrier and remote abort as `fail_upload`
    pub async fn abort_upload(&self, session: &UploadSession) -> ResponseEnvelope {
        match self.abort_session(session, "abort").await {
            Ok(()) => ResponseEnvelope::failure(&StorageError::Cancelled {
                upload_id: session.upload_id().to_string(),
            }),
            Err(e) => ResponseEnvelope::failure(&e),
        }
    }

    async fn abort_session(&self, session: &UploadSession, operation: &'static str) -> Result<()> {
        session.cancel();

        let _all = match session.inner.permits.acquire_many(session.inner.concurrency).await {
            Ok(permits) => permits,
            Err(_) => {
                return Err(StorageError::InvalidState {
                    operation,
                    state: session.state().await,
                })
            }
        };

        {
            let state = session.inner.state.read().await;
            if state.phase.is_terminal() {
                return Err(StorageError::InvalidState {
                    operation,
                    state: state.phase,
                });
            }
        }

        let remote = self
            .transport
            .abort_multipart(
                session.bucket().id(),
                session.key().as_str(),
                session.upload_id(),
                self.validity,
            )
            .await;

        {
            let mut state = session.inner.state.write().await;
            state.phase = UploadState::Aborted;
            state.parts.clear();
        }
        session.inner.permits.close();
        info!(upload_id = %session.upload_id(), "Multipart upload aborted");

        remote
    }

    /// Upload `source` through an open session, then complete it, or abort
    /// it on the first part that fails
    pub async fn run(&self, session: &UploadSession, source: &ObjectSource) -> ResponseEnvelope {
        let total = match source.len().await {
            Ok(total) => total,
            Err(e) => return self.fail_upload(session, e).await,
        };
        let plan = PartPlan::new(total, self.config.part_size);
        session.set_plan(plan.part_count(), total).await;

        debug!(
            upload_id = %session.upload_id(),
            total,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "Uploading parts"
        );

        let mut results = stream::iter(plan.parts())
            .map(|(part_number, range)| async move {
                // Checked before reading so no more parts are issued after a failure
                self.ensure_not_cancelled(session)?;
                let data = source.read_range(range).await?;
                self.upload_part(session, part_number, data).await
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut failure: Option<StorageError> = None;
        while let Some(result) = results.next().await {
            if let Err(e) = result {
                if failure.is_none() {
                    session.cancel();
                    failure = Some(e);
                }
            }
        }
        drop(results);

        match failure {
            // Someone else aborted; they own the remote cleanup
            Some(e @ StorageError::Cancelled { .. }) => ResponseEnvelope::failure(&e),
            Some(e) => self.fail_upload(session, e).await,
            None => self.complete_upload(session).await,
        }
    }

    /// Begin, upload and complete in one call
    pub async fn upload(
        &self,
        bucket: &BucketRef,
        key: &ObjectKey,
        source: &ObjectSource,
        content_type: Option<&str>,
    ) -> ResponseEnvelope {
        match self.begin_upload(bucket, key, content_type).await {
            Ok(session) => self.run(&session, source).await,
            Err(e) => ResponseEnvelope::failure(&e),
        }
    }

    fn ensure_not_cancelled(&self, session: &UploadSession) -> Result<()> {
        if session.is_cancelled() {
            return Err(StorageError::Cancelled {
                upload_id: session.upload_id().to_string(),
            });
        }
        Ok(())
    }
}
