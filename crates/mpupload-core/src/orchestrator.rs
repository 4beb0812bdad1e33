//! Upload orchestration.
//!
//! [`Uploader::upload`] drives one file through the multipart state machine:
//!
//! ```text
//! Idle -> Initiating -> UploadingParts -> Completing -> Done
//!              |              |               |
//!              v              v               v
//!           Failed        Aborting  <---------+
//!                         /      \
//!                    Aborted    Failed
//! ```
//!
//! Every call gets its own retry budget for transport failures, so a single
//! timeout on initiate, a part, complete or abort is retried with backoff
//! instead of ending the upload. Parts are read from the source file and
//! uploaded concurrently. The first part that exhausts its budget cancels its
//! in-flight siblings. Any failure after a successful initiate triggers a
//! best-effort abort, so no incomplete upload is left behind on the server.

use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{TryStreamExt, stream};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::chunker::{self, ChunkPlan, ChunkRange};
use crate::client::S3Client;
use crate::config::UploadConfig;
use crate::error::{AbortOutcome, UploadError, UploadFailure};
use crate::progress::{Progress, mib_per_sec};
use crate::session::{MultipartSession, PartRecord};
use crate::transport::S3Transport;

/// Phase of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    /// Nothing has been sent yet.
    Idle,
    /// The initiate call is in flight.
    Initiating,
    /// Part uploads are in flight.
    UploadingParts,
    /// The completion call is in flight.
    Completing,
    /// The object has been assembled.
    Done,
    /// The abort call is in flight.
    Aborting,
    /// The upload was aborted after a failure.
    Aborted,
    /// The upload failed and nothing could be aborted, or the abort failed.
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initiating => "initiating",
            Self::UploadingParts => "uploading parts",
            Self::Completing => "completing",
            Self::Done => "done",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bounded exponential backoff for retryable call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Bucket of the assembled object.
    pub bucket: String,
    /// Key of the assembled object.
    pub key: String,
    /// Upload id that was completed.
    pub upload_id: String,
    /// Number of parts.
    pub part_count: usize,
    /// Size of the object.
    pub total_bytes: u64,
    /// ETag of the assembled object, if the server returned one.
    pub etag: Option<String>,
    /// Location of the assembled object, if the server returned one.
    pub location: Option<String>,
}

/// Runs multipart uploads through an [`S3Client`].
#[derive(Debug)]
pub struct Uploader<T> {
    client: S3Client<T>,
    chunk_size: u64,
    concurrency: usize,
    retry: RetryPolicy,
}

impl<T: S3Transport> Uploader<T> {
    /// Create an uploader using the chunking, concurrency and retry settings of `config`.
    #[must_use]
    pub fn new(client: S3Client<T>, config: &UploadConfig) -> Self {
        Self {
            client,
            chunk_size: config.chunk_size,
            concurrency: config.concurrency.max(1),
            retry: config.retry_policy(),
        }
    }

    /// The client used for every call.
    #[must_use]
    pub fn client(&self) -> &S3Client<T> {
        &self.client
    }

    /// Upload `path` to `bucket`/`key`.
    ///
    /// # Errors
    ///
    /// Returns an [`UploadFailure`] carrying the error that ended the upload,
    /// the state it happened in, and the outcome of the abort.
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<UploadOutcome, UploadFailure> {
        let mut state = UploadState::Idle;

        let plan = match self.plan_file(path).await {
            Ok(plan) => plan,
            Err(error) => return Err(fail_before_initiate(error, state)),
        };
        info!(
            bucket,
            key,
            file = %path.display(),
            file_size = plan.file_size(),
            chunk_size = plan.chunk_size(),
            parts = plan.len(),
            "Starting multipart upload"
        );

        transition(&mut state, UploadState::Initiating, None);
        let session = match self.initiate(bucket, key).await {
            Ok(session) => session,
            Err(error) => return Err(fail_before_initiate(error, state)),
        };

        transition(&mut state, UploadState::UploadingParts, Some(session.upload_id()));
        if let Err(error) = self.upload_parts(&session, path, &plan).await {
            return Err(self.abort_after(error, state, &session).await);
        }

        transition(&mut state, UploadState::Completing, Some(session.upload_id()));
        let outcome = match self.complete_upload(&session, &plan).await {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.abort_after(error, state, &session).await),
        };

        transition(&mut state, UploadState::Done, Some(session.upload_id()));
        info!(
            bucket,
            key,
            upload_id = %outcome.upload_id,
            parts = outcome.part_count,
            bytes = outcome.total_bytes,
            "Multipart upload complete"
        );
        Ok(outcome)
    }

    /// Start the upload, retrying transport failures. No part is sent before
    /// this succeeds.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the response carries no upload id.
    pub async fn initiate(&self, bucket: &str, key: &str) -> Result<MultipartSession, UploadError> {
        let session = retry(&self.retry, "initiate", "-", || {
            self.client.create_multipart_upload(bucket, key)
        })
        .await?;
        info!(bucket, key, upload_id = %session.upload_id(), "Initiated multipart upload");
        Ok(session)
    }

    /// Upload one part, retrying transport failures with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once the retry budget is spent, or the first
    /// non-retryable error.
    pub async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
    ) -> Result<PartRecord, UploadError> {
        let operation = format!("upload part {part_number}");
        retry(&self.retry, &operation, session.upload_id(), || {
            self.client.upload_part(session, part_number, body.clone())
        })
        .await
    }

    /// Assemble the object from every recorded part, retrying transport failures.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a planned part has no record or the server
    /// does not confirm the completion.
    pub async fn complete_upload(
        &self,
        session: &MultipartSession,
        plan: &ChunkPlan,
    ) -> Result<UploadOutcome, UploadError> {
        let parts = session.completed_parts(plan)?;
        let listed = parts.as_slice();
        let result = retry(&self.retry, "complete", session.upload_id(), || {
            self.client.complete_multipart_upload(session, listed)
        })
        .await?;

        Ok(UploadOutcome {
            bucket: session.bucket().to_owned(),
            key: session.key().to_owned(),
            upload_id: session.upload_id().to_owned(),
            part_count: parts.len(),
            total_bytes: plan.file_size(),
            etag: result.etag,
            location: result.location,
        })
    }

    /// Abort the upload, discarding every stored part. Transport failures are
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns the last error of the abort call.
    pub async fn abort(&self, session: &MultipartSession) -> Result<(), UploadError> {
        retry(&self.retry, "abort", session.upload_id(), || {
            self.client.abort_multipart_upload(session)
        })
        .await
    }

    async fn plan_file(&self, path: &Path) -> Result<ChunkPlan, UploadError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            UploadError::InvalidInput(format!("cannot read source file {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(UploadError::InvalidInput(format!(
                "source {} is not a regular file",
                path.display()
            )));
        }
        chunker::plan(metadata.len(), self.chunk_size)
    }

    async fn upload_parts(
        &self,
        session: &MultipartSession,
        path: &Path,
        plan: &ChunkPlan,
    ) -> Result<(), UploadError> {
        let progress = Progress::new(plan.file_size(), plan.len());

        stream::iter(plan.ranges().iter().copied().map(Ok::<_, UploadError>))
            .try_for_each_concurrent(self.concurrency, |range| {
                self.upload_range(session, path, range, &progress)
            })
            .await?;

        info!(
            upload_id = %session.upload_id(),
            parts = session.part_count(),
            bytes = session.recorded_bytes(),
            elapsed_secs = progress.elapsed().as_secs_f64(),
            "All parts uploaded"
        );
        Ok(())
    }

    async fn upload_range(
        &self,
        session: &MultipartSession,
        path: &Path,
        range: ChunkRange,
        progress: &Progress,
    ) -> Result<(), UploadError> {
        let body = read_range(path, range).await?;
        let started = Instant::now();
        let record = self.upload_part(session, range.part_number, body).await?;
        let part_elapsed = started.elapsed();
        session.record_part(record);

        let snapshot = progress.record(range.length);
        info!(
            upload_id = %session.upload_id(),
            part_number = range.part_number,
            part_bytes = range.length,
            part_secs = part_elapsed.as_secs_f64(),
            part_mib_per_sec = mib_per_sec(range.length, part_elapsed),
            completed = snapshot.completed_parts,
            total = snapshot.total_parts,
            uploaded_bytes = snapshot.uploaded_bytes,
            total_bytes = snapshot.total_bytes,
            percent = snapshot.percent(),
            eta_secs = snapshot.eta().map(|d| d.as_secs_f64()),
            "Uploaded part"
        );
        Ok(())
    }

    async fn abort_after(
        &self,
        error: UploadError,
        failed_in: UploadState,
        session: &MultipartSession,
    ) -> UploadFailure {
        warn!(
            upload_id = %session.upload_id(),
            state = %failed_in,
            error = %error,
            "Upload failed, aborting"
        );

        let mut state = failed_in;
        transition(&mut state, UploadState::Aborting, Some(session.upload_id()));

        let abort = match self.abort(session).await {
            Ok(()) => {
                transition(&mut state, UploadState::Aborted, Some(session.upload_id()));
                info!(upload_id = %session.upload_id(), "Aborted multipart upload");
                AbortOutcome::Aborted
            }
            Err(abort_error) => {
                transition(&mut state, UploadState::Failed, Some(session.upload_id()));
                warn!(
                    upload_id = %session.upload_id(),
                    error = %abort_error,
                    "Abort failed; the incomplete upload may still hold storage"
                );
                AbortOutcome::Failed(abort_error.to_string())
            }
        };

        UploadFailure {
            error,
            state: failed_in,
            upload_id: Some(session.upload_id().to_owned()),
            abort,
        }
    }
}

/// Run `call` until it succeeds, fails with an error that is not retryable,
/// or uses up `policy.max_attempts`.
async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    upload_id: &str,
    mut call: F,
) -> Result<T, UploadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    upload_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                warn!(operation, upload_id, attempt, error = %error, "Call failed");
                return Err(error);
            }
        }
    }
}

fn transition(state: &mut UploadState, next: UploadState, upload_id: Option<&str>) {
    debug!(from = %state, to = %next, upload_id = upload_id.unwrap_or("-"), "Upload state transition");
    *state = next;
}

fn fail_before_initiate(error: UploadError, state: UploadState) -> UploadFailure {
    warn!(state = %state, error = %error, "Upload failed before any part was sent");
    UploadFailure {
        error,
        state,
        upload_id: None,
        abort: AbortOutcome::NotAttempted,
    }
}

/// Read the bytes of `range` through a dedicated read-only handle.
async fn read_range(path: &Path, range: ChunkRange) -> Result<Bytes, UploadError> {
    let io_error = |e: std::io::Error| {
        UploadError::InvalidInput(format!(
            "cannot read part {} of {}: {e}",
            range.part_number,
            path.display()
        ))
    };

    let length = usize::try_from(range.length).map_err(|_| {
        UploadError::InvalidInput(format!("part {} is too large to buffer", range.part_number))
    })?;

    let mut file = File::open(path).await.map_err(io_error)?;
    file.seek(SeekFrom::Start(range.offset)).await.map_err(io_error)?;
    let mut buf = vec![0; length];
    file.read_exact(&mut buf).await.map_err(io_error)?;
    Ok(Bytes::from(buf))
}
