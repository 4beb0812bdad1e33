//! In-progress multipart upload state.
//!
//! A [`MultipartSession`] is created from a successful initiate call and
//! collects one [`PartRecord`] per acknowledged part. Part uploads run
//! concurrently, so records go through a lock; the completion document is
//! only built from [`MultipartSession::completed_parts`], which refuses to
//! produce a list unless every planned part is present exactly once.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::chunker::ChunkPlan;
use crate::error::UploadError;

/// A part the server has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-based part number.
    pub part_number: u32,
    /// Bytes sent for this part.
    pub length: u64,
    /// ETag returned by the server, quotes included.
    pub etag: String,
}

/// A multipart upload the server knows about.
#[derive(Debug)]
pub struct MultipartSession {
    bucket: String,
    key: String,
    upload_id: String,
    parts: Mutex<BTreeMap<u32, PartRecord>>,
}

impl MultipartSession {
    /// Create a session for a server-assigned upload id.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if `upload_id` is empty.
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let upload_id = upload_id.into();
        if upload_id.trim().is_empty() {
            return Err(UploadError::protocol("server returned an empty UploadId"));
        }
        Ok(Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id,
            parts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Bucket of the upload.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key of the upload.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Server-assigned upload id.
    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Record an acknowledged part, returning the record it replaced.
    pub fn record_part(&self, record: PartRecord) -> Option<PartRecord> {
        let part_number = record.part_number;
        let previous = self.parts.lock().insert(part_number, record);
        if previous.is_some() {
            debug!(upload_id = %self.upload_id, part_number, "Replaced part record");
        }
        previous
    }

    /// Number of recorded parts.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.lock().len()
    }

    /// Sum of recorded part lengths.
    #[must_use]
    pub fn recorded_bytes(&self) -> u64 {
        self.parts.lock().values().map(|p| p.length).sum()
    }

    /// Recorded parts in ascending part number order, checked against `plan`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error naming the first missing, unexpected or
    /// wrongly sized part.
    pub fn completed_parts(&self, plan: &ChunkPlan) -> Result<Vec<PartRecord>, UploadError> {
        let parts = self.parts.lock();

        if let Some(unexpected) = parts.keys().find(|n| plan.get(**n).is_none()) {
            return Err(UploadError::protocol(format!(
                "part {unexpected} is recorded but not planned"
            )));
        }

        plan.ranges()
            .iter()
            .map(|range| {
                let record = parts.get(&range.part_number).ok_or_else(|| {
                    UploadError::protocol(format!("part {} has no recorded ETag", range.part_number))
                })?;
                if record.length != range.length {
                    return Err(UploadError::protocol(format!(
                        "part {} recorded {} bytes, planned {}",
                        range.part_number, record.length, range.length
                    )));
                }
                Ok(record.clone())
            })
            .collect()
    }
}
