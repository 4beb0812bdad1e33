//! Partitioning of a file into multipart byte ranges.

use crate::error::UploadError;

/// Default part size: 10 MiB.
///
/// Small enough that one part finishes well inside the 100 second request
/// ceiling that fronting proxies such as Cloudflare impose, even on slow links.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Largest part count the multipart protocol accepts.
pub const MAX_PARTS: usize = 10_000;

/// One planned part: a contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// 1-based part number.
    pub part_number: u32,
    /// Offset of the first byte.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

impl ChunkRange {
    /// Offset one past the last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Ordered, gapless, non-overlapping ranges covering `[0, file_size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Size of the planned file.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Size of every part but the last.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Ranges in ascending part number order.
    #[must_use]
    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Always `false`: a plan has at least one part.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The range planned for `part_number`.
    #[must_use]
    pub fn get(&self, part_number: u32) -> Option<&ChunkRange> {
        let index = usize::try_from(part_number.checked_sub(1)?).ok()?;
        self.ranges.get(index)
    }
}

/// Split `file_size` bytes into parts of `chunk_size` bytes.
///
/// The last part holds the remainder; no zero-length part is ever planned.
///
/// # Examples
///
/// ```
/// use mpupload_core::chunker::plan;
///
/// let plan = plan(25, 10).unwrap();
/// let lengths: Vec<u64> = plan.ranges().iter().map(|r| r.length).collect();
/// assert_eq!(lengths, [10, 10, 5]);
/// ```
///
/// # Errors
///
/// Returns [`UploadError::InvalidInput`] when either size is zero or the plan
/// would need more than [`MAX_PARTS`] parts.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<ChunkPlan, UploadError> {
    if file_size == 0 {
        return Err(UploadError::InvalidInput(
            "source file is empty; multipart upload needs at least one byte".to_owned(),
        ));
    }
    if chunk_size == 0 {
        return Err(UploadError::InvalidInput("chunk size must be non-zero".to_owned()));
    }

    let part_count = file_size.div_ceil(chunk_size);
    if part_count > MAX_PARTS as u64 {
        return Err(UploadError::InvalidInput(format!(
            "{file_size} bytes in {chunk_size} byte chunks needs {part_count} parts, \
             more than the maximum of {MAX_PARTS}"
        )));
    }

    let mut ranges = Vec::with_capacity(usize::try_from(part_count).unwrap_or(MAX_PARTS));
    let mut offset = 0;
    let mut part_number = 1;
    while offset < file_size {
        let length = chunk_size.min(file_size - offset);
        ranges.push(ChunkRange {
            part_number,
            offset,
            length,
        });
        offset += length;
        part_number += 1;
    }

    Ok(ChunkPlan {
        file_size,
        chunk_size,
        ranges,
    })
}
