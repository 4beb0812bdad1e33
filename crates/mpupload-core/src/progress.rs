//! Upload progress accounting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const MIB: f64 = 1024.0 * 1024.0;

/// Tracks acknowledged parts across concurrent part uploads.
#[derive(Debug)]
pub struct Progress {
    total_bytes: u64,
    total_parts: usize,
    uploaded_bytes: AtomicU64,
    completed_parts: AtomicUsize,
    started: Instant,
}

/// Point-in-time view returned by [`Progress::record`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes acknowledged so far.
    pub uploaded_bytes: u64,
    /// Size of the whole upload.
    pub total_bytes: u64,
    /// Parts acknowledged so far.
    pub completed_parts: usize,
    /// Parts in the plan.
    pub total_parts: usize,
    /// Time since the tracker was created.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Share of bytes acknowledged, from 0 to 100.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.uploaded_bytes as f64 * 100.0 / self.total_bytes as f64
    }

    /// Average throughput since the start in MiB/s.
    #[must_use]
    pub fn mib_per_sec(&self) -> f64 {
        mib_per_sec(self.uploaded_bytes, self.elapsed)
    }

    /// Remaining time at the average throughput so far, if any bytes have moved.
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        if self.uploaded_bytes == 0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.uploaded_bytes) as f64;
        let per_byte = self.elapsed.as_secs_f64() / self.uploaded_bytes as f64;
        Some(Duration::from_secs_f64(remaining * per_byte))
    }
}

impl Progress {
    /// Start tracking an upload of `total_bytes` in `total_parts` parts.
    #[must_use]
    pub fn new(total_bytes: u64, total_parts: usize) -> Self {
        Self {
            total_bytes,
            total_parts,
            uploaded_bytes: AtomicU64::new(0),
            completed_parts: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Count one acknowledged part of `bytes` bytes.
    pub fn record(&self, bytes: u64) -> ProgressSnapshot {
        let uploaded_bytes = self.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let completed_parts = self.completed_parts.fetch_add(1, Ordering::Relaxed) + 1;
        ProgressSnapshot {
            uploaded_bytes,
            total_bytes: self.total_bytes,
            completed_parts,
            total_parts: self.total_parts,
            elapsed: self.started.elapsed(),
        }
    }

    /// Time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Throughput of `bytes` moved in `elapsed`, in MiB/s.
#[must_use]
pub fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    bytes as f64 / MIB / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(uploaded_bytes: u64, total_bytes: u64, elapsed_secs: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            uploaded_bytes,
            total_bytes,
            completed_parts: 1,
            total_parts: 3,
            elapsed: Duration::from_secs(elapsed_secs),
        }
    }

    #[test]
    fn test_should_accumulate_parts_and_bytes() {
        let progress = Progress::new(25, 3);
        progress.record(10);
        let snapshot = progress.record(10);
        assert_eq!(snapshot.uploaded_bytes, 20);
        assert_eq!(snapshot.completed_parts, 2);
        assert!((snapshot.percent() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_should_estimate_remaining_time_from_average_rate() {
        let snap = snapshot(10 * 1024 * 1024, 30 * 1024 * 1024, 10);
        assert_eq!(snap.eta(), Some(Duration::from_secs(20)));
        assert!((snap.mib_per_sec() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_should_have_no_eta_before_first_byte() {
        assert_eq!(snapshot(0, 100, 5).eta(), None);
    }

    #[test]
    fn test_should_report_zero_throughput_for_zero_elapsed() {
        assert!(mib_per_sec(1024, Duration::ZERO).abs() < f64::EPSILON);
    }
}
