//! Scan progress reporting.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Progress information during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    /// Number of files scanned so far.
    pub files_scanned: u64,
    /// Number of directories scanned so far.
    pub dirs_scanned: u64,
    /// Total bytes scanned so far.
    pub bytes_scanned: u64,
    /// Directory currently being read.
    pub current_path: PathBuf,
    /// Number of errors/warnings encountered.
    pub errors_count: u64,
    /// Time elapsed since scan started.
    pub elapsed: Duration,
    /// Completed share in `0.0..=1.0`, or `None` when the total is unknown.
    pub fraction: Option<f64>,
}

impl ScanProgress {
    /// Create initial progress state.
    pub fn new() -> Self {
        Self {
            files_scanned: 0,
            dirs_scanned: 0,
            bytes_scanned: 0,
            current_path: PathBuf::new(),
            errors_count: 0,
            elapsed: Duration::ZERO,
            fraction: None,
        }
    }

    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_scanned as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Get total items scanned (files + dirs).
    pub fn total_items(&self) -> u64 {
        self.files_scanned + self.dirs_scanned
    }

    /// Whether progress can be expressed as a fraction.
    pub fn is_determinate(&self) -> bool {
        self.fraction.is_some()
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared counters updated by traversal and sampled by observers.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    start_time: Mutex<Instant>,
    files_scanned: AtomicU64,
    dirs_scanned: AtomicU64,
    bytes_scanned: AtomicU64,
    errors_count: AtomicU64,
    /// Expected bytes when every root is a whole volume; `u64::MAX` if unknown.
    expected_bytes: AtomicU64,
    current_path: Mutex<PathBuf>,
}

const UNKNOWN_TOTAL: u64 = u64::MAX;

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            start_time: Mutex::new(Instant::now()),
            files_scanned: AtomicU64::new(0),
            dirs_scanned: AtomicU64::new(0),
            bytes_scanned: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            expected_bytes: AtomicU64::new(UNKNOWN_TOTAL),
            current_path: Mutex::new(PathBuf::new()),
        }
    }

    /// Zero the counters and restart the clock.
    pub fn reset(&self, expected_bytes: Option<u64>) {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.files_scanned.store(0, Ordering::Relaxed);
        self.dirs_scanned.store(0, Ordering::Relaxed);
        self.bytes_scanned.store(0, Ordering::Relaxed);
        self.errors_count.store(0, Ordering::Relaxed);
        self.expected_bytes
            .store(expected_bytes.unwrap_or(UNKNOWN_TOTAL), Ordering::Relaxed);
        self.current_path
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn record_file(&self, size: u64) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_dir(&self) {
        self.dirs_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_current_path(&self, path: PathBuf) {
        *self.current_path.lock().unwrap_or_else(|e| e.into_inner()) = path;
    }

    pub fn snapshot(&self) -> ScanProgress {
        let bytes_scanned = self.bytes_scanned.load(Ordering::Relaxed);
        let fraction = match self.expected_bytes.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => None,
            0 => Some(1.0),
            expected => Some((bytes_scanned as f64 / expected as f64).min(1.0)),
        };
        ScanProgress {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            dirs_scanned: self.dirs_scanned.load(Ordering::Relaxed),
            bytes_scanned,
            current_path: self
                .current_path
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            errors_count: self.errors_count.load(Ordering::Relaxed),
            elapsed: self
                .start_time
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .elapsed(),
            fraction,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
