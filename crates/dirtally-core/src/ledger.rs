//! Per-extension size and file count totals.

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Bucket key for files without an extension.
pub const NO_EXTENSION: &str = "";

/// Aggregate totals for one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    /// Lower-cased, dot-prefixed extension (empty for no extension).
    pub extension: CompactString,
    /// Sum of the sizes of every file with this extension.
    pub size: u64,
    /// Number of files with this extension.
    pub file_count: u64,
}

/// Normalize an extension to its bucket key.
///
/// `"TXT"`, `".txt"` and `"txt"` all map to `".txt"`; an empty string or a
/// lone dot maps to [`NO_EXTENSION`].
pub fn normalize_extension(extension: &str) -> CompactString {
    let bare = extension.strip_prefix('.').unwrap_or(extension);
    if bare.is_empty() {
        return CompactString::new(NO_EXTENSION);
    }
    let mut key = CompactString::new(".");
    key.push_str(&bare.to_lowercase());
    key
}

/// Extension bucket of a file name.
pub fn extension_of(name: &str) -> CompactString {
    match name.rfind('.') {
        // leading dot is a hidden file, not an extension
        Some(0) | None => CompactString::new(NO_EXTENSION),
        Some(pos) => normalize_extension(&name[pos + 1..]),
    }
}

/// Mapping from extension to running totals.
#[derive(Debug, Default, Clone)]
pub struct ExtensionLedger {
    buckets: IndexMap<CompactString, ExtensionRecord>,
}

impl ExtensionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add files to a bucket, creating it on first use.
    pub fn include(&mut self, extension: &str, size: u64, file_count: u64) -> &ExtensionRecord {
        assert!(file_count >= 1, "ledger include requires at least one file");
        let key = normalize_extension(extension);
        let record = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| ExtensionRecord {
                extension: key,
                size: 0,
                file_count: 0,
            });
        record.size += size;
        record.file_count += file_count;
        record
    }

    /// Remove files from a bucket, dropping it when its count reaches zero.
    ///
    /// # Panics
    ///
    /// Panics if the bucket does not exist or the count would go negative.
    pub fn remove(&mut self, extension: &str, size: u64, file_count: u64) {
        let key = normalize_extension(extension);
        let Some(record) = self.buckets.get_mut(&key) else {
            panic!("ledger has no bucket for extension '{key}'");
        };
        assert!(
            record.file_count >= file_count,
            "ledger underflow for '{key}': removing {file_count} of {}",
            record.file_count
        );
        record.file_count -= file_count;
        record.size = record.size.saturating_sub(size);
        if record.file_count == 0 {
            self.buckets.shift_remove(&key);
        }
    }

    /// Adjust a bucket's size after a file changed size.
    pub fn resize(&mut self, extension: &str, old_size: u64, new_size: u64) {
        let key = normalize_extension(extension);
        let Some(record) = self.buckets.get_mut(&key) else {
            panic!("ledger has no bucket for extension '{key}'");
        };
        record.size = record.size.saturating_sub(old_size) + new_size;
    }

    /// Look up a bucket.
    pub fn get(&self, extension: &str) -> Option<&ExtensionRecord> {
        self.buckets.get(&normalize_extension(extension))
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the ledger has no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total size across all buckets.
    pub fn total_size(&self) -> u64 {
        self.buckets.values().map(|r| r.size).sum()
    }

    /// Records sorted by size, largest first.
    pub fn sorted_by_size(&self) -> Vec<ExtensionRecord> {
        let mut records: Vec<_> = self.buckets.values().cloned().collect();
        records.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.extension.cmp(&b.extension)));
        records
    }

    /// Drop every bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
