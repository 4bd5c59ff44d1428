//! Bulk metadata index readers.
//!
//! On Windows the reader parses the NTFS master file table directly. Elsewhere
//! a parallel `jwalk` walk over the subtree stands in for the index.

#[cfg(windows)]
mod mft;

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use dirtally_core::{ScanConfig, ScanError, ScanWarning, WarningKind};
use jwalk::{Parallelism, WalkDir};
use tracing::debug;

use crate::fs::{device_of, entry_record};
use crate::source::{IndexItem, IndexRecord, MetadataIndexReader};

#[cfg(windows)]
pub use mft::MftIndexReader;

/// The bulk reader for this platform.
pub(crate) fn native_reader(config: &ScanConfig) -> Option<Arc<dyn MetadataIndexReader>> {
    #[cfg(windows)]
    {
        let _ = config;
        Some(Arc::new(MftIndexReader))
    }
    #[cfg(not(windows))]
    {
        Some(Arc::new(
            JwalkIndexReader::new(config.threads).cross_filesystems(config.cross_filesystems),
        ))
    }
}

/// Assigns record ids to paths in any visiting order.
#[derive(Debug, Default)]
pub(crate) struct RecordIds {
    ids: HashMap<PathBuf, u64>,
}

impl RecordIds {
    pub(crate) fn id_of(&mut self, path: &Path) -> u64 {
        if let Some(id) = self.ids.get(path) {
            return *id;
        }
        let id = self.ids.len() as u64;
        self.ids.insert(path.to_path_buf(), id);
        id
    }

    /// Record and parent ids for `path`; the root is its own parent.
    pub(crate) fn ids_for(&mut self, root: &Path, path: &Path) -> (u64, u64) {
        let id = self.id_of(path);
        if path == root {
            return (id, id);
        }
        let parent = match path.parent() {
            Some(parent) => self.id_of(parent),
            None => id,
        };
        (id, parent)
    }
}

/// Bulk reader that walks the subtree in parallel with `jwalk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwalkIndexReader {
    threads: usize,
    cross_filesystems: bool,
}

impl JwalkIndexReader {
    /// Create a reader using `threads` workers (0 = rayon default pool).
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            cross_filesystems: false,
        }
    }

    /// Whether the walk descends into directories mounted from another
    /// filesystem. Such directories are still reported.
    pub fn cross_filesystems(mut self, cross: bool) -> Self {
        self.cross_filesystems = cross;
        self
    }

    fn parallelism(&self) -> Parallelism {
        match self.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        }
    }
}

impl MetadataIndexReader for JwalkIndexReader {
    fn name(&self) -> &'static str {
        "jwalk"
    }

    fn read_index(
        &self,
        root: &Path,
        sink: &mut dyn FnMut(IndexItem) -> ControlFlow<()>,
    ) -> Result<(), ScanError> {
        let metadata = std::fs::symlink_metadata(root).map_err(|e| ScanError::io(root, e))?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory {
                path: root.to_path_buf(),
            });
        }

        let mut walker = WalkDir::new(root)
            .parallelism(self.parallelism())
            .skip_hidden(false)
            .follow_links(false)
            .min_depth(0);
        if let Some(root_device) = device_of(&metadata).filter(|_| !self.cross_filesystems) {
            walker = walker.process_read_dir(move |_depth, _path, _state, children| {
                for child in children.iter_mut().flatten() {
                    if !child.file_type().is_dir() {
                        continue;
                    }
                    let foreign = child
                        .metadata()
                        .is_ok_and(|m| device_of(&m) != Some(root_device));
                    if foreign {
                        child.read_children_path = None;
                    }
                }
            });
        }

        let mut ids = RecordIds::default();
        let mut records: u64 = 0;
        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    let warning = ScanWarning::new(path, err.to_string(), WarningKind::ReadError);
                    if sink(IndexItem::Unreadable(warning)).is_break() {
                        return Err(ScanError::Interrupted);
                    }
                    continue;
                }
            };

            let path = entry.path();
            let metadata = match std::fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(err) => {
                    let warning =
                        ScanWarning::new(&path, err.to_string(), WarningKind::MetadataError);
                    if sink(IndexItem::Unreadable(warning)).is_break() {
                        return Err(ScanError::Interrupted);
                    }
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            let entry = entry_record(&name, &metadata);
            let (record_id, parent_record_id) = ids.ids_for(root, &path);
            let record = IndexRecord {
                record_id,
                parent_record_id,
                name: CompactString::new(&name),
                path,
                attributes: entry.attributes,
                is_directory: entry.is_directory,
                size: entry.size,
                modified: entry.modified,
                device: entry.device,
            };
            records += 1;
            if sink(IndexItem::Record(record)).is_break() {
                return Err(ScanError::Interrupted);
            }
        }

        debug!(root = %root.display(), records, "index walk finished");
        Ok(())
    }
}
