//! Capability interfaces the scan engine needs from the operating system.

use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use compact_str::CompactString;
use dirtally_core::{Attributes, ItemInfo, ScanConfig, ScanError, ScanWarning, VolumeSpace};

/// One record of a bulk metadata index.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    /// Identifier of this record.
    pub record_id: u64,
    /// Identifier of the containing directory. Equal to `record_id` for the
    /// record of the scanned root itself.
    pub parent_record_id: u64,
    /// Full path of the entry.
    pub path: PathBuf,
    /// File name component.
    pub name: CompactString,
    pub attributes: Attributes,
    pub is_directory: bool,
    /// Byte length (0 for directories).
    pub size: u64,
    pub modified: SystemTime,
    /// Filesystem id, where the reader knows it.
    pub device: Option<u64>,
}

impl IndexRecord {
    /// Whether this record is the scanned root.
    pub fn is_root(&self) -> bool {
        self.record_id == self.parent_record_id
    }

    pub(crate) fn item_info(&self) -> ItemInfo {
        ItemInfo::new(self.name.clone(), self.attributes, self.size, self.modified)
    }
}

/// Item yielded while reading a bulk index.
#[derive(Debug, Clone)]
pub enum IndexItem {
    /// A record within the requested subtree.
    Record(IndexRecord),
    /// A part of the subtree that could not be read.
    Unreadable(ScanWarning),
}

/// Reads every entry below a root in one pass.
///
/// Failure is all-or-nothing: an `Err` means the caller must discard whatever
/// it built from the records seen so far and fall back to enumeration.
pub trait MetadataIndexReader: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Stream the records of `root`'s subtree into `sink`.
    ///
    /// Returns [`ScanError::Interrupted`] if `sink` asked to stop.
    fn read_index(
        &self,
        root: &Path,
        sink: &mut dyn FnMut(IndexItem) -> ControlFlow<()>,
    ) -> Result<(), ScanError>;
}

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntryRecord {
    pub name: CompactString,
    pub attributes: Attributes,
    pub is_directory: bool,
    pub size: u64,
    pub modified: SystemTime,
    /// Filesystem id (`st_dev` on Unix). `None` where the platform has no
    /// cheap equivalent.
    pub device: Option<u64>,
}

impl DirEntryRecord {
    /// Whether the entry is a symlink, junction or other reparse point.
    pub fn is_reparse_point(&self) -> bool {
        self.attributes.is_reparse_point()
    }

    pub(crate) fn item_info(&self) -> ItemInfo {
        ItemInfo::new(self.name.clone(), self.attributes, self.size, self.modified)
    }
}

/// Iterator over the entries of one directory.
pub type DirEntries<'a> = Box<dyn Iterator<Item = Result<DirEntryRecord, ScanError>> + 'a>;

/// Lists directories one at a time.
pub trait DirectoryEnumerator: Send + Sync {
    /// Enumerate the entries of `path`. The iterator may fail per entry.
    fn read_dir<'a>(&'a self, path: &Path) -> Result<DirEntries<'a>, ScanError>;

    /// Metadata of a single path without following links.
    fn stat(&self, path: &Path) -> Result<DirEntryRecord, ScanError>;
}

/// The volume containing a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub mount_point: PathBuf,
    pub space: VolumeSpace,
    pub file_system: String,
}

/// Answers free and total space queries.
pub trait SpaceQuery: Send + Sync {
    /// The volume `path` lives on, if it can be determined.
    fn volume_of(&self, path: &Path) -> Option<VolumeInfo>;
}

/// The set of OS capabilities a scanner runs against.
#[derive(Clone)]
pub struct Platform {
    /// Bulk index reader, if the platform has one.
    pub index: Option<Arc<dyn MetadataIndexReader>>,
    pub enumerator: Arc<dyn DirectoryEnumerator>,
    pub space: Arc<dyn SpaceQuery>,
}

impl Platform {
    /// Capabilities backed by the local filesystem.
    pub fn native(config: &ScanConfig) -> Self {
        Self {
            index: crate::index::native_reader(config),
            enumerator: Arc::new(crate::fs::StdEnumerator),
            space: Arc::new(crate::space::SysinfoSpace),
        }
    }

    /// Replace the bulk index reader.
    pub fn with_index(mut self, index: Option<Arc<dyn MetadataIndexReader>>) -> Self {
        self.index = index;
        self
    }

    /// Replace the directory enumerator.
    pub fn with_enumerator(mut self, enumerator: Arc<dyn DirectoryEnumerator>) -> Self {
        self.enumerator = enumerator;
        self
    }

    /// Replace the space query.
    pub fn with_space(mut self, space: Arc<dyn SpaceQuery>) -> Self {
        self.space = space;
        self
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("index", &self.index.as_ref().map(|i| i.name()))
            .finish_non_exhaustive()
    }
}
