//! Directory enumeration through `std::fs`.

use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

use compact_str::CompactString;
use dirtally_core::{Attributes, ScanError};

use crate::source::{DirEntries, DirEntryRecord, DirectoryEnumerator};

/// Enumerator backed by [`std::fs::read_dir`]. Links are never followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdEnumerator;

impl DirectoryEnumerator for StdEnumerator {
    fn read_dir<'a>(&'a self, path: &Path) -> Result<DirEntries<'a>, ScanError> {
        let entries = std::fs::read_dir(path).map_err(|e| ScanError::io(path, e))?;
        Ok(Box::new(entries.map(|entry| {
            let entry = entry.map_err(|e| ScanError::Other {
                message: e.to_string(),
            })?;
            let path = entry.path();
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| ScanError::io(&path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            Ok(entry_record(&name, &metadata))
        })))
    }

    fn stat(&self, path: &Path) -> Result<DirEntryRecord, ScanError> {
        let metadata = std::fs::symlink_metadata(path).map_err(|e| ScanError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(entry_record(&name, &metadata))
    }
}

/// Build an entry from `symlink_metadata`.
pub(crate) fn entry_record(name: &str, metadata: &Metadata) -> DirEntryRecord {
    let attributes = attributes_of(name, metadata);
    let is_directory = metadata.is_dir();
    DirEntryRecord {
        name: CompactString::new(name),
        attributes,
        is_directory,
        size: if is_directory { 0 } else { metadata.len() },
        modified: metadata.modified().unwrap_or(UNIX_EPOCH),
        device: device_of(metadata),
    }
}

/// Id of the filesystem holding an entry.
#[cfg(unix)]
pub(crate) fn device_of(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;

    Some(metadata.dev())
}

#[cfg(not(unix))]
pub(crate) fn device_of(_metadata: &Metadata) -> Option<u64> {
    None
}

#[cfg(windows)]
pub(crate) fn attributes_of(_name: &str, metadata: &Metadata) -> Attributes {
    use std::os::windows::fs::MetadataExt;

    Attributes::from_win32(metadata.file_attributes())
}

#[cfg(not(windows))]
pub(crate) fn attributes_of(name: &str, metadata: &Metadata) -> Attributes {
    let mut attributes = Attributes::empty();
    attributes.set(Attributes::HIDDEN, name.starts_with('.'));
    attributes.set(Attributes::READ_ONLY, metadata.permissions().readonly());
    attributes.set(Attributes::REPARSE_POINT, metadata.file_type().is_symlink());
    attributes
}
