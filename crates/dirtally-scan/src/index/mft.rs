//! NTFS master file table reader.
//!
//! Opens `\\.\X:`, loads the `$MFT` and resolves every file record to a full
//! path. Requires an elevated process; any failure makes the caller fall back
//! to directory enumeration.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use compact_str::CompactString;
use dirtally_core::path::{is_within, paths_equal};
use dirtally_core::{Attributes, ScanError};
use ntfs_reader::file_info::{FileInfo, HashMapCache};
use ntfs_reader::mft::Mft;
use ntfs_reader::volume::Volume;
use tracing::debug;

use super::RecordIds;
use crate::source::{IndexItem, IndexRecord, MetadataIndexReader};

/// Bulk reader over the NTFS `$MFT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MftIndexReader;

struct RawRecord {
    path: PathBuf,
    attributes: Attributes,
    is_directory: bool,
    size: u64,
    modified: SystemTime,
}

/// Convert nanoseconds since the Unix epoch, keeping the sub-second part.
/// Times before the epoch collapse to it.
fn system_time(unix_nanos: Option<i128>) -> SystemTime {
    unix_nanos
        .and_then(|nanos| u64::try_from(nanos).ok())
        .map_or(UNIX_EPOCH, |nanos| UNIX_EPOCH + Duration::from_nanos(nanos))
}

/// Drive letter of a path such as `C:\Users` or `\\?\C:\Users`.
fn drive_letter(path: &Path) -> Option<char> {
    let text = path.to_string_lossy();
    let text = text.strip_prefix(r"\\?\").unwrap_or(&text);
    let mut chars = text.chars();
    let letter = chars.next()?;
    (letter.is_ascii_alphabetic() && chars.next() == Some(':')).then(|| letter.to_ascii_uppercase())
}

/// Rewrite a reader path (`\\.\C:\dir`) as `C:\dir`.
fn volume_path(raw: &Path, drive: char) -> PathBuf {
    let text = raw.to_string_lossy().replace('/', "\\");
    let device = format!(r"\\.\{drive}:");
    let rest = text
        .strip_prefix(device.as_str())
        .or_else(|| text.get(2..).filter(|_| drive_letter(raw) == Some(drive)))
        .unwrap_or(&text)
        .trim_start_matches('\\');
    PathBuf::from(format!(r"{drive}:\{rest}"))
}

impl MetadataIndexReader for MftIndexReader {
    fn name(&self) -> &'static str {
        "ntfs-mft"
    }

    fn read_index(
        &self,
        root: &Path,
        sink: &mut dyn FnMut(IndexItem) -> ControlFlow<()>,
    ) -> Result<(), ScanError> {
        let drive = drive_letter(root)
            .ok_or_else(|| ScanError::bulk_unavailable(root, "path has no drive letter"))?;

        let volume = Volume::new(format!(r"\\.\{drive}:").as_str())
            .map_err(|e| ScanError::bulk_unavailable(root, e.to_string()))?;
        let mft = Mft::new(volume).map_err(|e| ScanError::bulk_unavailable(root, e.to_string()))?;

        let mut cache = HashMapCache::default();
        let mut raw = Vec::new();
        mft.iterate_files(|file| {
            let info = FileInfo::with_cache(&mft, file, &mut cache);
            let path = volume_path(&info.path, drive);
            if paths_equal(&path, root) || !is_within(&path, root) {
                return;
            }
            raw.push(RawRecord {
                path,
                attributes: Attributes::from_win32(info.file_attributes),
                is_directory: info.is_directory,
                size: if info.is_directory { 0 } else { info.size },
                modified: system_time(info.modified.map(|t| t.unix_timestamp_nanos())),
            });
        });
        debug!(root = %root.display(), records = raw.len(), "mft loaded");

        let mut ids = RecordIds::default();
        let (root_id, _) = ids.ids_for(root, root);
        let root_record = IndexRecord {
            record_id: root_id,
            parent_record_id: root_id,
            path: root.to_path_buf(),
            name: CompactString::new(root.to_string_lossy()),
            attributes: Attributes::empty(),
            is_directory: true,
            size: 0,
            modified: UNIX_EPOCH,
            device: None,
        };
        if sink(IndexItem::Record(root_record)).is_break() {
            return Err(ScanError::Interrupted);
        }

        for record in raw {
            let (record_id, parent_record_id) = ids.ids_for(root, &record.path);
            let name = record
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let item = IndexItem::Record(IndexRecord {
                record_id,
                parent_record_id,
                name: CompactString::new(name),
                path: record.path,
                attributes: record.attributes,
                is_directory: record.is_directory,
                size: record.size,
                modified: record.modified,
                device: None,
            });
            if sink(item).is_break() {
                return Err(ScanError::Interrupted);
            }
        }
        Ok(())
    }
}
