//! Breadth-first traversal with per-directory enumeration.

use std::collections::VecDeque;
use std::path::PathBuf;

use dirtally_core::{NodeId, ScanError, ScanWarning};
use tracing::{debug, trace};

use crate::context::TraversalContext;
use crate::source::DirectoryEnumerator;

/// Populate `root` by listing one directory at a time.
///
/// Entries are attached as soon as they are read. A directory is marked
/// scanned once its listing is drained; reparse points and directories on
/// another filesystem are attached but never entered. Returns [`ScanError::Interrupted`] on cancel, leaving what was
/// read so far in the tree.
pub(crate) fn scan_enumerate(
    ctx: &TraversalContext<'_>,
    enumerator: &dyn DirectoryEnumerator,
    root: NodeId,
    root_path: PathBuf,
) -> Result<(), ScanError> {
    let mut queue = VecDeque::from([(root, root_path)]);

    while let Some((directory, path)) = queue.pop_front() {
        if ctx.checkpoint().is_break() {
            return Err(ScanError::Interrupted);
        }
        ctx.progress.set_current_path(path.clone());
        trace!(path = %path.display(), "enumerating");

        let entries = match enumerator.read_dir(&path) {
            Ok(entries) => entries,
            Err(err) => {
                ctx.warn(ScanWarning::from_error(&path, &err));
                ctx.tree.mark_scanned(directory);
                continue;
            }
        };

        for entry in entries {
            match entry {
                Ok(entry) => {
                    let full_path = path.join(entry.name.as_str());
                    if ctx.should_skip(&entry.name, &full_path) {
                        continue;
                    }
                    if entry.is_directory {
                        let child = ctx.tree.create_directory(entry.item_info());
                        ctx.tree.add_item(directory, child);
                        ctx.progress.record_dir();
                        if entry.is_reparse_point() {
                            ctx.tree.mark_scanned(child);
                        } else if ctx.is_foreign_device(entry.device) {
                            debug!(path = %full_path.display(), "not crossing into another filesystem");
                            ctx.tree.mark_scanned(child);
                        } else {
                            queue.push_back((child, full_path));
                        }
                    } else {
                        let child = ctx.tree.create_file(entry.item_info());
                        ctx.tree.add_item(directory, child);
                        ctx.progress.record_file(entry.size);
                    }
                }
                // vanished or unreadable entries are left out
                Err(err) => ctx.warn(ScanWarning::from_error(&path, &err)),
            }
            if ctx.checkpoint().is_break() {
                return Err(ScanError::Interrupted);
            }
        }

        ctx.tree.mark_scanned(directory);
    }
    Ok(())
}
