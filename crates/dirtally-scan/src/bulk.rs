//! Traversal from a bulk metadata index.
//!
//! The first pass builds a detached item for every record that passes the
//! skip filter. The second pass attaches each item to the container of its
//! parent record, parents before children, so the ledger and invalidation see
//! every item exactly once. Records whose parent chain does not reach the root
//! (a skipped folder, a reparse point, a directory on another filesystem, a
//! record missing from the index) are discarded.

use std::collections::HashMap;
use std::path::Path;

use dirtally_core::{NodeId, ScanError};
use itertools::{Either, Itertools};
use tracing::debug;

use crate::context::TraversalContext;
use crate::source::{IndexItem, MetadataIndexReader};

/// Counts reported by a successful bulk traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BulkSummary {
    pub attached: usize,
    pub skipped: usize,
    pub orphans: usize,
}

struct Pending {
    record_id: u64,
    parent_record_id: u64,
    node: NodeId,
    is_directory: bool,
    size: u64,
}

/// Depth of a container record below the root, following parent links.
fn container_depth(
    record: u64,
    parents: &HashMap<u64, u64>,
    memo: &mut HashMap<u64, Option<usize>>,
) -> Option<usize> {
    let mut chain = Vec::new();
    let mut current = record;
    let base = loop {
        if let Some(depth) = memo.get(&current) {
            break *depth;
        }
        // a parent cycle can never reach the root
        if chain.len() > parents.len() {
            break None;
        }
        chain.push(current);
        match parents.get(&current) {
            Some(&parent) => current = parent,
            None => break None,
        }
    };
    for (i, record) in chain.iter().rev().enumerate() {
        memo.insert(*record, base.map(|d| d + i + 1));
    }
    base.map(|d| d + chain.len())
}

fn discard_all(ctx: &TraversalContext<'_>, pending: impl IntoIterator<Item = Pending>) {
    for item in pending {
        ctx.tree.discard(item.node);
    }
}

/// Populate `root` from `reader`.
///
/// Any error other than [`ScanError::Interrupted`] means the index could not
/// be used; nothing has been attached in that case.
pub(crate) fn scan_bulk(
    ctx: &TraversalContext<'_>,
    reader: &dyn MetadataIndexReader,
    root: NodeId,
    root_path: &Path,
) -> Result<BulkSummary, ScanError> {
    let mut pending: Vec<Pending> = Vec::new();
    let mut containers: HashMap<u64, NodeId> = HashMap::new();
    let mut root_record = None;
    let mut skipped = 0;
    ctx.progress.set_current_path(root_path.to_path_buf());

    let read = reader.read_index(root_path, &mut |item| {
        match item {
            IndexItem::Unreadable(warning) => ctx.warn(warning),
            IndexItem::Record(record) if record.is_root() => {
                root_record = Some(record.record_id);
            }
            IndexItem::Record(record) => {
                if ctx.should_skip(&record.name, &record.path) {
                    skipped += 1;
                } else {
                    let node = if record.is_directory {
                        ctx.tree.create_directory(record.item_info())
                    } else {
                        ctx.tree.create_file(record.item_info())
                    };
                    let enterable = !record.attributes.is_reparse_point()
                        && !ctx.is_foreign_device(record.device);
                    if record.is_directory && enterable {
                        containers.insert(record.record_id, node);
                    }
                    pending.push(Pending {
                        record_id: record.record_id,
                        parent_record_id: record.parent_record_id,
                        node,
                        is_directory: record.is_directory,
                        size: record.size,
                    });
                }
            }
        }
        ctx.checkpoint()
    });

    if let Err(err) = read {
        discard_all(ctx, pending);
        return Err(err);
    }
    let Some(root_record) = root_record else {
        discard_all(ctx, pending);
        return Err(ScanError::bulk_unavailable(
            root_path,
            format!("{} index has no record for the root", reader.name()),
        ));
    };

    let parents: HashMap<u64, u64> = pending
        .iter()
        .filter(|p| containers.contains_key(&p.record_id))
        .map(|p| (p.record_id, p.parent_record_id))
        .collect();
    containers.insert(root_record, root);
    let mut memo = HashMap::from([(root_record, Some(0))]);

    let (mut attachable, orphans): (Vec<_>, Vec<_>) = pending.into_iter().partition_map(|p| {
        match container_depth(p.parent_record_id, &parents, &mut memo) {
            Some(depth) => Either::Left((depth, p)),
            None => Either::Right(p),
        }
    });
    let orphan_count = orphans.len();
    if orphan_count > 0 {
        debug!(
            root = %root_path.display(),
            orphans = orphan_count,
            "discarding records unreachable from the root"
        );
    }
    discard_all(ctx, orphans);

    attachable.sort_by_key(|(depth, _)| *depth);
    let mut directories = Vec::new();
    let mut attached = 0;
    let mut remaining = attachable.into_iter();
    while let Some((_, item)) = remaining.next() {
        let parent = containers[&item.parent_record_id];
        ctx.tree.add_item(parent, item.node);
        attached += 1;
        if item.is_directory {
            ctx.progress.record_dir();
            directories.push(item.node);
        } else {
            ctx.progress.record_file(item.size);
        }
        if ctx.checkpoint().is_break() {
            discard_all(ctx, remaining.map(|(_, p)| p));
            return Err(ScanError::Interrupted);
        }
    }

    for directory in directories {
        ctx.tree.mark_scanned(directory);
    }
    ctx.tree.mark_scanned(root);

    Ok(BulkSummary {
        attached,
        skipped,
        orphans: orphan_count,
    })
}
