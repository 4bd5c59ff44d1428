//! Child list of a container with the bookkeeping folding relies on.

use serde::{Deserialize, Serialize};

use crate::node::{ItemKind, NodeId};

/// How a container currently stores its file children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// No sub-folders; files (any number) are direct children.
    Flat,
    /// Exactly one direct file kept alongside sub-folders.
    SingleFile,
    /// Files live in a `FileCollection` child next to the sub-folders.
    Folded,
}

/// A child handle together with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildRef {
    pub(crate) id: NodeId,
    pub(crate) kind: ItemKind,
}

/// Ordered children of a container.
#[derive(Debug, Default)]
pub(crate) struct ChildList {
    items: Vec<ChildRef>,
    files: usize,
    folders: usize,
    collection: Option<NodeId>,
}

impl ChildList {
    pub(crate) fn items(&self) -> &[ChildRef] {
        &self.items
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Direct file children.
    pub(crate) fn file_count(&self) -> usize {
        self.files
    }

    /// Direct sub-folders, not counting a file collection.
    pub(crate) fn folder_count(&self) -> usize {
        self.folders
    }

    pub(crate) fn collection(&self) -> Option<NodeId> {
        self.collection
    }

    /// The single direct file kept next to sub-folders, if any.
    pub(crate) fn first_file(&self) -> Option<NodeId> {
        if self.files != 1 {
            return None;
        }
        self.items
            .iter()
            .find(|c| c.kind == ItemKind::File)
            .map(|c| c.id)
    }

    pub(crate) fn mode(&self) -> StorageMode {
        if self.collection.is_some() {
            StorageMode::Folded
        } else if self.folders > 0 && self.files == 1 {
            StorageMode::SingleFile
        } else {
            StorageMode::Flat
        }
    }

    /// Append a child, returning its index.
    pub(crate) fn push(&mut self, child: ChildRef) -> usize {
        match child.kind {
            ItemKind::File => self.files += 1,
            ItemKind::FileCollection => {
                assert!(self.collection.is_none(), "container already has a file collection");
                self.collection = Some(child.id);
            }
            kind if kind.is_folder() => self.folders += 1,
            _ => {}
        }
        self.items.push(child);
        self.items.len() - 1
    }

    /// Remove a child, returning its former index.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<usize> {
        let index = self.items.iter().position(|c| c.id == id)?;
        let child = self.items.remove(index);
        match child.kind {
            ItemKind::File => self.files -= 1,
            ItemKind::FileCollection => self.collection = None,
            kind if kind.is_folder() => self.folders -= 1,
            _ => {}
        }
        Some(index)
    }

    /// Take every direct file child out of the list.
    pub(crate) fn take_files(&mut self) -> Vec<ChildRef> {
        let (files, rest): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|c| c.kind == ItemKind::File);
        self.items = rest;
        self.files = 0;
        files
    }

    /// Take every child except those matching `keep`.
    pub(crate) fn take_all_except(&mut self, keep: impl Fn(&ChildRef) -> bool) -> Vec<ChildRef> {
        let (kept, taken): (Vec<_>, Vec<_>) = self.items.drain(..).partition(|c| keep(c));
        self.items = Vec::new();
        self.files = 0;
        self.folders = 0;
        self.collection = None;
        for child in kept {
            self.push(child);
        }
        taken
    }

    /// Reorder children by the given key and release spare capacity.
    pub(crate) fn sort_and_compact<K: Ord>(&mut self, mut key: impl FnMut(&ChildRef) -> K) {
        self.items.sort_by_cached_key(|c| key(c));
        self.items.shrink_to_fit();
    }

    /// Whether the list holds two or more files next to a sub-folder.
    pub(crate) fn violates_folding(&self) -> bool {
        self.files >= 2 && self.folders >= 1
    }
}
