//! The shared file tree: arena storage, folding, invalidation and validation.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::children::{ChildList, ChildRef, StorageMode};
use crate::event::TreeEvent;
use crate::ledger::{ExtensionLedger, ExtensionRecord, extension_of};
use crate::node::{
    Aggregates, Attributes, ContainerData, ItemKind, Node, NodeBody, NodeId, NodeStatus,
    RootInfo, StateCell, VolumeSpace,
};
use crate::path::{is_within, paths_equal, root_name};

/// Capacity of the tree event channel.
pub const EVENT_CHANNEL_SIZE: usize = 1024;

/// Metadata for a new file or folder item.
#[derive(Debug, Clone)]
pub struct ItemInfo {
    /// Name (not full path).
    pub name: CompactString,
    /// Attribute bits.
    pub attributes: Attributes,
    /// Byte length for files; ignored for folders.
    pub size: u64,
    /// Last modification time.
    pub last_modified: SystemTime,
}

impl ItemInfo {
    /// Create item info.
    pub fn new(
        name: impl Into<CompactString>,
        attributes: Attributes,
        size: u64,
        last_modified: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            attributes,
            size,
            last_modified,
        }
    }
}

/// Serializable copy of a subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub name: CompactString,
    pub kind: ItemKind,
    pub size: u64,
    pub file_count: u64,
    pub subdir_count: u64,
    pub last_modified: SystemTime,
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ItemSnapshot>,
}

/// Result of a validation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationReport {
    /// Whether the root's aggregates changed order-relevant values.
    pub resort_needed: bool,
    /// Time spent validating.
    pub duration: Duration,
}

/// Hierarchical model of scanned items.
///
/// Nodes live in an arena keyed by [`NodeId`]. Containers own child handles;
/// every node keeps a non-owning parent index. Structural changes to a
/// container and its validation are serialized by that container's child
/// lock; status flags sit behind a separate per-node lock.
#[derive(Debug)]
pub struct FileTree {
    nodes: DashMap<NodeId, Arc<Node>>,
    next_id: AtomicU32,
    root: RwLock<Option<NodeId>>,
    ledger: Mutex<ExtensionLedger>,
    events: broadcast::Sender<TreeEvent>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            nodes: DashMap::new(),
            next_id: AtomicU32::new(0),
            root: RwLock::new(None),
            ledger: Mutex::new(ExtensionLedger::new()),
            events,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TreeEvent) {
        let _ = self.events.send(event);
    }

    fn ledger(&self) -> MutexGuard<'_, ExtensionLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    fn alloc(&self, node: Node) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.nodes.insert(id, Arc::new(node));
        id
    }

    fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.get(&id).map(|n| Arc::clone(n.value()))
    }

    fn node(&self, id: NodeId) -> Arc<Node> {
        self.get(id)
            .unwrap_or_else(|| panic!("node {id:?} is not in the tree"))
    }

    fn container_node(&self, id: NodeId) -> Arc<Node> {
        let node = self.node(id);
        assert!(
            node.container().is_some(),
            "node {id:?} ({}) is not a container",
            node.kind
        );
        node
    }

    /// Number of nodes in the arena, attached or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Ids of every live node.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| *n.key()).collect()
    }

    /// Drop every node and ledger bucket.
    pub fn reset(&self) {
        *self.root.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.nodes.clear();
        self.ledger().clear();
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    fn new_container(
        kind: ItemKind,
        name: CompactString,
        attributes: Attributes,
        own_modified: SystemTime,
        root: Option<RootInfo>,
    ) -> Node {
        let state = StateCell::default();
        // aggregates of a new container have never been computed
        state.invalidate();
        Node::new(
            kind,
            name,
            attributes,
            Aggregates::empty(own_modified),
            NodeBody::Container(Box::new(ContainerData {
                children: Mutex::new(ChildList::default()),
                state,
                own_modified,
                root,
            })),
        )
    }

    /// Root tree pointer (the absolute root).
    pub fn root(&self) -> Option<NodeId> {
        *self.root.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `id` the absolute root. Its files become the ledger's contents.
    pub fn set_root(&self, id: NodeId) {
        let node = self.container_node(id);
        assert!(node.parent().is_none(), "the absolute root cannot have a parent");
        let previous = self.root.write().unwrap_or_else(|e| e.into_inner()).replace(id);
        if previous == Some(id) {
            return;
        }
        if let Some(old) = previous.and_then(|old| self.get(old)) {
            self.detach_from_ledger(&old);
        }
        self.include_in_ledger(&node);
    }

    /// Whether `id` is the absolute root or one of its descendants.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let Some(root) = self.root() else {
            return false;
        };
        let mut current = Some(id);
        while let Some(cur) = current {
            if cur == root {
                return true;
            }
            current = self.get(cur).and_then(|node| node.parent());
        }
        false
    }

    /// Create the synthetic computer node that parents several roots.
    pub fn create_computer(&self, name: impl Into<CompactString>) -> NodeId {
        let root = RootInfo {
            root_path: PathBuf::new(),
            whole_volume: false,
            space: Mutex::new(None),
        };
        let id = self.alloc(Self::new_container(
            ItemKind::Computer,
            name.into(),
            Attributes::empty(),
            UNIX_EPOCH,
            Some(root),
        ));
        if let Some(data) = self.node(id).container() {
            // a computer has no entries of its own to read
            data.state.set_scanned(true);
        }
        id
    }

    /// Create a scan root for `path`.
    pub fn create_root(
        &self,
        path: &Path,
        whole_volume: bool,
        attributes: Attributes,
        last_modified: SystemTime,
    ) -> NodeId {
        let kind = if whole_volume {
            ItemKind::Volume
        } else {
            ItemKind::Directory
        };
        let root = RootInfo {
            root_path: path.to_path_buf(),
            whole_volume,
            space: Mutex::new(None),
        };
        self.alloc(Self::new_container(
            kind,
            CompactString::new(root_name(path)),
            attributes,
            last_modified,
            Some(root),
        ))
    }

    /// Create an unattached folder.
    pub fn create_directory(&self, info: ItemInfo) -> NodeId {
        self.alloc(Self::new_container(
            ItemKind::Directory,
            info.name,
            info.attributes,
            info.last_modified,
            None,
        ))
    }

    /// Create an unattached file. Reparse points are recorded with size 0.
    pub fn create_file(&self, info: ItemInfo) -> NodeId {
        let size = if info.attributes.is_reparse_point() {
            0
        } else {
            info.size
        };
        let extension = extension_of(&info.name);
        self.alloc(Node::new(
            ItemKind::File,
            info.name,
            info.attributes,
            Aggregates::leaf(size, 1, info.last_modified),
            NodeBody::Leaf {
                extension: Some(extension),
            },
        ))
    }

    /// Drop an item that was created but never attached.
    pub fn discard(&self, id: NodeId) {
        let node = self.node(id);
        assert!(node.parent().is_none(), "cannot discard attached item {id:?}");
        if let Some(data) = node.container() {
            assert!(
                data.lock_children().is_empty(),
                "cannot discard unattached container {id:?} with children"
            );
        }
        self.nodes.remove(&id);
    }

    /// Add free space and unknown nodes to a whole-volume root.
    pub fn add_volume_space_nodes(&self, root: NodeId, free_space: bool, unknown: bool) {
        let synthetic = [
            (free_space, ItemKind::FreeSpace),
            (unknown, ItemKind::Unknown),
        ];
        for (wanted, kind) in synthetic {
            if !wanted {
                continue;
            }
            let id = self.alloc(Node::new(
                kind,
                CompactString::new(kind.to_string()),
                Attributes::empty(),
                Aggregates::empty(UNIX_EPOCH),
                NodeBody::Leaf { extension: None },
            ));
            self.add_item(root, id);
        }
    }

    /// Record the capacity of a volume root and size its free space node.
    pub fn set_volume_space(&self, root: NodeId, space: VolumeSpace) {
        let node = self.container_node(root);
        let data = node.container().expect("checked container");
        let Some(info) = data.root.as_ref() else {
            panic!("node {root:?} is not a scan root");
        };
        *info.space.lock().unwrap_or_else(|e| e.into_inner()) = Some(space);

        let list = data.lock_children();
        for child in list.items().iter().filter(|c| c.kind == ItemKind::FreeSpace) {
            self.node(child.id)
                .set_stats(Aggregates::leaf(space.free_bytes, 0, UNIX_EPOCH));
        }
        drop(list);
        self.invalidate(root);
    }

    // ------------------------------------------------------------------
    // Ledger bookkeeping
    //
    // The ledger only counts files reachable from the absolute root. A
    // subtree built while detached is counted once, when it is attached.
    // ------------------------------------------------------------------

    fn include_in_ledger(&self, node: &Node) {
        match &node.body {
            NodeBody::Leaf {
                extension: Some(ext),
            } => {
                self.ledger().include(ext, node.stats().size, 1);
            }
            NodeBody::Leaf { extension: None } => {}
            NodeBody::Container(data) => {
                let children: Vec<_> = data.lock_children().items().to_vec();
                for child in children {
                    self.include_in_ledger(&self.node(child.id));
                }
            }
        }
    }

    fn detach_from_ledger(&self, node: &Node) {
        match &node.body {
            NodeBody::Leaf {
                extension: Some(ext),
            } => {
                self.ledger().remove(ext, node.stats().size, 1);
            }
            NodeBody::Leaf { extension: None } => {}
            NodeBody::Container(data) => {
                let children: Vec<_> = data.lock_children().items().to_vec();
                for child in children {
                    if let Some(child_node) = self.get(child.id) {
                        self.detach_from_ledger(&child_node);
                    }
                }
            }
        }
    }

    /// Snapshot of the ledger, largest bucket first.
    pub fn ledger_snapshot(&self) -> Vec<ExtensionRecord> {
        self.ledger().sorted_by_size()
    }

    /// Current totals for one extension.
    pub fn ledger_record(&self, extension: &str) -> Option<ExtensionRecord> {
        self.ledger().get(extension).cloned()
    }

    // ------------------------------------------------------------------
    // Structural changes
    // ------------------------------------------------------------------

    /// Attach `child` to `parent`, folding files into a collection when the
    /// parent would otherwise hold two or more files next to a sub-folder.
    pub fn add_item(&self, parent: NodeId, child: NodeId) {
        let parent_node = self.container_node(parent);
        let data = parent_node.container().expect("checked container");
        let child_node = self.node(child);
        assert!(
            child_node.parent().is_none(),
            "item {child:?} is already attached"
        );
        assert!(
            !matches!(child_node.kind, ItemKind::FileCollection | ItemKind::Computer),
            "{} items cannot be added directly",
            child_node.kind
        );
        assert!(
            parent_node.kind != ItemKind::FileCollection,
            "items are added to the folder owning a file collection"
        );

        if self.is_attached(parent) {
            self.include_in_ledger(&child_node);
        }
        let child_ref = ChildRef {
            id: child,
            kind: child_node.kind,
        };

        let mut list = data.lock_children();
        let collection = match child_ref.kind {
            ItemKind::File => match list.collection() {
                Some(collection) => Some(collection),
                None if list.folder_count() > 0 && list.file_count() >= 1 => {
                    Some(self.fold_files(parent, &mut list))
                }
                None => None,
            },
            kind if kind.is_folder() => {
                if list.file_count() >= 2 {
                    self.fold_files(parent, &mut list);
                }
                None
            }
            _ => None,
        };

        match collection {
            Some(collection) => {
                let collection_node = self.node(collection);
                let collection_data = collection_node.container().expect("collection container");
                let index = collection_data.lock_children().push(child_ref);
                child_node.set_parent(Some(collection));
                self.emit(TreeEvent::ChildAdded {
                    parent: collection,
                    child,
                    index,
                });
                self.invalidate(collection);
            }
            None => {
                let index = list.push(child_ref);
                child_node.set_parent(Some(parent));
                self.emit(TreeEvent::ChildAdded {
                    parent,
                    child,
                    index,
                });
            }
        }
        self.invalidate(parent);
    }

    /// Move every direct file of `parent` into a new file collection.
    fn fold_files(&self, parent: NodeId, list: &mut ChildList) -> NodeId {
        let collection = self.alloc(Self::new_container(
            ItemKind::FileCollection,
            CompactString::new(ItemKind::FileCollection.to_string()),
            Attributes::empty(),
            UNIX_EPOCH,
            None,
        ));
        let collection_node = self.node(collection);
        let collection_data = collection_node.container().expect("collection container");
        collection_data.state.set_scanned(true);

        let files: Vec<_> = list
            .items()
            .iter()
            .filter(|c| c.kind == ItemKind::File)
            .copied()
            .collect();
        {
            // not yet reachable, only the parent lock matters
            let mut collection_list = collection_data.lock_children();
            for file in &files {
                if let Some(index) = list.remove(file.id) {
                    self.emit(TreeEvent::ChildRemoved {
                        parent,
                        child: file.id,
                        index,
                    });
                }
                self.node(file.id).set_parent(Some(collection));
                collection_list.push(*file);
            }
        }

        collection_node.set_parent(Some(parent));
        let index = list.push(ChildRef {
            id: collection,
            kind: ItemKind::FileCollection,
        });
        self.emit(TreeEvent::ChildAdded {
            parent,
            child: collection,
            index,
        });
        debug!(
            parent = parent.0,
            files = files.len(),
            "folded files into collection"
        );
        collection
    }

    /// Move the files of `collection` back into `owner` and drop it.
    fn unfold_files(&self, owner: NodeId, list: &mut ChildList, collection: NodeId, files: Vec<ChildRef>) {
        if let Some(index) = list.remove(collection) {
            self.emit(TreeEvent::ChildRemoved {
                parent: owner,
                child: collection,
                index,
            });
        }
        let count = files.len();
        for file in files {
            self.node(file.id).set_parent(Some(owner));
            let index = list.push(file);
            self.emit(TreeEvent::ChildAdded {
                parent: owner,
                child: file.id,
                index,
            });
        }
        self.nodes.remove(&collection);
        debug!(parent = owner.0, files = count, "unfolded file collection");
    }

    /// Detach `id` (and its subtree) from the tree and the ledger.
    ///
    /// # Panics
    ///
    /// Panics if the item is not attached.
    pub fn remove_item(&self, id: NodeId) {
        let node = self.node(id);
        loop {
            let Some(parent) = node.parent() else {
                panic!("cannot remove unattached item {id:?}");
            };
            let parent_node = self.node(parent);
            let (owner, collection) = if parent_node.kind == ItemKind::FileCollection {
                let owner = parent_node
                    .parent()
                    .expect("file collection always has an owner");
                (owner, Some(parent))
            } else {
                (parent, None)
            };

            let owner_node = self.container_node(owner);
            let owner_data = owner_node.container().expect("checked container");
            let mut list = owner_data.lock_children();

            // folding may have moved the item while we were unlocked
            let moved = node.parent() != Some(parent)
                || (collection.is_some() && parent_node.parent() != Some(owner));
            if moved {
                continue;
            }

            if self.is_attached(owner) {
                self.detach_from_ledger(&node);
            }
            match collection {
                Some(collection) => {
                    let collection_node = self.node(collection);
                    let collection_data =
                        collection_node.container().expect("collection container");
                    let mut collection_list = collection_data.lock_children();
                    let index = collection_list
                        .remove(id)
                        .unwrap_or_else(|| panic!("item {id:?} missing from its collection"));
                    node.set_parent(None);
                    self.emit(TreeEvent::ChildRemoved {
                        parent: collection,
                        child: id,
                        index,
                    });
                    if collection_list.file_count() <= 1 {
                        let files = collection_list.take_files();
                        drop(collection_list);
                        self.unfold_files(owner, &mut list, collection, files);
                    } else {
                        drop(collection_list);
                        self.invalidate(collection);
                    }
                }
                None => {
                    let index = list
                        .remove(id)
                        .unwrap_or_else(|| panic!("item {id:?} missing from its parent"));
                    node.set_parent(None);
                    self.emit(TreeEvent::ChildRemoved {
                        parent: owner,
                        child: id,
                        index,
                    });
                    if node.kind.is_folder() && list.folder_count() == 0 {
                        if let Some(collection) = list.collection() {
                            let files = self
                                .node(collection)
                                .container()
                                .expect("collection container")
                                .lock_children()
                                .take_files();
                            self.unfold_files(owner, &mut list, collection, files);
                        }
                    }
                }
            }
            drop(list);
            self.invalidate(owner);
            break;
        }
        self.drop_subtree(id);
    }

    /// Remove a detached subtree from the arena.
    fn drop_subtree(&self, id: NodeId) {
        let Some((_, node)) = self.nodes.remove(&id) else {
            return;
        };
        if let Some(data) = node.container() {
            let children: Vec<_> = data.lock_children().items().to_vec();
            for child in children {
                self.drop_subtree(child.id);
            }
        }
    }

    /// Drop every child of a container except its synthetic space nodes.
    pub fn clear_children(&self, id: NodeId) {
        let node = self.container_node(id);
        let data = node.container().expect("checked container");
        let attached = self.is_attached(id);
        let mut list = data.lock_children();
        let taken =
            list.take_all_except(|c| matches!(c.kind, ItemKind::FreeSpace | ItemKind::Unknown));
        for child in &taken {
            if let Some(child_node) = self.get(child.id) {
                if attached {
                    self.detach_from_ledger(&child_node);
                }
                child_node.set_parent(None);
            }
            self.drop_subtree(child.id);
        }
        data.state.set_scanned(false);
        drop(list);
        debug!(node = id.0, removed = taken.len(), "cleared children");
        self.emit(TreeEvent::ChildrenCleared(id));
        self.invalidate(id);
    }

    /// Apply a new size and timestamp to a file.
    pub fn update_file(&self, id: NodeId, size: u64, last_modified: SystemTime) {
        let node = self.node(id);
        assert_eq!(node.kind, ItemKind::File, "only files can be resized");
        let size = if node.attributes.is_reparse_point() {
            0
        } else {
            size
        };
        let old = node.stats();
        if let Some(ext) = node.extension() {
            if node.parent().is_some_and(|parent| self.is_attached(parent)) {
                self.ledger().resize(ext, old.size, size);
            }
        }
        node.set_stats(Aggregates::leaf(size, 1, last_modified));
        if let Some(parent) = node.parent() {
            self.invalidate(parent);
        }
    }

    /// Record that traversal has read every entry of a container.
    pub fn mark_scanned(&self, id: NodeId) {
        let node = self.container_node(id);
        node.container()
            .expect("checked container")
            .state
            .set_scanned(true);
        self.invalidate(id);
    }

    // ------------------------------------------------------------------
    // Invalidate / validate
    // ------------------------------------------------------------------

    /// Mark `id` (or a file's parent) and its ancestors dirty.
    ///
    /// Stops at the first ancestor that is already invalidated, so repeated
    /// calls cost O(1) and a first call costs O(depth).
    pub fn invalidate(&self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(node) = self.get(id) else { return };
            if let Some(data) = node.container() {
                if !data.state.invalidate() {
                    return;
                }
                self.emit(TreeEvent::Invalidated(id));
            }
            current = node.parent();
        }
    }

    /// Recompute the aggregates of one container and its dirty descendants.
    ///
    /// With `force` every container below is recomputed. Returns whether a
    /// value the parent sorts by changed.
    pub fn validate(&self, id: NodeId, force: bool) -> bool {
        self.validate_node(id, force, false)
    }

    /// Refresh the aggregates of invalidated nodes only.
    pub fn validate_basic(&self) -> ValidationReport {
        let start = Instant::now();
        let resort_needed = self
            .root()
            .is_some_and(|root| self.validate_node(root, false, false));
        ValidationReport {
            resort_needed,
            duration: start.elapsed(),
        }
    }

    /// Recompute every aggregate and sort and compact every child list.
    pub fn validate_full(&self) -> ValidationReport {
        let start = Instant::now();
        let resort_needed = self
            .root()
            .is_some_and(|root| self.validate_node(root, true, true));
        let report = ValidationReport {
            resort_needed,
            duration: start.elapsed(),
        };
        debug!(elapsed = ?report.duration, nodes = self.len(), "full validation finished");
        report
    }

    fn validate_node(&self, id: NodeId, force: bool, full: bool) -> bool {
        let Some(node) = self.get(id) else {
            return false;
        };
        let Some(data) = node.container() else {
            return false;
        };
        let Some(scanned) = data.state.begin_validation(force) else {
            return false;
        };

        let mut list = data.lock_children();
        let mut observed: u64 = 0;
        let mut free: u64 = 0;
        let mut file_count: u64 = 0;
        let mut subdir_count: u64 = 0;
        let mut newest: Option<SystemTime> = None;
        let mut all_done = scanned;
        let mut unknown = None;

        for child in list.items() {
            let Some(child_node) = self.get(child.id) else {
                continue;
            };
            match child.kind {
                ItemKind::FreeSpace => {
                    free += child_node.stats().size;
                    continue;
                }
                ItemKind::Unknown => {
                    unknown = Some(child_node);
                    continue;
                }
                kind if kind.is_container() => {
                    self.validate_node(child.id, force, full);
                    all_done &= child_node.is_done();
                    let stats = child_node.stats();
                    observed += stats.size;
                    file_count += stats.file_count;
                    subdir_count += stats.subdir_count + u64::from(kind.is_folder());
                    newest = newest.max(Some(stats.last_modified));
                }
                _ => {
                    let stats = child_node.stats();
                    observed += stats.size;
                    file_count += stats.file_count;
                    newest = newest.max(Some(stats.last_modified));
                }
            }
        }

        let mut size = observed + free;
        if let Some(unknown) = unknown {
            let space = data
                .root
                .as_ref()
                .and_then(|r| *r.space.lock().unwrap_or_else(|e| e.into_inner()));
            let deficit = space.map_or(0, |s| s.used_bytes().saturating_sub(observed));
            unknown.set_stats(Aggregates::leaf(deficit, 0, UNIX_EPOCH));
            size += deficit;
        }

        if full && list.len() > 1 {
            list.sort_and_compact(|c| {
                let size = self.get(c.id).map_or(0, |n| n.stats().size);
                (Reverse(size), c.id)
            });
        }

        let old = node.stats();
        let new = Aggregates {
            size,
            file_count,
            subdir_count,
            last_modified: newest.unwrap_or(data.own_modified),
        };
        node.set_stats(new);
        drop(list);

        let newly_done = data.state.finish_validation(all_done);
        let aggregates_changed = old != new;
        let resort = old.size != new.size || old.last_modified != new.last_modified;

        trace!(node = id.0, size, aggregates_changed, "validated");
        self.emit(TreeEvent::Validated {
            node: id,
            aggregates_changed,
        });
        if resort {
            if let Some(parent) = node.parent() {
                self.emit(TreeEvent::SortOrderChanged(parent));
            }
        }
        if newly_done {
            self.emit(TreeEvent::SubtreeFinished(id));
        }
        resort
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Kind of an item.
    pub fn kind(&self, id: NodeId) -> Option<ItemKind> {
        self.get(id).map(|n| n.kind)
    }

    /// Name of an item.
    pub fn name(&self, id: NodeId) -> Option<CompactString> {
        self.get(id).map(|n| n.name.clone())
    }

    /// Attribute bits of an item.
    pub fn attributes(&self, id: NodeId) -> Option<Attributes> {
        self.get(id).map(|n| n.attributes)
    }

    /// Last validated aggregates of an item.
    pub fn aggregates(&self, id: NodeId) -> Option<Aggregates> {
        self.get(id).map(|n| n.stats())
    }

    /// Parent of an item.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent())
    }

    /// Direct children in their current order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .and_then(|n| {
                n.container()
                    .map(|c| c.lock_children().items().iter().map(|c| c.id).collect())
            })
            .unwrap_or_default()
    }

    /// Status flags of a container.
    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.get(id)
            .and_then(|n| n.container().map(|c| c.state.status()))
    }

    /// Storage mode of a container.
    pub fn storage_mode(&self, id: NodeId) -> Option<StorageMode> {
        self.get(id)
            .and_then(|n| n.container().map(|c| c.lock_children().mode()))
    }

    /// The file collection child of a container, if it is folded.
    pub fn file_collection(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)
            .and_then(|n| n.container().and_then(|c| c.lock_children().collection()))
    }

    /// The single direct file kept next to sub-folders, if any.
    pub fn first_file(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)
            .and_then(|n| n.container().and_then(|c| c.lock_children().first_file()))
    }

    /// Path a scan root was created for.
    pub fn root_path(&self, id: NodeId) -> Option<PathBuf> {
        self.get(id).and_then(|n| {
            n.container()
                .and_then(|c| c.root.as_ref())
                .filter(|r| !r.root_path.as_os_str().is_empty())
                .map(|r| r.root_path.clone())
        })
    }

    /// Whether a scan root spans a whole volume.
    pub fn is_whole_volume(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| {
            n.container()
                .and_then(|c| c.root.as_ref())
                .is_some_and(|r| r.whole_volume)
        })
    }

    /// Recorded capacity of a volume root.
    pub fn volume_space(&self, id: NodeId) -> Option<VolumeSpace> {
        self.get(id).and_then(|n| {
            n.container()
                .and_then(|c| c.root.as_ref())
                .and_then(|r| *r.space.lock().unwrap_or_else(|e| e.into_inner()))
        })
    }

    /// The roots that anchor scans: the children of a computer node, or the
    /// absolute root itself.
    pub fn scan_roots(&self) -> Vec<NodeId> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        if self.kind(root) == Some(ItemKind::Computer) {
            self.children(root)
        } else {
            vec![root]
        }
    }

    /// Ancestors of an item, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent(id);
        while let Some(id) = current {
            result.push(id);
            current = self.parent(id);
        }
        result
    }

    /// Filesystem path of an item.
    pub fn path_of(&self, id: NodeId) -> Option<PathBuf> {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.get(id)?;
            if let Some(root) = node.container().and_then(|c| c.root.as_ref()) {
                if root.root_path.as_os_str().is_empty() {
                    return None;
                }
                let mut path = root.root_path.clone();
                for part in parts.iter().rev() {
                    path.push(part);
                }
                return Some(path);
            }
            if !node.kind.is_synthetic() {
                parts.push(node.name.to_string());
            }
            current = node.parent();
        }
        None
    }

    /// Find the item for a filesystem path.
    pub fn find_by_path(&self, path: &Path) -> Option<NodeId> {
        let root = self
            .scan_roots()
            .into_iter()
            .filter_map(|id| self.root_path(id).map(|p| (id, p)))
            .find(|(_, root_path)| is_within(path, root_path))?;
        let (mut current, root_path) = root;
        if paths_equal(path, &root_path) {
            return Some(current);
        }
        let relative = path.components().skip(root_path.components().count());
        for component in relative {
            let name = component.as_os_str().to_string_lossy();
            current = self.find_child_named(current, &name)?;
        }
        Some(current)
    }

    fn find_child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        for child in self.children(parent) {
            match self.kind(child)? {
                ItemKind::FileCollection => {
                    if let Some(found) = self.find_child_named(child, name) {
                        return Some(found);
                    }
                }
                kind if kind.is_synthetic() => {}
                _ => {
                    if self.name(child).is_some_and(|n| n == name) {
                        return Some(child);
                    }
                }
            }
        }
        None
    }

    /// Copy a subtree into a serializable value.
    pub fn snapshot(&self, id: NodeId) -> Option<ItemSnapshot> {
        let node = self.get(id)?;
        let stats = node.stats();
        let children = match node.container() {
            Some(data) => {
                let ids: Vec<_> = data.lock_children().items().iter().map(|c| c.id).collect();
                ids.into_iter().filter_map(|c| self.snapshot(c)).collect()
            }
            None => Vec::new(),
        };
        Some(ItemSnapshot {
            name: node.name.clone(),
            kind: node.kind,
            size: stats.size,
            file_count: stats.file_count,
            subdir_count: stats.subdir_count,
            last_modified: stats.last_modified,
            attributes: node.attributes,
            children,
        })
    }

    /// Containers currently holding two or more files next to a sub-folder.
    pub fn folding_violations(&self) -> Vec<NodeId> {
        let nodes: Vec<(NodeId, Arc<Node>)> = self
            .nodes
            .iter()
            .map(|n| (*n.key(), Arc::clone(n.value())))
            .collect();
        nodes
            .into_iter()
            .filter(|(_, n)| {
                n.container()
                    .is_some_and(|c| c.lock_children().violates_folding())
            })
            .map(|(id, _)| id)
            .collect()
    }
}
