//! Item kinds, attributes and the arena node.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::children::ChildList;

/// Index of a node within a [`FileTree`](crate::FileTree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub(crate) const NONE: u32 = u32::MAX;

    /// Create a new NodeId from a u32.
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Type of a tree item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum ItemKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Volume (drive) root.
    Volume,
    /// Synthetic parent of several scan roots.
    Computer,
    /// Synthetic folder holding folded file children.
    #[strum(to_string = "<Files>")]
    FileCollection,
    /// Free space of a volume.
    #[strum(to_string = "<Free Space>")]
    FreeSpace,
    /// Used space the scan could not account for.
    #[strum(to_string = "<Unknown>")]
    Unknown,
}

impl ItemKind {
    /// Whether items of this kind hold children.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Directory | Self::Volume | Self::Computer | Self::FileCollection
        )
    }

    /// Whether this kind counts as a sub-container for folding purposes.
    pub fn is_folder(self) -> bool {
        matches!(self, Self::Directory | Self::Volume | Self::Computer)
    }

    /// Whether this kind has no filesystem counterpart.
    pub fn is_synthetic(self) -> bool {
        matches!(
            self,
            Self::Computer | Self::FileCollection | Self::FreeSpace | Self::Unknown
        )
    }
}

/// File attribute bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(u16);

impl Attributes {
    pub const READ_ONLY: Self = Self(1 << 0);
    pub const HIDDEN: Self = Self(1 << 1);
    pub const SYSTEM: Self = Self(1 << 2);
    pub const ARCHIVE: Self = Self(1 << 3);
    pub const COMPRESSED: Self = Self(1 << 4);
    pub const ENCRYPTED: Self = Self(1 << 5);
    pub const REPARSE_POINT: Self = Self(1 << 6);
    pub const TEMPORARY: Self = Self(1 << 7);

    /// No attributes set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u16) -> Self {
        Self(bits & 0xff)
    }

    /// Whether every bit in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits in `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Set or clear the bits in `other`.
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Whether the entry is a reparse point (symlink, junction, mount).
    pub const fn is_reparse_point(self) -> bool {
        self.contains(Self::REPARSE_POINT)
    }

    /// Decode Win32 `FILE_ATTRIBUTE_*` bits, as found in directory listings
    /// and NTFS standard information records.
    pub fn from_win32(raw: u32) -> Self {
        const FILE_ATTRIBUTE_READONLY: u32 = 0x1;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
        const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;
        const FILE_ATTRIBUTE_TEMPORARY: u32 = 0x100;
        const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
        const FILE_ATTRIBUTE_COMPRESSED: u32 = 0x800;
        const FILE_ATTRIBUTE_ENCRYPTED: u32 = 0x4000;

        let mut attributes = Self::empty();
        for (bit, flag) in [
            (FILE_ATTRIBUTE_READONLY, Self::READ_ONLY),
            (FILE_ATTRIBUTE_HIDDEN, Self::HIDDEN),
            (FILE_ATTRIBUTE_SYSTEM, Self::SYSTEM),
            (FILE_ATTRIBUTE_ARCHIVE, Self::ARCHIVE),
            (FILE_ATTRIBUTE_TEMPORARY, Self::TEMPORARY),
            (FILE_ATTRIBUTE_REPARSE_POINT, Self::REPARSE_POINT),
            (FILE_ATTRIBUTE_COMPRESSED, Self::COMPRESSED),
            (FILE_ATTRIBUTE_ENCRYPTED, Self::ENCRYPTED),
        ] {
            attributes.set(flag, raw & bit != 0);
        }
        attributes
    }
}

impl std::ops::BitOr for Attributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Aggregate statistics of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregates {
    /// Size in bytes (sum of children for containers).
    pub size: u64,
    /// Number of files in the subtree (1 for a file).
    pub file_count: u64,
    /// Number of folders in the subtree, excluding the item itself.
    pub subdir_count: u64,
    /// Newest modification time in the subtree.
    pub last_modified: SystemTime,
}

impl Aggregates {
    pub(crate) fn leaf(size: u64, file_count: u64, last_modified: SystemTime) -> Self {
        Self {
            size,
            file_count,
            subdir_count: 0,
            last_modified,
        }
    }

    pub(crate) fn empty(last_modified: SystemTime) -> Self {
        Self::leaf(0, 0, last_modified)
    }
}

/// Validation status of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStatus {
    /// Aggregates are stale.
    pub invalidated: bool,
    /// A validation pass is running on this node.
    pub validating: bool,
    /// The whole subtree has been scanned.
    pub done: bool,
}

#[derive(Debug, Default)]
struct StateFlags {
    invalidated: bool,
    validating: bool,
    done: bool,
    /// Traversal finished reading this container's own entries.
    scanned: bool,
}

/// Per-node state flags, guarded separately from the child list so status
/// reads never wait on a validation pass.
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    flags: Mutex<StateFlags>,
    idle: Condvar,
}

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, StateFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn status(&self) -> NodeStatus {
        let flags = self.lock();
        NodeStatus {
            invalidated: flags.invalidated,
            validating: flags.validating,
            done: flags.done,
        }
    }

    /// Set `Invalidated` and clear `Done`. Returns false if it was already set.
    pub(crate) fn invalidate(&self) -> bool {
        let mut flags = self.lock();
        if flags.invalidated {
            return false;
        }
        flags.invalidated = true;
        flags.done = false;
        true
    }

    pub(crate) fn set_scanned(&self, scanned: bool) {
        self.lock().scanned = scanned;
    }

    /// Wait for any running validation, then claim the node if it needs work.
    ///
    /// Returns the `scanned` flag when the caller now owns the validation.
    pub(crate) fn begin_validation(&self, force: bool) -> Option<bool> {
        let mut flags = self.lock();
        while flags.validating {
            flags = self.idle.wait(flags).unwrap_or_else(|e| e.into_inner());
        }
        if !flags.invalidated && !force {
            return None;
        }
        flags.invalidated = false;
        flags.validating = true;
        Some(flags.scanned)
    }

    /// Release the node. Returns true if `Done` was newly set.
    pub(crate) fn finish_validation(&self, all_done: bool) -> bool {
        let mut flags = self.lock();
        flags.validating = false;
        // an invalidation that raced in keeps the node dirty and not done
        let done = all_done && !flags.invalidated;
        let newly_done = done && !flags.done;
        flags.done = done;
        drop(flags);
        self.idle.notify_all();
        newly_done
    }
}

/// Root-specific data of a container anchoring a scan.
#[derive(Debug)]
pub(crate) struct RootInfo {
    pub(crate) root_path: PathBuf,
    pub(crate) whole_volume: bool,
    pub(crate) space: Mutex<Option<VolumeSpace>>,
}

/// Total and free bytes of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpace {
    /// Capacity in bytes.
    pub total_bytes: u64,
    /// Free bytes.
    pub free_bytes: u64,
}

impl VolumeSpace {
    /// Bytes in use.
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }
}

#[derive(Debug)]
pub(crate) struct ContainerData {
    pub(crate) children: Mutex<ChildList>,
    pub(crate) state: StateCell,
    /// Timestamp of the folder itself, used while it has no children.
    pub(crate) own_modified: SystemTime,
    pub(crate) root: Option<RootInfo>,
}

impl ContainerData {
    pub(crate) fn lock_children(&self) -> MutexGuard<'_, ChildList> {
        self.children.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
pub(crate) enum NodeBody {
    Leaf {
        /// Ledger bucket key (files only).
        extension: Option<CompactString>,
    },
    Container(Box<ContainerData>),
}

/// A single item stored in the arena.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: ItemKind,
    pub(crate) name: CompactString,
    pub(crate) attributes: Attributes,
    parent: AtomicU32,
    stats: Mutex<Aggregates>,
    pub(crate) body: NodeBody,
}

impl Node {
    pub(crate) fn new(
        kind: ItemKind,
        name: CompactString,
        attributes: Attributes,
        stats: Aggregates,
        body: NodeBody,
    ) -> Self {
        Self {
            kind,
            name,
            attributes,
            parent: AtomicU32::new(NodeId::NONE),
            stats: Mutex::new(stats),
            body,
        }
    }

    pub(crate) fn parent(&self) -> Option<NodeId> {
        match self.parent.load(Ordering::Acquire) {
            NodeId::NONE => None,
            id => Some(NodeId(id)),
        }
    }

    pub(crate) fn set_parent(&self, parent: Option<NodeId>) {
        self.parent
            .store(parent.map_or(NodeId::NONE, |p| p.0), Ordering::Release);
    }

    pub(crate) fn stats(&self) -> Aggregates {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_stats(&self, stats: Aggregates) {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = stats;
    }

    pub(crate) fn container(&self) -> Option<&ContainerData> {
        match &self.body {
            NodeBody::Container(data) => Some(data),
            NodeBody::Leaf { .. } => None,
        }
    }

    pub(crate) fn extension(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Leaf { extension } => extension.as_deref(),
            NodeBody::Container(_) => None,
        }
    }

    /// Whether this node's subtree is fully scanned and validated.
    pub(crate) fn is_done(&self) -> bool {
        self.container().is_none_or(|c| c.state.status().done)
    }
}
