//! Change notifications emitted by the tree.

use crate::node::NodeId;

/// A mutation or validation observed on a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEvent {
    /// The container's aggregates became stale.
    Invalidated(NodeId),
    /// A child was appended at `index`.
    ChildAdded { parent: NodeId, child: NodeId, index: usize },
    /// A child was removed from `index`.
    ChildRemoved { parent: NodeId, child: NodeId, index: usize },
    /// All children of the container were dropped.
    ChildrenCleared(NodeId),
    /// A validation pass completed on the container.
    Validated { node: NodeId, aggregates_changed: bool },
    /// A value the children are ordered by changed.
    SortOrderChanged(NodeId),
    /// Every item below the container has been scanned.
    SubtreeFinished(NodeId),
}

impl TreeEvent {
    /// The container the event is about.
    pub fn node(&self) -> NodeId {
        match *self {
            Self::Invalidated(id)
            | Self::ChildrenCleared(id)
            | Self::SortOrderChanged(id)
            | Self::SubtreeFinished(id) => id,
            Self::ChildAdded { parent, .. } | Self::ChildRemoved { parent, .. } => parent,
            Self::Validated { node, .. } => node,
        }
    }
}
