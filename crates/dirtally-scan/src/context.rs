//! State shared by both traversal strategies for one root.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dirtally_core::{FileTree, ScanWarning, SkipFilter};
use tracing::warn;

use crate::control::ScanControl;
use crate::progress::ProgressTracker;

/// Whether `device` differs from the filesystem a traversal is bound to.
/// An unknown device on either side never counts as a crossing.
pub(crate) fn crosses_boundary(root_device: Option<u64>, device: Option<u64>) -> bool {
    matches!((root_device, device), (Some(root), Some(device)) if root != device)
}

pub(crate) struct TraversalContext<'a> {
    pub tree: &'a FileTree,
    pub filter: &'a SkipFilter,
    pub control: &'a ScanControl,
    pub progress: &'a ProgressTracker,
    pub warnings: &'a Mutex<Vec<ScanWarning>>,
    /// Recycle bin of the volume being scanned.
    pub recycle_bin: Option<PathBuf>,
    /// Filesystem of the scan root. Directories on any other filesystem are
    /// attached but not entered. `None` crosses every boundary.
    pub root_device: Option<u64>,
}

impl TraversalContext<'_> {
    /// Cancel/suspend checkpoint. A suspended scan refreshes the visible
    /// aggregates before it parks.
    pub fn checkpoint(&self) -> ControlFlow<()> {
        self.control.checkpoint(|| {
            self.tree.validate_basic();
        })
    }

    pub fn should_skip(&self, name: &str, path: &Path) -> bool {
        self.filter
            .should_skip(name, path, self.recycle_bin.as_deref())
    }

    /// Whether a directory on `device` lies across a filesystem boundary.
    pub fn is_foreign_device(&self, device: Option<u64>) -> bool {
        crosses_boundary(self.root_device, device)
    }

    /// Record a per-entry failure and move on.
    pub fn warn(&self, warning: ScanWarning) {
        warn!(path = %warning.path.display(), kind = ?warning.kind, "{}", warning.message);
        self.progress.record_error();
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(warning);
    }
}
