//! Core types for dirtally.
//!
//! This crate holds the shared file tree (with file folding and the
//! invalidate/validate protocol), the per-extension ledger, the skip filter
//! and configuration. Traversal lives in `dirtally-scan`.

mod children;
mod config;
mod error;
mod event;
mod ledger;
mod node;
pub mod path;
mod skip;
mod tree;

pub use children::StorageMode;
pub use config::{ScanConfig, ScanConfigBuilder};
pub use error::{ScanError, ScanWarning, WarningKind};
pub use event::TreeEvent;
pub use ledger::{ExtensionLedger, ExtensionRecord, NO_EXTENSION, extension_of, normalize_extension};
pub use node::{Aggregates, Attributes, ItemKind, NodeId, NodeStatus, VolumeSpace};
pub use skip::{SkipFilter, is_skipped};
pub use tree::{EVENT_CHANNEL_SIZE, FileTree, ItemInfo, ItemSnapshot, ValidationReport};
