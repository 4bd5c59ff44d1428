//! Scan engine for dirtally.
//!
//! This crate fills a [`FileTree`] from the filesystem while readers browse
//! it. Each root is read either from a bulk metadata index (the NTFS master
//! file table on Windows, a parallel jwalk walk elsewhere) or by enumerating
//! one directory at a time, falling back to enumeration when the index
//! cannot be used.
//!
//! # Example
//!
//! ```rust,no_run
//! use dirtally_scan::{ScanConfig, Scanner};
//!
//! let scanner = Scanner::native(ScanConfig::new("/path/to/scan")).unwrap();
//! let outcome = scanner.scan().unwrap();
//! let tree = scanner.tree();
//!
//! if let Some(totals) = tree.root().and_then(|root| tree.aggregates(root)) {
//!     println!("{:?}: {} bytes in {} files", outcome.state, totals.size, totals.file_count);
//! }
//! ```
//!
//! # Watching a scan
//!
//! Scan state, progress and completion arrive on a broadcast channel:
//!
//! ```rust,no_run
//! use dirtally_scan::{ScanConfig, ScanEvent, Scanner};
//!
//! let scanner = Scanner::native(ScanConfig::new("/data")).unwrap();
//! let mut events = scanner.subscribe();
//! scanner.scan_async(|outcome| println!("done: {}", outcome.state)).unwrap();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let ScanEvent::Progress(progress) = event {
//!             println!("{} files", progress.files_scanned);
//!         }
//!     }
//! });
//! ```

mod bulk;
mod context;
mod control;
mod dispatch;
mod enumerate;
mod fs;
mod index;
mod orchestrator;
mod progress;
mod source;
mod space;

pub use control::ScanControl;
pub use dispatch::{ChannelDispatcher, Dispatcher, InlineDispatcher, Task};
pub use fs::StdEnumerator;
#[cfg(windows)]
pub use index::MftIndexReader;
pub use index::JwalkIndexReader;
pub use orchestrator::{ScanEvent, ScanOutcome, ScanState, Scanner};
pub use progress::ScanProgress;
pub use source::{
    DirEntries, DirEntryRecord, DirectoryEnumerator, IndexItem, IndexRecord, MetadataIndexReader,
    Platform, SpaceQuery, VolumeInfo,
};
pub use space::SysinfoSpace;

// Re-export core types for convenience
pub use dirtally_core::{
    Aggregates, Attributes, FileTree, ItemKind, NodeId, ScanConfig, ScanError, ScanWarning,
    TreeEvent, VolumeSpace, WarningKind,
};
