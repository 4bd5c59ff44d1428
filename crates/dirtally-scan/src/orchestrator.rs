//! Scan lifecycle: start, cancel, suspend, refresh and periodic validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dirtally_core::path::{normalize, paths_equal};
use dirtally_core::{
    FileTree, ItemKind, NodeId, ScanConfig, ScanError, ScanWarning, SkipFilter, WarningKind,
};
use itertools::Itertools;
use serde::Serialize;
use strum::Display;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::bulk::scan_bulk;
use crate::context::{TraversalContext, crosses_boundary};
use crate::control::ScanControl;
use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::enumerate::scan_enumerate;
use crate::progress::{ProgressTracker, ScanProgress};
use crate::source::{DirEntryRecord, Platform, VolumeInfo};

/// Capacity of the scan event channel.
const EVENT_CHANNEL_SIZE: usize = 100;

/// Lifecycle state of a [`Scanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum ScanState {
    NotStarted,
    Scanning,
    /// Rescanning selected subtrees.
    Refreshing,
    /// Cancel requested, traversal has not stopped yet.
    Cancelling,
    Cancelled,
    Finished,
    Failed,
}

impl ScanState {
    /// Whether a traversal thread is running.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scanning | Self::Refreshing | Self::Cancelling)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished | Self::Failed)
    }
}

/// Result of one scan attempt, delivered exactly once.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub state: ScanState,
    /// The error that failed the scan.
    pub error: Option<Arc<ScanError>>,
    /// Per-entry problems that were skipped over.
    pub warnings: Vec<ScanWarning>,
    pub scan_duration: Duration,
    pub validate_duration: Duration,
}

/// Notifications about the scan itself (tree changes arrive as
/// [`TreeEvent`](dirtally_core::TreeEvent)s).
#[derive(Debug, Clone)]
pub enum ScanEvent {
    StateChanged(ScanState),
    Progress(ScanProgress),
    Completed(ScanOutcome),
}

type CompletionCallback = Box<dyn FnOnce(&ScanOutcome) + Send + 'static>;

enum Job {
    Full,
    Refresh(Vec<NodeId>),
}

struct Shared {
    config: ScanConfig,
    filter: SkipFilter,
    platform: Platform,
    tree: Arc<FileTree>,
    dispatcher: Arc<dyn Dispatcher>,
    control: ScanControl,
    state: Mutex<ScanState>,
    progress: ProgressTracker,
    events: broadcast::Sender<ScanEvent>,
    warnings: Mutex<Vec<ScanWarning>>,
    last_outcome: Mutex<Option<ScanOutcome>>,
    validate_duration: Mutex<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn state(&self) -> ScanState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ScanState) {
        *lock(&self.state) = state;
        debug!(%state, "scan state changed");
        let _ = self.events.send(ScanEvent::StateChanged(state));
    }

    fn context(
        &self,
        recycle_bin: Option<PathBuf>,
        root_device: Option<u64>,
    ) -> TraversalContext<'_> {
        TraversalContext {
            tree: &self.tree,
            filter: &self.filter,
            control: &self.control,
            progress: &self.progress,
            warnings: &self.warnings,
            recycle_bin,
            root_device,
        }
    }

    /// Filesystem a traversal of `node` must stay on, from the device of the
    /// scan root above it. `None` when boundaries may be crossed.
    fn boundary_device(&self, node: NodeId) -> Option<u64> {
        if self.config.cross_filesystems {
            return None;
        }
        let scan_root = std::iter::once(node)
            .chain(self.tree.ancestors(node))
            .find_map(|id| self.tree.root_path(id))?;
        self.platform
            .enumerator
            .stat(&scan_root)
            .ok()
            .and_then(|entry| entry.device)
    }
}

/// Drives traversal of the configured roots into a shared [`FileTree`].
pub struct Scanner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    /// Create a scanner against the local filesystem, running callbacks inline.
    pub fn native(config: ScanConfig) -> Result<Self, ScanError> {
        let platform = Platform::native(&config);
        Self::new(config, platform, Arc::new(InlineDispatcher))
    }

    /// Create a scanner with explicit OS capabilities and coordinator.
    pub fn new(
        config: ScanConfig,
        platform: Platform,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ScanError> {
        if config.roots.is_empty() {
            return Err(ScanError::InvalidConfig {
                message: "At least one root path is required".to_string(),
            });
        }
        let filter = SkipFilter::from_config(&config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                filter,
                platform,
                tree: Arc::new(FileTree::new()),
                dispatcher,
                control: ScanControl::new(),
                state: Mutex::new(ScanState::NotStarted),
                progress: ProgressTracker::new(),
                events,
                warnings: Mutex::new(Vec::new()),
                last_outcome: Mutex::new(None),
                validate_duration: Mutex::new(Duration::ZERO),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.shared.config
    }

    /// The shared tree. Its root exists once the first root container is created.
    pub fn tree(&self) -> Arc<FileTree> {
        Arc::clone(&self.shared.tree)
    }

    pub fn state(&self) -> ScanState {
        self.shared.state()
    }

    /// Current progress; `fraction` is `None` unless every root is a whole volume.
    pub fn progress(&self) -> ScanProgress {
        self.shared.progress.snapshot()
    }

    /// Subscribe to state, progress and completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    /// Warnings collected by the current or last scan.
    pub fn warnings(&self) -> Vec<ScanWarning> {
        lock(&self.shared.warnings).clone()
    }

    /// Duration of the last completed scan.
    pub fn scan_duration(&self) -> Duration {
        lock(&self.shared.last_outcome)
            .as_ref()
            .map_or(Duration::ZERO, |o| o.scan_duration)
    }

    /// Duration of the most recent validation pass.
    pub fn validate_duration(&self) -> Duration {
        *lock(&self.shared.validate_duration)
    }

    /// Scan every configured root and wait for the result.
    pub fn scan(&self) -> Result<ScanOutcome, ScanError> {
        self.scan_async(|_| {})?;
        self.wait().ok_or_else(|| ScanError::Other {
            message: "scan worker ended without an outcome".to_string(),
        })
    }

    /// Start scanning every configured root in the background.
    ///
    /// `on_complete` runs through the dispatcher exactly once, with the
    /// terminal state.
    pub fn scan_async(
        &self,
        on_complete: impl FnOnce(&ScanOutcome) + Send + 'static,
    ) -> Result<(), ScanError> {
        self.start(Job::Full, ScanState::Scanning, Box::new(on_complete))
    }

    /// Rescan the selected items in the background.
    ///
    /// Items below another selected item are covered by it. Selecting the
    /// absolute root rescans everything.
    pub fn refresh(
        &self,
        items: &[NodeId],
        on_complete: impl FnOnce(&ScanOutcome) + Send + 'static,
    ) -> Result<(), ScanError> {
        let tree = &self.shared.tree;
        match tree.root() {
            Some(root) if !items.contains(&root) => self.start(
                Job::Refresh(items.to_vec()),
                ScanState::Refreshing,
                Box::new(on_complete),
            ),
            _ => {
                debug!("absolute root selected, rescanning everything");
                self.start(Job::Full, ScanState::Scanning, Box::new(on_complete))
            }
        }
    }

    /// Request cancellation; with `wait`, block until traversal stopped.
    pub fn cancel(&self, wait: bool) {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                ScanState::Scanning | ScanState::Refreshing => {
                    *state = ScanState::Cancelling;
                    let _ = self
                        .shared
                        .events
                        .send(ScanEvent::StateChanged(ScanState::Cancelling));
                }
                ScanState::Cancelling => {}
                _ => return,
            }
        }
        info!("scan cancel requested");
        self.shared.control.cancel();
        if wait {
            self.wait();
        }
    }

    /// Park traversal at its next checkpoint.
    pub fn suspend(&self) {
        if self.state().is_active() {
            debug!("scan suspended");
            self.shared.control.suspend();
        }
    }

    pub fn resume(&self) {
        debug!("scan resumed");
        self.shared.control.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.control.is_suspended()
    }

    /// Block until the running scan (if any) ends; returns the last outcome.
    pub fn wait(&self) -> Option<ScanOutcome> {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("scan worker panicked");
                self.shared.set_state(ScanState::Failed);
            }
        }
        lock(&self.shared.last_outcome).clone()
    }

    /// Stop any scan and drop the tree.
    pub fn close(&self) {
        self.cancel(true);
        self.shared.tree.reset();
        self.shared.set_state(ScanState::NotStarted);
    }

    fn start(
        &self,
        job: Job,
        state: ScanState,
        on_complete: CompletionCallback,
    ) -> Result<(), ScanError> {
        {
            let mut current = lock(&self.shared.state);
            if current.is_active() {
                return Err(ScanError::AlreadyScanning);
            }
            *current = state;
        }
        // reap the finished worker of the previous attempt
        self.wait();

        let shared = &self.shared;
        shared.control.reset();
        shared.progress.reset(None);
        lock(&shared.warnings).clear();
        let _ = shared.events.send(ScanEvent::StateChanged(state));

        let worker_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("dirtally-scan".to_string())
            .spawn(move || run_worker(&worker_shared, job, on_complete))
            .map_err(|e| {
                shared.set_state(ScanState::Failed);
                ScanError::Other {
                    message: format!("failed to spawn scan thread: {e}"),
                }
            })?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.cancel(true);
    }
}

/// Periodically requests basic validation while a scan runs.
struct Ticker {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn start(shared: &Arc<Shared>) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = thread::Builder::new()
            .name("dirtally-validate".to_string())
            .spawn({
                let shared = Arc::clone(shared);
                let stop = Arc::clone(&stop);
                move || {
                    let (flag, signal) = &*stop;
                    let interval = shared.config.validate_interval;
                    let mut stopped = lock(flag);
                    loop {
                        // a stop raised while ticking is seen before waiting again
                        stopped = signal
                            .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                            .map(|(guard, _)| guard)
                            .unwrap_or_else(|e| e.into_inner().0);
                        if *stopped {
                            break;
                        }
                        drop(stopped);
                        tick(&shared);
                        stopped = lock(flag);
                    }
                }
            })
            .map_err(|e| warn!("validation timer unavailable: {e}"))
            .ok();
        Self { stop, handle }
    }

    fn stop(mut self) {
        let (flag, signal) = &*self.stop;
        *lock(flag) = true;
        signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn tick(shared: &Arc<Shared>) {
    let task_shared = Arc::clone(shared);
    shared.dispatcher.dispatch(Box::new(move || {
        let report = task_shared.tree.validate_basic();
        *lock(&task_shared.validate_duration) = report.duration;
    }));
    let _ = shared
        .events
        .send(ScanEvent::Progress(shared.progress.snapshot()));
}

fn run_worker(shared: &Arc<Shared>, job: Job, on_complete: CompletionCallback) {
    let started = Instant::now();
    let ticker = Ticker::start(shared);
    let result = match job {
        Job::Full => {
            info!(roots = shared.config.roots.len(), "scan started");
            run_full(shared)
        }
        Job::Refresh(items) => {
            info!(items = items.len(), "refresh started");
            run_refresh(shared, &items)
        }
    };
    let scan_duration = started.elapsed();
    ticker.stop();

    let (state, error) = match result {
        Ok(()) => (ScanState::Finished, None),
        Err(ScanError::Interrupted) => (ScanState::Cancelled, None),
        Err(err) => (ScanState::Failed, Some(Arc::new(err))),
    };

    let validate_duration = if state == ScanState::Failed {
        shared.tree.reset();
        Duration::ZERO
    } else {
        shared.tree.validate_full().duration
    };
    *lock(&shared.validate_duration) = validate_duration;

    match &error {
        Some(err) => error!(error = %err, elapsed = ?scan_duration, "scan failed"),
        None => info!(%state, elapsed = ?scan_duration, nodes = shared.tree.len(), "scan ended"),
    }

    let outcome = ScanOutcome {
        state,
        error,
        warnings: lock(&shared.warnings).clone(),
        scan_duration,
        validate_duration,
    };
    *lock(&shared.last_outcome) = Some(outcome.clone());
    shared.set_state(state);
    let _ = shared.events.send(ScanEvent::Completed(outcome.clone()));
    shared
        .dispatcher
        .dispatch(Box::new(move || on_complete(&outcome)));
}

struct PreparedRoot {
    path: PathBuf,
    entry: DirEntryRecord,
    volume: Option<VolumeInfo>,
    whole_volume: bool,
}

fn prepare_root(shared: &Shared, root: &Path) -> Result<PreparedRoot, ScanError> {
    let path = normalize(&std::path::absolute(root).map_err(|e| ScanError::io(root, e))?);
    let entry = shared.platform.enumerator.stat(&path)?;
    if !entry.is_directory {
        return Err(ScanError::NotADirectory { path });
    }
    let volume = shared.platform.space.volume_of(&path);
    let whole_volume = volume
        .as_ref()
        .is_some_and(|v| paths_equal(&v.mount_point, &path));
    Ok(PreparedRoot {
        path,
        entry,
        volume,
        whole_volume,
    })
}

fn computer_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "Computer".to_string())
}

fn run_full(shared: &Shared) -> Result<(), ScanError> {
    let tree = &shared.tree;
    tree.reset();

    let roots = shared
        .config
        .roots
        .iter()
        .map(|root| prepare_root(shared, root))
        .collect::<Result<Vec<_>, _>>()?;

    let expected_bytes = roots.iter().all(|r| r.whole_volume).then(|| {
        roots
            .iter()
            .filter_map(|r| r.volume.as_ref())
            .map(|v| v.space.used_bytes())
            .sum()
    });
    shared.progress.reset(expected_bytes);

    let computer = (roots.len() > 1).then(|| {
        let computer = tree.create_computer(computer_name());
        tree.set_root(computer);
        computer
    });

    let mut nodes = Vec::with_capacity(roots.len());
    for root in &roots {
        let id = tree.create_root(
            &root.path,
            root.whole_volume,
            root.entry.attributes,
            root.entry.modified,
        );
        match computer {
            Some(computer) => tree.add_item(computer, id),
            None => tree.set_root(id),
        }
        if root.whole_volume {
            tree.add_volume_space_nodes(
                id,
                shared.config.show_free_space,
                shared.config.show_unknown,
            );
            if let Some(volume) = &root.volume {
                tree.set_volume_space(id, volume.space);
            }
        }
        nodes.push(id);
    }

    for (root, id) in roots.iter().zip(nodes) {
        let root_device = root.entry.device.filter(|_| !shared.config.cross_filesystems);
        traverse(shared, id, &root.path, root.whole_volume, root_device)?;
    }
    Ok(())
}

/// Populate a container from the bulk index when allowed, else by enumeration.
fn traverse(
    shared: &Shared,
    node: NodeId,
    path: &Path,
    whole_volume: bool,
    root_device: Option<u64>,
) -> Result<(), ScanError> {
    let recycle_bin = shared
        .platform
        .space
        .volume_of(path)
        .and_then(|v| shared.filter.recycle_bin_for(&v.mount_point));
    let ctx = shared.context(recycle_bin, root_device);

    let bulk_allowed =
        shared.config.use_bulk_index && (whole_volume || shared.config.bulk_for_subtrees);
    if let Some(reader) = shared.platform.index.as_ref().filter(|_| bulk_allowed) {
        debug!(root = %path.display(), reader = reader.name(), "reading bulk index");
        match scan_bulk(&ctx, reader.as_ref(), node, path) {
            Ok(summary) => {
                debug!(
                    root = %path.display(),
                    attached = summary.attached,
                    skipped = summary.skipped,
                    orphans = summary.orphans,
                    "bulk index applied"
                );
                return Ok(());
            }
            Err(ScanError::Interrupted) => return Err(ScanError::Interrupted),
            Err(err) => ctx.warn(ScanWarning::new(
                path,
                format!("bulk index unavailable, enumerating instead: {err}"),
                WarningKind::BulkFallback,
            )),
        }
    }

    debug!(root = %path.display(), "enumerating directories");
    scan_enumerate(&ctx, shared.platform.enumerator.as_ref(), node, path.to_path_buf())
}

/// The container a selected item is refreshed through.
fn refresh_target(tree: &FileTree, id: NodeId) -> Option<NodeId> {
    match tree.kind(id)? {
        ItemKind::FileCollection | ItemKind::FreeSpace | ItemKind::Unknown => tree.parent(id),
        _ => Some(id),
    }
}

fn run_refresh(shared: &Shared, items: &[NodeId]) -> Result<(), ScanError> {
    let tree = &shared.tree;
    let targets: Vec<NodeId> = items
        .iter()
        .filter_map(|&id| refresh_target(tree, id))
        .unique()
        .collect();
    let selected: HashSet<NodeId> = targets.iter().copied().collect();

    let groups = targets
        .into_iter()
        .filter(|id| !tree.ancestors(*id).iter().any(|a| selected.contains(a)))
        .into_group_map_by(|id| tree.parent(*id));

    for (parent, group) in groups {
        debug!(parent = ?parent, items = group.len(), "refreshing items");
        for id in group {
            refresh_item(shared, id)?;
        }
        // siblings share a parent, bring it up to date once per group
        if let Some(parent) = parent.filter(|p| tree.contains(*p)) {
            tree.validate(parent, false);
        }
    }
    Ok(())
}

fn refresh_item(shared: &Shared, id: NodeId) -> Result<(), ScanError> {
    let tree = &shared.tree;
    let (Some(path), Some(kind)) = (tree.path_of(id), tree.kind(id)) else {
        return Ok(());
    };
    let is_scan_root = tree.root_path(id).is_some();

    let entry = match shared.platform.enumerator.stat(&path) {
        Ok(entry) => entry,
        Err(err) if is_scan_root => return Err(err),
        Err(err) if err.is_not_found() => {
            debug!(path = %path.display(), "item vanished, removing");
            tree.remove_item(id);
            return Ok(());
        }
        Err(err) => {
            shared
                .context(None, None)
                .warn(ScanWarning::from_error(&path, &err));
            return Ok(());
        }
    };

    match (kind, entry.is_directory) {
        (ItemKind::File, false) => {
            tree.update_file(id, entry.size, entry.modified);
            Ok(())
        }
        (ItemKind::File, true) | (_, false) if !is_scan_root => replace_item(shared, id, &path, entry),
        (_, false) => Err(ScanError::NotADirectory { path }),
        (_, true) => {
            tree.clear_children(id);
            let root_device = shared.boundary_device(id);
            if !is_scan_root && crosses_boundary(root_device, entry.device) {
                debug!(path = %path.display(), "not crossing into another filesystem");
                tree.mark_scanned(id);
                return Ok(());
            }
            let whole_volume = tree.is_whole_volume(id);
            if whole_volume {
                if let Some(volume) = shared.platform.space.volume_of(&path) {
                    tree.set_volume_space(id, volume.space);
                }
            }
            traverse(shared, id, &path, whole_volume, root_device)
        }
    }
}

/// Swap an item whose type changed on disk for a fresh one.
fn replace_item(
    shared: &Shared,
    id: NodeId,
    path: &Path,
    entry: DirEntryRecord,
) -> Result<(), ScanError> {
    let tree = &shared.tree;
    let Some(mut owner) = tree.parent(id) else {
        return Ok(());
    };
    if tree.kind(owner) == Some(ItemKind::FileCollection) {
        owner = tree.parent(owner).unwrap_or(owner);
    }
    tree.remove_item(id);

    if entry.is_directory {
        let replacement = tree.create_directory(entry.item_info());
        tree.add_item(owner, replacement);
        let root_device = shared.boundary_device(replacement);
        if crosses_boundary(root_device, entry.device) {
            tree.mark_scanned(replacement);
            return Ok(());
        }
        traverse(shared, replacement, path, false, root_device)
    } else {
        let replacement = tree.create_file(entry.item_info());
        tree.add_item(owner, replacement);
        Ok(())
    }
}
