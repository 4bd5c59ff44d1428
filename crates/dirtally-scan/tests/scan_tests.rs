use dirtally_scan::{
    Attributes, ChannelDispatcher, DirEntries, DirEntryRecord, DirectoryEnumerator, FileTree,
    IndexItem, IndexRecord, InlineDispatcher, ItemKind, JwalkIndexReader, MetadataIndexReader,
    NodeId, Platform, ScanConfig, ScanError, ScanState, Scanner, SpaceQuery, StdEnumerator,
    TreeEvent, VolumeInfo, VolumeSpace, WarningKind,
};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

/// Space query that never finds a volume, so no root is a whole volume.
struct NoVolume;

impl SpaceQuery for NoVolume {
    fn volume_of(&self, _path: &Path) -> Option<VolumeInfo> {
        None
    }
}

/// Space query that reports `mount_point` as a volume of fixed capacity.
struct FixedVolume {
    mount_point: PathBuf,
    space: VolumeSpace,
}

impl SpaceQuery for FixedVolume {
    fn volume_of(&self, path: &Path) -> Option<VolumeInfo> {
        path.starts_with(&self.mount_point).then(|| VolumeInfo {
            mount_point: self.mount_point.clone(),
            space: self.space,
            file_system: "testfs".to_string(),
        })
    }
}

static STD: StdEnumerator = StdEnumerator;

/// Enumerator that puts `mount` and everything below it on device 2 and the
/// rest on device 1.
struct MountedEnumerator {
    mount: PathBuf,
}

impl MountedEnumerator {
    fn device_for(&self, path: &Path) -> Option<u64> {
        Some(if path.starts_with(&self.mount) { 2 } else { 1 })
    }
}

impl DirectoryEnumerator for MountedEnumerator {
    fn read_dir<'a>(&'a self, path: &Path) -> Result<DirEntries<'a>, ScanError> {
        let dir = path.to_path_buf();
        let entries = STD.read_dir(path)?;
        Ok(Box::new(entries.map(move |entry| {
            entry.map(|mut entry| {
                entry.device = self.device_for(&dir.join(entry.name.as_str()));
                entry
            })
        })))
    }

    fn stat(&self, path: &Path) -> Result<DirEntryRecord, ScanError> {
        let mut entry = STD.stat(path)?;
        entry.device = self.device_for(path);
        Ok(entry)
    }
}

/// Enumerator that sleeps before each directory listing.
struct SlowEnumerator {
    delay: Duration,
}

impl DirectoryEnumerator for SlowEnumerator {
    fn read_dir<'a>(&'a self, path: &Path) -> Result<DirEntries<'a>, ScanError> {
        thread::sleep(self.delay);
        STD.read_dir(path)
    }

    fn stat(&self, path: &Path) -> Result<DirEntryRecord, ScanError> {
        STD.stat(path)
    }
}

/// Reader that hands out a fixed record list, optionally failing afterwards.
struct FakeReader {
    records: Vec<IndexRecord>,
    fail: bool,
}

impl MetadataIndexReader for FakeReader {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn read_index(
        &self,
        root: &Path,
        sink: &mut dyn FnMut(IndexItem) -> ControlFlow<()>,
    ) -> Result<(), ScanError> {
        for record in &self.records {
            if sink(IndexItem::Record(record.clone())).is_break() {
                return Err(ScanError::Interrupted);
            }
        }
        if self.fail {
            return Err(ScanError::bulk_unavailable(root, "volume is not NTFS"));
        }
        Ok(())
    }
}

/// Reader that counts how often the index is read.
struct CountingReader {
    inner: JwalkIndexReader,
    reads: Arc<AtomicUsize>,
}

impl MetadataIndexReader for CountingReader {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn read_index(
        &self,
        root: &Path,
        sink: &mut dyn FnMut(IndexItem) -> ControlFlow<()>,
    ) -> Result<(), ScanError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_index(root, sink)
    }
}

fn record(
    root: &Path,
    id: u64,
    parent: u64,
    rel: &str,
    is_directory: bool,
    size: u64,
    attributes: Attributes,
) -> IndexRecord {
    let path = if rel.is_empty() { root.to_path_buf() } else { root.join(rel) };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    IndexRecord {
        record_id: id,
        parent_record_id: parent,
        path,
        name: name.into(),
        attributes,
        is_directory,
        size,
        modified: SystemTime::UNIX_EPOCH,
        device: None,
    }
}

fn on_device(mut record: IndexRecord, device: u64) -> IndexRecord {
    record.device = Some(device);
    record
}

fn create_test_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    fs::create_dir(root.join("docs")).unwrap();
    fs::create_dir(root.join("docs/drafts")).unwrap();
    fs::create_dir(root.join("empty")).unwrap();
    fs::write(root.join("top.bin"), vec![0u8; 7]).unwrap();
    fs::write(root.join("docs/a.txt"), "0123456789").unwrap();
    fs::write(root.join("docs/b.rs"), vec![1u8; 20]).unwrap();
    fs::write(root.join("docs/drafts/c.txt"), "hello").unwrap();

    dir
}

fn config_for(root: &Path) -> ScanConfig {
    let mut config = ScanConfig::new(root);
    config.validate_interval = Duration::from_millis(10);
    config
}

fn platform(config: &ScanConfig) -> Platform {
    Platform::native(config).with_space(Arc::new(NoVolume))
}

fn scanner(config: ScanConfig) -> Scanner {
    let platform = platform(&config);
    Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap()
}

/// Every item as `(path, kind, size, files, subdirs)`, sorted.
fn flatten(tree: &FileTree) -> Vec<(PathBuf, String, u64, u64, u64)> {
    let mut items: Vec<_> = tree
        .node_ids()
        .into_iter()
        .filter_map(|id| {
            let totals = tree.aggregates(id)?;
            Some((
                tree.path_of(id)?,
                tree.kind(id)?.to_string(),
                totals.size,
                totals.file_count,
                totals.subdir_count,
            ))
        })
        .collect();
    items.sort();
    items
}

fn find(tree: &FileTree, path: &Path) -> NodeId {
    tree.find_by_path(path)
        .unwrap_or_else(|| panic!("{} not in tree", path.display()))
}

#[test]
fn test_enumeration_totals() {
    let dir = create_test_tree();
    let mut config = config_for(dir.path());
    config.use_bulk_index = false;

    let scanner = scanner(config);
    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);
    assert!(outcome.error.is_none());

    let tree = scanner.tree();
    let root = tree.root().unwrap();
    let totals = tree.aggregates(root).unwrap();
    assert_eq!(totals.size, 42);
    assert_eq!(totals.file_count, 4);
    assert_eq!(totals.subdir_count, 3);
    assert!(tree.status(root).unwrap().done);
    assert!(tree.folding_violations().is_empty());

    let progress = scanner.progress();
    assert_eq!(progress.files_scanned, 4);
    assert_eq!(progress.bytes_scanned, 42);
    assert!(!progress.is_determinate());
}

#[test]
fn test_bulk_matches_enumeration() {
    let dir = create_test_tree();

    let mut enumerate = config_for(dir.path());
    enumerate.use_bulk_index = false;
    let by_enumeration = scanner(enumerate);
    by_enumeration.scan().unwrap();

    let mut bulk = config_for(dir.path());
    bulk.bulk_for_subtrees = true;
    let by_index = scanner(bulk);
    let outcome = by_index.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);
    assert!(
        outcome
            .warnings
            .iter()
            .all(|w| w.kind != WarningKind::BulkFallback)
    );

    assert_eq!(flatten(&by_enumeration.tree()), flatten(&by_index.tree()));
}

#[test]
fn test_failing_index_falls_back() {
    let dir = create_test_tree();
    let root = dir.path();
    let mut config = config_for(root);
    config.bulk_for_subtrees = true;

    let reader = FakeReader {
        records: vec![
            record(root, 0, 0, "", true, 0, Attributes::empty()),
            record(root, 1, 0, "phantom.bin", false, 1000, Attributes::empty()),
        ],
        fail: true,
    };
    let platform = platform(&config).with_index(Some(Arc::new(reader)));
    let scanner = Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap();

    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);
    assert!(
        outcome
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::BulkFallback)
    );

    let tree = scanner.tree();
    let totals = tree.aggregates(tree.root().unwrap()).unwrap();
    // nothing from the failed index survives
    assert_eq!(totals.size, 42);
    assert!(tree.find_by_path(&root.join("phantom.bin")).is_none());
}

#[test]
fn test_index_orphans_discarded() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let mut config = config_for(root);
    config.bulk_for_subtrees = true;

    let reader = FakeReader {
        records: vec![
            // children before their parents
            record(root, 2, 1, "a/x.dat", false, 10, Attributes::empty()),
            record(root, 0, 0, "", true, 0, Attributes::empty()),
            record(root, 1, 0, "a", true, 0, Attributes::empty()),
            record(root, 3, 99, "lost.dat", false, 50, Attributes::empty()),
            record(root, 4, 0, "link", true, 0, Attributes::REPARSE_POINT),
            record(root, 5, 4, "link/y.dat", false, 30, Attributes::empty()),
            record(root, 6, 0, "$junk", true, 0, Attributes::empty()),
            record(root, 7, 6, "$junk/z.dat", false, 40, Attributes::empty()),
        ],
        fail: false,
    };
    let platform = platform(&config).with_index(Some(Arc::new(reader)));
    let scanner = Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap();

    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);

    let tree = scanner.tree();
    let totals = tree.aggregates(tree.root().unwrap()).unwrap();
    assert_eq!(totals.size, 10);
    assert_eq!(totals.file_count, 1);
    // "a" and the reparse point, which is kept but not entered
    assert_eq!(totals.subdir_count, 2);
    assert!(tree.find_by_path(&root.join("lost.dat")).is_none());
    assert!(tree.find_by_path(&root.join("link/y.dat")).is_none());
    assert!(tree.find_by_path(&root.join("$junk")).is_none());
    // root, a, x.dat, link
    assert_eq!(tree.len(), 4);
    assert!(tree.status(find(&tree, &root.join("link"))).unwrap().done);
}

#[test]
fn test_skip_filter_applies_to_both_strategies() {
    let dir = create_test_tree();
    let root = dir.path();
    fs::write(root.join("desktop.ini"), "x").unwrap();
    fs::write(root.join("docs/Desktop.INI"), "x").unwrap();
    fs::create_dir(root.join("$Extend")).unwrap();
    fs::write(root.join("$Extend/meta"), vec![0u8; 100]).unwrap();

    for use_bulk_index in [false, true] {
        let mut config = config_for(root);
        config.use_bulk_index = use_bulk_index;
        config.bulk_for_subtrees = true;
        let scanner = scanner(config);
        scanner.scan().unwrap();

        let tree = scanner.tree();
        let totals = tree.aggregates(tree.root().unwrap()).unwrap();
        assert_eq!(totals.size, 42, "bulk = {use_bulk_index}");
        assert!(tree.find_by_path(&root.join("desktop.ini")).is_none());
        assert!(tree.find_by_path(&root.join("$Extend")).is_none());
    }
}

#[test]
fn test_missing_root_fails() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir.path().join("does-not-exist"));
    let scanner = scanner(config);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    scanner
        .scan_async(move |outcome| {
            assert_eq!(outcome.state, ScanState::Failed);
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let outcome = scanner.wait().unwrap();

    assert_eq!(outcome.state, ScanState::Failed);
    assert!(matches!(
        outcome.error.as_deref(),
        Some(ScanError::NotFound { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(scanner.tree().is_empty());
}

#[test]
fn test_file_root_is_not_a_directory() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("plain.txt");
    fs::write(&file, "x").unwrap();

    let scanner = scanner(config_for(&file));
    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Failed);
    assert!(matches!(
        outcome.error.as_deref(),
        Some(ScanError::NotADirectory { .. })
    ));
}

fn create_wide_tree(dirs: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..dirs {
        let sub = dir.path().join(format!("d{i:03}"));
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("one.txt"), "1").unwrap();
        fs::write(sub.join("two.txt"), "22").unwrap();
    }
    dir
}

fn slow_scanner(root: &Path) -> Scanner {
    let mut config = config_for(root);
    config.use_bulk_index = false;
    let platform = platform(&config).with_enumerator(Arc::new(SlowEnumerator {
        delay: Duration::from_millis(20),
    }));
    Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap()
}

#[test]
fn test_cancel_keeps_consistent_tree() {
    let dir = create_wide_tree(60);
    let scanner = slow_scanner(dir.path());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    scanner
        .scan_async(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    thread::sleep(Duration::from_millis(60));
    scanner.suspend();
    assert!(scanner.is_suspended());
    thread::sleep(Duration::from_millis(30));
    scanner.resume();
    scanner.cancel(true);

    let outcome = scanner.wait().unwrap();
    assert_eq!(outcome.state, ScanState::Cancelled);
    assert_eq!(scanner.state(), ScanState::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let tree = scanner.tree();
    assert!(tree.folding_violations().is_empty());
    let root = tree.root().unwrap();
    let totals = tree.aggregates(root).unwrap();
    assert!(totals.file_count < 120);
    assert!(!tree.status(root).unwrap().done);
}

#[test]
fn test_second_scan_rejected_while_active() {
    let dir = create_wide_tree(20);
    let scanner = slow_scanner(dir.path());

    scanner.scan_async(|_| {}).unwrap();
    assert!(matches!(
        scanner.scan_async(|_| {}),
        Err(ScanError::AlreadyScanning)
    ));
    scanner.cancel(true);
    assert!(scanner.state().is_terminal());

    // a finished scanner accepts a new scan
    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);
    let tree = scanner.tree();
    assert_eq!(tree.aggregates(tree.root().unwrap()).unwrap().file_count, 40);
}

#[test]
fn test_multiple_roots_under_computer() {
    let first = create_test_tree();
    let second = create_wide_tree(2);
    let mut config = ScanConfig::with_roots(vec![
        first.path().to_path_buf(),
        second.path().to_path_buf(),
    ]);
    config.use_bulk_index = false;

    let scanner = scanner(config);
    assert_eq!(scanner.scan().unwrap().state, ScanState::Finished);

    let tree = scanner.tree();
    let root = tree.root().unwrap();
    assert_eq!(tree.kind(root), Some(ItemKind::Computer));
    assert_eq!(tree.scan_roots().len(), 2);
    let totals = tree.aggregates(root).unwrap();
    assert_eq!(totals.size, 42 + 6);
    assert_eq!(totals.file_count, 4 + 4);
    assert!(tree.status(root).unwrap().done);
}

#[test]
fn test_refresh_picks_up_changes() {
    let dir = create_test_tree();
    let root_path = dir.path();
    let mut config = config_for(root_path);
    config.use_bulk_index = false;
    let scanner = scanner(config);
    scanner.scan().unwrap();

    let tree = scanner.tree();
    let docs = find(&tree, &root_path.join("docs"));
    let a = find(&tree, &root_path.join("docs/a.txt"));
    let top = find(&tree, &root_path.join("top.bin"));

    fs::write(root_path.join("docs/new.txt"), vec![0u8; 100]).unwrap();
    fs::remove_file(root_path.join("docs/b.rs")).unwrap();
    fs::write(root_path.join("top.bin"), vec![0u8; 17]).unwrap();

    // a.txt lies below docs and is covered by it
    scanner.refresh(&[docs, a, top], |_| {}).unwrap();
    let outcome = scanner.wait().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);

    let root = tree.root().unwrap();
    let totals = tree.aggregates(root).unwrap();
    // 17 + 10 + 100 + 5
    assert_eq!(totals.size, 132);
    assert_eq!(totals.file_count, 4);
    assert!(tree.find_by_path(&root_path.join("docs/b.rs")).is_none());
    assert!(tree.find_by_path(&root_path.join("docs/new.txt")).is_some());
    assert_eq!(tree.aggregates(top).unwrap().size, 17);
    assert!(tree.status(root).unwrap().done);
    assert!(tree.folding_violations().is_empty());
}

#[test]
fn test_refresh_removes_vanished_item() {
    let dir = create_test_tree();
    let root_path = dir.path();
    let mut config = config_for(root_path);
    config.use_bulk_index = false;
    let scanner = scanner(config);
    scanner.scan().unwrap();

    let tree = scanner.tree();
    let drafts = find(&tree, &root_path.join("docs/drafts"));
    fs::remove_dir_all(root_path.join("docs/drafts")).unwrap();

    scanner.refresh(&[drafts], |_| {}).unwrap();
    assert_eq!(scanner.wait().unwrap().state, ScanState::Finished);
    assert!(!tree.contains(drafts));
    let totals = tree.aggregates(tree.root().unwrap()).unwrap();
    assert_eq!(totals.size, 37);
    assert_eq!(totals.subdir_count, 2);
}

#[test]
fn test_refresh_of_root_rescans() {
    let dir = create_test_tree();
    let mut config = config_for(dir.path());
    config.use_bulk_index = false;
    let scanner = scanner(config);
    scanner.scan().unwrap();

    fs::write(dir.path().join("extra.bin"), vec![0u8; 8]).unwrap();
    let root = scanner.tree().root().unwrap();
    scanner.refresh(&[root], |_| {}).unwrap();
    assert_eq!(scanner.wait().unwrap().state, ScanState::Finished);

    let tree = scanner.tree();
    let totals = tree.aggregates(tree.root().unwrap()).unwrap();
    assert_eq!(totals.size, 50);
}

#[test]
fn test_completion_goes_through_dispatcher() {
    let dir = create_test_tree();
    let mut config = config_for(dir.path());
    config.use_bulk_index = false;
    config.validate_interval = Duration::from_secs(60);
    let (dispatcher, mut tasks) = ChannelDispatcher::new();
    let platform = platform(&config);
    let scanner = Scanner::new(config, platform, Arc::new(dispatcher)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    scanner
        .scan_async(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    scanner.wait();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    while let Ok(task) = tasks.try_recv() {
        task();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_long_validate_interval_does_not_delay_completion() {
    let dir = create_test_tree();
    let mut config = config_for(dir.path());
    config.use_bulk_index = false;
    config.validate_interval = Duration::from_secs(60);
    let scanner = scanner(config);

    let started = Instant::now();
    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(outcome.scan_duration < Duration::from_secs(5));
}

fn mounted_scanner(config: ScanConfig, mount: PathBuf) -> Scanner {
    let platform = platform(&config).with_enumerator(Arc::new(MountedEnumerator { mount }));
    Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap()
}

#[test]
fn test_enumeration_stops_at_filesystem_boundary() {
    let dir = create_test_tree();
    let root = dir.path();
    let mut config = config_for(root);
    config.use_bulk_index = false;

    let scanner = mounted_scanner(config.clone(), root.join("docs"));
    assert_eq!(scanner.scan().unwrap().state, ScanState::Finished);
    let tree = scanner.tree();
    let totals = tree.aggregates(tree.root().unwrap()).unwrap();
    // top.bin only; docs is listed but not entered
    assert_eq!(totals.size, 7);
    assert_eq!(totals.file_count, 1);
    assert_eq!(totals.subdir_count, 2);
    let docs = find(&tree, &root.join("docs"));
    assert!(tree.children(docs).is_empty());
    assert!(tree.status(docs).unwrap().done);
    assert!(tree.find_by_path(&root.join("docs/a.txt")).is_none());

    config.cross_filesystems = true;
    let crossing = mounted_scanner(config, root.join("docs"));
    crossing.scan().unwrap();
    let tree = crossing.tree();
    assert_eq!(tree.aggregates(tree.root().unwrap()).unwrap().size, 42);
}

#[test]
fn test_bulk_stops_at_filesystem_boundary() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let records = vec![
        on_device(record(root, 0, 0, "", true, 0, Attributes::empty()), 1),
        on_device(record(root, 1, 0, "a.bin", false, 10, Attributes::empty()), 1),
        on_device(record(root, 2, 0, "mnt", true, 0, Attributes::empty()), 2),
        on_device(record(root, 3, 2, "mnt/big.bin", false, 100, Attributes::empty()), 2),
    ];

    for cross_filesystems in [false, true] {
        let mut config = config_for(root);
        config.bulk_for_subtrees = true;
        config.cross_filesystems = cross_filesystems;
        let reader = FakeReader {
            records: records.clone(),
            fail: false,
        };
        let platform = platform(&config)
            .with_index(Some(Arc::new(reader)))
            .with_enumerator(Arc::new(MountedEnumerator {
                mount: root.join("mnt"),
            }));
        let scanner = Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap();
        assert_eq!(scanner.scan().unwrap().state, ScanState::Finished);

        let tree = scanner.tree();
        let totals = tree.aggregates(tree.root().unwrap()).unwrap();
        let mnt = find(&tree, &root.join("mnt"));
        assert_eq!(totals.subdir_count, 1);
        assert!(tree.status(mnt).unwrap().done);
        if cross_filesystems {
            assert_eq!(totals.size, 110);
            assert!(tree.find_by_path(&root.join("mnt/big.bin")).is_some());
        } else {
            assert_eq!(totals.size, 10);
            assert!(tree.find_by_path(&root.join("mnt/big.bin")).is_none());
        }
    }
}

fn volume_platform(config: &ScanConfig, mount_point: &Path, reads: &Arc<AtomicUsize>) -> Platform {
    Platform::native(config)
        .with_space(Arc::new(FixedVolume {
            mount_point: mount_point.to_path_buf(),
            space: VolumeSpace {
                total_bytes: 10_000,
                free_bytes: 4_000,
            },
        }))
        .with_index(Some(Arc::new(CountingReader {
            inner: JwalkIndexReader::new(1),
            reads: Arc::clone(reads),
        })))
}

/// Size of the single child of `parent` with the given kind.
fn space_node_size(tree: &FileTree, parent: NodeId, kind: ItemKind) -> u64 {
    let nodes: Vec<_> = tree
        .children(parent)
        .into_iter()
        .filter(|id| tree.kind(*id) == Some(kind))
        .collect();
    assert_eq!(nodes.len(), 1, "expected one {kind} node");
    tree.aggregates(nodes[0]).unwrap().size
}

#[test]
fn test_whole_volume_root() {
    let dir = create_test_tree();
    let root_path = dir.path();
    let config = config_for(root_path);
    assert!(!config.bulk_for_subtrees);
    let reads = Arc::new(AtomicUsize::new(0));
    let platform = volume_platform(&config, root_path, &reads);
    let scanner = Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap();

    let outcome = scanner.scan().unwrap();
    assert_eq!(outcome.state, ScanState::Finished);
    // a whole volume takes the index without opting in for subtrees
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(
        outcome
            .warnings
            .iter()
            .all(|w| w.kind != WarningKind::BulkFallback)
    );

    let tree = scanner.tree();
    let root = tree.root().unwrap();
    assert_eq!(tree.kind(root), Some(ItemKind::Volume));
    assert_eq!(space_node_size(&tree, root, ItemKind::FreeSpace), 4_000);
    // 6000 used, 42 observed
    assert_eq!(space_node_size(&tree, root, ItemKind::Unknown), 5_958);
    let totals = tree.aggregates(root).unwrap();
    assert_eq!(totals.size, 10_000);
    assert_eq!(totals.file_count, 4);

    let progress = scanner.progress();
    assert!(progress.is_determinate());
    assert!(progress.fraction.is_some_and(|f| f > 0.0 && f <= 1.0));

    fs::write(root_path.join("extra.bin"), vec![0u8; 8]).unwrap();
    scanner.refresh(&[root], |_| {}).unwrap();
    assert_eq!(scanner.wait().unwrap().state, ScanState::Finished);
    let root = tree.root().unwrap();
    assert_eq!(space_node_size(&tree, root, ItemKind::FreeSpace), 4_000);
    assert_eq!(space_node_size(&tree, root, ItemKind::Unknown), 5_950);
    assert_eq!(tree.aggregates(root).unwrap().size, 10_000);
}

#[test]
fn test_refresh_of_volume_root_keeps_space_nodes() {
    let volume = create_test_tree();
    let other = create_wide_tree(1);
    let config = ScanConfig::with_roots(vec![
        volume.path().to_path_buf(),
        other.path().to_path_buf(),
    ]);
    let reads = Arc::new(AtomicUsize::new(0));
    let platform = volume_platform(&config, volume.path(), &reads);
    let scanner = Scanner::new(config, platform, Arc::new(InlineDispatcher)).unwrap();
    assert_eq!(scanner.scan().unwrap().state, ScanState::Finished);

    let tree = scanner.tree();
    let root = find(&tree, volume.path());
    assert_eq!(tree.kind(root), Some(ItemKind::Volume));
    // one root is not a volume, so no overall fraction
    assert!(!scanner.progress().is_determinate());

    fs::remove_file(volume.path().join("top.bin")).unwrap();
    scanner.refresh(&[root], |_| {}).unwrap();
    assert_eq!(scanner.wait().unwrap().state, ScanState::Finished);

    assert!(tree.contains(root));
    assert_eq!(space_node_size(&tree, root, ItemKind::FreeSpace), 4_000);
    // 6000 used, 35 observed
    assert_eq!(space_node_size(&tree, root, ItemKind::Unknown), 5_965);
    assert_eq!(tree.aggregates(root).unwrap().size, 10_000);
    assert!(tree.folding_violations().is_empty());
}

#[test]
fn test_refresh_validates_each_parent_once_per_group() {
    let dir = create_test_tree();
    let root_path = dir.path();
    let mut config = config_for(root_path);
    config.use_bulk_index = false;
    config.validate_interval = Duration::from_secs(60);
    let scanner = scanner(config);
    scanner.scan().unwrap();

    let tree = scanner.tree();
    let root = tree.root().unwrap();
    let top = find(&tree, &root_path.join("top.bin"));
    let empty = find(&tree, &root_path.join("empty"));
    fs::write(root_path.join("top.bin"), vec![0u8; 17]).unwrap();

    let mut events = tree.subscribe();
    scanner.refresh(&[top, empty], |_| {}).unwrap();
    assert_eq!(scanner.wait().unwrap().state, ScanState::Finished);

    let mut root_validations = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TreeEvent::Validated {
            node,
            aggregates_changed,
        } = event
        {
            if node == root {
                root_validations.push(aggregates_changed);
            }
        }
    }
    // once for the refreshed group, once for the closing full pass
    assert_eq!(root_validations, vec![true, false]);
    assert_eq!(tree.aggregates(root).unwrap().size, 52);
}

#[test]
fn test_invalid_ignore_pattern_rejected() {
    let mut config = ScanConfig::new("/");
    config.ignore_patterns = vec!["[".to_string()];
    let platform = platform(&config);
    assert!(matches!(
        Scanner::new(config, platform, Arc::new(InlineDispatcher)),
        Err(ScanError::InvalidConfig { .. })
    ));
}
