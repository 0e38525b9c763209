use std::fs;
use std::sync::atomic::AtomicBool;

use tempfile::tempdir;

use dupe_tree_core::analysis::{aggregate_folder_sizes, classify_files, classify_folders};
use dupe_tree_core::hasher::{ContentHasher, HashPool};
use dupe_tree_core::scanner::{ParentCache, TreeIngestor};
use dupe_tree_core::storage::models::*;
use dupe_tree_core::storage::{Database, NodeFilter};
use dupe_tree_core::{Error, SilentReporter};

fn folder(db: &Database, scan_id: i64, parent: Option<i64>, path: &str) -> i64 {
    db.insert_node(scan_id, parent, NodeKind::Folder, path, UNKNOWN_SIZE)
        .unwrap()
}

fn file(db: &Database, scan_id: i64, parent: i64, path: &str, size: i64) -> i64 {
    db.insert_node(scan_id, Some(parent), NodeKind::File, path, size)
        .unwrap()
}

fn node(db: &Database, scan_id: i64, path: &str) -> FsObject {
    db.get_node_by_path(scan_id, path).unwrap().unwrap()
}

fn digest_of(content: &[u8]) -> Digest {
    Digest::from(blake3::hash(content))
}

/// Put a file straight into `DuplicateByHash` with the given digest.
fn mark_duplicate(db: &Database, scan_id: i64, id: i64, digest: &Digest) {
    db.set_file_digest(id, digest).unwrap();
    db.bulk_update_state(
        scan_id,
        NodeKind::File,
        NodeState::HashComputed,
        NodeState::DuplicateByHash,
        NodeFilter::Id(id),
    )
    .unwrap();
}

fn mark_unique(db: &Database, scan_id: i64, id: i64) {
    db.bulk_update_state(
        scan_id,
        NodeKind::File,
        NodeState::Pending,
        NodeState::UniqueBySize,
        NodeFilter::Id(id),
    )
    .unwrap();
}

/// Ingest `root` into a fresh scan.
fn ingest(db: &Database, root: &std::path::Path) -> i64 {
    let scan_id = db.insert_scan("t", root.to_str().unwrap()).unwrap();
    let scan = db.get_scan(scan_id).unwrap().unwrap();
    TreeIngestor::new(db, &[], &SilentReporter)
        .ingest(&scan)
        .unwrap();
    scan_id
}

fn pool() -> HashPool {
    HashPool::new(2, ContentHasher::default()).unwrap()
}

fn path_str(path: std::path::PathBuf) -> String {
    path.to_str().unwrap().to_string()
}

// ── File phase ───────────────────────────────────────────────

#[test]
fn test_file_phase_classifies_by_size_then_hash() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.txt"), "hello").unwrap();
    fs::write(root.join("b.txt"), "hello").unwrap();
    fs::write(root.join("c.txt"), "world").unwrap();
    fs::write(root.join("d.txt"), "a much longer, unique sized body").unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);

    let summary = classify_files(
        &db,
        scan_id,
        &pool(),
        2,
        &AtomicBool::new(false),
        &SilentReporter,
    )
    .unwrap();
    assert_eq!(summary.unique_by_size, 1);
    assert_eq!(summary.hashed, 3);
    assert_eq!(summary.duplicate_by_hash, 2);
    assert_eq!(summary.unique_by_hash, 1);
    assert_eq!(summary.hash_failed, 0);

    let a = node(&db, scan_id, &path_str(root.join("a.txt")));
    let b = node(&db, scan_id, &path_str(root.join("b.txt")));
    let c = node(&db, scan_id, &path_str(root.join("c.txt")));
    let d = node(&db, scan_id, &path_str(root.join("d.txt")));

    assert_eq!(a.state, NodeState::DuplicateByHash);
    assert_eq!(b.state, NodeState::DuplicateByHash);
    assert_eq!(a.digest, Some(digest_of(b"hello")));
    assert_eq!(a.digest, b.digest);

    assert_eq!(c.state, NodeState::UniqueByHash);
    assert_eq!(c.digest, Some(digest_of(b"world")));

    // Unique sizes are never read.
    assert_eq!(d.state, NodeState::UniqueBySize);
    assert!(d.digest.is_none());

    assert_eq!(
        db.count_nodes(scan_id, NodeKind::File, NodeState::Pending)
            .unwrap(),
        0
    );
}

#[test]
fn test_file_phase_records_unreadable_files() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("x.bin"), "aaaa").unwrap();
    fs::write(root.join("y.bin"), "bbbb").unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);
    fs::remove_file(root.join("y.bin")).unwrap();

    let summary = classify_files(
        &db,
        scan_id,
        &pool(),
        16,
        &AtomicBool::new(false),
        &SilentReporter,
    )
    .unwrap();
    assert_eq!(summary.hashed, 1);
    assert_eq!(summary.hash_failed, 1);

    let x = node(&db, scan_id, &path_str(root.join("x.bin")));
    let y = node(&db, scan_id, &path_str(root.join("y.bin")));
    assert_eq!(x.state, NodeState::UniqueByHash);
    assert_eq!(y.state, NodeState::HashFailed);
    assert!(y.digest.is_none());
    assert!(y.error.is_some());
}

#[test]
fn test_file_phase_stops_when_cancelled() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.txt"), "same").unwrap();
    fs::write(root.join("b.txt"), "same").unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);

    let result = classify_files(
        &db,
        scan_id,
        &pool(),
        1,
        &AtomicBool::new(true),
        &SilentReporter,
    );
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(
        db.count_nodes(scan_id, NodeKind::File, NodeState::Pending)
            .unwrap(),
        2
    );
}

#[test]
fn test_zero_byte_files_are_duplicates() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("empty1"), "").unwrap();
    fs::write(root.join("empty2"), "").unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);
    classify_files(
        &db,
        scan_id,
        &pool(),
        8,
        &AtomicBool::new(false),
        &SilentReporter,
    )
    .unwrap();

    let empty = node(&db, scan_id, &path_str(root.join("empty1")));
    assert_eq!(empty.state, NodeState::DuplicateByHash);
    assert_eq!(empty.size_in_bytes, 0);
}

// ── Folder sizes ─────────────────────────────────────────────

#[test]
fn test_folder_sizes_sum_descendants() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let a = folder(&db, scan_id, Some(root), "/r/A");
    let deep = folder(&db, scan_id, Some(a), "/r/A/deep");
    folder(&db, scan_id, Some(root), "/r/B");
    file(&db, scan_id, a, "/r/A/f1", 10);
    file(&db, scan_id, deep, "/r/A/deep/f2", 20);
    file(&db, scan_id, root, "/r/f3", 5);

    let summary = aggregate_folder_sizes(&db, scan_id).unwrap();
    assert_eq!(summary.folders_updated, 4);
    assert_eq!(summary.passes, 3);

    assert_eq!(node(&db, scan_id, "/r/A/deep").size_in_bytes, 20);
    assert_eq!(node(&db, scan_id, "/r/A").size_in_bytes, 30);
    assert_eq!(node(&db, scan_id, "/r/B").size_in_bytes, 0);
    assert_eq!(node(&db, scan_id, "/r").size_in_bytes, 35);
    assert_eq!(db.count_unknown_size_folders(scan_id).unwrap(), 0);
}

#[test]
fn test_folder_sizes_rerun_is_a_no_op() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    file(&db, scan_id, root, "/r/f", 7);

    aggregate_folder_sizes(&db, scan_id).unwrap();
    let before = node(&db, scan_id, "/r");

    let summary = aggregate_folder_sizes(&db, scan_id).unwrap();
    assert_eq!(summary.passes, 0);
    assert_eq!(summary.folders_updated, 0);
    let after = node(&db, scan_id, "/r");
    assert_eq!(after.size_in_bytes, 7);
    assert_eq!(after.modified_timestamp, before.modified_timestamp);
}

#[test]
fn test_folder_sizes_resume_after_partial_run() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let a = folder(&db, scan_id, Some(root), "/r/A");
    file(&db, scan_id, a, "/r/A/f", 9);
    file(&db, scan_id, root, "/r/g", 1);

    // A previous run got as far as sizing A.
    db.update_folder_size(a, 9).unwrap();

    let summary = aggregate_folder_sizes(&db, scan_id).unwrap();
    assert_eq!(summary.folders_updated, 1);
    assert_eq!(node(&db, scan_id, "/r").size_in_bytes, 10);
}

// ── Folder classification ────────────────────────────────────

#[test]
fn test_folder_with_all_duplicate_children_is_duplicate() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let a = folder(&db, scan_id, Some(root), "/r/A");
    let x = file(&db, scan_id, a, "/r/A/x", 5);
    let y = file(&db, scan_id, a, "/r/A/y", 5);
    let d1 = digest_of(b"one");
    let d2 = digest_of(b"two");
    mark_duplicate(&db, scan_id, y, &d2);
    mark_duplicate(&db, scan_id, x, &d1);

    let summary = classify_folders(&db, scan_id).unwrap();
    assert_eq!(summary.duplicate_by_subitem, 2);
    assert_eq!(summary.unique_by_subitem, 0);
    assert_eq!(summary.passes, 2);

    let a = node(&db, scan_id, "/r/A");
    assert_eq!(a.state, NodeState::DuplicateBySubitem);
    // Children are combined in path order, not insertion or classification order.
    assert_eq!(a.digest, Some(ContentHasher::combine([&d1, &d2])));

    // /r has a single duplicate child, so it is a duplicate too.
    let r = node(&db, scan_id, "/r");
    assert_eq!(r.state, NodeState::DuplicateBySubitem);
    assert_eq!(r.digest, Some(ContentHasher::combine(a.digest.as_ref())));
}

#[test]
fn test_mixed_and_empty_folders_are_unique() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let mixed = folder(&db, scan_id, Some(root), "/r/mixed");
    folder(&db, scan_id, Some(root), "/r/empty");
    let dup = file(&db, scan_id, mixed, "/r/mixed/dup", 3);
    let unique = file(&db, scan_id, mixed, "/r/mixed/unique", 4);
    mark_duplicate(&db, scan_id, dup, &digest_of(b"abc"));
    mark_unique(&db, scan_id, unique);

    let summary = classify_folders(&db, scan_id).unwrap();
    assert_eq!(summary.duplicate_by_subitem, 0);
    assert_eq!(summary.unique_by_subitem, 3);

    let mixed = node(&db, scan_id, "/r/mixed");
    assert_eq!(mixed.state, NodeState::UniqueBySubitem);
    assert!(mixed.digest.is_none());
    assert_eq!(
        node(&db, scan_id, "/r/empty").state,
        NodeState::UniqueBySubitem
    );
    assert_eq!(node(&db, scan_id, "/r").state, NodeState::UniqueBySubitem);
}

#[test]
fn test_unreadable_child_makes_folder_unique() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let dup = file(&db, scan_id, root, "/r/dup", 3);
    let broken = file(&db, scan_id, root, "/r/broken", 3);
    mark_duplicate(&db, scan_id, dup, &digest_of(b"abc"));
    db.mark_hash_failed(broken, "denied").unwrap();

    classify_folders(&db, scan_id).unwrap();
    assert_eq!(node(&db, scan_id, "/r").state, NodeState::UniqueBySubitem);
}

#[test]
fn test_identical_subtrees_share_a_digest() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let left = folder(&db, scan_id, Some(root), "/r/left");
    let right = folder(&db, scan_id, Some(root), "/r/right");
    let left_inner = folder(&db, scan_id, Some(left), "/r/left/inner");
    let right_inner = folder(&db, scan_id, Some(right), "/r/right/inner");
    let keep = file(&db, scan_id, root, "/r/keep", 8);

    let content = digest_of(b"photo");
    let lf = file(&db, scan_id, left_inner, "/r/left/inner/p.jpg", 5);
    let rf = file(&db, scan_id, right_inner, "/r/right/inner/copy.jpg", 5);
    mark_duplicate(&db, scan_id, lf, &content);
    mark_duplicate(&db, scan_id, rf, &content);
    mark_unique(&db, scan_id, keep);

    classify_folders(&db, scan_id).unwrap();

    let left = node(&db, scan_id, "/r/left");
    let right = node(&db, scan_id, "/r/right");
    assert_eq!(left.state, NodeState::DuplicateBySubitem);
    assert_eq!(right.state, NodeState::DuplicateBySubitem);
    assert_eq!(left.digest, right.digest);
    assert_eq!(
        node(&db, scan_id, "/r/left/inner").digest,
        node(&db, scan_id, "/r/right/inner").digest
    );
    assert_eq!(node(&db, scan_id, "/r").state, NodeState::UniqueBySubitem);

    let groups = db.duplicate_groups(scan_id, NodeKind::Folder, 0, 10).unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.member_count == 2));
}

#[test]
fn test_swapped_contents_give_different_digests() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    let one = folder(&db, scan_id, Some(root), "/r/one");
    let two = folder(&db, scan_id, Some(root), "/r/two");
    let d1 = digest_of(b"first");
    let d2 = digest_of(b"second");

    let f = file(&db, scan_id, one, "/r/one/a", 5);
    mark_duplicate(&db, scan_id, f, &d1);
    let f = file(&db, scan_id, one, "/r/one/b", 6);
    mark_duplicate(&db, scan_id, f, &d2);
    let f = file(&db, scan_id, two, "/r/two/a", 6);
    mark_duplicate(&db, scan_id, f, &d2);
    let f = file(&db, scan_id, two, "/r/two/b", 5);
    mark_duplicate(&db, scan_id, f, &d1);

    classify_folders(&db, scan_id).unwrap();

    let one = node(&db, scan_id, "/r/one");
    let two = node(&db, scan_id, "/r/two");
    assert_eq!(one.state, NodeState::DuplicateBySubitem);
    assert_eq!(two.state, NodeState::DuplicateBySubitem);
    assert_ne!(one.digest, two.digest);
}

#[test]
fn test_pending_child_is_unresolvable() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    file(&db, scan_id, root, "/r/never-classified", 1);

    let result = classify_folders(&db, scan_id);
    assert!(matches!(
        result,
        Err(Error::Unresolvable { remaining: 1, .. })
    ));
    assert_eq!(node(&db, scan_id, "/r").state, NodeState::Pending);
}

// ── Ingestion ────────────────────────────────────────────────

#[test]
fn test_ingest_records_tree_and_counters() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("A/inner")).unwrap();
    fs::create_dir_all(root.join("B")).unwrap();
    fs::write(root.join("A/x.txt"), "12345").unwrap();
    fs::write(root.join("A/inner/y.txt"), "123").unwrap();
    fs::write(root.join("top.txt"), "1").unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);

    let scan = db.get_scan(scan_id).unwrap().unwrap();
    assert_eq!(scan.folder_count, 4);
    assert_eq!(scan.file_count, 3);
    assert_eq!(scan.total_size_in_bytes, 9);

    let root_node = node(&db, scan_id, root.to_str().unwrap());
    assert_eq!(root_node.kind, NodeKind::Folder);
    assert_eq!(root_node.parent_id, None);

    let inner = node(&db, scan_id, &path_str(root.join("A/inner")));
    let y = node(&db, scan_id, &path_str(root.join("A/inner/y.txt")));
    assert_eq!(y.parent_id, Some(inner.id));
    assert_eq!(y.size_in_bytes, 3);
    assert_eq!(inner.size_in_bytes, UNKNOWN_SIZE);
}

#[test]
fn test_ingest_skips_ignored_paths() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
    fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
    fs::write(root.join("keep.txt"), "keep").unwrap();
    fs::write(root.join("skip.tmp"), "tmp").unwrap();

    let patterns = dupe_tree_core::scanner::compile_ignore_patterns(&[
        "**/node_modules".to_string(),
        "*.tmp".to_string(),
        "[invalid".to_string(),
    ]);
    assert_eq!(patterns.len(), 2);

    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("t", root.to_str().unwrap()).unwrap();
    let scan = db.get_scan(scan_id).unwrap().unwrap();
    let counters = TreeIngestor::new(&db, &patterns, &SilentReporter)
        .ingest(&scan)
        .unwrap();

    assert_eq!(counters.folders, 1);
    assert_eq!(counters.files, 1);
    assert!(db
        .get_node_by_path(scan_id, &path_str(root.join("skip.tmp")))
        .unwrap()
        .is_none());
}

#[test]
fn test_ingest_rejects_missing_root() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");

    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("t", missing.to_str().unwrap()).unwrap();
    let scan = db.get_scan(scan_id).unwrap().unwrap();
    let result = TreeIngestor::new(&db, &[], &SilentReporter).ingest(&scan);
    assert!(matches!(result, Err(Error::Io(_))));
}

#[cfg(unix)]
#[test]
fn test_ingest_skips_symlinks() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("real.txt"), "data").unwrap();
    std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);
    let scan = db.get_scan(scan_id).unwrap().unwrap();
    assert_eq!(scan.file_count, 1);
}

#[test]
fn test_missing_parent_is_an_ingestion_error() {
    let db = Database::open_in_memory().unwrap();
    let scan_id = db.insert_scan("s", "/r").unwrap();
    let root = folder(&db, scan_id, None, "/r");
    // A file row at a folder's path is not a parent.
    file(&db, scan_id, root, "/r/A", 1);

    let mut cache = ParentCache::default();
    assert_eq!(
        cache.resolve(&db, scan_id, "/r", "/r/x.txt").unwrap(),
        root
    );

    let err = cache
        .resolve(&db, scan_id, "/r/A", "/r/A/y.txt")
        .unwrap_err();
    match err {
        Error::Ingestion { path, parent } => {
            assert_eq!(path, std::path::PathBuf::from("/r/A/y.txt"));
            assert_eq!(parent, std::path::PathBuf::from("/r/A"));
        }
        other => panic!("expected an ingestion error, got {:?}", other),
    }
}

#[test]
fn test_parent_of_another_scan_is_not_found() {
    let db = Database::open_in_memory().unwrap();
    let first = db.insert_scan("one", "/r").unwrap();
    let second = db.insert_scan("two", "/r").unwrap();
    folder(&db, first, None, "/r");

    let mut cache = ParentCache::default();
    let result = cache.resolve(&db, second, "/r", "/r/x.txt");
    assert!(matches!(result, Err(Error::Ingestion { .. })));
}

#[cfg(target_os = "linux")]
#[test]
fn test_ingest_skips_names_that_are_not_utf8() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join(OsStr::from_bytes(b"a\xff.txt")), "hello").unwrap();
    fs::create_dir_all(root.join(OsStr::from_bytes(b"sub\xfe"))).unwrap();
    fs::write(root.join(OsStr::from_bytes(b"sub\xfe/inner.txt")), "x").unwrap();
    fs::write(root.join("b.txt"), "hello").unwrap();

    let db = Database::open_in_memory().unwrap();
    let scan_id = ingest(&db, root);

    let scan = db.get_scan(scan_id).unwrap().unwrap();
    assert_eq!(scan.folder_count, 1);
    assert_eq!(scan.file_count, 1);
    assert_eq!(scan.total_size_in_bytes, 5);

    let files = db
        .list_nodes(scan_id, NodeKind::File, None, 0, 10)
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].full_path, path_str(root.join("b.txt")));
    // Every stored path opens the file that was listed.
    assert!(std::path::Path::new(&files[0].full_path).is_file());
}
