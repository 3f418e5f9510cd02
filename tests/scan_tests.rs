//! Scan synchronizer and dry-run report against real directory trees.

use photodex::report::{report_library, report_unindexed};
use photodex::scan::read_last_scan;
use photodex::{
    AlbumScope, AssetFilters, AssetKey, AssetRow, IndexError, MediaType, PageQuery, Repository,
    ScanControl, ScanOpts, Sort, SortKey, SortOrder, StoreSettings, scan_dir, scan_library,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

fn put(root: &Path, rel: &str, body: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn all_rows(repo: &Repository) -> Vec<AssetRow> {
    repo.find_page(
        &PageQuery::new(AlbumScope::library()).sort(Sort::new(SortKey::Filename, SortOrder::Asc)),
    )
    .unwrap()
    .rows
}

fn all_keys(repo: &Repository) -> Vec<String> {
    let mut keys: Vec<String> = all_rows(repo).iter().map(|r| r.key().to_string()).collect();
    keys.sort();
    keys
}

fn scan(repo: &Repository, opts: &ScanOpts) -> photodex::ScanSummary {
    scan_library(repo, opts, &ScanControl::default()).unwrap()
}

#[test]
fn test_first_scan_indexes_media_only() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "Trips/x.jpg", b"jpeg");
    put(root, "Trips/2023/y.mov", b"movie");
    put(root, "z.png", b"png");
    put(root, "notes.txt", b"not media");
    put(root, "Trips/.DS_Store", b"junk");

    let repo = photodex::open(root).unwrap();
    let summary = scan(&repo, &ScanOpts::default());
    assert_eq!(summary.added, 3);
    assert_eq!(summary.modified, 0);
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.files_seen, 3);
    assert!(!summary.cancelled);
    assert_eq!(
        all_keys(&repo),
        vec!["Trips/2023/y.mov", "Trips/x.jpg", "z.png"]
    );

    let y = repo
        .get_row(&AssetKey::new("Trips/2023", "y.mov"))
        .unwrap()
        .unwrap();
    assert_eq!(y.media_type, MediaType::Video);
    assert_eq!(y.size_bytes, 5);
    assert!(y.content_hash.is_none());
    // The store itself lives under the library but is never indexed.
    assert!(root.join(".photodex").join("global_index.db").exists());
}

#[test]
fn test_rescan_detects_changes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/keep.jpg", b"same");
    put(root, "A/grow.jpg", b"small");
    put(root, "A/gone.jpg", b"bye");
    let repo = photodex::open(root).unwrap();
    scan(&repo, &ScanOpts::default());

    put(root, "A/grow.jpg", b"much larger now");
    fs::remove_file(root.join("A/gone.jpg")).unwrap();
    put(root, "A/new.heic", b"heic");

    let summary = scan(&repo, &ScanOpts::default());
    assert_eq!(summary.added, 1);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(all_keys(&repo), vec!["A/grow.jpg", "A/keep.jpg", "A/new.heic"]);
    assert_eq!(
        repo.get_row(&AssetKey::new("A", "grow.jpg"))
            .unwrap()
            .unwrap()
            .size_bytes,
        15
    );

    // Nothing changed: nothing written.
    let summary = scan(&repo, &ScanOpts::default());
    assert_eq!(summary.added + summary.modified + summary.removed, 0);
    assert_eq!(summary.unchanged, 3);
    assert_eq!(summary.batches, 0);
}

#[test]
fn test_live_photo_pairs_share_group() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/IMG_1.HEIC", b"still");
    put(root, "A/IMG_1.MOV", b"motion");
    put(root, "A/IMG_2.JPG", b"plain");
    let repo = photodex::open(root).unwrap();
    scan(&repo, &ScanOpts::default());

    let still = repo.get_row(&AssetKey::new("A", "IMG_1.HEIC")).unwrap().unwrap();
    let motion = repo.get_row(&AssetKey::new("A", "IMG_1.MOV")).unwrap().unwrap();
    let plain = repo.get_row(&AssetKey::new("A", "IMG_2.JPG")).unwrap().unwrap();
    assert_eq!(still.media_type, MediaType::LivePhoto);
    assert_eq!(motion.media_type, MediaType::Video);
    assert!(still.live_group_id.is_some());
    assert_eq!(still.live_group_id, motion.live_group_id);
    assert!(plain.live_group_id.is_none());

    // Losing the video un-pairs the still on the next scan.
    fs::remove_file(root.join("A/IMG_1.MOV")).unwrap();
    let summary = scan(&repo, &ScanOpts::default());
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.removed, 1);
    let still = repo.get_row(&AssetKey::new("A", "IMG_1.HEIC")).unwrap().unwrap();
    assert_eq!(still.media_type, MediaType::Photo);
    assert!(still.live_group_id.is_none());
}

#[test]
fn test_scan_keeps_favorites_on_modified_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/fav.jpg", b"v1");
    let repo = photodex::open(root).unwrap();
    scan(&repo, &ScanOpts::default());
    let key = AssetKey::new("A", "fav.jpg");
    assert!(repo.set_favorite(&key, true).unwrap());

    put(root, "A/fav.jpg", b"version two");
    let summary = scan(&repo, &ScanOpts::default());
    assert_eq!(summary.modified, 1);
    let row = repo.get_row(&key).unwrap().unwrap();
    assert!(row.is_favorite);
    assert_eq!(row.size_bytes, 11);
}

#[test]
fn test_index_is_disposable() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/IMG_1.jpg", b"one");
    put(root, "A/IMG_1.mov", b"one-motion");
    put(root, "B/C/two.dng", b"raw");
    let opts = ScanOpts {
        with_hash: true,
        ..Default::default()
    };

    let repo = photodex::open(root).unwrap();
    scan(&repo, &opts);
    let before = all_rows(&repo);
    repo.close().unwrap();

    fs::remove_dir_all(root.join(".photodex")).unwrap();
    let repo = photodex::open(root).unwrap();
    scan(&repo, &opts);
    assert_eq!(all_rows(&repo), before);
}

#[test]
fn test_content_hash_is_blake3_hex() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "a.jpg", b"hash me");
    let repo = photodex::open(root).unwrap();
    scan(
        &repo,
        &ScanOpts {
            with_hash: true,
            ..Default::default()
        },
    );
    let row = repo.get_row(&AssetKey::new("", "a.jpg")).unwrap().unwrap();
    assert_eq!(
        row.content_hash.as_deref(),
        Some(blake3::hash(b"hash me").to_hex().as_str())
    );
}

#[test]
fn test_cancel_before_first_batch_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/old.jpg", b"old");
    let repo = photodex::open(root).unwrap();
    scan(&repo, &ScanOpts::default());

    fs::remove_file(root.join("A/old.jpg")).unwrap();
    put(root, "A/new.jpg", b"new");
    let cancel = AtomicBool::new(true);
    let control = ScanControl {
        cancel: Some(&cancel),
        on_batch: None,
    };
    let summary = scan_library(&repo, &ScanOpts::default(), &control).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.removed, 0);
    // Deletes are skipped on cancel, so the vanished file is still indexed.
    assert_eq!(all_keys(&repo), vec!["A/old.jpg"]);
}

#[test]
fn test_cancel_between_batches_keeps_committed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for i in 0..5 {
        put(root, &format!("A/{i}.jpg"), b"x");
    }
    let repo = photodex::open(root).unwrap();
    let cancel = AtomicBool::new(false);
    let on_batch = |_n: usize| cancel.store(true, Ordering::SeqCst);
    let control = ScanControl {
        cancel: Some(&cancel),
        on_batch: Some(&on_batch),
    };
    let opts = ScanOpts {
        batch_size: Some(2),
        ..Default::default()
    };
    let summary = scan_library(&repo, &opts, &control).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.added, 2);
    assert_eq!(
        repo.count(&AlbumScope::library(), &AssetFilters::default())
            .unwrap(),
        2
    );

    // A later uncancelled scan finishes the job.
    let summary = scan(&repo, &opts);
    assert_eq!(summary.added, 3);
    assert_eq!(summary.batches, 2);
}

#[test]
fn test_album_scan_leaves_other_albums_alone() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/a.jpg", b"a");
    put(root, "A/sub/b.jpg", b"b");
    put(root, "B/c.jpg", b"c");
    let repo = photodex::open(root).unwrap();
    scan(&repo, &ScanOpts::default());

    fs::remove_file(root.join("B/c.jpg")).unwrap();
    fs::remove_file(root.join("A/sub/b.jpg")).unwrap();
    let summary = scan(
        &repo,
        &ScanOpts {
            album: Some("A".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(summary.removed, 1);
    assert_eq!(all_keys(&repo), vec!["A/a.jpg", "B/c.jpg"]);
}

#[test]
fn test_exclude_patterns_prune_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/a.jpg", b"a");
    put(root, "Exports/A/a.jpg", b"a");
    put(root, "A/a.tmp.jpg", b"a");
    let repo = photodex::open(root).unwrap();
    scan(
        &repo,
        &ScanOpts {
            exclude: vec!["Exports".to_string(), "*.tmp.jpg".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(all_keys(&repo), vec!["A/a.jpg"]);
}

#[test]
fn test_config_file_sets_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join(".photodex.toml"), "[store]\nbatch_size = 2\n").unwrap();
    for i in 0..5 {
        put(root, &format!("{i}.png"), b"p");
    }
    let repo = photodex::open(root).unwrap();
    assert_eq!(repo.settings().batch_size, 2);
    let summary = scan(&repo, &ScanOpts::default());
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.added, 5);
}

#[test]
fn test_last_scan_sidecar_matches_summary() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "a.jpg", b"a");
    let repo = photodex::open(root).unwrap();
    assert!(read_last_scan(&repo).unwrap().is_none());
    let summary = scan(&repo, &ScanOpts::default());
    let record = read_last_scan(&repo).unwrap().unwrap();
    assert_eq!(record.summary, summary);
    assert_eq!(record.album, None);
    assert!(record.finished_at_ms > 0);
}

#[test]
fn test_report_does_not_write() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    put(root, "A/a.jpg", b"a");
    put(root, "A/b.jpg", b"b");

    let fresh = report_unindexed(root, &ScanOpts::default()).unwrap();
    assert_eq!(fresh.added.len(), 2);
    assert!(!root.join(".photodex").exists());

    let repo = photodex::open(root).unwrap();
    scan(&repo, &ScanOpts::default());
    put(root, "A/b.jpg", b"bigger b");
    put(root, "A/c.jpg", b"c");
    fs::remove_file(root.join("A/a.jpg")).unwrap();

    let diff = report_library(&repo, &ScanOpts::default()).unwrap();
    assert_eq!(diff.added, vec![AssetKey::new("A", "c.jpg")]);
    assert_eq!(diff.modified, vec![AssetKey::new("A", "b.jpg")]);
    assert_eq!(diff.removed, vec![AssetKey::new("A", "a.jpg")]);
    assert_eq!(diff.total(), 3);
    assert_eq!(all_keys(&repo), vec!["A/a.jpg", "A/b.jpg"]);
}

#[test]
fn test_scan_library_needs_a_root() {
    let dir = tempfile::tempdir().unwrap();
    let repo =
        Repository::open_at(&dir.path().join("store.db"), &StoreSettings::default()).unwrap();
    let err = scan_library(&repo, &ScanOpts::default(), &ScanControl::default()).unwrap_err();
    assert!(matches!(err, IndexError::StorageUnavailable { .. }));

    // An explicit root works with any store.
    put(dir.path(), "lib/a.jpg", b"a");
    let summary = scan_dir(
        &repo,
        &dir.path().join("lib"),
        &ScanOpts::default(),
        &ScanControl::default(),
    )
    .unwrap();
    assert_eq!(summary.added, 1);
}

#[test]
fn test_missing_root_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let repo =
        Repository::open_at(&dir.path().join("store.db"), &StoreSettings::default()).unwrap();
    let err = scan_dir(
        &repo,
        &dir.path().join("nope"),
        &ScanOpts::default(),
        &ScanControl::default(),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::Io { .. }));
}
