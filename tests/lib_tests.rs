use photodex::engine::hashing::{hash_equals, live_group_id};
use photodex::engine::tools::{
    glob_match, mtime_changed, normalize_album_path, path_relative_to, path_to_db_string,
    should_include_in_walk, split_library_path,
};
use photodex::scan::{pair_live_photos, plan_sync};
use photodex::{AssetKey, AssetRow, Entry, MediaType, StoredSignature};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// --- path_relative_to ---

#[test]
fn test_path_relative_under_base() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/foo/bar/baz/qux");
    assert_eq!(
        path_relative_to(&path, &base),
        Some(PathBuf::from("baz/qux"))
    );
}

#[test]
fn test_path_relative_not_under_base() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/other/qux");
    assert_eq!(path_relative_to(&path, &base), None);
}

// --- path normalization ---

#[test]
fn test_path_to_db_string_normalizes_backslashes() {
    assert_eq!(
        path_to_db_string(&PathBuf::from("Trips\\2023\\a.jpg")),
        "Trips/2023/a.jpg"
    );
}

#[test]
fn test_normalize_album_path_trims_slashes_and_dots() {
    assert_eq!(normalize_album_path("/Trips//2023/./"), "Trips/2023");
    assert_eq!(normalize_album_path(""), "");
    assert_eq!(normalize_album_path("/"), "");
}

#[test]
fn test_split_library_path_nested() {
    assert_eq!(
        split_library_path(Path::new("Trips/2023/IMG_1.jpg")),
        ("Trips/2023".to_string(), "IMG_1.jpg".to_string())
    );
}

#[test]
fn test_split_library_path_root_file() {
    assert_eq!(
        split_library_path(Path::new("IMG_1.jpg")),
        (String::new(), "IMG_1.jpg".to_string())
    );
}

#[test]
fn test_asset_key_new_normalizes() {
    let key = AssetKey::new("/Trips/2023/", "IMG_1.jpg");
    assert_eq!(key.album_path, "Trips/2023");
    assert_eq!(key.to_string(), "Trips/2023/IMG_1.jpg");
    assert_eq!(AssetKey::new("", "a.jpg").to_string(), "a.jpg");
}

#[test]
fn test_asset_row_filename() {
    let row = AssetRow::new(AssetKey::new("A", "sub/x.heic"), 0, 1, MediaType::Photo);
    assert_eq!(row.filename(), "x.heic");
}

// --- media types ---

#[test]
fn test_media_type_from_extension() {
    assert_eq!(MediaType::from_extension("JPG"), Some(MediaType::Photo));
    assert_eq!(MediaType::from_extension("mov"), Some(MediaType::Video));
    assert_eq!(MediaType::from_extension("dng"), Some(MediaType::Raw));
    assert_eq!(MediaType::from_extension("txt"), None);
}

// --- mtime_changed ---

#[test]
fn test_mtime_changed_within_window() {
    let old = 1_000_000_000i64;
    assert!(!mtime_changed(old + 50, old, 50));
    assert!(!mtime_changed(old - 50, old, 50));
}

#[test]
fn test_mtime_changed_outside_window() {
    let old = 1_000_000_000i64;
    assert!(mtime_changed(old + 51, old, 50));
    assert!(mtime_changed(old + 1, old, 0));
}

// --- hash_equals ---

#[test]
fn test_stored_signature_staleness() {
    let stored = StoredSignature {
        mtime_ns: 1_000_000,
        size_bytes: 42,
        content_hash: None,
        media_type: MediaType::Photo,
        live_group_id: None,
    };
    assert!(!stored.is_stale(1_000_500, 42, 1_000));
    assert!(stored.is_stale(1_002_000, 42, 1_000));
    assert!(stored.is_stale(1_000_000, 43, 1_000));
}

#[test]
fn test_hash_equals_ignores_case() {
    assert!(hash_equals(&Some("ABcd".to_string()), &Some("abCD".to_string())));
    assert!(hash_equals(&None, &None));
    assert!(!hash_equals(&None, &Some("ab".to_string())));
}

// --- glob_match / should_include_in_walk ---

#[test]
fn test_glob_match_star() {
    assert!(glob_match("*.tmp", "foo.tmp"));
    assert!(!glob_match("*.tmp", "foo.tmp.jpg"));
    assert!(glob_match("Export*", "Exports"));
}

#[test]
fn test_should_include_root_excluded() {
    let root = PathBuf::from("/lib");
    assert!(!should_include_in_walk(&root, &root, &[]));
}

#[test]
fn test_should_include_os_hidden_skipped() {
    let root = PathBuf::from("/lib");
    assert!(!should_include_in_walk(&root.join(".DS_Store"), &root, &[]));
    assert!(!should_include_in_walk(&root.join("._IMG_1.jpg"), &root, &[]));
}

#[test]
fn test_should_include_exclude_pattern() {
    let root = PathBuf::from("/lib");
    let excl = vec!["Exports".to_string(), "*.tmp".to_string()];
    assert!(!should_include_in_walk(&root.join("Exports"), &root, &excl));
    assert!(!should_include_in_walk(&root.join("A/b.tmp"), &root, &excl));
    assert!(should_include_in_walk(&root.join("A/b.jpg"), &root, &excl));
}

// --- live photo pairing ---

fn entry(album: &str, name: &str, mtime_ns: i64, size: u64) -> Entry {
    let ext = name.rsplit('.').next().unwrap();
    Entry {
        key: AssetKey::new(album, name),
        abs_path: PathBuf::from("/lib").join(album).join(name),
        mtime_ns,
        size,
        media_type: MediaType::from_extension(ext).unwrap(),
        live_group_id: None,
    }
}

#[test]
fn test_pair_live_photos_still_and_video() {
    let mut entries = vec![
        entry("A", "IMG_1.HEIC", 1, 1),
        entry("A", "img_1.mov", 1, 1),
        entry("A", "IMG_2.jpg", 1, 1),
    ];
    pair_live_photos(&mut entries);
    assert_eq!(entries[0].media_type, MediaType::LivePhoto);
    assert_eq!(entries[1].media_type, MediaType::Video);
    assert_eq!(entries[0].live_group_id, entries[1].live_group_id);
    assert_eq!(entries[0].live_group_id, Some(live_group_id("A", "img_1")));
    assert_eq!(entries[2].media_type, MediaType::Photo);
    assert_eq!(entries[2].live_group_id, None);
}

#[test]
fn test_pair_live_photos_requires_same_album() {
    let mut entries = vec![entry("A", "IMG_1.jpg", 1, 1), entry("B", "IMG_1.mov", 1, 1)];
    pair_live_photos(&mut entries);
    assert_eq!(entries[0].media_type, MediaType::Photo);
    assert!(entries.iter().all(|e| e.live_group_id.is_none()));
}

#[test]
fn test_pair_live_photos_raw_never_pairs() {
    let mut entries = vec![entry("A", "IMG_1.dng", 1, 1), entry("A", "IMG_1.mov", 1, 1)];
    pair_live_photos(&mut entries);
    assert_eq!(entries[0].media_type, MediaType::Raw);
    assert!(entries.iter().all(|e| e.live_group_id.is_none()));
}

// --- plan_sync ---

fn sig(e: &Entry) -> StoredSignature {
    StoredSignature {
        mtime_ns: e.mtime_ns,
        size_bytes: e.size,
        content_hash: None,
        media_type: e.media_type,
        live_group_id: e.live_group_id.clone(),
    }
}

#[test]
fn test_plan_sync_classifies_changes() {
    let same = entry("A", "same.jpg", 100, 10);
    let grown = entry("A", "grown.jpg", 100, 20);
    let fresh = entry("A", "new.jpg", 100, 10);
    let mut stored = HashMap::new();
    stored.insert(same.key.clone(), sig(&same));
    let mut old_grown = sig(&grown);
    old_grown.size_bytes = 10;
    stored.insert(grown.key.clone(), old_grown);
    stored.insert(
        AssetKey::new("A", "gone.jpg"),
        sig(&entry("A", "gone.jpg", 1, 1)),
    );

    let plan = plan_sync(vec![same, grown, fresh], &stored, 0);
    assert_eq!(plan.unchanged, 1);
    assert_eq!(plan.added, vec![AssetKey::new("A", "new.jpg")]);
    assert_eq!(plan.modified, vec![AssetKey::new("A", "grown.jpg")]);
    assert_eq!(plan.removed, vec![AssetKey::new("A", "gone.jpg")]);
    assert_eq!(plan.pending.len(), 2);
}

#[test]
fn test_plan_sync_mtime_window() {
    let e = entry("A", "a.jpg", 150, 10);
    let mut stored = HashMap::new();
    let mut old = sig(&e);
    old.mtime_ns = 100;
    stored.insert(e.key.clone(), old);
    assert_eq!(plan_sync(vec![e.clone()], &stored, 50).unchanged, 1);
    assert_eq!(plan_sync(vec![e], &stored, 49).modified.len(), 1);
}

#[test]
fn test_plan_sync_pairing_change_is_modification() {
    let e = entry("A", "IMG_1.jpg", 1, 1);
    let mut stored = HashMap::new();
    let mut old = sig(&e);
    old.media_type = MediaType::LivePhoto;
    old.live_group_id = Some("abc".to_string());
    stored.insert(e.key.clone(), old);
    let plan = plan_sync(vec![e], &stored, 0);
    assert_eq!(plan.modified.len(), 1);
}
