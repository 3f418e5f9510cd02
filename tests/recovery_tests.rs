//! Corruption recovery: truncated and garbage files, salvage of a damaged table, healthy stores.

use photodex::engine::db_ops::{ProbeResult, SCHEMA_VERSION, probe, recover, tolerant_read};
use photodex::{
    AlbumScope, AssetFilters, AssetKey, AssetRow, ConnectionSettings, IndexError, MediaType,
    RecoveryOutcome, RecoveryStage, Repository, StoreSettings,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join(".photodex").join("global_index.db")
}

fn count_all(repo: &Repository) -> u64 {
    repo.count(&AlbumScope::library(), &AssetFilters::default())
        .unwrap()
}

fn row(i: usize) -> AssetRow {
    let mut r = AssetRow::new(
        AssetKey::new("Album", format!("IMG_{i:05}.jpg")),
        i as i64,
        1_000 + i as u64,
        MediaType::Photo,
    );
    r.exif.insert(
        "Note".to_string(),
        serde_json::json!(format!("row-{i:05}-{}", "x".repeat(200))),
    );
    r
}

/// Build a closed store with `n` rows; returns the settings used.
fn build_store(path: &Path, n: usize) {
    let repo = Repository::open_at(path, &StoreSettings::default()).unwrap();
    let rows: Vec<AssetRow> = (0..n).map(row).collect();
    repo.batch_insert(&rows).unwrap();
    repo.checkpoint().unwrap();
    repo.close().unwrap();
}

fn quarantined_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains(".corrupt-"))
        .collect()
}

#[test]
fn test_zero_byte_store_escalates_to_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"").unwrap();

    let repo = Repository::open_at(&path, &StoreSettings::default()).unwrap();
    let report = repo.last_recovery().unwrap();
    assert_eq!(
        report.stages,
        vec![
            RecoveryStage::Probe,
            RecoveryStage::Reindex,
            RecoveryStage::Salvage,
            RecoveryStage::Reset
        ]
    );
    assert_eq!(report.outcome, RecoveryOutcome::Reset);
    assert_eq!(report.transitions.len(), 3);
    assert_eq!(count_all(&repo), 0);
    assert_eq!(repo.schema_version().unwrap(), SCHEMA_VERSION);
}

#[test]
fn test_garbage_store_is_quarantined_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let garbage = vec![0xA5u8; 8192];
    fs::write(&path, &garbage).unwrap();

    let repo = Repository::open_at(&path, &StoreSettings::default()).unwrap();
    let report = repo.last_recovery().unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::Reset);
    let moved = report.quarantine.clone().unwrap();
    assert_eq!(fs::read(&moved).unwrap(), garbage);
    assert_eq!(quarantined_files(path.parent().unwrap()).len(), 1);

    // The fresh store is usable.
    repo.upsert_row(&row(1)).unwrap();
    assert_eq!(count_all(&repo), 1);
}

#[test]
fn test_healthy_store_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    build_store(&path, 20);
    let before = fs::read(&path).unwrap();

    assert_eq!(probe(&path, &ConnectionSettings::default()), ProbeResult::Healthy);
    let report = recover(&path, &ConnectionSettings::default()).unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::Healthy);
    assert_eq!(report.stages, vec![RecoveryStage::Probe]);
    assert!(report.quarantine.is_none());
    assert_eq!(fs::read(&path).unwrap(), before);

    let repo = Repository::open_at(&path, &StoreSettings::default()).unwrap();
    assert!(repo.last_recovery().is_none());
    assert_eq!(count_all(&repo), 20);
}

#[test]
fn test_missing_file_checks_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nothing.db");
    assert!(probe(&path, &ConnectionSettings::default()).is_healthy());
    assert!(!path.exists());
}

#[test]
fn test_tolerant_read_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = tolerant_read(&dir.path().join("nothing.db")).unwrap_err();
    assert!(matches!(err, IndexError::Io { .. }));
}

#[test]
fn test_tolerant_read_healthy_store_returns_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    build_store(&path, 600);
    let read = tolerant_read(&path).unwrap();
    assert_eq!(read.skipped, 0);
    assert_eq!(read.rows.len(), 600);
    assert_eq!(read.rows[599], row(599));
}

#[test]
fn test_tolerant_read_old_schema_fills_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE assets (
            id INTEGER PRIMARY KEY,
            album_path TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            mtime_ns INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            media_type TEXT NOT NULL,
            timestamp INTEGER,
            is_favorite INTEGER NOT NULL DEFAULT 0,
            width INTEGER,
            height INTEGER,
            exif_blob TEXT
        );
        INSERT INTO assets (album_path, relative_path, mtime_ns, size_bytes, media_type)
            VALUES ('A', 'a.jpg', 5, 10, 'photo'), ('A', 'b.mov', 6, 11, 'video'),
                   ('A', 'bad.jpg', 7, 12, 'hologram');",
    )
    .unwrap();
    drop(conn);

    let read = tolerant_read(&path).unwrap();
    assert_eq!(read.rows.len(), 2);
    assert_eq!(read.skipped, 1);
    assert!(read.rows.iter().all(|r| r.content_hash.is_none() && r.live_group_id.is_none()));
}

/// Overwrite the type byte of the b-tree page that holds `marker`.
fn damage_page_containing(path: &Path, marker: &[u8]) {
    let mut bytes = fs::read(path).unwrap();
    let page_size = match u16::from_be_bytes([bytes[16], bytes[17]]) {
        1 => 65_536,
        n => n as usize,
    };
    let at = bytes
        .windows(marker.len())
        .position(|w| w == marker)
        .unwrap();
    let page_start = at / page_size * page_size;
    assert!(page_start > 0, "marker landed on the schema page");
    bytes[page_start] = 0xFF;
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_damaged_table_page_is_salvaged() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    build_store(&path, 2_000);
    damage_page_containing(&path, b"row-01000-");

    assert!(matches!(
        probe(&path, &ConnectionSettings::default()),
        ProbeResult::Structural(_)
    ));
    let report = recover(&path, &ConnectionSettings::default()).unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::Salvaged);
    assert_eq!(
        report.stages,
        vec![
            RecoveryStage::Probe,
            RecoveryStage::Reindex,
            RecoveryStage::Salvage
        ]
    );
    assert!(report.rows_recovered > 0);
    assert!(report.rows_recovered < 2_000);
    assert!(report.rows_skipped > 0);

    // What was installed is exactly what a tolerant read of the quarantined original yields.
    let moved = report.quarantine.clone().unwrap();
    let from_original = tolerant_read(&moved).unwrap();
    assert_eq!(from_original.rows.len(), report.rows_recovered);

    let repo = Repository::open_at(&path, &StoreSettings::default()).unwrap();
    assert!(repo.last_recovery().is_none());
    assert_eq!(count_all(&repo), report.rows_recovered as u64);
    assert!(repo.get_row(&row(0).key()).unwrap().is_some());
    assert!(repo.get_row(&row(1_999).key()).unwrap().is_some());
    assert!(repo.get_row(&row(1_000).key()).unwrap().is_none());
}

/// Miscount the fragmented bytes on a leaf page of `index`. The tree stays walkable, so only
/// the integrity check notices.
fn damage_index_leaf(path: &Path, index: &str) {
    let root: u32 = {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.query_row(
            "SELECT rootpage FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [index],
            |r| r.get(0),
        )
        .unwrap()
    };
    let mut bytes = fs::read(path).unwrap();
    let page_size = match u16::from_be_bytes([bytes[16], bytes[17]]) {
        1 => 65_536,
        n => n as usize,
    };
    let mut page = root as usize;
    let header = loop {
        let start = (page - 1) * page_size;
        let header = if page == 1 { start + 100 } else { start };
        match bytes[header] {
            // Interior index page: follow the right-most child.
            0x02 => {
                page = u32::from_be_bytes(bytes[header + 8..header + 12].try_into().unwrap())
                    as usize;
            }
            0x0A => break header,
            other => panic!("page {page} of {index} has type {other:#x}"),
        }
    };
    bytes[header + 7] = bytes[header + 7].wrapping_add(1);
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_damaged_index_page_is_reindexed() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    build_store(&path, 2_000);
    damage_index_leaf(&path, "idx_assets_size");

    assert!(matches!(
        probe(&path, &ConnectionSettings::default()),
        ProbeResult::IndexCorruption(_)
    ));
    let report = recover(&path, &ConnectionSettings::default()).unwrap();
    assert_eq!(
        report.stages,
        vec![RecoveryStage::Probe, RecoveryStage::Reindex]
    );
    assert_eq!(report.outcome, RecoveryOutcome::Reindexed);
    assert!(report.quarantine.is_none());
    assert!(quarantined_files(path.parent().unwrap()).is_empty());
    assert!(probe(&path, &ConnectionSettings::default()).is_healthy());

    let repo = Repository::open_at(&path, &StoreSettings::default()).unwrap();
    assert!(repo.last_recovery().is_none());
    assert_eq!(count_all(&repo), 2_000);
    assert!(repo.get_row(&row(1_999).key()).unwrap().is_some());
}
