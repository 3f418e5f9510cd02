//! Corruption recovery: Probe -> Reindex -> Salvage -> Reset. Escalation only moves forward,
//! and every transition is logged with its reason.

use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{IndexError, Result, SqlResultExt};
use crate::types::AssetRow;
use crate::utils::config::{ConnectionSettings, SALVAGE_CHUNK_ROWS};

use super::connection::Handle;
use super::migrations::{initialize_schema, table_exists};
use super::rows::{row_to_asset, upsert_many};

/// Result of a lightweight integrity check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    Healthy,
    /// Only index b-trees are damaged; table data is intact.
    IndexCorruption(Vec<String>),
    /// Anything else: not a database, truncated file, damaged table pages.
    Structural(String),
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStage {
    Probe,
    Reindex,
    Salvage,
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Integrity check passed; nothing was changed.
    Healthy,
    Reindexed,
    Salvaged,
    Reset,
}

#[derive(Clone, Debug)]
pub struct RecoveryReport {
    /// Stages visited, in order.
    pub stages: Vec<RecoveryStage>,
    pub outcome: RecoveryOutcome,
    pub rows_recovered: usize,
    pub rows_skipped: usize,
    /// Where the damaged original was moved, if it was.
    pub quarantine: Option<PathBuf>,
    /// One line per escalation, with its reason.
    pub transitions: Vec<String>,
}

impl RecoveryReport {
    fn new() -> Self {
        Self {
            stages: vec![RecoveryStage::Probe],
            outcome: RecoveryOutcome::Healthy,
            rows_recovered: 0,
            rows_skipped: 0,
            quarantine: None,
            transitions: Vec::new(),
        }
    }

    fn escalate(&mut self, to: RecoveryStage, reason: String) {
        let from = self.stages.last().copied().unwrap_or(RecoveryStage::Probe);
        warn!("index recovery: {from:?} -> {to:?}: {reason}");
        self.transitions
            .push(format!("{from:?} -> {to:?}: {reason}"));
        self.stages.push(to);
    }
}

/// Rows a tolerant read could still decode, plus how many it had to skip.
#[derive(Clone, Debug, Default)]
pub struct SalvageRead {
    pub rows: Vec<AssetRow>,
    pub skipped: usize,
}

fn is_index_message(msg: &str) -> bool {
    msg.contains(" index ") || msg.starts_with("index ")
}

/// Integrity check that never writes. A missing file is healthy (it will simply be created).
pub fn probe(path: &Path, settings: &ConnectionSettings) -> ProbeResult {
    match fs::metadata(path) {
        Err(_) => return ProbeResult::Healthy,
        Ok(meta) if meta.len() == 0 => {
            return ProbeResult::Structural("store file is empty (truncated)".to_string());
        }
        Ok(_) => {}
    }
    let handle = match Handle::open_unconfigured(path, settings) {
        Ok(h) => h,
        Err(e) => return ProbeResult::Structural(e.to_string()),
    };
    let conn = match handle.conn() {
        Ok(conn) => conn,
        Err(e) => return ProbeResult::Structural(e.to_string()),
    };
    let messages = conn
        .prepare("PRAGMA quick_check")
        .and_then(|mut stmt| {
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .op("quick_check", path);
    match messages {
        Err(e) => ProbeResult::Structural(e.to_string()),
        Ok(msgs) if msgs.len() == 1 && msgs[0] == "ok" => ProbeResult::Healthy,
        // quick_check reports b-tree damage by page, not by owner, so index-only damage shows up
        // as table b-trees that still read end to end.
        Ok(msgs)
            if !msgs.is_empty()
                && (msgs.iter().all(|m| is_index_message(m)) || tables_readable(conn)) =>
        {
            ProbeResult::IndexCorruption(msgs)
        }
        Ok(msgs) => ProbeResult::Structural(msgs.join("; ")),
    }
}

/// Every table b-tree reads to the end without touching an index.
fn tables_readable(conn: &Connection) -> bool {
    let tables = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
        .and_then(|mut stmt| {
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        });
    match tables {
        Ok(tables) => tables.iter().all(|table| scan_table(conn, table).is_ok()),
        Err(_) => false,
    }
}

fn scan_table(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    let sql = format!("SELECT * FROM \"{}\" NOT INDEXED", table.replace('"', "\"\""));
    let mut stmt = conn.prepare(&sql)?;
    let width = stmt.column_count();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for i in 0..width {
            row.get_ref(i)?;
        }
    }
    Ok(())
}

/// Run the escalation on the store at `path`. Only fails if Reset itself fails, which is
/// reported as `StorageUnavailable`.
pub fn recover(path: &Path, settings: &ConnectionSettings) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::new();

    let reason = match probe(path, settings) {
        ProbeResult::Healthy => {
            debug!("integrity check: {} is healthy", path.display());
            return Ok(report);
        }
        ProbeResult::IndexCorruption(msgs) => {
            report.escalate(
                RecoveryStage::Reindex,
                format!("index damage ({} issues): {}", msgs.len(), msgs.join("; ")),
            );
            match reindex(path, settings) {
                Ok(()) => match probe(path, settings) {
                    ProbeResult::Healthy => {
                        info!("index recovery: rebuilt indexes for {}", path.display());
                        report.outcome = RecoveryOutcome::Reindexed;
                        return Ok(report);
                    }
                    other => format!("still damaged after REINDEX: {other:?}"),
                },
                Err(e) => format!("REINDEX failed: {e}"),
            }
        }
        ProbeResult::Structural(reason) => {
            report.escalate(RecoveryStage::Reindex, reason);
            "no intact structure to rebuild indexes on".to_string()
        }
    };

    report.escalate(RecoveryStage::Salvage, reason);
    let reason = match salvage(path, settings, &mut report) {
        Ok(n) if n > 0 => {
            info!(
                "index recovery: salvaged {} rows ({} skipped) into {}",
                n,
                report.rows_skipped,
                path.display()
            );
            report.outcome = RecoveryOutcome::Salvaged;
            return Ok(report);
        }
        Ok(_) => "salvage extracted zero rows".to_string(),
        Err(e) => format!("salvage failed: {e}"),
    };

    report.escalate(RecoveryStage::Reset, reason);
    reset(path, settings, &mut report).map_err(|e| {
        IndexError::unavailable("reset store", path, format!("recovery exhausted: {e}"))
    })?;
    info!("index recovery: reset {} to an empty store", path.display());
    report.outcome = RecoveryOutcome::Reset;
    Ok(report)
}

fn reindex(path: &Path, settings: &ConnectionSettings) -> Result<()> {
    let handle = Handle::open_unconfigured(path, settings)?;
    handle
        .conn()?
        .execute_batch("REINDEX")
        .op("reindex", path)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

const SIDE_FILES: [&str; 2] = ["-wal", "-shm"];

/// Rename the store and its WAL/SHM aside to `<name>.corrupt-<unix_secs>`.
fn quarantine(path: &Path) -> Result<PathBuf> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut target = with_suffix(path, &format!(".corrupt-{secs}"));
    let mut n = 1;
    while target.exists() {
        target = with_suffix(path, &format!(".corrupt-{secs}-{n}"));
        n += 1;
    }
    fs::rename(path, &target).map_err(|e| IndexError::io("quarantine store", path, e))?;
    for side in SIDE_FILES {
        let from = with_suffix(path, side);
        if from.exists() {
            let to = with_suffix(&target, side);
            fs::rename(&from, &to).map_err(|e| IndexError::io("quarantine store", &from, e))?;
        }
    }
    warn!(
        "index recovery: moved damaged store {} to {}",
        path.display(),
        target.display()
    );
    Ok(target)
}

fn remove_with_side_files(path: &Path) {
    for p in std::iter::once(path.to_path_buf()).chain(SIDE_FILES.iter().map(|s| with_suffix(path, s)))
    {
        if p.exists()
            && let Err(e) = fs::remove_file(&p)
        {
            debug!("could not remove {}: {}", p.display(), e);
        }
    }
}

/// Returns rows written. Zero means nothing was worth keeping and the caller resets.
fn salvage(path: &Path, settings: &ConnectionSettings, report: &mut RecoveryReport) -> Result<usize> {
    let moved = quarantine(path)?;
    report.quarantine = Some(moved.clone());

    let read = tolerant_read(&moved)?;
    report.rows_skipped = read.skipped;
    if read.rows.is_empty() {
        return Ok(0);
    }

    let tmp = with_suffix(path, ".salvage-tmp");
    remove_with_side_files(&tmp);
    let written = write_fresh_store(&tmp, settings, &read.rows).inspect_err(|_| {
        remove_with_side_files(&tmp);
    })?;
    fs::rename(&tmp, path).map_err(|e| IndexError::io("install salvaged store", path, e))?;
    report.rows_recovered = written;
    Ok(written)
}

fn write_fresh_store(path: &Path, settings: &ConnectionSettings, rows: &[AssetRow]) -> Result<usize> {
    let mut handle = Handle::open(path, settings)?;
    initialize_schema(&handle)?;
    let tx = handle.transaction()?;
    let n = upsert_many(&tx, path, rows)?;
    tx.commit()?;
    // Closing the last connection checkpoints and removes the WAL, so the file can be renamed alone.
    handle.close()?;
    Ok(n)
}

fn reset(path: &Path, settings: &ConnectionSettings, report: &mut RecoveryReport) -> Result<()> {
    if path.exists() {
        match quarantine(path) {
            Ok(moved) => report.quarantine = Some(moved),
            Err(e) => {
                warn!("index recovery: could not quarantine {}: {}; deleting", path.display(), e);
                remove_with_side_files(path);
            }
        }
    }
    remove_with_side_files(&with_suffix(path, ".salvage-tmp"));
    let mut handle = Handle::open(path, settings)?;
    initialize_schema(&handle)?;
    handle.close()
}

/// Column names of the damaged store's `assets` table, or an empty list if unreadable.
fn existing_columns(conn: &Connection) -> Vec<String> {
    let Ok(mut stmt) = conn.prepare("SELECT name FROM pragma_table_info('assets')") else {
        return Vec::new();
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(0)) else {
        return Vec::new();
    };
    rows.filter_map(|r| r.ok()).collect()
}

/// SELECT list in `row_to_asset` order, with NULL for columns an older schema lacks.
fn salvage_select_list(present: &[String]) -> String {
    const WANTED: [&str; 12] = [
        "album_path",
        "relative_path",
        "mtime_ns",
        "size_bytes",
        "content_hash",
        "media_type",
        "timestamp",
        "is_favorite",
        "width",
        "height",
        "exif_blob",
        "live_group_id",
    ];
    WANTED
        .iter()
        .map(|c| {
            if present.iter().any(|p| p == c) {
                (*c).to_string()
            } else {
                format!("NULL AS {c}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read rows with rowid in `[start, end)`. Rows that fail to decode are counted in the second
/// value; a storage-level error aborts the range.
fn read_range(conn: &Connection, sql: &str, start: i64, end: i64) -> rusqlite::Result<(Vec<AssetRow>, usize)> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query((start, end))?;
    let mut out = Vec::new();
    let mut skipped = 0;
    while let Some(row) = rows.next()? {
        match row_to_asset(row) {
            Ok(asset) if !asset.relative_path.is_empty() => out.push(asset),
            Ok(_) => skipped += 1,
            Err(rusqlite::Error::SqliteFailure(e, msg)) => {
                return Err(rusqlite::Error::SqliteFailure(e, msg));
            }
            Err(_) => skipped += 1,
        }
    }
    Ok((out, skipped))
}

/// Extract every row that can still be decoded from a possibly damaged store. Reads in rowid
/// chunks; a chunk that fails falls back to one read per rowid. Content damage never fails the
/// read (it yields fewer rows); only a missing file does.
pub fn tolerant_read(path: &Path) -> Result<SalvageRead> {
    if !path.exists() {
        return Err(IndexError::io(
            "tolerant read",
            path,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }
    let mut out = SalvageRead::default();
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = match Connection::open_with_flags(path, flags) {
        Ok(c) => c,
        Err(e) => {
            debug!("tolerant read: cannot open {}: {}", path.display(), e);
            return Ok(out);
        }
    };
    let _ = conn.pragma_update(None, "query_only", true);

    match table_exists(&conn, "assets") {
        Ok(true) => {}
        Ok(false) => return Ok(out),
        Err(e) => {
            debug!("tolerant read: schema unreadable in {}: {}", path.display(), e);
            return Ok(out);
        }
    }
    let bounds: rusqlite::Result<(Option<i64>, Option<i64>)> = conn.query_row(
        "SELECT MIN(rowid), MAX(rowid) FROM assets",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );
    let (min_rowid, max_rowid) = match bounds {
        Ok((Some(lo), Some(hi))) => (lo, hi),
        Ok(_) => return Ok(out),
        Err(e) => {
            debug!("tolerant read: rowid bounds unreadable in {}: {}", path.display(), e);
            return Ok(out);
        }
    };

    let sql = format!(
        "SELECT {} FROM assets WHERE rowid >= ?1 AND rowid < ?2 ORDER BY rowid",
        salvage_select_list(&existing_columns(&conn))
    );
    let mut start = min_rowid;
    while start <= max_rowid {
        let end = start.saturating_add(SALVAGE_CHUNK_ROWS);
        match read_range(&conn, &sql, start, end) {
            Ok((rows, skipped)) => {
                out.rows.extend(rows);
                out.skipped += skipped;
            }
            Err(e) => {
                debug!("tolerant read: chunk [{start}, {end}) failed ({e}); reading row by row");
                for rowid in start..end.min(max_rowid.saturating_add(1)) {
                    match read_range(&conn, &sql, rowid, rowid + 1) {
                        Ok((rows, skipped)) => {
                            out.rows.extend(rows);
                            out.skipped += skipped;
                        }
                        Err(_) => out.skipped += 1,
                    }
                }
            }
        }
        start = end;
    }
    debug!(
        "tolerant read of {}: {} rows, {} skipped",
        path.display(),
        out.rows.len(),
        out.skipped
    );
    Ok(out)
}
