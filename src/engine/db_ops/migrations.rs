//! Schema migrator. The version marker is `PRAGMA user_version`; each `v -> v+1` step runs in
//! its own transaction and sets the marker as its last statement.

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::engine::tools::file_name_of;
use crate::error::{IndexError, Result, SqlResultExt};

use super::connection::Handle;

/// Version written by this build. Stores above it are refused.
pub const SCHEMA_VERSION: i64 = 3;

/// v1: base table. Also used for unversioned legacy stores (IF NOT EXISTS).
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
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
    exif_blob TEXT,
    UNIQUE (album_path, relative_path)
);
CREATE INDEX IF NOT EXISTS idx_assets_timestamp ON assets(timestamp);
"#;

const INDEXES_V2: &str = r#"
CREATE INDEX IF NOT EXISTS idx_assets_content_hash ON assets(content_hash);
CREATE INDEX IF NOT EXISTS idx_assets_live_group ON assets(live_group_id);
"#;

const INDEXES_V3: &str = r#"
CREATE INDEX IF NOT EXISTS idx_assets_filename ON assets(filename);
CREATE INDEX IF NOT EXISTS idx_assets_size ON assets(size_bytes);
"#;

/// Full current schema for a brand-new store.
const SCHEMA_CURRENT: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY,
    album_path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    filename TEXT NOT NULL DEFAULT '',
    mtime_ns INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT,
    media_type TEXT NOT NULL,
    timestamp INTEGER,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    width INTEGER,
    height INTEGER,
    exif_blob TEXT,
    live_group_id TEXT,
    UNIQUE (album_path, relative_path)
);
CREATE INDEX IF NOT EXISTS idx_assets_timestamp ON assets(timestamp);
CREATE INDEX IF NOT EXISTS idx_assets_content_hash ON assets(content_hash);
CREATE INDEX IF NOT EXISTS idx_assets_live_group ON assets(live_group_id);
CREATE INDEX IF NOT EXISTS idx_assets_filename ON assets(filename);
CREATE INDEX IF NOT EXISTS idx_assets_size ON assets(size_bytes);
"#;

/// What [`migrate`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: i64,
    pub to: i64,
    /// True when a new store was created with the full current schema.
    pub initialized: bool,
}

impl MigrationOutcome {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// On-disk schema version (0 for a new or unversioned store).
pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

/// Read-only version gate. Runs before anything that could write to the file, so a refused
/// store is left byte-identical.
pub fn ensure_supported(handle: &Handle) -> Result<i64> {
    let found = current_version(handle.conn()?).op("read schema version", handle.path())?;
    if found > SCHEMA_VERSION {
        return Err(IndexError::UnsupportedSchemaVersion {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(found)
}

/// Create the full current schema and set the version marker in one transaction.
pub fn initialize_schema(handle: &Handle) -> Result<()> {
    let tx = handle.transaction()?;
    tx.execute_batch(SCHEMA_CURRENT)
        .op("create schema", handle.path())?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .op("set schema version", handle.path())?;
    tx.commit()?;
    debug!(
        "initialized schema v{} at {}",
        SCHEMA_VERSION,
        handle.path().display()
    );
    Ok(())
}

/// Bring the store to `target`, one step at a time. Never writes when the on-disk version is
/// newer than `target` or than this build supports.
pub fn migrate(handle: &Handle, target: i64) -> Result<MigrationOutcome> {
    if target > SCHEMA_VERSION {
        return Err(IndexError::UnsupportedSchemaVersion {
            found: target,
            supported: SCHEMA_VERSION,
        });
    }
    if target < 1 {
        return Err(IndexError::MigrationFailed {
            from: 0,
            to: target,
            reason: "target version must be at least 1".to_string(),
        });
    }
    let conn = handle.conn()?;
    let path = handle.path();
    let from = current_version(conn).op("read schema version", path)?;
    if from > target {
        return Err(IndexError::UnsupportedSchemaVersion {
            found: from,
            supported: target,
        });
    }
    if from == target {
        return Ok(MigrationOutcome {
            from,
            to: target,
            initialized: false,
        });
    }

    if from == 0
        && target == SCHEMA_VERSION
        && !table_exists(conn, "assets").op("inspect schema", path)?
    {
        initialize_schema(handle).map_err(|e| step_error(e, 0, SCHEMA_VERSION))?;
        return Ok(MigrationOutcome {
            from,
            to: target,
            initialized: true,
        });
    }

    for version in from..target {
        apply_step(handle, version)?;
    }
    info!(
        "migrated index schema v{} -> v{} at {}",
        from,
        target,
        path.display()
    );
    Ok(MigrationOutcome {
        from,
        to: target,
        initialized: false,
    })
}

fn step_error(e: IndexError, from: i64, to: i64) -> IndexError {
    if e.is_busy() {
        e
    } else {
        IndexError::MigrationFailed {
            from,
            to,
            reason: e.to_string(),
        }
    }
}

fn apply_step(handle: &Handle, from: i64) -> Result<()> {
    let to = from + 1;
    let run = || -> Result<()> {
        let tx = handle.transaction()?;
        let path = handle.path();
        match to {
            1 => tx.execute_batch(SCHEMA_V1).op("create v1 schema", path)?,
            2 => step_v2(&tx, path)?,
            3 => step_v3(&tx, path)?,
            _ => {
                return Err(IndexError::MigrationFailed {
                    from,
                    to,
                    reason: "no migration step defined".to_string(),
                });
            }
        }
        tx.pragma_update(None, "user_version", to)
            .op("set schema version", path)?;
        tx.commit()
    };
    run().map_err(|e| step_error(e, from, to))?;
    debug!("schema step v{} -> v{} applied", from, to);
    Ok(())
}

/// v2: content hash and Live Photo pairing.
fn step_v2(conn: &Connection, path: &Path) -> Result<()> {
    if !column_exists(conn, "assets", "content_hash").op("inspect schema", path)? {
        conn.execute_batch("ALTER TABLE assets ADD COLUMN content_hash TEXT")
            .op("add content_hash", path)?;
    }
    if !column_exists(conn, "assets", "live_group_id").op("inspect schema", path)? {
        conn.execute_batch("ALTER TABLE assets ADD COLUMN live_group_id TEXT")
            .op("add live_group_id", path)?;
    }
    conn.execute_batch(INDEXES_V2)
        .op("create v2 indexes", path)?;
    Ok(())
}

/// v3: denormalized filename (backfilled) and sort indexes.
fn step_v3(conn: &Connection, path: &Path) -> Result<()> {
    if !column_exists(conn, "assets", "filename").op("inspect schema", path)? {
        conn.execute_batch("ALTER TABLE assets ADD COLUMN filename TEXT NOT NULL DEFAULT ''")
            .op("add filename", path)?;
    }
    let pending: Vec<(i64, String)> = {
        let mut stmt = conn
            .prepare("SELECT id, relative_path FROM assets WHERE filename = ''")
            .op("prepare filename backfill", path)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .op("read filename backfill", path)?;
        rows.collect::<rusqlite::Result<_>>()
            .op("read filename backfill", path)?
    };
    let mut update = conn
        .prepare("UPDATE assets SET filename = ?1 WHERE id = ?2")
        .op("prepare filename update", path)?;
    for (id, rel) in &pending {
        update
            .execute((file_name_of(rel), id))
            .op("backfill filename", path)?;
    }
    conn.execute_batch(INDEXES_V3)
        .op("create v3 indexes", path)?;
    if !pending.is_empty() {
        debug!("backfilled filename for {} rows", pending.len());
    }
    Ok(())
}
