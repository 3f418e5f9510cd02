//! Row-level reads and writes on the `assets` table. Callers choose the transaction; these
//! functions only run statements on the connection they are given.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

use crate::engine::tools::{file_name_of, normalize_album_path};
use crate::error::{IndexError, Result, SqlResultExt};
use crate::types::{AssetKey, AssetRow, ExifMap, StoredSignature};

use super::query::{AlbumScope, AssetFilters, BuiltQuery, build_where_clause};
use super::{ASSET_COLUMNS, DELETE_ASSET_SQL, SYNC_UPSERT_ASSET_SQL, UPSERT_ASSET_SQL};

fn to_u32(v: Option<i64>) -> Option<u32> {
    v.and_then(|n| u32::try_from(n).ok())
}

/// Map a row selected with [`ASSET_COLUMNS`].
pub(crate) fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<AssetRow> {
    let exif_text: Option<String> = row.get(10)?;
    let exif = match exif_text.as_deref() {
        None | Some("") => ExifMap::new(),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
    };
    let size: i64 = row.get(3)?;
    Ok(AssetRow {
        album_path: row.get(0)?,
        relative_path: row.get(1)?,
        mtime_ns: row.get(2)?,
        size_bytes: size.max(0) as u64,
        content_hash: row.get(4)?,
        media_type: row.get(5)?,
        timestamp: row.get(6)?,
        is_favorite: row.get(7)?,
        width: to_u32(row.get(8)?),
        height: to_u32(row.get(9)?),
        exif,
        live_group_id: row.get(11)?,
    })
}

fn validate(row: &AssetRow, key: &AssetKey) -> Result<i64> {
    if key.relative_path.is_empty() {
        return Err(IndexError::ConstraintViolation {
            op: "upsert row",
            reason: format!("empty relative_path in album {:?}", key.album_path),
        });
    }
    i64::try_from(row.size_bytes).map_err(|_| IndexError::ConstraintViolation {
        op: "upsert row",
        reason: format!("size_bytes {} out of range", row.size_bytes),
    })
}

/// Insert or refresh `row` keyed on its `(album_path, relative_path)`.
pub fn upsert(conn: &Connection, path: &Path, row: &AssetRow) -> Result<()> {
    upsert_with(conn, path, row, UPSERT_ASSET_SQL)
}

/// Like [`upsert`], but an existing row keeps its favorite flag.
pub fn upsert_scanned(conn: &Connection, path: &Path, row: &AssetRow) -> Result<()> {
    upsert_with(conn, path, row, SYNC_UPSERT_ASSET_SQL)
}

fn upsert_with(conn: &Connection, path: &Path, row: &AssetRow, sql: &str) -> Result<()> {
    // Stored keys are always normalized; "Trips/" and "Trips" are one album.
    let key = row.key();
    let size = validate(row, &key)?;
    let exif = if row.exif.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&row.exif)?)
    };
    let mut stmt = conn
        .prepare_cached(sql)
        .op("prepare upsert", path)?;
    stmt.execute(rusqlite::params![
        key.album_path,
        key.relative_path,
        file_name_of(&key.relative_path),
        row.mtime_ns,
        size,
        row.content_hash,
        row.media_type,
        row.timestamp,
        row.is_favorite,
        row.width,
        row.height,
        exif,
        row.live_group_id,
    ])
    .op("upsert row", path)?;
    Ok(())
}

/// Upsert every row on `conn`. Returns how many were written.
pub fn upsert_many(conn: &Connection, path: &Path, rows: &[AssetRow]) -> Result<usize> {
    for row in rows {
        upsert(conn, path, row)?;
    }
    Ok(rows.len())
}

pub fn upsert_scanned_many(conn: &Connection, path: &Path, rows: &[AssetRow]) -> Result<usize> {
    for row in rows {
        upsert_scanned(conn, path, row)?;
    }
    Ok(rows.len())
}

/// Delete by key. `false` when no row matched.
pub fn delete(conn: &Connection, path: &Path, key: &AssetKey) -> Result<bool> {
    let key = key.normalized();
    let mut stmt = conn
        .prepare_cached(DELETE_ASSET_SQL)
        .op("prepare delete", path)?;
    let n = stmt
        .execute((&key.album_path, &key.relative_path))
        .op("delete row", path)?;
    Ok(n > 0)
}

pub fn delete_many(conn: &Connection, path: &Path, keys: &[AssetKey]) -> Result<usize> {
    let mut removed = 0;
    for key in keys {
        if delete(conn, path, key)? {
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn get(conn: &Connection, path: &Path, key: &AssetKey) -> Result<Option<AssetRow>> {
    let sql = format!(
        "SELECT {ASSET_COLUMNS} FROM assets WHERE album_path = ?1 AND relative_path = ?2"
    );
    let key = key.normalized();
    let mut stmt = conn.prepare_cached(&sql).op("prepare get", path)?;
    stmt.query_row((&key.album_path, &key.relative_path), row_to_asset)
        .optional()
        .op("get row", path)
}

/// Run a built `SELECT {ASSET_COLUMNS} ...` and collect the rows.
pub fn fetch(conn: &Connection, path: &Path, query: &BuiltQuery) -> Result<Vec<AssetRow>> {
    let mut stmt = conn.prepare(&query.sql).op("prepare page", path)?;
    let rows = stmt
        .query_map(query.bind(), row_to_asset)
        .op("read page", path)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .op("read page", path)
}

/// Run a built `SELECT COUNT(*) ...`.
pub fn count(conn: &Connection, path: &Path, query: &BuiltQuery) -> Result<u64> {
    let n: i64 = conn
        .query_row(&query.sql, query.bind(), |row| row.get(0))
        .op("count rows", path)?;
    Ok(n.max(0) as u64)
}

/// Stored content signatures for every row in `scope`, keyed by asset key.
pub fn load_signatures(
    conn: &Connection,
    path: &Path,
    scope: &AlbumScope,
) -> Result<HashMap<AssetKey, StoredSignature>> {
    let where_clause = build_where_clause(scope, &AssetFilters::default());
    let sql = format!(
        "SELECT album_path, relative_path, mtime_ns, size_bytes, content_hash, media_type, \
         live_group_id FROM assets {}",
        where_clause.sql
    );
    let mut stmt = conn.prepare(&sql).op("prepare load signatures", path)?;
    let rows = stmt
        .query_map(where_clause.bind(), |row| {
            let size: i64 = row.get(3)?;
            Ok((
                AssetKey {
                    album_path: row.get(0)?,
                    relative_path: row.get(1)?,
                },
                StoredSignature {
                    mtime_ns: row.get(2)?,
                    size_bytes: size.max(0) as u64,
                    content_hash: row.get(4)?,
                    media_type: row.get(5)?,
                    live_group_id: row.get(6)?,
                },
            ))
        })
        .op("load signatures", path)?;
    let mut map = HashMap::new();
    for row in rows {
        let (key, sig) = row.op("load signatures", path)?;
        map.insert(key, sig);
    }
    Ok(map)
}

/// Set the favorite flag. `false` when the key does not exist.
pub fn set_favorite(conn: &Connection, path: &Path, key: &AssetKey, favorite: bool) -> Result<bool> {
    let key = key.normalized();
    let n = conn
        .execute(
            "UPDATE assets SET is_favorite = ?3 WHERE album_path = ?1 AND relative_path = ?2",
            (&key.album_path, &key.relative_path, favorite),
        )
        .op("set favorite", path)?;
    Ok(n > 0)
}

/// Rename album `from` (and every album below it) to `to`. Returns rows moved.
/// A clash with an existing key surfaces as `ConstraintViolation`.
pub fn move_album(conn: &Connection, path: &Path, from: &str, to: &str) -> Result<usize> {
    let from = normalize_album_path(from);
    let to = normalize_album_path(to);
    if from.is_empty() || to.is_empty() {
        return Err(IndexError::ConstraintViolation {
            op: "move album",
            reason: "the library root cannot be moved or used as a target".to_string(),
        });
    }
    if to == from || to.starts_with(&format!("{from}/")) {
        return Err(IndexError::ConstraintViolation {
            op: "move album",
            reason: format!("cannot move {from:?} into itself ({to:?})"),
        });
    }
    // substr() counts characters, not bytes.
    let tail_start = from.chars().count() as i64 + 1;
    conn.execute(
        "UPDATE assets SET album_path = ?4 || substr(album_path, ?5) \
         WHERE album_path = ?1 OR (album_path >= ?2 AND album_path < ?3)",
        (
            &from,
            format!("{from}/"),
            format!("{from}0"),
            &to,
            tail_start,
        ),
    )
    .op("move album", path)
}
