//! Database operations: connection engine, read pool, schema migration, recovery, query
//! building, and row-level reads/writes for the `assets` table.

pub mod connection;
pub mod migrations;
pub mod pool;
pub mod query;
pub mod recovery;
pub mod rows;

pub use connection::{Handle, ScopedTransaction, with_busy_retry};
pub use migrations::{
    MigrationOutcome, SCHEMA_VERSION, current_version, ensure_supported, initialize_schema,
    migrate,
};
pub use pool::{PooledConnection, ReadPool};
pub use query::{
    AlbumScope, AssetFilters, BuiltQuery, Sort, SortKey, SortOrder, build_count_query,
    build_filter_clause, build_pagination_query, build_where_clause,
};
pub use recovery::{
    ProbeResult, RecoveryOutcome, RecoveryReport, RecoveryStage, SalvageRead, probe, recover,
    tolerant_read,
};

/// Columns read into an [`AssetRow`](crate::AssetRow), in `rows::row_to_asset` order.
pub(crate) const ASSET_COLUMNS: &str = "album_path, relative_path, mtime_ns, size_bytes, \
     content_hash, media_type, timestamp, is_favorite, width, height, exif_blob, live_group_id";

/// Insert or refresh one row keyed on `(album_path, relative_path)`.
pub(crate) const UPSERT_ASSET_SQL: &str = r#"
INSERT INTO assets (
    album_path, relative_path, filename, mtime_ns, size_bytes, content_hash, media_type,
    timestamp, is_favorite, width, height, exif_blob, live_group_id
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(album_path, relative_path) DO UPDATE SET
    filename = excluded.filename,
    mtime_ns = excluded.mtime_ns,
    size_bytes = excluded.size_bytes,
    content_hash = excluded.content_hash,
    media_type = excluded.media_type,
    timestamp = excluded.timestamp,
    is_favorite = excluded.is_favorite,
    width = excluded.width,
    height = excluded.height,
    exif_blob = excluded.exif_blob,
    live_group_id = excluded.live_group_id
"#;

/// Upsert used by the scan synchronizer: refreshes everything derived from the file but keeps
/// user state (`is_favorite`) on existing rows.
pub(crate) const SYNC_UPSERT_ASSET_SQL: &str = r#"
INSERT INTO assets (
    album_path, relative_path, filename, mtime_ns, size_bytes, content_hash, media_type,
    timestamp, is_favorite, width, height, exif_blob, live_group_id
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(album_path, relative_path) DO UPDATE SET
    filename = excluded.filename,
    mtime_ns = excluded.mtime_ns,
    size_bytes = excluded.size_bytes,
    content_hash = excluded.content_hash,
    media_type = excluded.media_type,
    timestamp = excluded.timestamp,
    width = excluded.width,
    height = excluded.height,
    exif_blob = excluded.exif_blob,
    live_group_id = excluded.live_group_id
"#;

pub(crate) const DELETE_ASSET_SQL: &str =
    "DELETE FROM assets WHERE album_path = ?1 AND relative_path = ?2";
