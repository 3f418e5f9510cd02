//! Application configuration constants and store settings.
//! Tuning and thresholds in one place.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    work_dir_name: String,
    db_filename: String,
    config_filename: String,
    lock_dir_name: String,
    last_scan_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                work_dir_name: format!(".{pkg}"),
                db_filename: "global_index.db".to_string(),
                config_filename: format!(".{pkg}.toml"),
                lock_dir_name: "locks".to_string(),
                last_scan_filename: "last_scan.json".to_string(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Hidden working directory under the library root.
    pub fn work_dir_name(&self) -> &str {
        &self.work_dir_name
    }

    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// `<root>/.photodex`
    pub fn work_dir(&self, library_root: &Path) -> PathBuf {
        library_root.join(&self.work_dir_name)
    }

    /// `<root>/.photodex/global_index.db`
    pub fn db_path(&self, library_root: &Path) -> PathBuf {
        self.work_dir(library_root).join(&self.db_filename)
    }

    /// Directory holding sidecar lock files for a store at `db_path`.
    pub fn lock_dir_for_db(&self, db_path: &Path) -> PathBuf {
        db_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&self.lock_dir_name)
    }

    /// Scan summary sidecar next to the store at `db_path`.
    pub fn last_scan_path_for_db(&self, db_path: &Path) -> PathBuf {
        db_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&self.last_scan_filename)
    }

    /// Names excluded from the walk by default: the working directory and the config file.
    pub fn default_exclude_patterns(&self) -> Vec<String> {
        vec![
            self.work_dir_name().to_string(),
            self.config_filename().to_string(),
        ]
    }
}

// ---- Connection engine ----

/// SQLite connection tuning and retry limits.
pub struct ConnectionConsts;

impl ConnectionConsts {
    /// How long SQLite itself waits on a locked database before returning SQLITE_BUSY.
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    /// Extra attempts the engine makes after SQLITE_BUSY before surfacing StorageBusy.
    pub const BUSY_RETRY_ATTEMPTS: u32 = 3;
    /// Sleep between busy retries (multiplied by the attempt number).
    pub const BUSY_RETRY_BACKOFF_MS: u64 = 50;
    /// Max read connections kept by the pool.
    pub const READ_POOL_SIZE: usize = 4;
    /// How long a reader waits for a pooled connection before StorageBusy.
    pub const POOL_CHECKOUT_TIMEOUT_MS: u64 = 2_000;
}

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        PRAGMA foreign_keys = ON;
        "#;

// ---- Scan / batching ----

/// Rows per write transaction during a scan. Keeps each writer window short.
pub const SCAN_BATCH_SIZE: usize = 500;

// ---- Recovery ----

/// Rows read per chunk while salvaging a damaged store.
pub const SALVAGE_CHUNK_ROWS: i64 = 256;

// ---- Sidecar locks ----

/// Lock timing for sidecar files.
pub struct LockConsts;

impl LockConsts {
    /// Default wait for a sidecar lock.
    pub const ACQUIRE_TIMEOUT_MS: u64 = 5_000;
    /// Locks older than this are reclaimed even if the owner looks alive.
    pub const STALE_AFTER_SECS: u64 = 30;
    /// Poll interval while waiting on a held lock.
    pub const POLL_INTERVAL_MS: u64 = 25;
}

// ---- Hashing ----

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for reading files below mmap threshold (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}

// ---- Streaming channel cap ----

/// Path and entry channel capacity for the scan pipeline.
pub const STREAMING_CHANNEL_CAP: usize = 50_000;

// ---- Diff / list output ----

/// When --list is set, at most this many changed keys are printed per category.
pub const LIST_THRESHOLD: usize = 100;

// ---- Settings ----

/// Connection-level settings shared by the writer handle, the read pool, and recovery.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub busy_timeout: Duration,
    pub busy_retries: u32,
    pub busy_backoff: Duration,
    pub read_pool_size: usize,
    pub pool_checkout_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(ConnectionConsts::BUSY_TIMEOUT_MS),
            busy_retries: ConnectionConsts::BUSY_RETRY_ATTEMPTS,
            busy_backoff: Duration::from_millis(ConnectionConsts::BUSY_RETRY_BACKOFF_MS),
            read_pool_size: ConnectionConsts::READ_POOL_SIZE,
            pool_checkout_timeout: Duration::from_millis(
                ConnectionConsts::POOL_CHECKOUT_TIMEOUT_MS,
            ),
        }
    }
}

/// Everything a [`Repository`](crate::Repository) needs to know beyond its path.
#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub connection: ConnectionSettings,
    /// Rows per write transaction for scans.
    pub batch_size: usize,
    /// Default wait for sidecar locks.
    pub lock_timeout: Duration,
    /// Age after which a sidecar lock is reclaimed.
    pub lock_stale_after: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            batch_size: SCAN_BATCH_SIZE,
            lock_timeout: Duration::from_millis(LockConsts::ACQUIRE_TIMEOUT_MS),
            lock_stale_after: Duration::from_secs(LockConsts::STALE_AFTER_SECS),
        }
    }
}
