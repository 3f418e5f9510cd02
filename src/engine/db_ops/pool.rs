//! Bounded pool of read-only connections. WAL readers see a consistent snapshot and never wait
//! on the writer; the bound only limits how many readers run at once.

use log::debug;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{IndexError, Result};
use crate::utils::config::ConnectionSettings;

/// A checked-out reader. Returns to the pool on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

pub struct ReadPool {
    path: PathBuf,
    capacity: u32,
    pool: Mutex<Option<Pool<SqliteConnectionManager>>>,
}

fn reader_manager(path: &Path, settings: &ConnectionSettings) -> SqliteConnectionManager {
    let busy_timeout = settings.busy_timeout;
    SqliteConnectionManager::file(path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "query_only", true)
        })
}

impl ReadPool {
    /// Connections are opened lazily on first checkout.
    pub fn new(path: &Path, settings: &ConnectionSettings) -> Self {
        let capacity = u32::try_from(settings.read_pool_size.max(1)).unwrap_or(u32::MAX);
        let pool = Pool::builder()
            .max_size(capacity)
            .min_idle(Some(0))
            // r2d2 rejects a zero timeout.
            .connection_timeout(settings.pool_checkout_timeout.max(Duration::from_millis(1)))
            .build_unchecked(reader_manager(path, settings));
        Self {
            path: path.to_path_buf(),
            capacity,
            pool: Mutex::new(Some(pool)),
        }
    }

    fn lock_pool(&self) -> MutexGuard<'_, Option<Pool<SqliteConnectionManager>>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a reader, waiting up to the checkout timeout. An exhausted pool fails with
    /// `StorageBusy`; a reader that cannot be opened at all fails with `StorageUnavailable`.
    pub fn get(&self) -> Result<PooledConnection> {
        let pool = self.lock_pool().clone().ok_or_else(|| {
            IndexError::unavailable("check out read connection", &self.path, "read pool is closed")
        })?;
        pool.get().map_err(|e| {
            // r2d2 appends the last connection error when opening failed; a bare timeout
            // means every reader was checked out.
            let msg = e.to_string();
            if msg.contains(": ") {
                IndexError::unavailable("check out read connection", &self.path, msg)
            } else {
                debug!(
                    "read pool exhausted ({} connections) for {}",
                    self.capacity,
                    self.path.display()
                );
                IndexError::StorageBusy {
                    op: "check out read connection",
                    attempts: 1,
                }
            }
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Connections opened so far (idle or checked out).
    pub fn open_connections(&self) -> usize {
        self.lock_pool()
            .as_ref()
            .map_or(0, |p| p.state().connections as usize)
    }

    pub fn idle(&self) -> usize {
        self.lock_pool()
            .as_ref()
            .map_or(0, |p| p.state().idle_connections as usize)
    }

    /// Drop the pool. Idle readers close now, checked-out ones when they are returned; later
    /// checkouts fail with `StorageUnavailable`.
    pub fn clear(&self) {
        if self.lock_pool().take().is_some() {
            debug!("closed read pool for {}", self.path.display());
        }
    }
}
