//! Connection/transaction engine: one physical connection per [`Handle`], WAL journaling,
//! busy-timeout retry, and scoped transactions that join an outer transaction instead of nesting.

use log::{debug, warn};
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::thread;

use crate::error::{IndexError, Result, SqlResultExt};
use crate::utils::config::{ConnectionSettings, WAL_PRAGMAS};

/// Owner of one SQLite connection to the store file.
pub struct Handle {
    conn: Option<Connection>,
    path: PathBuf,
    settings: ConnectionSettings,
}

/// Create the parent directory and open the file with a busy timeout. No pragmas that write.
pub(crate) fn open_raw(
    path: &Path,
    settings: &ConnectionSettings,
    flags: OpenFlags,
) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            IndexError::unavailable("create store directory", parent, e.to_string())
        })?;
    }
    let conn = Connection::open_with_flags(path, flags).op("open store", path)?;
    conn.busy_timeout(settings.busy_timeout)
        .op("set busy timeout", path)?;
    Ok(conn)
}

/// A zero-length store file is what a crash between create and schema init leaves behind.
fn check_not_truncated(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == 0 => Err(IndexError::SchemaCorrupt {
            path: path.to_path_buf(),
            reason: "store file is empty (truncated)".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Enable WAL and the tuning pragmas on an open connection (idempotent).
fn apply_wal(conn: &Connection, path: &Path) -> Result<()> {
    let mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .op("enable WAL", path)?;
    if !mode.eq_ignore_ascii_case("wal") {
        debug!("journal_mode for {} is {}", path.display(), mode);
    }
    conn.execute_batch(WAL_PRAGMAS).op("set WAL pragmas", path)?;
    Ok(())
}

/// `BEGIN IMMEDIATE` when the connection is in autocommit mode. Returns whether the caller owns
/// the transaction (false means it joined an outer one).
pub(crate) fn begin_scope(conn: &Connection, path: &Path) -> Result<bool> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN IMMEDIATE")
            .op("begin transaction", path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Commit an owned transaction. If COMMIT fails the transaction is rolled back before returning.
pub(crate) fn commit_scope(conn: &Connection, path: &Path) -> Result<()> {
    if let Err(e) = conn.execute_batch("COMMIT") {
        if !conn.is_autocommit() {
            let _ = conn.execute_batch("ROLLBACK");
        }
        return Err(IndexError::classify("commit transaction", path, e));
    }
    Ok(())
}

pub(crate) fn rollback_scope(conn: &Connection, path: &Path) -> Result<()> {
    if conn.is_autocommit() {
        return Ok(());
    }
    conn.execute_batch("ROLLBACK")
        .op("rollback transaction", path)
}

impl Handle {
    /// Open or create the store at `path` with WAL journaling and a busy timeout.
    ///
    /// Fails with `StorageUnavailable` when the file cannot be opened/created and with
    /// `SchemaCorrupt` when it exists but is not a usable database.
    pub fn open(path: &Path, settings: &ConnectionSettings) -> Result<Self> {
        check_not_truncated(path)?;
        let conn = open_raw(path, settings, OpenFlags::default())?;
        apply_wal(&conn, path)?;
        debug!("opened store {}", path.display());
        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
            settings: settings.clone(),
        })
    }

    /// Open without changing journal mode or any other persistent state. Used where the file
    /// must stay byte-identical if the operation is refused (version gate, integrity check).
    pub fn open_unconfigured(path: &Path, settings: &ConnectionSettings) -> Result<Self> {
        let conn = open_raw(path, settings, OpenFlags::default())?;
        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
            settings: settings.clone(),
        })
    }

    /// Private in-memory store (no WAL). Useful for query and migration checks.
    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().op("open in-memory store", &path)?;
        Ok(Self {
            conn: Some(conn),
            path,
            settings: ConnectionSettings::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// The live connection, or `StorageUnavailable` after [`Handle::close`].
    pub fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| IndexError::unavailable("use connection", &self.path, "handle is closed"))
    }

    /// True while a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    /// Begin a scoped transaction, or join the one already open on this connection.
    pub fn transaction(&self) -> Result<ScopedTransaction<'_>> {
        let conn = self.conn()?;
        let owner = begin_scope(conn, &self.path)?;
        Ok(ScopedTransaction {
            conn,
            path: &self.path,
            owner,
            finished: false,
        })
    }

    pub fn journal_mode(&self) -> Result<String> {
        self.conn()?
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .op("read journal mode", &self.path)
    }

    /// Reclaim WAL space after bulk writes (checkpoint and truncate the WAL file).
    pub fn checkpoint(&self) -> Result<()> {
        self.conn()?
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .op("WAL checkpoint", &self.path)
    }

    /// Release the connection. Calling it again is a no-op. An open transaction is rolled back.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            warn!(
                "closing {} with an open transaction; rolling back",
                self.path.display()
            );
        }
        conn.close().map_err(|(conn, e)| {
            self.conn = Some(conn);
            IndexError::classify("close store", &self.path, e)
        })?;
        debug!("closed store {}", self.path.display());
        Ok(())
    }
}

/// Transaction scope over a [`Handle`]. Commits on [`ScopedTransaction::commit`]; an owning
/// scope that is dropped without committing rolls back. A joined scope leaves the decision to
/// the outer owner.
pub struct ScopedTransaction<'h> {
    conn: &'h Connection,
    path: &'h Path,
    owner: bool,
    finished: bool,
}

impl ScopedTransaction<'_> {
    /// True when this scope started the transaction (false when it joined an outer one).
    pub fn is_outermost(&self) -> bool {
        self.owner
    }

    pub fn path(&self) -> &Path {
        self.path
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.owner {
            commit_scope(self.conn, self.path)?;
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        if self.owner {
            rollback_scope(self.conn, self.path)?;
        }
        Ok(())
    }
}

impl Deref for ScopedTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if self.owner && !self.finished && !self.conn.is_autocommit() {
            debug!("rolling back unfinished transaction on {}", self.path.display());
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Run `f`, retrying while it fails with `StorageBusy`. SQLite has already waited up to the
/// busy timeout before each failure; after `busy_retries` extra attempts the error surfaces as
/// `StorageBusy { op, attempts }`.
pub fn with_busy_retry<T>(
    op: &'static str,
    settings: &ConnectionSettings,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let total = settings.busy_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match f() {
            Err(e) if e.is_busy() => {
                if attempt >= total {
                    warn!("{op}: store still busy after {attempt} attempts");
                    return Err(IndexError::StorageBusy {
                        op,
                        attempts: attempt,
                    });
                }
                debug!("{op}: store busy (attempt {attempt}/{total}), retrying");
                thread::sleep(settings.busy_backoff * attempt);
                attempt += 1;
            }
            other => return other,
        }
    }
}
