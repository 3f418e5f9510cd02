//! Caller-owned index repository: one writer connection behind a mutex, a bounded pool of WAL
//! readers, automatic migration on open, and recovery when the store file is damaged.

use log::{debug, info, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::engine::db_ops::connection::{begin_scope, commit_scope, rollback_scope};
use crate::engine::db_ops::migrations::current_version;
use crate::engine::db_ops::{
    AlbumScope, AssetFilters, Handle, ReadPool, RecoveryReport, SCHEMA_VERSION, Sort,
    build_count_query, build_pagination_query, ensure_supported, migrate, recover, rows,
    with_busy_retry,
};
use crate::engine::lock::FileLock;
use crate::error::{IndexError, Result, SqlResultExt};
use crate::types::{AssetKey, AssetRow, StoredSignature};
use crate::utils::config::{PackagePaths, StoreSettings};
use crate::utils::store_toml::load_store_settings;

/// A page request: scope, filters, sort, and window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub scope: AlbumScope,
    pub filters: AssetFilters,
    pub sort: Sort,
    /// `None` returns every matching row.
    pub limit: Option<u32>,
    pub offset: u64,
}

impl PageQuery {
    pub fn new(scope: AlbumScope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn filters(mut self, filters: AssetFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, limit: u32, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

/// One page of rows plus the total under the same filter, read from one snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct PageResult {
    pub rows: Vec<AssetRow>,
    pub total: u64,
    pub offset: u64,
}

impl PageResult {
    pub fn has_more(&self) -> bool {
        self.offset + (self.rows.len() as u64) < self.total
    }
}

/// Admits one writing thread at a time. The thread inside may enter again, so a write made
/// while its own transaction is open joins that transaction instead of waiting on itself.
#[derive(Default)]
struct WriterGate {
    state: Mutex<GateState>,
    released: Condvar,
}

#[derive(Default)]
struct GateState {
    owner: Option<ThreadId>,
    depth: usize,
}

impl WriterGate {
    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self) -> GateGuard<'_> {
        let me = thread::current().id();
        let mut state = self.lock_state();
        while state.owner.is_some_and(|owner| owner != me) {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.owner = Some(me);
        state.depth += 1;
        GateGuard { gate: self }
    }
}

struct GateGuard<'g> {
    gate: &'g WriterGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock_state();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.gate.released.notify_all();
        }
    }
}

pub struct Repository {
    library_root: Option<PathBuf>,
    db_path: PathBuf,
    settings: StoreSettings,
    gate: WriterGate,
    writer: Mutex<Handle>,
    readers: ReadPool,
    last_recovery: Option<RecoveryReport>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("library_root", &self.library_root)
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Open the index of the library at `library_root` (`<root>/.photodex/global_index.db`),
    /// with settings from `<root>/.photodex.toml` over the defaults.
    pub fn open(library_root: &Path) -> Result<Self> {
        let settings = load_store_settings(library_root);
        let db_path = PackagePaths::get().db_path(library_root);
        let mut repo = Self::open_at(&db_path, &settings)?;
        repo.library_root = Some(library_root.to_path_buf());
        Ok(repo)
    }

    /// Open the store file at `db_path`. A damaged store is recovered once; a store written
    /// by a newer version is refused without being modified.
    pub fn open_at(db_path: &Path, settings: &StoreSettings) -> Result<Self> {
        let (handle, report) = match open_store(db_path, settings) {
            Ok(handle) => (handle, None),
            Err(e) if e.is_corruption() => {
                warn!("index store {} is damaged ({}); recovering", db_path.display(), e);
                let report = recover(db_path, &settings.connection)?;
                (open_store(db_path, settings)?, Some(report))
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            library_root: None,
            db_path: db_path.to_path_buf(),
            settings: settings.clone(),
            gate: WriterGate::default(),
            writer: Mutex::new(handle),
            readers: ReadPool::new(db_path, &settings.connection),
            last_recovery: report,
            closed: AtomicBool::new(false),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Library root, when opened through [`Repository::open`].
    pub fn library_root(&self) -> Option<&Path> {
        self.library_root.as_deref()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Report of the recovery run while opening, if one was needed.
    pub fn last_recovery(&self) -> Option<&RecoveryReport> {
        self.last_recovery.as_ref()
    }

    pub fn read_pool(&self) -> &ReadPool {
        &self.readers
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::unavailable(op, &self.db_path, "repository is closed"));
        }
        Ok(())
    }

    /// Held only for the statements of one call; the gate decides who may write.
    fn lock_writer(&self) -> MutexGuard<'_, Handle> {
        // A panic mid-write leaves the transaction rolled back, so the handle is still usable.
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` in one write transaction on the writer connection, retrying on busy. Inside an
    /// open [`WriteTxn`] on this thread, `f` joins it and the outer owner commits.
    fn write<T>(&self, op: &'static str, mut f: impl FnMut(&Connection, &Path) -> Result<T>) -> Result<T> {
        self.ensure_open(op)?;
        let _gate = self.gate.enter();
        let handle = self.lock_writer();
        with_busy_retry(op, &self.settings.connection, || {
            let tx = handle.transaction()?;
            let out = f(&*tx, handle.path())?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Run `f` on a pooled reader. Never waits on the writer.
    fn read<T>(&self, op: &'static str, mut f: impl FnMut(&Connection, &Path) -> Result<T>) -> Result<T> {
        self.ensure_open(op)?;
        with_busy_retry(op, &self.settings.connection, || {
            let conn = self.readers.get()?;
            let out = f(&conn, &self.db_path);
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    debug!("{op}: could not end read snapshot: {e}");
                }
            }
            out
        })
    }

    /// Insert or refresh one row.
    pub fn upsert_row(&self, row: &AssetRow) -> Result<()> {
        self.write("upsert row", |conn, path| rows::upsert(conn, path, row))
    }

    /// Upsert many rows in one transaction: all or none. Empty input writes nothing.
    pub fn batch_insert(&self, batch: &[AssetRow]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let n = self.write("batch insert", |conn, path| rows::upsert_many(conn, path, batch))?;
        debug!("batch insert: {} rows", n);
        Ok(n)
    }

    /// Write one scan batch in one transaction. Existing rows keep their favorite flag.
    pub fn apply_scanned(&self, batch: &[AssetRow]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.write("apply scan batch", |conn, path| {
            rows::upsert_scanned_many(conn, path, batch)
        })
    }

    /// Delete one row. Deleting a missing key is not an error (`Ok(false)`).
    pub fn delete_row(&self, key: &AssetKey) -> Result<bool> {
        self.write("delete row", |conn, path| rows::delete(conn, path, key))
    }

    /// Delete many rows in one transaction. Returns how many existed.
    pub fn delete_rows(&self, keys: &[AssetKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.write("delete rows", |conn, path| rows::delete_many(conn, path, keys))
    }

    pub fn get_row(&self, key: &AssetKey) -> Result<Option<AssetRow>> {
        self.read("get row", |conn, path| rows::get(conn, path, key))
    }

    /// One page plus the total count, both from the same read snapshot.
    pub fn find_page(&self, query: &PageQuery) -> Result<PageResult> {
        let page = build_pagination_query(
            &query.scope,
            &query.filters,
            &query.sort,
            query.limit,
            query.offset,
        );
        let count = build_count_query(&query.scope, &query.filters);
        self.read("find page", |conn, path| {
            conn.execute_batch("BEGIN").op("begin read", path)?;
            let result = rows::fetch(conn, path, &page).and_then(|found| {
                let total = rows::count(conn, path, &count)?;
                Ok(PageResult {
                    rows: found,
                    total,
                    offset: query.offset,
                })
            });
            let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
            if let Err(e) = conn.execute_batch(end) {
                debug!("find page: {end} of read snapshot failed: {e}");
            }
            result
        })
    }

    pub fn count(&self, scope: &AlbumScope, filters: &AssetFilters) -> Result<u64> {
        let query = build_count_query(scope, filters);
        self.read("count rows", |conn, path| rows::count(conn, path, &query))
    }

    /// Stored content signatures in `scope`, for the scan synchronizer's change detection.
    pub fn load_signatures(&self, scope: &AlbumScope) -> Result<HashMap<AssetKey, StoredSignature>> {
        self.read("load signatures", |conn, path| {
            rows::load_signatures(conn, path, scope)
        })
    }

    /// Returns `false` when the key does not exist.
    pub fn set_favorite(&self, key: &AssetKey, favorite: bool) -> Result<bool> {
        self.write("set favorite", |conn, path| {
            rows::set_favorite(conn, path, key, favorite)
        })
    }

    /// Move album `from` and its subalbums to `to` in one transaction.
    pub fn move_album(&self, from: &str, to: &str) -> Result<usize> {
        let n = self.write("move album", |conn, path| rows::move_album(conn, path, from, to))?;
        info!("moved album {:?} -> {:?} ({} rows)", from, to, n);
        Ok(n)
    }

    /// Begin a write transaction. Writers on other threads wait until it commits or is
    /// dropped; repository writes on this thread, including a nested `transaction`, join it.
    pub fn transaction(&self) -> Result<WriteTxn<'_>> {
        self.ensure_open("begin transaction")?;
        let gate = self.gate.enter();
        let owner = {
            let handle = self.lock_writer();
            with_busy_retry("begin transaction", &self.settings.connection, || {
                begin_scope(handle.conn()?, handle.path())
            })?
        };
        Ok(WriteTxn {
            repo: self,
            owner,
            finished: false,
            _gate: gate,
        })
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let tx = self.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!("rollback after failed transaction: {rb}");
                }
                Err(e)
            }
        }
    }

    /// Cross-process lock on `<store dir>/locks/<name>.lock`, for sidecar files.
    pub fn sidecar_lock(&self, name: &str, timeout: Option<Duration>) -> Result<FileLock> {
        let dir = PackagePaths::get().lock_dir_for_db(&self.db_path);
        FileLock::acquire(
            &dir,
            name,
            timeout.unwrap_or(self.settings.lock_timeout),
            self.settings.lock_stale_after,
        )
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.read("read schema version", |conn, path| {
            current_version(conn).op("read schema version", path)
        })
    }

    /// Checkpoint the WAL into the main file and truncate it.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_open("checkpoint")?;
        let _gate = self.gate.enter();
        let handle = self.lock_writer();
        if handle.in_transaction() {
            debug!("checkpoint skipped: a write transaction is open on this thread");
            return Ok(());
        }
        with_busy_retry("checkpoint", &self.settings.connection, || handle.checkpoint())
    }

    /// Release every connection. Later operations fail with `StorageUnavailable`. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.readers.clear();
        let _gate = self.gate.enter();
        let mut handle = self.lock_writer();
        handle.close()?;
        debug!("closed repository {}", self.db_path.display());
        Ok(())
    }
}

/// Version gate, WAL engine, then migration to the current schema.
fn open_store(db_path: &Path, settings: &StoreSettings) -> Result<Handle> {
    if db_path.exists() {
        let gate = Handle::open_unconfigured(db_path, &settings.connection)?;
        let found = ensure_supported(&gate)?;
        debug!("store {} at schema v{}", db_path.display(), found);
    }
    let handle = Handle::open(db_path, &settings.connection)?;
    with_busy_retry("migrate schema", &settings.connection, || {
        migrate(&handle, SCHEMA_VERSION)
    })?;
    Ok(handle)
}

/// A write transaction holding the writer for its lifetime. Commit with [`WriteTxn::commit`];
/// dropping it uncommitted rolls everything back. A nested one only joins: its commit and
/// rollback leave the decision to the outermost.
pub struct WriteTxn<'r> {
    repo: &'r Repository,
    owner: bool,
    finished: bool,
    // Dropped after `Drop::drop` has rolled back, so no other writer sees a half-open transaction.
    _gate: GateGuard<'r>,
}

impl WriteTxn<'_> {
    fn run<T>(&self, f: impl FnOnce(&Connection, &Path) -> Result<T>) -> Result<T> {
        let handle = self.repo.lock_writer();
        f(handle.conn()?, handle.path())
    }

    /// True when this transaction began the SQLite transaction rather than joining one.
    pub fn is_outermost(&self) -> bool {
        self.owner
    }

    pub fn upsert_row(&self, row: &AssetRow) -> Result<()> {
        self.run(|conn, path| rows::upsert(conn, path, row))
    }

    pub fn batch_insert(&self, batch: &[AssetRow]) -> Result<usize> {
        self.run(|conn, path| rows::upsert_many(conn, path, batch))
    }

    pub fn delete_row(&self, key: &AssetKey) -> Result<bool> {
        self.run(|conn, path| rows::delete(conn, path, key))
    }

    pub fn delete_rows(&self, keys: &[AssetKey]) -> Result<usize> {
        self.run(|conn, path| rows::delete_many(conn, path, keys))
    }

    /// Reads through the writer connection, so it sees this transaction's own changes.
    pub fn get_row(&self, key: &AssetKey) -> Result<Option<AssetRow>> {
        self.run(|conn, path| rows::get(conn, path, key))
    }

    pub fn set_favorite(&self, key: &AssetKey, favorite: bool) -> Result<bool> {
        self.run(|conn, path| rows::set_favorite(conn, path, key, favorite))
    }

    pub fn move_album(&self, from: &str, to: &str) -> Result<usize> {
        self.run(|conn, path| rows::move_album(conn, path, from, to))
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.owner {
            self.run(commit_scope)?;
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        if self.owner {
            self.run(rollback_scope)?;
        }
        Ok(())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if self.owner && !self.finished {
            let handle = self.repo.lock_writer();
            if let Ok(conn) = handle.conn() {
                debug!("rolling back uncommitted write transaction");
                let _ = rollback_scope(conn, handle.path());
            }
        }
    }
}
