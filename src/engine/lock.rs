//! Cross-process sidecar locks. `<dir>/<name>.lock` carries an OS advisory lock plus the
//! owner's pid, a random token, and the acquisition time. The OS drops the advisory lock when
//! its owner exits; a lock still held past the stale window, or by a pid that no longer
//! exists, is stolen by unlinking the file and locking a fresh one.
//!
//! Acquire, steal, and release all run under an exclusive lock on `<dir>/<name>.guard`, so two
//! processes can never both decide the same file is theirs.

use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::engine::hashing::to_hex;
use crate::error::{IndexError, Result};
use crate::utils::config::LockConsts;

/// Contents of a lock file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub token: String,
    pub acquired_at_ms: u64,
}

/// A held sidecar lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
    /// Keeps the advisory lock; `None` once released.
    file: Option<File>,
}

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn new_token() -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    hasher.update(&nanos.to_le_bytes());
    to_hex(&hasher.finalize().as_bytes()[..16])
}

/// Lock names become file names; keep them to a safe character set.
fn lock_file_name(name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{clean}.lock")
}

/// Lock file path for `name` under `dir`.
pub fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(lock_file_name(name))
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

pub fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Whether a lock file whose advisory lock is held may be stolen anyway.
fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return true;
    };
    match read_lock_info(path) {
        Some(info) => {
            // A holder that forked or leaked its descriptor can outlive the pid in the file.
            if !process_alive(info.pid) {
                debug!("lock {} owner pid {} is gone", path.display(), info.pid);
                return true;
            }
            now_ms().saturating_sub(info.acquired_at_ms) > stale_after.as_millis() as u64
        }
        None => meta
            .modified()
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age > stale_after),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Blocks until this process is the only one touching the lock file. Unlocked on drop.
fn hold_guard(lock_path: &Path) -> Result<File> {
    let guard_path = lock_path.with_extension("guard");
    let guard = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&guard_path)
        .map_err(|e| IndexError::io("open lock guard", &guard_path, e))?;
    guard
        .lock_exclusive()
        .map_err(|e| IndexError::io("lock guard", &guard_path, e))?;
    Ok(guard)
}

fn write_info(file: &mut File, path: &Path) -> Result<LockInfo> {
    let info = LockInfo {
        pid: std::process::id(),
        token: new_token(),
        acquired_at_ms: now_ms(),
    };
    let body = serde_json::to_vec(&info)?;
    file.set_len(0)
        .and_then(|_| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(&body))
        .and_then(|_| file.sync_all())
        .map_err(|e| IndexError::io("write lock file", path, e))?;
    Ok(info)
}

impl FileLock {
    /// Acquire `<dir>/<name>.lock`, waiting up to `timeout`. Fails with `LockTimeout`.
    pub fn acquire(dir: &Path, name: &str, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let started = Instant::now();
        let poll = Duration::from_millis(LockConsts::POLL_INTERVAL_MS);
        loop {
            if let Some(lock) = Self::try_acquire(dir, name, stale_after)? {
                return Ok(lock);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(IndexError::LockTimeout {
                    name: name.to_string(),
                    waited,
                });
            }
            thread::sleep(poll.min(timeout - waited));
        }
    }

    /// One attempt. `None` when another live owner holds the lock.
    pub fn try_acquire(dir: &Path, name: &str, stale_after: Duration) -> Result<Option<Self>> {
        fs::create_dir_all(dir).map_err(|e| IndexError::io("create lock directory", dir, e))?;
        let path = lock_path(dir, name);
        let _guard = hold_guard(&path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| IndexError::io("open lock file", &path, e))?;
        match file.try_lock_exclusive() {
            Ok(()) => return Self::take(path, file).map(Some),
            Err(e) if is_contended(&e) => {}
            Err(e) => return Err(IndexError::io("lock file", &path, e)),
        }
        drop(file);
        if !is_stale(&path, stale_after) {
            return Ok(None);
        }

        warn!("stealing stale lock {}", path.display());
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::io("remove stale lock", &path, e)),
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| IndexError::io("create lock file", &path, e))?;
        match file.try_lock_exclusive() {
            Ok(()) => Self::take(path, file).map(Some),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(IndexError::io("lock file", &path, e)),
        }
    }

    /// Record ownership in a file whose advisory lock is already ours.
    fn take(path: PathBuf, mut file: File) -> Result<Self> {
        let info = write_info(&mut file, &path)?;
        debug!("acquired lock {}", path.display());
        Ok(Self {
            path,
            token: info.token,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Remove the lock file if it is still ours, then drop the advisory lock.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let _guard = hold_guard(&self.path)?;
        match read_lock_info(&self.path) {
            Some(info) if info.token == self.token => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(IndexError::io("release lock", &self.path, e)),
                }
                debug!("released lock {}", self.path.display());
            }
            _ => warn!(
                "lock {} was stolen by another owner; leaving it",
                self.path.display()
            ),
        }
        drop(file);
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("{e}");
        }
    }
}
