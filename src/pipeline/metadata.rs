use crate::Entry;
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crate::engine::tools::{mtime_ns_of, path_relative_to, split_library_path};
use crate::error::{IndexError, Result};
use crate::types::{AssetKey, MediaType};

use super::context::{SkippedPaths, lock_shared};

/// Single metadata worker: read paths from path_rx, stat them into entries, send on entry_tx.
/// Hashing happens later, only for files that need re-deriving.
fn metadata_worker_loop(
    path_rx: Receiver<PathBuf>,
    entry_tx: Sender<Entry>,
    root: PathBuf,
    skipped: SkippedPaths,
) {
    while let Ok(abs_path) = path_rx.recv() {
        match path_to_entry(&abs_path, &root) {
            Ok(Some(entry)) => {
                let _ = entry_tx.send(entry);
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("metadata: skipping {}: {}", abs_path.display(), e);
                lock_shared(&skipped).push((abs_path, e.to_string()));
            }
        }
    }
    drop(entry_tx);
}

/// Spawn metadata workers. Caller must drop its sender after this so workers exit.
pub fn spawn_metadata_workers(
    path_rx: Receiver<PathBuf>,
    entry_tx: &Sender<Entry>,
    root: &Path,
    skipped: &SkippedPaths,
    num_threads: usize,
) -> Vec<JoinHandle<()>> {
    let root = root.to_path_buf();
    (0..num_threads.max(1))
        .map(|_| {
            let path_rx = path_rx.clone();
            let entry_tx = entry_tx.clone();
            let root = root.clone();
            let skipped = skipped.clone();
            thread::spawn(move || metadata_worker_loop(path_rx, entry_tx, root, skipped))
        })
        .collect()
}

/// Stat one path into an [`Entry`]. `None` for anything that is not a regular media file.
/// The album is the directory containing the file, relative to the library root.
pub fn path_to_entry(abs_path: &Path, root: &Path) -> Result<Option<Entry>> {
    let meta = std::fs::metadata(abs_path).map_err(|e| IndexError::io("stat file", abs_path, e))?;
    if !meta.is_file() {
        return Ok(None);
    }
    let Some(media_type) = abs_path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(MediaType::from_extension)
    else {
        return Ok(None);
    };
    let Some(rel) = path_relative_to(abs_path, root) else {
        return Ok(None);
    };
    let (album, name) = split_library_path(&rel);
    Ok(Some(Entry {
        key: AssetKey::new(album, name),
        abs_path: abs_path.to_path_buf(),
        mtime_ns: mtime_ns_of(&meta),
        size: meta.len(),
        media_type,
        live_group_id: None,
    }))
}
