//! Pipeline context: shared data passed into the walk thread and the metadata workers.

use crate::Entry;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::types::ScanOpts;
use crate::utils::config::PackagePaths;

/// Paths skipped during the walk, with the reason.
pub type SkippedPaths = Arc<Mutex<Vec<(PathBuf, String)>>>;

/// First error seen in strict mode.
pub type FirstError = Arc<Mutex<Option<String>>>;

/// Lock a pipeline mutex; a panicked worker only leaves a partial list behind.
pub fn lock_shared<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared context for the walk + metadata pipeline. Built in `run_pipeline` and passed
/// into the walk thread so the walk loop has roots, exclude, strict, and error/skip state.
pub struct PipelineContext {
    /// Library root. Album and relative paths are computed against it.
    pub root: PathBuf,
    /// Where the walk starts: the root, or one album directory under it.
    pub walk_root: PathBuf,
    pub exclude: Vec<String>,
    pub strict: bool,
    pub follow_links: bool,
    pub first_error: FirstError,
    pub skipped_paths: SkippedPaths,
}

/// What [`collect_entries`](super::collect_entries) gathered.
#[derive(Debug, Default)]
pub struct CollectedEntries {
    pub entries: Vec<Entry>,
    /// Media paths the walk sent to the workers.
    pub paths_seen: usize,
    pub skipped: usize,
}

/// Handles returned by [`run_pipeline`](super::run_pipeline): receive entries, then join.
pub struct PipelineHandles {
    pub entry_rx: Receiver<Entry>,
    pub path_count_rx: Receiver<usize>,
    pub walk_handle: JoinHandle<usize>,
    pub worker_handles: Vec<JoinHandle<()>>,
    pub first_error: FirstError,
    pub skipped_paths: SkippedPaths,
}

/// Channels and shared state. Walk thread gets path_tx, path_count_tx, ctx; workers get path_rx, entry_tx.
pub struct PipelineChannels {
    pub path_tx: Sender<PathBuf>,
    pub path_rx: Receiver<PathBuf>,
    pub entry_tx: Sender<Entry>,
    pub entry_rx: Receiver<Entry>,
    pub path_count_tx: Sender<usize>,
    pub path_count_rx: Receiver<usize>,
    pub first_error: FirstError,
    pub skipped_paths: SkippedPaths,
    pub ctx: PipelineContext,
}

pub fn create_pipeline_channels(
    root: &Path,
    walk_root: &Path,
    opts: &ScanOpts,
    channel_cap: usize,
) -> PipelineChannels {
    let (path_tx, path_rx) = bounded::<PathBuf>(channel_cap);
    let (entry_tx, entry_rx) = bounded::<Entry>(channel_cap);
    let (path_count_tx, path_count_rx) = bounded::<usize>(1);
    let first_error: FirstError = Arc::new(Mutex::new(None));
    let skipped_paths: SkippedPaths = Arc::new(Mutex::new(Vec::new()));

    let mut exclude = PackagePaths::get().default_exclude_patterns();
    exclude.extend(opts.exclude.iter().cloned());

    let ctx = PipelineContext {
        root: root.to_path_buf(),
        walk_root: walk_root.to_path_buf(),
        exclude,
        strict: opts.strict,
        follow_links: opts.follow_links,
        first_error: Arc::clone(&first_error),
        skipped_paths: Arc::clone(&skipped_paths),
    };

    PipelineChannels {
        path_tx,
        path_rx,
        entry_tx,
        entry_rx,
        path_count_tx,
        path_count_rx,
        first_error,
        skipped_paths,
        ctx,
    }
}
