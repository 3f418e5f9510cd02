use log::debug;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::pipeline;
use crate::types::ScanOpts;
use crate::utils::config::STREAMING_CHANNEL_CAP;

/// Start the walk + metadata pipeline. Returns receiver and handles; caller receives from
/// `entry_rx` and must join `walk_handle` and `worker_handles` when done.
pub fn run_pipeline(root: &Path, opts: &ScanOpts) -> Result<pipeline::PipelineHandles> {
    let (root, walk_root, num_threads) = setup_pipeline_roots(root, opts)?;

    let channels =
        pipeline::create_pipeline_channels(&root, &walk_root, opts, STREAMING_CHANNEL_CAP);

    let walk_handle =
        pipeline::spawn_walk_thread(channels.path_tx, channels.path_count_tx, channels.ctx);

    let worker_handles = pipeline::spawn_metadata_workers(
        channels.path_rx,
        &channels.entry_tx,
        &root,
        &channels.skipped_paths,
        num_threads,
    );

    // Dropping the last sender closes the channel so workers exit.
    drop(channels.entry_tx);

    Ok(pipeline::PipelineHandles {
        entry_rx: channels.entry_rx,
        path_count_rx: channels.path_count_rx,
        walk_handle,
        worker_handles,
        first_error: channels.first_error,
        skipped_paths: channels.skipped_paths,
    })
}

/// Canonicalize the library root, resolve the walk root (one album or the whole library),
/// and pick the worker count.
pub fn setup_pipeline_roots(root: &Path, opts: &ScanOpts) -> Result<(PathBuf, PathBuf, usize)> {
    let root = root
        .canonicalize()
        .map_err(|e| IndexError::io("open library root", root, e))?;
    if !root.is_dir() {
        return Err(IndexError::io(
            "open library root",
            &root,
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        ));
    }
    let walk_root = match opts.album.as_deref() {
        Some(album) if !album.trim_matches('/').is_empty() => root.join(album.trim_matches('/')),
        _ => root.clone(),
    };
    let num_threads = opts
        .num_threads
        .unwrap_or_else(rayon::current_num_threads)
        .max(1);
    debug!(
        "pipeline: root {}, walk {}, {} workers",
        root.display(),
        walk_root.display(),
        num_threads
    );
    Ok((root, walk_root, num_threads))
}

/// Collect every media entry under the walk root. All filesystem reads happen here, before
/// any write transaction opens. Walk → path channel → workers (metadata) → entry channel → Vec.
pub fn collect_entries(root: &Path, opts: &ScanOpts) -> Result<pipeline::CollectedEntries> {
    let (_, walk_root, _) = setup_pipeline_roots(root, opts)?;
    if !walk_root.exists() {
        debug!("walk root {} does not exist; nothing to collect", walk_root.display());
        return Ok(pipeline::CollectedEntries::default());
    }

    let pipeline::PipelineHandles {
        entry_rx,
        path_count_rx: _path_count_rx,
        walk_handle,
        worker_handles,
        first_error,
        skipped_paths,
    } = run_pipeline(root, opts)?;

    let mut entries = Vec::new();
    while let Ok(entry) = entry_rx.recv() {
        entries.push(entry);
    }
    debug!(
        "main: channel closed, total {} entries (metadata phase done)",
        entries.len()
    );

    let paths_seen = walk_handle
        .join()
        .map_err(|_| IndexError::unavailable("walk library", root, "walk thread panicked"))?;
    for h in worker_handles {
        let _ = h.join();
    }

    let skipped =
        pipeline::check_for_initial_error_or_skipped_paths(opts, root, &first_error, &skipped_paths)?;

    // Worker order is nondeterministic; keep batches reproducible.
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(pipeline::CollectedEntries {
        entries,
        paths_seen,
        skipped,
    })
}
