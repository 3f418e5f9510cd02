//! Walk loop: consumes walkdir results, sends media file paths to path_tx, handles strict/skipped.

use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use walkdir::WalkDir;

use crate::engine::tools::should_include_in_walk;
use crate::types::MediaType;

use super::context::{PipelineContext, lock_shared};

/// One result from a directory walk: either a path to consider or an error with optional path.
pub enum WalkOutcome {
    Ok(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`]. Directories are dropped here.
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> Option<WalkOutcome> {
    match r {
        Ok(entry) if entry.file_type().is_dir() => None,
        Ok(entry) => Some(WalkOutcome::Ok(entry.into_path())),
        Err(err) => Some(WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        }),
    }
}

/// Known media extension (case-insensitive).
pub fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(MediaType::from_extension)
        .is_some()
}

pub fn spawn_walk_thread(
    path_tx: Sender<PathBuf>,
    path_count_tx: Sender<usize>,
    ctx: PipelineContext,
) -> JoinHandle<usize> {
    thread::spawn(move || {
        let walk_root = ctx.walk_root.clone();
        let exclude = ctx.exclude.clone();
        // Excluded directories are pruned, not just filtered, so nothing under them is visited.
        let iter = WalkDir::new(&walk_root)
            .follow_links(ctx.follow_links)
            .into_iter()
            .filter_entry(move |e| {
                e.depth() == 0 || should_include_in_walk(e.path(), &walk_root, &exclude)
            })
            .filter_map(to_outcome_walkdir);
        run_walk_loop(path_tx, path_count_tx, ctx, iter)
    })
}

/// Run the walk loop: consume `iter`, send media paths to `path_tx`, handle errors (strict →
/// set first_error and break; else record in skipped_paths). Sends the count on
/// `path_count_tx` and drops `path_tx` when done. Returns the count of paths sent.
pub fn run_walk_loop<I>(
    path_tx: Sender<PathBuf>,
    path_count_tx: Sender<usize>,
    ctx: PipelineContext,
    iter: I,
) -> usize
where
    I: Iterator<Item = WalkOutcome>,
{
    let mut count = 0_usize;
    let mut last_path: Option<PathBuf> = None;
    for outcome in iter {
        match outcome {
            WalkOutcome::Ok(path) => {
                if !has_media_extension(&path) {
                    continue;
                }
                last_path = Some(path.clone());
                if path_tx.send(path).is_err() {
                    break;
                }
                count += 1;
            }
            WalkOutcome::Err { msg, path } => {
                if ctx.strict {
                    let _ = lock_shared(&ctx.first_error).get_or_insert_with(|| msg);
                    break;
                }
                let to_push = path.unwrap_or_else(|| {
                    PathBuf::from(format!(
                        "<no-path, last was {}>",
                        last_path
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "<none>".to_string())
                    ))
                });
                log::debug!("walk: skipping {}: {}", to_push.display(), msg);
                lock_shared(&ctx.skipped_paths).push((to_push, msg));
            }
        }
    }
    let _ = path_count_tx.send(count);
    drop(path_tx);
    count
}
