//! Dry-run change detection: compare the library tree to the index without writing.

use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::pipeline::collect_entries;
use crate::repository::Repository;
use crate::scan::{pair_live_photos, plan_sync, scan_scope};
use crate::types::{AssetKey, ScanDiff, ScanOpts, StoredSignature};
use crate::utils::{Colors, LIST_THRESHOLD};

fn diff_against(
    root: &Path,
    opts: &ScanOpts,
    stored: &HashMap<AssetKey, StoredSignature>,
) -> Result<ScanDiff> {
    let collected = collect_entries(root, opts)?;
    let mut entries = collected.entries;
    pair_live_photos(&mut entries);
    let plan = plan_sync(entries, stored, opts.mtime_window_ns);
    debug!(
        "report: {} unchanged, {} skipped paths",
        plan.unchanged, collected.skipped
    );
    let mut diff = ScanDiff {
        added: plan.added,
        removed: plan.removed,
        modified: plan.modified,
    };
    diff.added.sort();
    diff.modified.sort();
    diff.removed.sort();
    Ok(diff)
}

/// Compare the tree under `root` to the index. Keys in each category are sorted.
pub fn report_dir(repo: &Repository, root: &Path, opts: &ScanOpts) -> Result<ScanDiff> {
    let stored = repo.load_signatures(&scan_scope(opts))?;
    diff_against(root, opts, &stored)
}

/// [`report_dir`] over the root the repository was opened for.
pub fn report_library(repo: &Repository, opts: &ScanOpts) -> Result<ScanDiff> {
    let root = repo
        .library_root()
        .ok_or_else(|| {
            IndexError::unavailable(
                "report library",
                repo.db_path(),
                "repository was opened by path; use report_dir with an explicit root",
            )
        })?
        .to_path_buf();
    report_dir(repo, &root, opts)
}

/// Report for a library that has no index yet: every media file is added. Creates nothing.
pub fn report_unindexed(root: &Path, opts: &ScanOpts) -> Result<ScanDiff> {
    diff_against(root, opts, &HashMap::new())
}

/// Print a one-line summary and, with `list`, up to [`LIST_THRESHOLD`] keys per category.
pub fn print_diff(diff: &ScanDiff, list: bool) {
    if diff.is_empty() {
        info!("No changes detected.");
        return;
    }
    info!(
        "{} | {} | {}",
        Colors::colorize(Colors::ADDED, &format!("Added: {}", diff.added.len())),
        Colors::colorize(Colors::REMOVED, &format!("Removed: {}", diff.removed.len())),
        Colors::colorize(Colors::MODIFIED, &format!("Modified: {}", diff.modified.len()))
    );
    if !list {
        return;
    }
    print_keys("+", Colors::ADDED, &diff.added);
    print_keys("-", Colors::REMOVED, &diff.removed);
    print_keys("~", Colors::MODIFIED, &diff.modified);
}

fn print_keys(marker: &str, color: &str, keys: &[AssetKey]) {
    for key in keys.iter().take(LIST_THRESHOLD) {
        println!("{}", Colors::colorize(color, &format!("{marker} {key}")));
    }
    if keys.len() > LIST_THRESHOLD {
        println!("  ... and {} more", keys.len() - LIST_THRESHOLD);
    }
}
