//! Incremental scan synchronizer: walk the library, compare against stored signatures, re-derive
//! only new or changed files, write them in bounded batches, then delete what vanished.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::db_ops::AlbumScope;
use crate::engine::hashing::{content_hash_hex, live_group_id};
use crate::error::{IndexError, Result};
use crate::pipeline::collect_entries;
use crate::repository::Repository;
use crate::types::{AssetKey, AssetRow, Entry, MediaType, ScanOpts, ScanSummary, StoredSignature};
use crate::utils::config::PackagePaths;

/// Sidecar lock guarding `last_scan.json`.
pub const LAST_SCAN_LOCK: &str = "last_scan";

/// Optional hooks for a running scan.
#[derive(Default)]
pub struct ScanControl<'a> {
    /// Checked between batches only; a set flag stops further writes and skips deletes.
    pub cancel: Option<&'a AtomicBool>,
    /// Called with the number of rows in each committed batch.
    pub on_batch: Option<&'a dyn Fn(usize)>,
}

impl ScanControl<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// What the `last_scan.json` sidecar holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastScanRecord {
    pub finished_at_ms: u64,
    pub album: Option<String>,
    pub summary: ScanSummary,
}

/// The comparison of a walk against stored signatures.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// New or changed entries, in key order, to be re-derived and written.
    pub pending: Vec<Entry>,
    pub added: Vec<AssetKey>,
    pub modified: Vec<AssetKey>,
    pub removed: Vec<AssetKey>,
    pub unchanged: usize,
}

/// Scope covered by a scan with these options.
pub fn scan_scope(opts: &ScanOpts) -> AlbumScope {
    match opts.album.as_deref().map(|a| a.trim_matches('/')) {
        Some(album) if !album.is_empty() => AlbumScope::subtree(album),
        _ => AlbumScope::library(),
    }
}

/// Lowercased file stem used to match Live Photo halves.
fn pairing_stem(relative_path: &str) -> String {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_lowercase(),
        _ => name.to_lowercase(),
    }
}

/// Pair stills with a video of the same stem in the same album. Paired stills become
/// `LivePhoto`; both halves get the same group id. Raw files never pair.
pub fn pair_live_photos(entries: &mut [Entry]) {
    let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (i, e) in entries.iter().enumerate() {
        if matches!(e.media_type, MediaType::Raw) {
            continue;
        }
        groups
            .entry((e.key.album_path.clone(), pairing_stem(&e.key.relative_path)))
            .or_default()
            .push(i);
    }
    for ((album, stem), members) in groups {
        let has_still = members.iter().any(|&i| entries[i].media_type.is_still());
        let has_video = members
            .iter()
            .any(|&i| entries[i].media_type == MediaType::Video);
        if !(has_still && has_video) {
            continue;
        }
        let group = live_group_id(&album, &stem);
        for i in members {
            if entries[i].media_type.is_still() {
                entries[i].media_type = MediaType::LivePhoto;
            }
            entries[i].live_group_id = Some(group.clone());
        }
    }
}

fn needs_update(entry: &Entry, stored: &StoredSignature, mtime_window_ns: i64) -> bool {
    stored.is_stale(entry.mtime_ns, entry.size, mtime_window_ns)
        || entry.media_type != stored.media_type
        || entry.live_group_id != stored.live_group_id
}

/// Compare walked entries (already paired) with stored signatures.
pub fn plan_sync(
    entries: Vec<Entry>,
    stored: &HashMap<AssetKey, StoredSignature>,
    mtime_window_ns: i64,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let mut seen: HashSet<AssetKey> = HashSet::with_capacity(entries.len());
    for entry in entries {
        seen.insert(entry.key.clone());
        match stored.get(&entry.key) {
            None => {
                plan.added.push(entry.key.clone());
                plan.pending.push(entry);
            }
            Some(sig) if needs_update(&entry, sig, mtime_window_ns) => {
                plan.modified.push(entry.key.clone());
                plan.pending.push(entry);
            }
            Some(_) => plan.unchanged += 1,
        }
    }
    plan.removed = stored
        .keys()
        .filter(|k| !seen.contains(*k))
        .cloned()
        .collect();
    plan.removed.sort();
    plan
}

/// Build the row for one pending entry. Only the content hash touches the file again.
fn derive_row(entry: &Entry, with_hash: bool) -> Result<AssetRow> {
    let mut row = AssetRow::new(entry.key.clone(), entry.mtime_ns, entry.size, entry.media_type);
    row.live_group_id = entry.live_group_id.clone();
    if with_hash {
        row.content_hash = Some(content_hash_hex(&entry.abs_path, entry.size)?);
    }
    Ok(row)
}

/// Derive rows for pending entries in parallel. Files that vanished or became unreadable since
/// the walk are skipped (strict mode fails instead).
fn derive_rows(pending: &[Entry], opts: &ScanOpts) -> Result<(Vec<AssetRow>, usize)> {
    let results: Vec<(usize, Result<AssetRow>)> = pending
        .par_iter()
        .enumerate()
        .map(|(i, e)| (i, derive_row(e, opts.with_hash)))
        .collect();
    let mut rows = Vec::with_capacity(results.len());
    let mut skipped = 0;
    for (i, result) in results {
        match result {
            Ok(row) => rows.push(row),
            Err(e) if opts.strict => return Err(e),
            Err(e) => {
                warn!("skipping {}: {}", pending[i].key, e);
                skipped += 1;
            }
        }
    }
    Ok((rows, skipped))
}

/// Scan the library the repository was opened for.
pub fn scan_library(repo: &Repository, opts: &ScanOpts, control: &ScanControl<'_>) -> Result<ScanSummary> {
    let root = repo
        .library_root()
        .ok_or_else(|| {
            IndexError::unavailable(
                "scan library",
                repo.db_path(),
                "repository was opened by path; use scan_dir with an explicit root",
            )
        })?
        .to_path_buf();
    scan_dir(repo, &root, opts, control)
}

/// Synchronize the index with the tree under `root`.
pub fn scan_dir(
    repo: &Repository,
    root: &Path,
    opts: &ScanOpts,
    control: &ScanControl<'_>,
) -> Result<ScanSummary> {
    // All filesystem reads happen before the first write transaction.
    let collected = collect_entries(root, opts)?;
    let mut entries = collected.entries;
    pair_live_photos(&mut entries);

    let scope = scan_scope(opts);
    let stored = repo.load_signatures(&scope)?;
    let plan = plan_sync(entries, &stored, opts.mtime_window_ns);
    debug!(
        "scan plan: {} added, {} modified, {} removed, {} unchanged",
        plan.added.len(),
        plan.modified.len(),
        plan.removed.len(),
        plan.unchanged
    );

    let (rows, hash_skipped) = derive_rows(&plan.pending, opts)?;

    let mut summary = ScanSummary {
        files_seen: collected.paths_seen,
        unchanged: plan.unchanged,
        skipped_paths: collected.skipped + hash_skipped,
        ..Default::default()
    };
    let existing: HashSet<&AssetKey> = plan.modified.iter().collect();
    let batch_size = opts
        .batch_size
        .unwrap_or(repo.settings().batch_size)
        .max(1);

    for batch in rows.chunks(batch_size) {
        if control.cancelled() {
            summary.cancelled = true;
            break;
        }
        let n = repo.apply_scanned(batch)?;
        summary.batches += 1;
        for row in batch {
            if existing.contains(&row.key()) {
                summary.modified += 1;
            } else {
                summary.added += 1;
            }
        }
        if let Some(cb) = control.on_batch {
            cb(n);
        }
    }

    if !summary.cancelled && control.cancelled() {
        summary.cancelled = true;
    }
    if summary.cancelled {
        info!(
            "scan cancelled after {} batches; deletes skipped",
            summary.batches
        );
    } else {
        summary.removed = repo.delete_rows(&plan.removed)?;
    }
    repo.checkpoint()?;

    write_last_scan(repo, opts, &summary)?;
    info!(
        "scan done: {} added, {} modified, {} removed, {} unchanged",
        summary.added, summary.modified, summary.removed, summary.unchanged
    );
    Ok(summary)
}

/// Write `last_scan.json` next to the store, under the sidecar lock, via temp file + rename.
fn write_last_scan(repo: &Repository, opts: &ScanOpts, summary: &ScanSummary) -> Result<()> {
    let path = PackagePaths::get().last_scan_path_for_db(repo.db_path());
    let record = LastScanRecord {
        finished_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        album: opts.album.clone(),
        summary: summary.clone(),
    };
    let body = serde_json::to_vec_pretty(&record)?;
    let _lock = repo.sidecar_lock(LAST_SCAN_LOCK, None)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| IndexError::io("write scan summary", &tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| IndexError::io("install scan summary", &path, e))?;
    Ok(())
}

/// Read the `last_scan.json` sidecar, if present.
pub fn read_last_scan(repo: &Repository) -> Result<Option<LastScanRecord>> {
    let path = PackagePaths::get().last_scan_path_for_db(repo.db_path());
    let _lock = repo.sidecar_lock(LAST_SCAN_LOCK, None)?;
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::io("read scan summary", &path, e)),
    }
}
