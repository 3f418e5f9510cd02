//! CLI command handler: sync by default; --dry-run reports changes without writing.

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::arg_parser::Cli;
use crate::engine::progress::{create_counter, progress_callback, refresh_bar};
use crate::error::IndexError;
use crate::report::{print_diff, report_dir, report_unindexed};
use crate::repository::Repository;
use crate::scan::{ScanControl, scan_dir};
use crate::types::ScanOpts;
use crate::utils::{load_store_settings, setup_logging};

fn setup_opts(cli: &Cli) -> ScanOpts {
    setup_logging(cli.is_verbose());
    ScanOpts {
        album: cli.album.clone(),
        with_hash: cli.hash.unwrap_or(false),
        follow_links: cli.follow_links.unwrap_or(false),
        exclude: cli.exclude.clone(),
        mtime_window_ns: cli.mtime_window.unwrap_or(0) * 1_000_000_000, // seconds -> nanoseconds
        strict: cli.strict.unwrap_or(false),
        num_threads: None,
        batch_size: None,
    }
}

fn open_repository(cli: &Cli) -> crate::Result<Repository> {
    match &cli.db {
        Some(db) => Repository::open_at(db, &load_store_settings(&cli.dir)),
        None => Repository::open(&cli.dir),
    }
}

/// Cancel flag flipped by Ctrl+C. The scan stops at the next batch boundary.
fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("could not install Ctrl+C handler: {e}");
    }
    cancel
}

/// Run a scan (default) or a report when --dry-run. Does not touch the index when dry_run.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli);
    let list = cli.list.unwrap_or(false);

    if cli.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NO CHANGES WILL BE APPLIED TO THE INDEX.");
        let diff = if cli.db_path().exists() {
            let repo = open_repository(cli)?;
            let diff = report_dir(&repo, &cli.dir, &opts);
            repo.close()?;
            diff?
        } else {
            debug!("no index at {}; every asset is new", cli.db_path().display());
            report_unindexed(&cli.dir, &opts)?
        };
        print_diff(&diff, list);
        return Ok(());
    }

    let repo = open_repository(cli)?;
    if let Some(report) = repo.last_recovery() {
        warn!(
            "index was damaged and recovered ({:?}, {} rows kept)",
            report.outcome, report.rows_recovered
        );
    }
    let cancel = install_cancel_handler();
    let bar = cli.is_verbose().then(|| create_counter("Syncing"));
    let on_batch = progress_callback(&bar);
    let control = ScanControl {
        cancel: Some(&cancel),
        on_batch: on_batch.as_deref().map(|f| f as &dyn Fn(usize)),
    };

    debug!("Scanning library...");
    let result = scan_dir(&repo, &cli.dir, &opts, &control);
    if let Some(bar) = &bar {
        refresh_bar(bar);
        eprintln!();
    }
    repo.close()?;
    let summary = result?;

    if summary.skipped_paths > 0 {
        warn!("{} paths skipped", summary.skipped_paths);
    }
    if summary.cancelled {
        return Err(IndexError::Cancelled.into());
    }
    info!(
        "{} files seen: {} added, {} modified, {} removed, {} unchanged",
        summary.files_seen, summary.added, summary.modified, summary.removed, summary.unchanged
    );
    Ok(())
}
