use clap::Parser;
use std::path::PathBuf;

use crate::utils::config::PackagePaths;

struct DefaultArgs;

impl DefaultArgs {
    pub const DIR: &'static str = ".";
}

/// Keep a photo library's asset index in sync with the files on disk.
#[derive(Clone, Parser)]
#[command(name = "photodex")]
#[command(about = "Sync a photo library's index; use --dry-run to compare without writing.")]
pub struct Cli {
    /// Library root. Default: current directory.
    #[arg(value_name = "DIR", default_value = DefaultArgs::DIR)]
    pub dir: PathBuf,

    /// Path to the index file. Default: `.photodex/global_index.db` in DIR.
    #[arg(long, short)]
    pub db: Option<PathBuf>,

    /// Compare to the index and report added/removed/modified; do not write to the index.
    #[arg(long)]
    pub dry_run: bool,

    /// Only scan this album (a directory relative to DIR) and everything below it.
    #[arg(long, short = 'a')]
    pub album: Option<String>,

    /// List each changed asset (up to a fixed number per category).
    #[arg(long, short = 'l', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub list: Option<bool>,

    /// Verbose output and a progress bar.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Compute a blake3 content hash for new and changed files.
    #[arg(long, short = 'c', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub hash: Option<bool>,

    /// Follow symbolic links.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub follow_links: Option<bool>,

    /// Mtime tolerance window in seconds. Files within this window are considered unchanged.
    #[arg(long, short = 'm', value_parser = clap::value_parser!(i64))]
    pub mtime_window: Option<i64>,

    /// Exclude patterns (glob syntax). Can specify multiple: -e pattern1 pattern2 pattern3
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Strict mode: fail on the first permission or read error instead of skipping.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,
}

impl Cli {
    /// The index path, defaulting to the package's store under DIR.
    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| PackagePaths::get().db_path(&self.dir))
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}
