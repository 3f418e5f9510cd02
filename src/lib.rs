//! Photodex: a disposable SQLite index of a photo library, kept in sync with the files on disk.
//!
//! The index is a cache. Any error it reports means "this operation failed", never "the
//! process must stop"; the worst case is a rebuild from the library itself.

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod repository;
pub mod scan;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::db_ops::{
    AlbumScope, AssetFilters, ProbeResult, RecoveryOutcome, RecoveryReport, RecoveryStage, Sort,
    SortKey, SortOrder,
};
pub use engine::lock::FileLock;
pub use error::{IndexError, Result};
pub use repository::{PageQuery, PageResult, Repository, WriteTxn};
pub use scan::{ScanControl, scan_dir, scan_library};
pub use utils::config::{ConnectionSettings, StoreSettings};

use log::debug;
use std::path::Path;

/// Open (creating, migrating or recovering as needed) the index for the library at `library_root`.
pub fn open(library_root: &Path) -> Result<Repository> {
    let repo = Repository::open(library_root)?;
    debug!(
        "{} opened {}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        repo.db_path().display()
    );
    Ok(repo)
}
