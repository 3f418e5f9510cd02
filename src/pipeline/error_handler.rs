use std::path::Path;

use crate::error::{IndexError, Result};
use crate::types::ScanOpts;

use super::context::{FirstError, SkippedPaths, lock_shared};

/// Check pipeline result: in strict mode the first error (or any skipped path) fails the
/// scan; otherwise skipped paths are logged. Returns the number skipped.
/// Call after joining walk and workers.
pub fn check_for_initial_error_or_skipped_paths(
    opts: &ScanOpts,
    root: &Path,
    first_error: &FirstError,
    skipped_paths: &SkippedPaths,
) -> Result<usize> {
    let skipped = lock_shared(skipped_paths);
    if opts.strict {
        let msg = lock_shared(first_error)
            .take()
            .or_else(|| skipped.first().map(|(p, m)| format!("{}: {}", p.display(), m)));
        if let Some(msg) = msg {
            return Err(IndexError::io(
                "walk library",
                root,
                std::io::Error::other(msg),
            ));
        }
    }
    if !skipped.is_empty() {
        log::warn!(
            "Skipped {} paths due to permission errors or access issues",
            skipped.len()
        );
        for (p, msg) in skipped.iter() {
            log::debug!("  skipped: {} ({})", p.display(), msg);
        }
    }
    Ok(skipped.len())
}
