//! Path and filter utilities

use std::path::{Path, PathBuf};

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Path as stored in the DB: forward slashes on every platform.
pub fn path_to_db_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Normalize an album path: forward slashes, no empty/`.` segments, no leading/trailing `/`.
/// The library root itself is `""`.
pub fn normalize_album_path(album: &str) -> String {
    album
        .replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a path relative to its album. Same rules as albums.
pub fn normalize_rel_path(rel: &str) -> String {
    normalize_album_path(rel)
}

/// Last `/`-separated component.
pub fn file_name_of(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

/// Split a library-relative file path into `(album_path, relative_path)`.
/// The album is the containing directory; the relative path is the file name.
pub fn split_library_path(rel: &Path) -> (String, String) {
    let rel = path_to_db_string(rel);
    let rel = normalize_rel_path(&rel);
    match rel.rsplit_once('/') {
        Some((album, name)) => (album.to_string(), name.to_string()),
        None => (String::new(), rel),
    }
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            _ => {
                // macOS resource forks, desktop trash folders
                name.starts_with("._") || name.starts_with(".Trash-")
            }
        }
    } else {
        false
    }
}

/// Returns true if the path should be included in the walk (not excluded).
pub fn should_include_in_walk(path: &Path, root: &Path, exclude_patterns: &[String]) -> bool {
    if path == root {
        return false;
    }
    if is_os_hidden_file(path) {
        return false;
    }
    if exclude_patterns.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    let path_str = path.to_str().unwrap_or("");
    for pattern in exclude_patterns {
        if glob_match(pattern, name) || glob_match(pattern, path_str) {
            return false;
        }
    }
    true
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    // Remove leading '!' if present (negation handled by caller)
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_chars(&p, &t)
}

fn glob_match_chars(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            let rest = &p[1..];
            if rest.is_empty() {
                return true; // trailing * matches everything
            }
            (0..=t.len()).any(|i| glob_match_chars(rest, &t[i..]))
        }
        Some('?') => !t.is_empty() && glob_match_chars(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && glob_match_chars(&p[1..], &t[1..]),
    }
}

/// Check if mtime has changed beyond tolerance window
pub fn mtime_changed(new_mtime: i64, old_mtime: i64, tolerance_ns: i64) -> bool {
    let mtime_diff = (new_mtime - old_mtime).abs();
    mtime_diff > tolerance_ns
}

/// Modification time of `meta` in nanoseconds since epoch (0 if unavailable or pre-epoch).
pub fn mtime_ns_of(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
