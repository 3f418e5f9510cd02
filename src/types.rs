//! Public and internal types for the photodex API and scan pipeline.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::engine::tools::{file_name_of, mtime_changed, normalize_album_path, normalize_rel_path};

/// Free-form EXIF payload. The only loosely-typed part of a row.
pub type ExifMap = BTreeMap<String, serde_json::Value>;

/// Kind of media an asset row describes. Stored as lowercase text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
    LivePhoto,
    Raw,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Photo,
        MediaType::Video,
        MediaType::LivePhoto,
        MediaType::Raw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
            MediaType::LivePhoto => "live_photo",
            MediaType::Raw => "raw",
        }
    }

    pub fn parse(s: &str) -> Option<MediaType> {
        match s {
            "photo" => Some(MediaType::Photo),
            "video" => Some(MediaType::Video),
            "live_photo" => Some(MediaType::LivePhoto),
            "raw" => Some(MediaType::Raw),
            _ => None,
        }
    }

    /// Classify a file by extension (case-insensitive). `None` means "not media, skip it".
    pub fn from_extension(ext: &str) -> Option<MediaType> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "heic" | "heif" | "gif" | "webp" | "tif" | "tiff" | "bmp"
            | "avif" => Some(MediaType::Photo),
            "mov" | "mp4" | "m4v" | "avi" | "mkv" | "3gp" | "webm" => Some(MediaType::Video),
            "dng" | "cr2" | "cr3" | "nef" | "arw" | "raf" | "orf" | "rw2" | "pef" | "srw" => {
                Some(MediaType::Raw)
            }
            _ => None,
        }
    }

    /// Stills that can anchor a Live Photo pair.
    pub fn is_still(&self) -> bool {
        matches!(self, MediaType::Photo | MediaType::LivePhoto)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for MediaType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MediaType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        MediaType::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown media type {s:?}").into()))
    }
}

/// Composite identity of an asset row: `(album_path, relative_path)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub album_path: String,
    pub relative_path: String,
}

impl AssetKey {
    /// Build a key, normalizing separators and trimming slashes on both parts.
    pub fn new(album_path: impl AsRef<str>, relative_path: impl AsRef<str>) -> Self {
        Self {
            album_path: normalize_album_path(album_path.as_ref()),
            relative_path: normalize_rel_path(relative_path.as_ref()),
        }
    }

    /// The same key with both parts normalized. Keys built by struct literal may not be.
    pub fn normalized(&self) -> Self {
        Self::new(&self.album_path, &self.relative_path)
    }

    /// Path of the asset relative to the library root.
    pub fn library_path(&self) -> PathBuf {
        if self.album_path.is_empty() {
            PathBuf::from(&self.relative_path)
        } else {
            PathBuf::from(&self.album_path).join(&self.relative_path)
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.album_path.is_empty() {
            write!(f, "{}", self.relative_path)
        } else {
            write!(f, "{}/{}", self.album_path, self.relative_path)
        }
    }
}

/// One indexed media file. Nullable columns are `Option`s; EXIF is the only free-form payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRow {
    pub album_path: String,
    pub relative_path: String,
    /// Modification time in nanoseconds since epoch.
    pub mtime_ns: i64,
    pub size_bytes: u64,
    /// Lowercase hex blake3 of the file contents, if computed.
    pub content_hash: Option<String>,
    pub media_type: MediaType,
    /// Capture time in seconds since epoch.
    pub timestamp: Option<i64>,
    pub is_favorite: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub exif: ExifMap,
    pub live_group_id: Option<String>,
}

impl AssetRow {
    /// Minimal row with the content signature set and every derived field empty.
    pub fn new(
        key: AssetKey,
        mtime_ns: i64,
        size_bytes: u64,
        media_type: MediaType,
    ) -> Self {
        Self {
            album_path: key.album_path,
            relative_path: key.relative_path,
            mtime_ns,
            size_bytes,
            content_hash: None,
            media_type,
            timestamp: None,
            is_favorite: false,
            width: None,
            height: None,
            exif: ExifMap::new(),
            live_group_id: None,
        }
    }

    /// Normalized key, whatever form the public fields were set in.
    pub fn key(&self) -> AssetKey {
        AssetKey::new(&self.album_path, &self.relative_path)
    }

    /// Last component of `relative_path`; stored denormalized for filename sorting.
    pub fn filename(&self) -> &str {
        file_name_of(&self.relative_path)
    }

}

/// The fields the scan synchronizer compares to decide whether a file must be re-derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredSignature {
    pub mtime_ns: i64,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub media_type: MediaType,
    pub live_group_id: Option<String>,
}

impl StoredSignature {
    /// True when a file with this mtime and size no longer matches the stored signature.
    pub fn is_stale(&self, live_mtime_ns: i64, live_size: u64, mtime_window_ns: i64) -> bool {
        mtime_changed(live_mtime_ns, self.mtime_ns, mtime_window_ns) || live_size != self.size_bytes
    }
}

/// A file seen by the walk, before derived metadata is filled in.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: AssetKey,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    pub mtime_ns: i64,
    pub size: u64,
    pub media_type: MediaType,
    /// Set when the file is one half of a Live Photo pair.
    pub live_group_id: Option<String>,
}

/// Result of comparing a library tree to the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanDiff {
    pub added: Vec<AssetKey>,
    pub removed: Vec<AssetKey>,
    pub modified: Vec<AssetKey>,
}

impl ScanDiff {
    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Outcome of one scan run. Also written to the `last_scan.json` sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub files_seen: usize,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub batches: usize,
    pub skipped_paths: usize,
    pub cancelled: bool,
}

/// Options for a scan or a dry-run report.
#[derive(Clone, Debug, Default)]
pub struct ScanOpts {
    /// Restrict the scan to one album subtree (relative to the library root).
    pub album: Option<String>,
    /// Compute a blake3 content hash for new/changed files.
    pub with_hash: bool,
    /// Follow symbolic links.
    pub follow_links: bool,
    /// Exclude patterns (glob syntax, e.g. `*.tmp`, `Exports`).
    pub exclude: Vec<String>,
    /// Mtime tolerance window in nanoseconds.
    pub mtime_window_ns: i64,
    /// Strict mode: fail on first permission/access error instead of skipping.
    pub strict: bool,
    /// Metadata worker thread count. When None, uses rayon's thread count.
    pub num_threads: Option<usize>,
    /// Override the batch size from store settings.
    pub batch_size: Option<usize>,
}
