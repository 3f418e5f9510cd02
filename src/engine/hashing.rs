//! File hashing utilities

use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::utils::config::HashingConsts;

/// Hash a file with blake3. Uses memory-mapped I/O for files above threshold, chunked reading otherwise.
pub fn hash_file(path: &Path, size: u64) -> Result<[u8; 32]> {
    let file = File::open(path).map_err(|e| IndexError::io("hash file", path, e))?;
    let mut hasher = Hasher::new();

    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        // Memory-mapped I/O for large files (Blake3 already uses SIMD internally)
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| IndexError::io("mmap file", path, e))?;
        hasher.update(&mmap);
    } else {
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| IndexError::io("read file", path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(*hasher.finalize().as_bytes())
}

/// Content hash as stored in the index: lowercase hex.
pub fn content_hash_hex(path: &Path, size: u64) -> Result<String> {
    hash_file(path, size).map(|h| to_hex(&h))
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Deterministic Live Photo group id for a pair sharing `stem` inside `album`.
pub fn live_group_id(album: &str, stem: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(album.as_bytes());
    hasher.update(b"\0");
    hasher.update(stem.to_lowercase().as_bytes());
    to_hex(&hasher.finalize().as_bytes()[..8])
}

/// Compare two optional hex hashes for equality
pub fn hash_equals(hash1: &Option<String>, hash2: &Option<String>) -> bool {
    match (hash1, hash2) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}
