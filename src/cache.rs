//! Content-addressed hashing and atomic write-through (`spec.md` §4.5).
//!
//! Keyed on `path -> (mtime, size) -> sha256` so two different vendors
//! materializing byte-identical files pay for one hash computation, and so
//! re-running `sync` with no upstream changes doesn't re-hash every file on
//! disk.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{VendorError, VendorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct FileStamp {
    mtime_secs: i64,
    mtime_nanos: u32,
    size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoEntry {
    stamp: FileStamp,
    sha256: String,
}

/// Memoizes file content hashes. `no_cache` mode bypasses both the
/// in-memory table and any on-disk persistence (`spec.md` §4.1 edge case).
#[derive(Debug, Default)]
pub struct ContentCache {
    memo: HashMap<PathBuf, MemoEntry>,
    persist_path: Option<PathBuf>,
    no_cache: bool,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_no_cache() -> Self {
        Self {
            no_cache: true,
            ..Self::default()
        }
    }

    /// Load a persisted memo table from `path` (missing/corrupt files are
    /// treated as an empty cache, never a fatal error).
    pub fn load(path: &Path) -> Self {
        let mut cache = Self {
            persist_path: Some(path.to_path_buf()),
            ..Self::default()
        };
        if let Ok(raw) = fs::read(path)
            && let Ok(memo) = serde_json::from_slice::<HashMap<PathBuf, MemoEntry>>(&raw)
        {
            cache.memo = memo;
        }
        cache
    }

    pub fn persist(&self) -> VendorResult<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&self.memo)?;
        atomic_write(path, &json)?;
        Ok(())
    }

    /// Returns the hex SHA-256 of `path`'s contents, using the memo table
    /// when the file's `(mtime, size)` stamp hasn't changed. Returns the
    /// "missing" error kind ([`io::ErrorKind::NotFound`]) when `path` does
    /// not exist.
    pub fn compute_file_checksum(&mut self, path: &Path) -> VendorResult<String> {
        let metadata = fs::metadata(path)?;
        let stamp = stamp_of(&metadata);

        if !self.no_cache
            && let Some(entry) = self.memo.get(path)
            && entry.stamp == stamp
        {
            return Ok(entry.sha256.clone());
        }

        let digest = hash_file(path)?;
        if !self.no_cache {
            self.memo.insert(
                path.to_path_buf(),
                MemoEntry {
                    stamp,
                    sha256: digest.clone(),
                },
            );
        }
        Ok(digest)
    }

    /// Hashes `contents` directly (used before a file hits disk) without
    /// touching the memo table.
    pub fn hash_bytes(contents: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(contents);
        hex::encode(hasher.finalize())
    }

    /// Writes `contents` to `path` via a sibling temp file + rename, then
    /// memoizes the resulting hash so a subsequent `compute_file_checksum`
    /// is free. Returns the hex SHA-256 of the bytes written.
    pub fn write_through(&mut self, path: &Path, contents: &[u8]) -> VendorResult<String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(path, contents)?;
        let digest = Self::hash_bytes(contents);
        if !self.no_cache {
            let metadata = fs::metadata(path)?;
            self.memo.insert(
                path.to_path_buf(),
                MemoEntry {
                    stamp: stamp_of(&metadata),
                    sha256: digest.clone(),
                },
            );
        }
        Ok(digest)
    }
}

fn stamp_of(metadata: &fs::Metadata) -> FileStamp {
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let since_epoch = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    FileStamp {
        mtime_secs: since_epoch.as_secs() as i64,
        mtime_nanos: since_epoch.subsec_nanos(),
        size: metadata.len(),
    }
}

fn hash_file(path: &Path) -> VendorResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Crash-safe write: write to `path` with a `.tmp-<pid>` suffix, flush, then
/// rename into place. A reader never observes a partially written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> VendorResult<()> {
    let tmp_path = path.with_extension(format!(
        "tmp-{}",
        std::process::id()
    ));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn compute_file_checksum_matches_manual_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"hello").unwrap();

        let mut cache = ContentCache::new();
        let digest = cache.compute_file_checksum(&path).unwrap();
        assert_eq!(digest, ContentCache::hash_bytes(b"hello"));
    }

    #[test]
    fn compute_file_checksum_missing_file_errors() {
        let mut cache = ContentCache::new();
        let err = cache
            .compute_file_checksum(Path::new("/nonexistent/path/file.txt"))
            .unwrap_err();
        assert!(matches!(err, VendorError::Io(_)));
    }

    #[test]
    fn write_through_round_trips_with_compute_file_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let mut cache = ContentCache::new();
        let written_digest = cache.write_through(&path, b"vendored bytes").unwrap();
        let read_digest = cache.compute_file_checksum(&path).unwrap();
        assert_eq!(written_digest, read_digest);
    }

    #[test]
    fn no_cache_mode_still_computes_correct_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"data").unwrap();

        let mut cache = ContentCache::with_no_cache();
        let digest = cache.compute_file_checksum(&path).unwrap();
        assert_eq!(digest, ContentCache::hash_bytes(b"data"));
    }

    #[test]
    fn identical_bytes_from_different_paths_hash_the_same() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"shared content").unwrap();
        fs::write(&b, b"shared content").unwrap();

        let mut cache = ContentCache::new();
        assert_eq!(
            cache.compute_file_checksum(&a).unwrap(),
            cache.compute_file_checksum(&b).unwrap()
        );
    }

    #[test]
    fn persist_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("file.txt");
        fs::write(&file_path, b"hello").unwrap();
        let cache_path = dir.path().join("cache.json");

        let mut cache = ContentCache::load(&cache_path);
        cache.compute_file_checksum(&file_path).unwrap();
        cache.persist().unwrap();

        let reloaded = ContentCache::load(&cache_path);
        assert!(reloaded.memo.contains_key(&file_path));
    }
}
