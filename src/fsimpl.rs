//! [`FileSystem`] backed by the real filesystem, rooted so callers can't
//! escape the project root (`capability::join_rooted`) and writing through
//! the same crash-safe temp-file-then-rename idiom as [`crate::cache`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::capability::{join_rooted, FileSystem};
use crate::error::VendorResult;

pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFileSystem {
    fn create_temp_dir(&self) -> VendorResult<PathBuf> {
        let dir = tempfile::Builder::new().prefix("git-vendor-").tempdir()?;
        Ok(dir.into_path())
    }

    fn remove_all(&self, path: &Path) -> VendorResult<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> VendorResult<u64> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::copy(from, to)?)
    }

    fn rooted_read(&self, root: &Path, rel: &Path) -> VendorResult<Vec<u8>> {
        let path = join_rooted(root, rel)?;
        Ok(fs::read(path)?)
    }

    fn rooted_write(&self, root: &Path, rel: &Path, contents: &[u8]) -> VendorResult<()> {
        let path = join_rooted(root, rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        crate::cache::atomic_write(&path, contents)
    }

    fn exists(&self, root: &Path, rel: &Path) -> bool {
        match join_rooted(root, rel) {
            Ok(path) => path.exists(),
            Err(_) => false,
        }
    }
}
