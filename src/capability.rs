//! Capability traits the engine is built against: `GitClient` and
//! `FileSystem`. Modeled the way the teacher modeled `Vendor` — a trait
//! implemented on a concrete handle — generalized to a multi-implementation
//! capability so tests can inject a fake without touching real git or disk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::VendorResult;

/// A single entry returned by [`GitClient::list_tree`]. Directories carry a
/// trailing `/` in `path`, matching `spec.md` §6's `GitClient` contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub is_tree: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLogEntry {
    pub hash: String,
    pub short: String,
    pub subject: String,
    pub author: String,
    pub date: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub depth: Option<u32>,
    pub filter: Option<String>,
    pub no_checkout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    pub trailers: Vec<(String, String)>,
}

/// Cooperative cancellation token. Cloning shares the same underlying flag;
/// every long-running operation (fetch/clone, HTTP request, large read)
/// must poll [`CancellationToken::is_cancelled`] at reasonable intervals.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> VendorResult<()> {
        if self.is_cancelled() {
            Err(crate::error::VendorError::validation("operation cancelled"))
        } else {
            Ok(())
        }
    }
}

/// Sink for non-fatal warnings the engine wants surfaced to a caller without
/// aborting (e.g. a lock schema minor-version mismatch, or a `locked=true`
/// fallback to remote resolution). The CLI prints to stderr; tests collect.
pub trait WarningSink: Send + Sync {
    fn warn(&self, message: &str);
}

pub struct NullWarningSink;
impl WarningSink for NullWarningSink {
    fn warn(&self, _message: &str) {}
}

/// The CLI's production sink: prints to stderr, prefixed like the rest of
/// the binary's diagnostics.
pub struct StderrWarningSink;
impl WarningSink for StderrWarningSink {
    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }
}

#[derive(Default)]
pub struct CollectingWarningSink {
    pub messages: std::sync::Mutex<Vec<String>>,
}

impl WarningSink for CollectingWarningSink {
    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// The git capability the engine is built against (`spec.md` §6). All
/// operations take a [`CancellationToken`] so a cancelled root context can
/// propagate down to in-flight subprocesses/libgit2 transfers.
pub trait GitClient: Send + Sync {
    fn init(&self, dir: &Path) -> VendorResult<()>;
    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> VendorResult<()>;
    fn fetch(
        &self,
        dir: &Path,
        reference: &str,
        opts: &FetchOptions,
        cancel: &CancellationToken,
    ) -> VendorResult<()>;
    fn fetch_all(&self, dir: &Path, cancel: &CancellationToken) -> VendorResult<()>;
    fn checkout(&self, dir: &Path, reference: &str) -> VendorResult<()>;
    fn get_head_hash(&self, dir: &Path) -> VendorResult<String>;
    fn clone(
        &self,
        dir: &Path,
        url: &str,
        opts: &CloneOptions,
        cancel: &CancellationToken,
    ) -> VendorResult<()>;
    /// Recursively enumerate the tree at `reference`, rooted at `subdir`
    /// (empty for the whole tree). Paths are relative to `subdir`.
    fn list_tree(&self, dir: &Path, reference: &str, subdir: &str) -> VendorResult<Vec<TreeEntry>>;
    /// Read the raw bytes of a single blob at `reference:path`.
    fn read_blob(&self, dir: &Path, reference: &str, path: &str) -> VendorResult<Vec<u8>>;
    /// Resolve `reference` (branch, tag, or commit-ish) to a full 40-hex
    /// commit hash, without requiring a prior fetch of that exact ref.
    fn resolve_ref(&self, dir: &Path, reference: &str) -> VendorResult<String>;
    fn get_commit_log(
        &self,
        dir: &Path,
        old: &str,
        new: &str,
        max_count: usize,
    ) -> VendorResult<Vec<CommitLogEntry>>;
    /// Prefers a semver-looking tag (`v1.2.3`, then `1.2.3`), else the first
    /// tag found pointing at `hash`, else `None`.
    fn get_tag_for_commit(&self, dir: &Path, hash: &str) -> VendorResult<Option<String>>;
    fn add(&self, dir: &Path, paths: &[PathBuf]) -> VendorResult<()>;
    fn commit(&self, dir: &Path, opts: &CommitOptions) -> VendorResult<String>;
    fn push(&self, dir: &Path, remote: &str, branch: &str) -> VendorResult<()>;
    fn create_branch(&self, dir: &Path, name: &str, base: &str) -> VendorResult<()>;
    fn config_get(&self, dir: &Path, key: &str) -> VendorResult<Option<String>>;
}

/// The filesystem capability the engine is built against. All working-tree
/// mutation goes through this trait so tests can swap in a sandbox.
pub trait FileSystem: Send + Sync {
    fn create_temp_dir(&self) -> VendorResult<PathBuf>;
    fn remove_all(&self, path: &Path) -> VendorResult<()>;
    /// Returns the number of bytes copied.
    fn copy_file(&self, from: &Path, to: &Path) -> VendorResult<u64>;
    fn rooted_read(&self, root: &Path, rel: &Path) -> VendorResult<Vec<u8>>;
    /// Atomic write-through: write to a sibling temp file, then rename into
    /// place. Crash-safe: a reader always sees either the old or the new
    /// contents, never a partial write.
    fn rooted_write(&self, root: &Path, rel: &Path, contents: &[u8]) -> VendorResult<()>;
    fn exists(&self, root: &Path, rel: &Path) -> bool;
}

/// Joins `rel` onto `root`, rejecting any path that would escape `root` via
/// `..` traversal.
pub fn join_rooted(root: &Path, rel: &Path) -> Result<PathBuf, crate::error::PathOutsideRootError> {
    use std::path::Component;

    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(crate::error::PathOutsideRootError);
            }
        }
    }
    Ok(out)
}
