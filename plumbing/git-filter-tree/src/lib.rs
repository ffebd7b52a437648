//! Filter and enumerate Git tree entries.
//!
//! Two things live here: filtering a tree down to entries matching a set of
//! gitattributes-style glob patterns (used by the `git-filter-tree` binary),
//! and recursively enumerating a tree's blob/tree entries (used by
//! `git-vendor`'s directory [`PathMapping`](https://docs.rs/git-vendor)
//! resolution and by its drift analyzer).

use git2::{Error, ErrorClass, ErrorCode, ObjectType, Repository, Tree};
use globset::{Glob, GlobSetBuilder};

/// One entry produced by [`list_tree_entries`]. `path` is relative to the
/// root the walk started from; directories carry a trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub is_tree: bool,
}

pub trait FilterTree {
    /// Return a new tree containing only the entries of `tree` whose path
    /// matches at least one of `patterns` (gitattributes-style globs).
    fn filter_by_patterns<'repo>(
        &'repo self,
        tree: &Tree<'repo>,
        patterns: &[&str],
    ) -> Result<Tree<'repo>, Error>;
}

impl FilterTree for Repository {
    fn filter_by_patterns<'repo>(
        &'repo self,
        tree: &Tree<'repo>,
        patterns: &[&str],
    ) -> Result<Tree<'repo>, Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| Error::from_str(&format!("invalid pattern `{pattern}`: {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::from_str(&format!("failed to build pattern set: {e}")))?;

        let mut out = self.treebuilder(None)?;
        for entry in tree.iter() {
            let name = entry.name().unwrap_or_default();
            if set.is_match(name) {
                out.insert(name, entry.id(), entry.filemode())?;
            }
        }
        let oid = out.write()?;
        self.find_tree(oid)
    }
}

/// Recursively enumerate every entry under `tree`, producing paths relative
/// to `tree`'s root. Used by `git-vendor` to resolve a directory
/// [`PathMapping`] into one file operation per leaf blob, and by its drift
/// analyzer to walk a vendored subtree.
pub fn list_tree_entries(repo: &Repository, tree: &Tree<'_>) -> Result<Vec<Entry>, Error> {
    let mut out = Vec::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
        let Some(name) = entry.name() else {
            return git2::TreeWalkResult::Ok;
        };
        let path = if root.is_empty() {
            name.to_string()
        } else {
            format!("{}{}", root, name)
        };
        match entry.kind() {
            Some(ObjectType::Tree) => out.push(Entry {
                path: format!("{path}/"),
                is_tree: true,
            }),
            Some(ObjectType::Blob) => out.push(Entry { path, is_tree: false }),
            _ => {}
        }
        git2::TreeWalkResult::Ok
    })?;
    let _ = repo; // kept for API symmetry / future submodule handling
    Ok(out)
}

/// Look up `subdir` (empty for the tree root) inside `tree` and return the
/// sub-tree at that path, or a [`NotFound`](ErrorCode::NotFound) error.
pub fn subtree_at<'repo>(
    repo: &'repo Repository,
    tree: &Tree<'repo>,
    subdir: &str,
) -> Result<Tree<'repo>, Error> {
    if subdir.is_empty() {
        return Ok(tree.clone());
    }
    let entry = tree.get_path(std::path::Path::new(subdir)).map_err(|_| {
        Error::new(
            ErrorCode::NotFound,
            ErrorClass::Tree,
            format!("path `{subdir}` not found in tree"),
        )
    })?;
    entry.to_object(repo)?.peel_to_tree()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo_with_files(files: &[(&str, &[u8])]) -> (Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test").unwrap();
            config.set_str("user.email", "test@test").unwrap();
        }
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&full, content).unwrap();
        }
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let oid = index.write_tree().unwrap();
        let tree = repo.find_tree(oid).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        (repo, dir)
    }

    #[test]
    fn filter_by_patterns_keeps_only_matches() {
        let (repo, _dir) = init_repo_with_files(&[
            ("a.txt", b"a"),
            ("b.rs", b"b"),
            ("c.txt", b"c"),
        ]);
        let head = repo.head().unwrap().peel_to_tree().unwrap();
        let filtered = repo.filter_by_patterns(&head, &["*.txt"]).unwrap();
        let names: Vec<_> = filtered.iter().map(|e| e.name().unwrap().to_string()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"c.txt".to_string()));
    }

    #[test]
    fn list_tree_entries_recurses_into_directories() {
        let (repo, _dir) = init_repo_with_files(&[
            ("include/foo.h", b"foo"),
            ("include/nested/bar.h", b"bar"),
            ("README", b"r"),
        ]);
        let head = repo.head().unwrap().peel_to_tree().unwrap();
        let entries = list_tree_entries(&repo, &head).unwrap();
        let blob_paths: Vec<_> = entries
            .iter()
            .filter(|e| !e.is_tree)
            .map(|e| e.path.clone())
            .collect();
        assert!(blob_paths.contains(&"include/foo.h".to_string()));
        assert!(blob_paths.contains(&"include/nested/bar.h".to_string()));
        assert!(blob_paths.contains(&"README".to_string()));
    }

    #[test]
    fn subtree_at_resolves_nested_path() {
        let (repo, _dir) = init_repo_with_files(&[("include/foo.h", b"foo")]);
        let head = repo.head().unwrap().peel_to_tree().unwrap();
        let sub = subtree_at(&repo, &head, "include").unwrap();
        let entries = list_tree_entries(&repo, &sub).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "foo.h");
    }

    #[test]
    fn subtree_at_missing_path_errors() {
        let (repo, _dir) = init_repo_with_files(&[("a.txt", b"a")]);
        let head = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(subtree_at(&repo, &head, "does/not/exist").is_err());
    }
}
