//! Reverse-push pipeline (`spec.md` §4.4): propagate local edits to vendored
//! files back upstream as a branch + pull request on the source repository.
//! Internal vendors are out of scope — they use a separate propagation path
//! this crate does not implement (`spec.md` §9(b)).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;

use crate::cache::ContentCache;
use crate::capability::{
    CancellationToken, CloneOptions, CommitOptions, FetchOptions, FileSystem, GitClient,
};
use crate::error::{VendorError, VendorResult};
use crate::model::{FromSelector, PathMapping, Source, VendorConfig, VendorLock};

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub vendor_name: String,
    /// Restrict consideration to a single destination path, repo-root
    /// relative (matches a key in the lock's `file_hashes`).
    pub file_path: Option<String>,
    pub dry_run: bool,
    /// Used in the branch name and commit trailer; typically the downstream
    /// project's directory name.
    pub downstream_project: String,
}

#[derive(Debug, Clone, Default)]
pub struct BranchPushResult {
    pub reference: String,
    /// Destination path -> upstream source path.
    pub reverse_mapping: BTreeMap<String, String>,
    /// Destination paths whose locked hash no longer matches local content.
    pub modified: Vec<String>,
    pub pushed: bool,
    pub push_branch: Option<String>,
    pub pr_url: Option<String>,
    pub manual_instructions: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub vendor: String,
    pub dry_run: bool,
    pub branches: Vec<BranchPushResult>,
}

impl PushResult {
    pub fn has_changes(&self) -> bool {
        self.branches.iter().any(|b| !b.modified.is_empty())
    }
}

/// `Push(vendor_name, [file_path], dry_run) -> PushResult`.
pub fn push(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    cache: &mut ContentCache,
    project_root: &Path,
    config: &VendorConfig,
    lock: &VendorLock,
    options: &PushOptions,
    cancel: &CancellationToken,
) -> VendorResult<PushResult> {
    let vendor = config
        .find(&options.vendor_name)
        .ok_or_else(|| VendorError::vendor_not_found(&options.vendor_name))?;

    if vendor.source != Source::External {
        return Err(VendorError::compliance_failed(format!(
            "vendor `{}` is internal; reverse-push only applies to external vendors",
            vendor.name
        )));
    }

    let mut result = PushResult {
        vendor: vendor.name.clone(),
        dry_run: options.dry_run,
        branches: Vec::new(),
    };

    for branch in &vendor.branches {
        cancel.check()?;
        let Some(locked) = lock.find(&vendor.name, &branch.reference) else {
            continue;
        };

        let reverse_mapping = build_reverse_mapping(
            &branch.mappings,
            &vendor.name,
            &locked.file_hashes,
        );

        let modified = detect_modified(
            fs,
            cache,
            project_root,
            &reverse_mapping,
            &locked.file_hashes,
            options.file_path.as_deref(),
        )?;

        let mut branch_result = BranchPushResult {
            reference: branch.reference.clone(),
            reverse_mapping: reverse_mapping.clone(),
            modified: modified.clone(),
            ..Default::default()
        };

        if modified.is_empty() || options.dry_run {
            result.branches.push(branch_result);
            continue;
        }

        let scratch = fs.create_temp_dir()?;
        let outcome = push_branch(
            git,
            fs,
            project_root,
            &scratch,
            &vendor.url,
            &branch.reference,
            &modified,
            &reverse_mapping,
            &options.downstream_project,
            cancel,
        );
        fs.remove_all(&scratch)?;
        let (push_branch_name, pr_url, manual_instructions) = outcome?;

        branch_result.pushed = true;
        branch_result.push_branch = Some(push_branch_name);
        branch_result.pr_url = pr_url;
        branch_result.manual_instructions = manual_instructions;
        result.branches.push(branch_result);
    }

    Ok(result)
}

/// Reverse `PathMapping.to -> PathMapping.from` using the lock's recorded
/// destinations, since a directory mapping fans a single `from` out into
/// many destinations only the lock's `file_hashes` enumerate.
fn build_reverse_mapping(
    mappings: &[PathMapping],
    vendor_name: &str,
    file_hashes: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let default_root = super::sync::default_root(vendor_name);
    let mut reverse = BTreeMap::new();

    for mapping in mappings {
        // Position selectors (`:Lstart-Lend`) aren't reversible; a line
        // range pushed upstream would clobber the lines around it.
        let FromSelector::Path(from_path) = mapping.parse_from() else {
            continue;
        };

        let file_dest = mapping.auto_path(false, &default_root);
        if file_hashes.contains_key(&file_dest) {
            reverse.insert(file_dest, from_path);
            continue;
        }

        let dir_dest = mapping.auto_path(true, &default_root);
        let prefix = format!("{}/", dir_dest.trim_end_matches('/'));
        for dest in file_hashes.keys() {
            if let Some(suffix) = dest.strip_prefix(&prefix) {
                let source = format!("{}/{}", from_path.trim_end_matches('/'), suffix);
                reverse.insert(dest.clone(), source);
            }
        }
    }

    reverse
}

/// Missing files are not modifications (`spec.md` §4.4 step 2).
fn detect_modified(
    fs: &dyn FileSystem,
    cache: &mut ContentCache,
    project_root: &Path,
    reverse_mapping: &BTreeMap<String, String>,
    file_hashes: &BTreeMap<String, String>,
    only: Option<&str>,
) -> VendorResult<Vec<String>> {
    let mut modified = Vec::new();
    for dest in reverse_mapping.keys() {
        if let Some(only) = only
            && only != dest
        {
            continue;
        }
        let rel = Path::new(dest.as_str());
        if !fs.exists(project_root, rel) {
            continue;
        }
        let Ok(full) = crate::capability::join_rooted(project_root, rel) else {
            continue;
        };
        let current_hash = cache.compute_file_checksum(&full)?;
        if file_hashes.get(dest) != Some(&current_hash) {
            modified.push(dest.clone());
        }
    }
    modified.sort();
    Ok(modified)
}

#[allow(clippy::too_many_arguments)]
fn push_branch(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    project_root: &Path,
    scratch: &Path,
    url: &str,
    reference: &str,
    modified: &[String],
    reverse_mapping: &BTreeMap<String, String>,
    downstream_project: &str,
    cancel: &CancellationToken,
) -> VendorResult<(String, Option<String>, Option<String>)> {
    git.clone(
        scratch,
        url,
        &CloneOptions {
            depth: Some(1),
            filter: None,
            no_checkout: false,
        },
        cancel,
    )?;
    git.fetch(scratch, reference, &FetchOptions { depth: Some(1) }, cancel)?;

    let push_branch_name = format!(
        "vendor-push/{}/{}",
        downstream_project,
        Utc::now().format("%Y-%m-%d")
    );
    git.create_branch(scratch, &push_branch_name, reference)?;
    git.checkout(scratch, &push_branch_name)
        .map_err(|e| VendorError::checkout(&push_branch_name, downstream_project, Some(e)))?;

    let mut paths = Vec::with_capacity(modified.len());
    for dest in modified {
        let Some(source_path) = reverse_mapping.get(dest) else {
            continue;
        };
        let contents = fs.rooted_read(project_root, Path::new(dest.as_str()))?;
        fs.rooted_write(scratch, Path::new(source_path.as_str()), &contents)?;
        paths.push(PathBuf::from(source_path));
    }

    git.add(scratch, &paths)?;
    let message = format!(
        "vendor-push from {downstream_project}: sync {} file(s)",
        paths.len()
    );
    git.commit(
        scratch,
        &CommitOptions {
            message,
            trailers: vec![("Downstream-Project".to_string(), downstream_project.to_string())],
        },
    )?;
    git.push(scratch, "origin", &push_branch_name)?;

    let (owner_repo, host) = parse_owner_repo(url);

    if gh_available() {
        if let Some((owner, repo)) = &owner_repo {
            if let Some(url) = open_pr_with_gh(
                scratch,
                owner,
                repo,
                reference,
                &push_branch_name,
                downstream_project,
            ) {
                return Ok((push_branch_name, Some(url), None));
            }
        }
    }

    let instructions = manual_instructions(&owner_repo, host, reference, &push_branch_name);
    Ok((push_branch_name, None, Some(instructions)))
}

fn gh_available() -> bool {
    Command::new("gh")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn open_pr_with_gh(
    scratch: &Path,
    owner: &str,
    repo: &str,
    base: &str,
    head: &str,
    downstream_project: &str,
) -> Option<String> {
    let output = Command::new("gh")
        .current_dir(scratch)
        .arg("pr")
        .arg("create")
        .arg("--repo")
        .arg(format!("{owner}/{repo}"))
        .arg("--base")
        .arg(base)
        .arg("--head")
        .arg(head)
        .arg("--title")
        .arg(format!("Vendor push from {downstream_project}"))
        .arg("--body")
        .arg(format!(
            "Automated reverse-push of vendored file edits from `{downstream_project}`."
        ))
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() { None } else { Some(url) }
}

enum Host {
    GitHub,
    GitLab,
    Other,
}

fn parse_owner_repo(url: &str) -> (Option<(String, String)>, Host) {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    for (host_str, host) in [("github.com", Host::GitHub), ("gitlab.com", Host::GitLab)] {
        if let Some(rest) = strip_host(trimmed, host_str) {
            let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
            if segments.len() >= 2 {
                let repo = segments.pop().unwrap().to_string();
                let owner = segments.join("/");
                return (Some((owner, repo)), host);
            }
            return (None, host);
        }
    }
    (None, Host::Other)
}

fn strip_host<'a>(url: &'a str, host: &str) -> Option<&'a str> {
    for scheme in ["https://", "http://", "ssh://git@", "git@"] {
        if let Some(rest) = url.strip_prefix(scheme)
            && let Some(rest) = rest.strip_prefix(host)
        {
            let rest = rest.strip_prefix('/').or_else(|| rest.strip_prefix(':'));
            if let Some(rest) = rest {
                return Some(rest);
            }
        }
    }
    None
}

fn manual_instructions(
    owner_repo: &Option<(String, String)>,
    host: Host,
    base: &str,
    push_branch: &str,
) -> String {
    match (&host, owner_repo) {
        (Host::GitHub, Some((owner, repo))) => format!(
            "`gh` was not found on PATH. The branch `{push_branch}` was pushed upstream; \
             open a pull request manually at \
             https://github.com/{owner}/{repo}/compare/{base}...{push_branch}"
        ),
        (Host::GitLab, Some((owner, repo))) => format!(
            "`gh` was not found on PATH. The branch `{push_branch}` was pushed upstream; \
             open a merge request manually at \
             https://gitlab.com/{owner}/{repo}/-/compare/{base}...{push_branch}"
        ),
        _ => format!(
            "The branch `{push_branch}` was pushed upstream; open a pull request against \
             `{base}` manually on the source host."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsimpl::RealFileSystem;
    use crate::gitimpl::Git2Client;
    use crate::model::{BranchSpec, LockDetails, PathMapping, Provenance, VendorSpec};
    use git2::Repository;
    use std::fs;
    use tempfile::TempDir;

    fn init_upstream(files: &[(&str, &[u8])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.set_head("refs/heads/master").unwrap();
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
        dir
    }

    fn vendor_with_lock(name: &str, url: &str, dest: &str, hash: &str) -> (VendorConfig, VendorLock) {
        let config = VendorConfig {
            vendors: vec![VendorSpec {
                name: name.to_string(),
                url: url.to_string(),
                license: String::new(),
                source: Source::External,
                branches: vec![BranchSpec {
                    reference: "master".to_string(),
                    mappings: vec![PathMapping {
                        from: "src/file.go".to_string(),
                        to: dest.to_string(),
                    }],
                }],
                group: None,
            }],
        };
        let mut file_hashes = BTreeMap::new();
        file_hashes.insert(dest.to_string(), hash.to_string());
        let lock = VendorLock {
            version: crate::model::current_schema_string(),
            vendors: vec![LockDetails {
                name: name.to_string(),
                reference: "master".to_string(),
                commit_hash: "0".repeat(40),
                source_version_tag: None,
                file_hashes,
                updated: Utc::now().to_rfc3339(),
                vendored_at: Utc::now().to_rfc3339(),
                vendored_by: "git-vendor/test".to_string(),
                last_synced_at: Utc::now().to_rfc3339(),
                license_spdx: String::new(),
                provenance: None::<Provenance>,
                extra: serde_yaml::Mapping::new(),
            }],
        };
        (config, lock)
    }

    #[test]
    fn push_reports_no_changes_when_file_untouched() {
        let upstream = init_upstream(&[("src/file.go", b"content\n")]);
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("lib")).unwrap();
        fs::write(project.path().join("lib/file.go"), b"content\n").unwrap();

        let hash = ContentCache::hash_bytes(b"content\n");
        let (config, lock) =
            vendor_with_lock("lib", upstream.path().to_str().unwrap(), "lib/file.go", &hash);

        let git = Git2Client::new();
        let fsys = RealFileSystem::new();
        let mut cache = ContentCache::new();

        let result = push(
            &git,
            &fsys,
            &mut cache,
            project.path(),
            &config,
            &lock,
            &PushOptions {
                vendor_name: "lib".to_string(),
                file_path: None,
                dry_run: false,
                downstream_project: "myapp".to_string(),
            },
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(!result.has_changes());
        assert!(result.branches[0].modified.is_empty());
        assert!(!result.branches[0].pushed);
    }

    #[test]
    fn push_detects_locally_modified_file_and_dry_run_skips_publish() {
        let upstream = init_upstream(&[("src/file.go", b"original\n")]);
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("lib")).unwrap();
        fs::write(project.path().join("lib/file.go"), b"patched locally\n").unwrap();

        let hash = ContentCache::hash_bytes(b"original\n");
        let (config, lock) =
            vendor_with_lock("lib", upstream.path().to_str().unwrap(), "lib/file.go", &hash);

        let git = Git2Client::new();
        let fsys = RealFileSystem::new();
        let mut cache = ContentCache::new();

        let result = push(
            &git,
            &fsys,
            &mut cache,
            project.path(),
            &config,
            &lock,
            &PushOptions {
                vendor_name: "lib".to_string(),
                file_path: None,
                dry_run: true,
                downstream_project: "myapp".to_string(),
            },
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(result.branches[0].modified, vec!["lib/file.go".to_string()]);
        assert!(!result.branches[0].pushed);
    }

    #[test]
    fn push_publishes_branch_and_commits_modified_file() {
        let upstream = init_upstream(&[("src/file.go", b"original\n")]);
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("lib")).unwrap();
        fs::write(project.path().join("lib/file.go"), b"patched locally\n").unwrap();

        let hash = ContentCache::hash_bytes(b"original\n");
        let (config, lock) =
            vendor_with_lock("lib", upstream.path().to_str().unwrap(), "lib/file.go", &hash);

        let git = Git2Client::new();
        let fsys = RealFileSystem::new();
        let mut cache = ContentCache::new();

        let result = push(
            &git,
            &fsys,
            &mut cache,
            project.path(),
            &config,
            &lock,
            &PushOptions {
                vendor_name: "lib".to_string(),
                file_path: None,
                dry_run: false,
                downstream_project: "myapp".to_string(),
            },
            &CancellationToken::new(),
        )
        .unwrap();

        let branch = &result.branches[0];
        assert!(branch.pushed);
        let push_branch = branch.push_branch.as_ref().unwrap();
        assert!(push_branch.starts_with("vendor-push/myapp/"));
        assert!(branch.pr_url.is_some() || branch.manual_instructions.is_some());

        let repo = Repository::open(upstream.path()).unwrap();
        let branch_ref = repo
            .find_branch(push_branch, git2::BranchType::Local)
            .unwrap();
        let commit = branch_ref.get().peel_to_commit().unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(Path::new("src/file.go")).unwrap();
        let blob = entry.to_object(&repo).unwrap().peel_to_blob().unwrap();
        assert_eq!(blob.content(), b"patched locally\n");
    }

    #[test]
    fn push_rejects_internal_vendor() {
        let upstream = init_upstream(&[("src/file.go", b"x")]);
        let project = TempDir::new().unwrap();
        let mut config = vendor_with_lock("lib", upstream.path().to_str().unwrap(), "lib/file.go", "h").0;
        config.vendors[0].source = Source::Internal;
        let lock = VendorLock::default();

        let git = Git2Client::new();
        let fsys = RealFileSystem::new();
        let mut cache = ContentCache::new();

        let err = push(
            &git,
            &fsys,
            &mut cache,
            project.path(),
            &config,
            &lock,
            &PushOptions {
                vendor_name: "lib".to_string(),
                file_path: None,
                dry_run: false,
                downstream_project: "myapp".to_string(),
            },
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(err.is_compliance_failed());
    }

    #[test]
    fn build_reverse_mapping_expands_directory_entries_from_lock() {
        let mappings = vec![PathMapping {
            from: "include".to_string(),
            to: "vendor/lib/include".to_string(),
        }];
        let mut file_hashes = BTreeMap::new();
        file_hashes.insert("vendor/lib/include/a.h".to_string(), "h1".to_string());
        file_hashes.insert("vendor/lib/include/nested/b.h".to_string(), "h2".to_string());

        let reverse = build_reverse_mapping(&mappings, "lib", &file_hashes);
        assert_eq!(
            reverse.get("vendor/lib/include/a.h"),
            Some(&"include/a.h".to_string())
        );
        assert_eq!(
            reverse.get("vendor/lib/include/nested/b.h"),
            Some(&"include/nested/b.h".to_string())
        );
    }

    #[test]
    fn build_reverse_mapping_skips_line_range_selectors() {
        let mappings = vec![PathMapping {
            from: "src/file.go:L1-L5".to_string(),
            to: "lib/snippet.go".to_string(),
        }];
        let mut file_hashes = BTreeMap::new();
        file_hashes.insert("lib/snippet.go".to_string(), "h".to_string());

        let reverse = build_reverse_mapping(&mappings, "lib", &file_hashes);
        assert!(reverse.is_empty());
    }
}
