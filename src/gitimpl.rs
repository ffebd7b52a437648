//! [`GitClient`] backed by `git2`/libgit2. No shelling out to a `git`
//! binary; every operation goes through libgit2's own transport and object
//! database, the same way the teacher's `Vendor for Repository` impl did.

use std::path::{Path, PathBuf};

use git2::{
    AutotagOption, Cred, CredentialType, FetchOptions as Git2FetchOptions, PushOptions,
    RemoteCallbacks, Repository, Signature,
};

use crate::capability::{
    CancellationToken, CloneOptions, CommitLogEntry, CommitOptions, FetchOptions, GitClient,
    TreeEntry,
};
use crate::error::{VendorError, VendorResult};

pub struct Git2Client;

impl Git2Client {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Git2Client {
    fn default() -> Self {
        Self::new()
    }
}

fn open(dir: &Path) -> VendorResult<Repository> {
    Ok(Repository::open(dir)?)
}

/// `RemoteCallbacks` shared by every fetch/clone/push: credentials fall back
/// through the system credential helper and the SSH agent, and transfer
/// progress is polled against `cancel` so a cooperative cancellation can
/// abort an in-flight transfer.
fn remote_callbacks(cancel: CancellationToken) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();

    callbacks.credentials(|url, username_from_url, allowed_types| {
        if allowed_types.contains(CredentialType::SSH_KEY)
            && let Some(username) = username_from_url
        {
            if let Ok(cred) = Cred::ssh_key_from_agent(username) {
                return Ok(cred);
            }
        }
        if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
            return Cred::credential_helper(&git2::Config::open_default()?, url, username_from_url);
        }
        Cred::default()
    });

    callbacks.transfer_progress(move |_progress| !cancel.is_cancelled());

    callbacks
}

fn build_fetch_options(opts: &FetchOptions, cancel: &CancellationToken) -> Git2FetchOptions<'static> {
    let mut fetch_opts = Git2FetchOptions::new();
    fetch_opts.remote_callbacks(remote_callbacks(cancel.clone()));
    fetch_opts.download_tags(AutotagOption::All);
    if let Some(depth) = opts.depth {
        fetch_opts.depth(depth as i32);
    }
    fetch_opts
}

fn signature(repo: &Repository) -> VendorResult<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Ok(Signature::now("git-vendor", "git-vendor@localhost")?),
    }
}

/// Resolve a semver-looking tag/branch/commit-ish to a commit, trying the
/// candidates a vendored ref could plausibly be: the literal ref, then
/// `origin/<ref>`, then the fully-qualified remote-tracking ref.
fn resolve_commit<'repo>(
    repo: &'repo Repository,
    reference: &str,
) -> VendorResult<git2::Commit<'repo>> {
    for candidate in candidate_refs(reference) {
        if let Ok(obj) = repo.revparse_single(&candidate) {
            return Ok(obj.peel_to_commit()?);
        }
    }
    Err(VendorError::path_not_found(reference, "", reference))
}

fn candidate_refs(reference: &str) -> Vec<String> {
    vec![
        reference.to_string(),
        format!("origin/{reference}"),
        format!("refs/remotes/origin/{reference}"),
        format!("refs/tags/{reference}"),
    ]
}

impl GitClient for Git2Client {
    fn init(&self, dir: &Path) -> VendorResult<()> {
        Repository::init(dir)?;
        Ok(())
    }

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> VendorResult<()> {
        let repo = open(dir)?;
        match repo.find_remote(name) {
            Ok(_) => {
                repo.remote_set_url(name, url)?;
            }
            Err(_) => {
                repo.remote(name, url)?;
            }
        }
        Ok(())
    }

    fn fetch(
        &self,
        dir: &Path,
        reference: &str,
        opts: &FetchOptions,
        cancel: &CancellationToken,
    ) -> VendorResult<()> {
        cancel.check()?;
        let repo = open(dir)?;
        let mut remote = repo.find_remote("origin")?;
        let mut fetch_opts = build_fetch_options(opts, cancel);
        let refspec = format!(
            "+refs/heads/{reference}:refs/remotes/origin/{reference}"
        );
        remote
            .fetch(&[&refspec, reference], Some(&mut fetch_opts), None)
            .or_else(|_| remote.fetch(&[reference], Some(&mut fetch_opts), None))?;
        Ok(())
    }

    fn fetch_all(&self, dir: &Path, cancel: &CancellationToken) -> VendorResult<()> {
        cancel.check()?;
        let repo = open(dir)?;
        let mut remote = repo.find_remote("origin")?;
        let mut fetch_opts = build_fetch_options(&FetchOptions::default(), cancel);
        let refspecs: Vec<String> = remote
            .refspecs()
            .filter_map(|r| r.str().map(str::to_string))
            .collect();
        if refspecs.is_empty() {
            remote.fetch(&["refs/heads/*:refs/remotes/origin/*"], Some(&mut fetch_opts), None)?;
        } else {
            let refs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
            remote.fetch(&refs, Some(&mut fetch_opts), None)?;
        }
        Ok(())
    }

    fn checkout(&self, dir: &Path, reference: &str) -> VendorResult<()> {
        let repo = open(dir)?;
        let commit = resolve_commit(&repo, reference)
            .map_err(|e| VendorError::checkout(reference, "", Some(e)))?;
        let mut checkout_builder = git2::build::CheckoutBuilder::new();
        checkout_builder.force();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout_builder))
            .map_err(|e| VendorError::checkout(reference, "", Some(e.into())))?;
        repo.set_head_detached(commit.id())?;
        Ok(())
    }

    fn get_head_hash(&self, dir: &Path) -> VendorResult<String> {
        let repo = open(dir)?;
        let head = repo.head()?.peel_to_commit()?;
        Ok(head.id().to_string())
    }

    fn clone(
        &self,
        dir: &Path,
        url: &str,
        opts: &CloneOptions,
        cancel: &CancellationToken,
    ) -> VendorResult<()> {
        cancel.check()?;
        let fetch_opts = FetchOptions { depth: opts.depth };
        let git2_fetch_opts = build_fetch_options(&fetch_opts, cancel);
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(git2_fetch_opts);
        let mut checkout = git2::build::CheckoutBuilder::new();
        if !opts.no_checkout {
            checkout.force();
        }
        builder.with_checkout(checkout);
        builder.clone(url, dir)?;
        Ok(())
    }

    fn list_tree(&self, dir: &Path, reference: &str, subdir: &str) -> VendorResult<Vec<TreeEntry>> {
        let repo = open(dir)?;
        let commit = resolve_commit(&repo, reference)?;
        let tree = commit.tree()?;
        let tree = git_filter_tree::subtree_at(&repo, &tree, subdir)
            .map_err(|_| VendorError::path_not_found(subdir, "", reference))?;
        let entries = git_filter_tree::list_tree_entries(&repo, &tree)?;
        Ok(entries
            .into_iter()
            .map(|e| TreeEntry {
                path: e.path,
                is_tree: e.is_tree,
            })
            .collect())
    }

    fn read_blob(&self, dir: &Path, reference: &str, path: &str) -> VendorResult<Vec<u8>> {
        let repo = open(dir)?;
        let commit = resolve_commit(&repo, reference)?;
        let tree = commit.tree()?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|_| VendorError::path_not_found(path, "", reference))?;
        let blob = entry.to_object(&repo)?.peel_to_blob()?;
        Ok(blob.content().to_vec())
    }

    fn resolve_ref(&self, dir: &Path, reference: &str) -> VendorResult<String> {
        let repo = open(dir)?;
        let commit = resolve_commit(&repo, reference)?;
        Ok(commit.id().to_string())
    }

    fn get_commit_log(
        &self,
        dir: &Path,
        old: &str,
        new: &str,
        max_count: usize,
    ) -> VendorResult<Vec<CommitLogEntry>> {
        let repo = open(dir)?;
        let new_commit = resolve_commit(&repo, new)?;

        let mut revwalk = repo.revwalk()?;
        revwalk.push(new_commit.id())?;
        if !old.is_empty() {
            if let Ok(old_commit) = resolve_commit(&repo, old) {
                revwalk.hide(old_commit.id())?;
            }
        }

        let mut entries = Vec::new();
        for oid in revwalk {
            if entries.len() >= max_count {
                break;
            }
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            let hash = commit.id().to_string();
            entries.push(CommitLogEntry {
                short: crate::error::truncate_hash(&hash).to_string(),
                hash,
                subject: commit.summary().unwrap_or_default().to_string(),
                author: commit.author().name().unwrap_or_default().to_string(),
                date: commit.time().seconds().to_string(),
            });
        }
        Ok(entries)
    }

    fn get_tag_for_commit(&self, dir: &Path, hash: &str) -> VendorResult<Option<String>> {
        let repo = open(dir)?;
        let target = git2::Oid::from_str(hash)?;

        let mut matches = Vec::new();
        for name in repo.tag_names(None)?.iter().flatten() {
            let refname = format!("refs/tags/{name}");
            let Ok(obj) = repo.revparse_single(&refname) else {
                continue;
            };
            let Ok(commit) = obj.peel_to_commit() else {
                continue;
            };
            if commit.id() == target {
                matches.push(name.to_string());
            }
        }

        if matches.is_empty() {
            return Ok(None);
        }
        if let Some(semver) = matches.iter().find(|t| looks_like_semver(t, true)) {
            return Ok(Some(semver.clone()));
        }
        if let Some(semver) = matches.iter().find(|t| looks_like_semver(t, false)) {
            return Ok(Some(semver.clone()));
        }
        Ok(matches.into_iter().next())
    }

    fn add(&self, dir: &Path, paths: &[PathBuf]) -> VendorResult<()> {
        let repo = open(dir)?;
        let mut index = repo.index()?;
        for path in paths {
            index.add_path(path)?;
        }
        index.write()?;
        Ok(())
    }

    fn commit(&self, dir: &Path, opts: &CommitOptions) -> VendorResult<String> {
        let repo = open(dir)?;
        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = signature(&repo)?;

        let parents: Vec<git2::Commit<'_>> = match repo.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let mut message = opts.message.clone();
        if !opts.trailers.is_empty() {
            message.push_str("\n\n");
            for (key, value) in &opts.trailers {
                message.push_str(&format!("{key}: {value}\n"));
            }
        }

        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parent_refs)?;
        Ok(oid.to_string())
    }

    fn push(&self, dir: &Path, remote: &str, branch: &str) -> VendorResult<()> {
        let repo = open(dir)?;
        let mut remote = repo.find_remote(remote)?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(remote_callbacks(CancellationToken::new()));
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    }

    fn create_branch(&self, dir: &Path, name: &str, base: &str) -> VendorResult<()> {
        let repo = open(dir)?;
        let commit = resolve_commit(&repo, base)?;
        repo.branch(name, &commit, false)?;
        Ok(())
    }

    fn config_get(&self, dir: &Path, key: &str) -> VendorResult<Option<String>> {
        let repo = open(dir)?;
        let config = repo.config()?;
        match config.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(None),
        }
    }
}

fn looks_like_semver(tag: &str, require_v_prefix: bool) -> bool {
    let body = match tag.strip_prefix('v') {
        Some(rest) => rest,
        None if require_v_prefix => return false,
        None => tag,
    };
    let parts: Vec<&str> = body.split('.').collect();
    parts.len() >= 2 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
