//! The vendoring engine (`spec.md` §4.1): resolve mappings, materialize into
//! the working tree, emit a new lock.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;

use crate::cache::ContentCache;
use crate::capability::{CancellationToken, FetchOptions, FileSystem, GitClient};
use crate::error::{VendorError, VendorResult};
use crate::model::{FromSelector, LockDetails, Provenance, Source, VendorConfig, VendorLock};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub locked: bool,
    pub force: bool,
    pub keep_local: bool,
    pub no_cache: bool,
    pub prune: bool,
    pub vendor_name: Option<String>,
    pub group: Option<String>,
    /// Advisory only; the engine never reads this to decide whether to prompt.
    pub interactive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_written: usize,
    pub files_skipped: usize,
    pub mappings_pruned: usize,
    pub updated: usize,
}

/// Materializes every in-scope `VendorSpec × BranchSpec` into `project_root`
/// and returns the new lock plus a report.
pub fn sync(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    cache: &mut ContentCache,
    project_root: &Path,
    config: &mut VendorConfig,
    lock: &VendorLock,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> VendorResult<(VendorLock, SyncReport)> {
    let mut new_lock = lock.clone();
    let mut report = SyncReport::default();
    let mut pruned: Vec<(String, String)> = Vec::new();

    let vendor_names: Vec<String> = config
        .vendors
        .iter()
        .filter(|v| in_scope(v.name.as_str(), v.group.as_deref(), options))
        .map(|v| v.name.clone())
        .collect();

    for name in vendor_names {
        let vendor = config
            .find(&name)
            .ok_or_else(|| VendorError::vendor_not_found(&name))?
            .clone();

        for branch in vendor.branches.clone() {
            cancel.check()?;
            let key = (vendor.name.clone(), branch.reference.clone());
            let scratch = fs.create_temp_dir()?;

            let outcome = sync_one_branch(
                git,
                fs,
                cache,
                project_root,
                &scratch,
                &vendor.name,
                &vendor.url,
                &branch.reference,
                &branch.mappings,
                lock.find(&key.0, &key.1),
                options,
                cancel,
            );

            fs.remove_all(&scratch)?;

            let materialized = outcome?;
            if materialized.updated {
                report.updated += 1;
            }
            report.files_written += materialized.files_written;
            report.files_skipped += materialized.files_skipped;

            for pruned_dest in &materialized.pruned_mappings {
                pruned.push((vendor.name.clone(), pruned_dest.clone()));
            }

            let details = LockDetails {
                name: vendor.name.clone(),
                reference: branch.reference.clone(),
                commit_hash: materialized.commit_hash.clone(),
                source_version_tag: materialized.source_version_tag.clone(),
                file_hashes: materialized.file_hashes.clone(),
                updated: Utc::now().to_rfc3339(),
                vendored_at: Utc::now().to_rfc3339(),
                vendored_by: format!("git-vendor/{}", env!("CARGO_PKG_VERSION")),
                last_synced_at: Utc::now().to_rfc3339(),
                license_spdx: vendor.license.clone(),
                provenance: match vendor.source {
                    Source::Internal => Some(Provenance {
                        internal_source: vendor.url.clone(),
                        notes: None,
                    }),
                    Source::External => None,
                },
                extra: serde_yaml::Mapping::new(),
            };
            new_lock.upsert(details);
        }
    }

    if options.prune && !pruned.is_empty() {
        for (vendor_name, dest) in &pruned {
            if let Some(vendor) = config.find_mut(vendor_name) {
                for branch in &mut vendor.branches {
                    branch
                        .mappings
                        .retain(|m| &m.auto_path(false, &default_root(vendor_name)) != dest
                            && &m.auto_path(true, &default_root(vendor_name)) != dest);
                }
            }
        }
        report.mappings_pruned = pruned.len();
    }

    Ok((new_lock, report))
}

fn in_scope(name: &str, group: Option<&str>, options: &SyncOptions) -> bool {
    if let Some(want) = &options.vendor_name {
        return want == name;
    }
    if let Some(want) = &options.group {
        return group == Some(want.as_str());
    }
    true
}

pub fn default_root(vendor_name: &str) -> String {
    format!("vendor/{vendor_name}")
}

struct BranchOutcome {
    commit_hash: String,
    source_version_tag: Option<String>,
    file_hashes: BTreeMap<String, String>,
    files_written: usize,
    files_skipped: usize,
    pruned_mappings: Vec<String>,
    updated: bool,
}

#[allow(clippy::too_many_arguments)]
fn sync_one_branch(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    cache: &mut ContentCache,
    project_root: &Path,
    scratch: &Path,
    vendor_name: &str,
    url: &str,
    reference: &str,
    mappings: &[crate::model::PathMapping],
    locked_entry: Option<&LockDetails>,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> VendorResult<BranchOutcome> {
    git.init(scratch)?;
    git.add_remote(scratch, "origin", url)?;

    let (commit_hash, updated) = if options.locked && locked_entry.is_some() {
        let locked = locked_entry.unwrap().commit_hash.clone();
        git.fetch_all(scratch, cancel)
            .or_else(|_| git.fetch(scratch, reference, &FetchOptions::default(), cancel))?;
        git.checkout(scratch, &locked)
            .map_err(|_| VendorError::stale_commit(&locked, vendor_name, reference))?;
        (locked, false)
    } else {
        git.fetch(
            scratch,
            reference,
            &FetchOptions { depth: Some(1) },
            cancel,
        )?;
        let resolved = git.resolve_ref(scratch, reference)?;
        git.checkout(scratch, &resolved)
            .map_err(|e| VendorError::checkout(reference, vendor_name, Some(e)))?;
        (resolved, true)
    };

    let source_version_tag = git.get_tag_for_commit(scratch, &commit_hash)?;

    let mut file_hashes = BTreeMap::new();
    let mut files_written = 0;
    let mut files_skipped = 0;
    let mut pruned_mappings = Vec::new();

    for mapping in mappings {
        let selector = mapping.parse_from();
        match selector {
            FromSelector::Path(path) => {
                match resolve_kind(git, scratch, &commit_hash, &path)? {
                    Some(EntryKind::File) => {
                        let dest = mapping.auto_path(false, &default_root(vendor_name));
                        let bytes = git.read_blob(scratch, &commit_hash, &path)?;
                        let locked_hash = locked_entry.and_then(|l| l.file_hashes.get(&dest));
                        write_one(
                            fs,
                            cache,
                            project_root,
                            &dest,
                            &bytes,
                            locked_hash.map(String::as_str),
                            options,
                            &mut file_hashes,
                            &mut files_written,
                            &mut files_skipped,
                        )?;
                    }
                    Some(EntryKind::Dir) => {
                        let dest_root = mapping.auto_path(true, &default_root(vendor_name));
                        let entries = git.list_tree(scratch, &commit_hash, &path)?;
                        for entry in entries.into_iter().filter(|e| !e.is_tree) {
                            let src_path = format!("{}/{}", path.trim_end_matches('/'), entry.path);
                            let dest = format!("{}/{}", dest_root.trim_end_matches('/'), entry.path);
                            let bytes = git.read_blob(scratch, &commit_hash, &src_path)?;
                            let locked_hash = locked_entry.and_then(|l| l.file_hashes.get(&dest));
                            write_one(
                                fs,
                                cache,
                                project_root,
                                &dest,
                                &bytes,
                                locked_hash.map(String::as_str),
                                options,
                                &mut file_hashes,
                                &mut files_written,
                                &mut files_skipped,
                            )?;
                        }
                    }
                    None => {
                        let dest = mapping.auto_path(false, &default_root(vendor_name));
                        if options.prune && !fs.exists(project_root, Path::new(&dest)) {
                            pruned_mappings.push(dest);
                            continue;
                        }
                        return Err(VendorError::path_not_found(&path, vendor_name, reference));
                    }
                }
            }
            FromSelector::LineRange { path, start, end } => {
                let bytes = git.read_blob(scratch, &commit_hash, &path)?;
                let text = String::from_utf8_lossy(&bytes);
                let lines: Vec<&str> = text.lines().collect();
                if start > lines.len() {
                    return Err(VendorError::path_not_found(
                        format!("{path}:L{start}-L{end}"),
                        vendor_name,
                        reference,
                    ));
                }
                let end = end.min(lines.len());
                let selected = lines[start - 1..end].join("\n");
                let dest = mapping.auto_path(false, &default_root(vendor_name));
                let locked_hash = locked_entry.and_then(|l| l.file_hashes.get(&dest));
                write_one(
                    fs,
                    cache,
                    project_root,
                    &dest,
                    selected.as_bytes(),
                    locked_hash.map(String::as_str),
                    options,
                    &mut file_hashes,
                    &mut files_written,
                    &mut files_skipped,
                )?;
            }
        }
    }

    Ok(BranchOutcome {
        commit_hash,
        source_version_tag,
        file_hashes,
        files_written,
        files_skipped,
        pruned_mappings,
        updated,
    })
}

enum EntryKind {
    File,
    Dir,
}

fn resolve_kind(
    git: &dyn GitClient,
    scratch: &Path,
    commit_hash: &str,
    path: &str,
) -> VendorResult<Option<EntryKind>> {
    if git.read_blob(scratch, commit_hash, path).is_ok() {
        return Ok(Some(EntryKind::File));
    }
    match git.list_tree(scratch, commit_hash, path) {
        Ok(_) => Ok(Some(EntryKind::Dir)),
        Err(_) => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_one(
    fs: &dyn FileSystem,
    cache: &mut ContentCache,
    project_root: &Path,
    dest: &str,
    new_content: &[u8],
    locked_hash: Option<&str>,
    options: &SyncOptions,
    file_hashes: &mut BTreeMap<String, String>,
    files_written: &mut usize,
    files_skipped: &mut usize,
) -> VendorResult<()> {
    let rel = Path::new(dest);
    let new_hash = ContentCache::hash_bytes(new_content);

    if options.force || !fs.exists(project_root, rel) {
        fs.rooted_write(project_root, rel, new_content)?;
        *files_written += 1;
        file_hashes.insert(dest.to_string(), new_hash);
        return Ok(());
    }

    let existing = fs.rooted_read(project_root, rel)?;
    if existing == new_content {
        *files_skipped += 1;
        let existing_hash = if options.no_cache {
            new_hash.clone()
        } else if let Ok(full) = crate::capability::join_rooted(project_root, rel) {
            cache.compute_file_checksum(&full).unwrap_or_else(|_| new_hash.clone())
        } else {
            new_hash.clone()
        };
        file_hashes.insert(dest.to_string(), existing_hash);
        return Ok(());
    }

    // "Locally modified" means the on-disk hash diverges from the *locked*
    // hash, not from the incoming upstream content — an untouched file whose
    // upstream content simply changed is not a local modification.
    let existing_hash = ContentCache::hash_bytes(&existing);
    let locally_modified = locked_hash.is_some_and(|locked| locked != existing_hash);

    if options.keep_local && locally_modified {
        *files_skipped += 1;
        file_hashes.insert(dest.to_string(), existing_hash);
        return Ok(());
    }

    fs.rooted_write(project_root, rel, new_content)?;
    *files_written += 1;
    file_hashes.insert(dest.to_string(), new_hash);
    Ok(())
}
