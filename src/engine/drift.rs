//! Three-way drift analysis: locked original vs. local working tree vs.
//! upstream tip (`spec.md` §4.3).

use std::path::Path;

use crate::cache::ContentCache;
use crate::capability::{CancellationToken, FetchOptions, FileSystem, GitClient};
use crate::error::{VendorError, VendorResult};
use crate::model::{FromSelector, VendorConfig, VendorLock};

#[derive(Debug, Clone, Default)]
pub struct DriftOptions {
    pub offline: bool,
    pub detail: bool,
    pub vendor_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unchanged,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftClassification {
    Clean,
    Drifted,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct FileDrift {
    pub path: String,
    pub local_status: FileStatus,
    pub upstream_status: FileStatus,
    pub local_drift_pct: f64,
    pub upstream_drift_pct: f64,
    pub has_conflict_risk: bool,
    pub diff: Option<String>,
    /// Line count at the locked commit, kept alongside the raw line deltas
    /// below so the vendor aggregate can sum across files instead of
    /// averaging per-file percentages.
    original_lines: usize,
    local_delta: usize,
    upstream_delta: usize,
}

#[derive(Debug, Clone)]
pub struct DriftDependency {
    pub name: String,
    pub reference: String,
    pub files: Vec<FileDrift>,
    pub classification: DriftClassification,
    pub has_conflict_risk: bool,
    /// True if the upstream tip could not be reached and this vendor's
    /// result reflects local-only comparison.
    pub offline: bool,
    /// `100 * sum(local line deltas) / max(sum(original line counts), 1)`
    /// across every mapped file (`spec.md` §4.3).
    pub local_drift_pct: f64,
    /// Same formula as `local_drift_pct`, using upstream line deltas.
    pub upstream_drift_pct: f64,
}

#[derive(Debug, Clone)]
pub struct DriftSummary {
    pub dependencies: Vec<DriftDependency>,
    pub overall_classification: DriftClassification,
    /// Number of dependencies classified `Conflict`.
    pub conflict_risk: usize,
}

pub fn drift(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    project_root: &Path,
    config: &VendorConfig,
    lock: &VendorLock,
    options: &DriftOptions,
    cancel: &CancellationToken,
) -> VendorResult<DriftSummary> {
    let mut dependencies = Vec::new();

    for vendor in &config.vendors {
        if let Some(want) = &options.vendor_name
            && want != &vendor.name
        {
            continue;
        }

        for branch in &vendor.branches {
            cancel.check()?;
            let Some(locked) = lock.find(&vendor.name, &branch.reference) else {
                continue;
            };

            let scratch = fs.create_temp_dir()?;
            let result = drift_one_branch(
                git,
                fs,
                project_root,
                &scratch,
                &vendor.name,
                &vendor.url,
                &branch.reference,
                &branch.mappings,
                &locked.commit_hash,
                options,
                cancel,
            );
            fs.remove_all(&scratch)?;
            dependencies.push(result?);
        }
    }

    let overall_classification = aggregate_classification(
        dependencies.iter().map(|d| &d.classification),
    );
    let conflict_risk = dependencies
        .iter()
        .filter(|d| d.classification == DriftClassification::Conflict)
        .count();

    Ok(DriftSummary {
        dependencies,
        overall_classification,
        conflict_risk,
    })
}

#[allow(clippy::too_many_arguments)]
fn drift_one_branch(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    project_root: &Path,
    scratch: &Path,
    vendor_name: &str,
    url: &str,
    reference: &str,
    mappings: &[crate::model::PathMapping],
    locked_commit: &str,
    options: &DriftOptions,
    cancel: &CancellationToken,
) -> VendorResult<DriftDependency> {
    git.init(scratch)?;
    git.add_remote(scratch, "origin", url)?;
    git.fetch(scratch, reference, &FetchOptions::default(), cancel)
        .or_else(|_| git.fetch_all(scratch, cancel))?;
    git.checkout(scratch, locked_commit)
        .map_err(|_| VendorError::stale_commit(locked_commit, vendor_name, reference))?;

    let (tip, offline) = if options.offline {
        (None, true)
    } else {
        match git.resolve_ref(scratch, reference) {
            Ok(tip) => (Some(tip), false),
            Err(_) => (None, true),
        }
    };

    let mut files = Vec::new();
    for mapping in mappings {
        if !matches!(mapping.parse_from(), FromSelector::Path(_)) {
            continue;
        }
        let FromSelector::Path(path) = mapping.parse_from() else {
            unreachable!()
        };
        collect_file_drifts(
            git,
            fs,
            project_root,
            scratch,
            locked_commit,
            tip.as_deref(),
            &path,
            &mapping.auto_path(false, &super::sync::default_root(vendor_name)),
            options.detail,
            &mut files,
        )?;
    }

    let has_conflict_risk = files.iter().any(|f| f.has_conflict_risk);
    let any_local = files.iter().any(|f| f.local_status != FileStatus::Unchanged);
    let any_upstream = files.iter().any(|f| f.upstream_status != FileStatus::Unchanged);
    let classification = if has_conflict_risk {
        DriftClassification::Conflict
    } else if any_local || any_upstream {
        DriftClassification::Drifted
    } else {
        DriftClassification::Clean
    };

    let original_lines: usize = files.iter().map(|f| f.original_lines).sum();
    let local_deltas: usize = files.iter().map(|f| f.local_delta).sum();
    let upstream_deltas: usize = files.iter().map(|f| f.upstream_delta).sum();
    let denom = original_lines.max(1) as f64;
    let local_drift_pct = (100.0 * local_deltas as f64 / denom).min(100.0);
    let upstream_drift_pct = (100.0 * upstream_deltas as f64 / denom).min(100.0);

    Ok(DriftDependency {
        name: vendor_name.to_string(),
        reference: reference.to_string(),
        files,
        classification,
        has_conflict_risk,
        offline,
        local_drift_pct,
        upstream_drift_pct,
    })
}

#[allow(clippy::too_many_arguments)]
fn collect_file_drifts(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    project_root: &Path,
    scratch: &Path,
    locked_commit: &str,
    tip: Option<&str>,
    src_path: &str,
    dest_root_or_file: &str,
    detail: bool,
    out: &mut Vec<FileDrift>,
) -> VendorResult<()> {
    match git.read_blob(scratch, locked_commit, src_path) {
        Ok(original_bytes) => {
            out.push(single_file_drift(
                git,
                fs,
                project_root,
                scratch,
                locked_commit,
                tip,
                src_path,
                dest_root_or_file,
                &original_bytes,
                detail,
            )?);
            Ok(())
        }
        Err(_) => {
            // Not a blob at the locked commit; try it as a directory.
            let entries = git.list_tree(scratch, locked_commit, src_path)?;
            for entry in entries.into_iter().filter(|e| !e.is_tree) {
                let nested_src = format!("{}/{}", src_path.trim_end_matches('/'), entry.path);
                let nested_dest = format!(
                    "{}/{}",
                    dest_root_or_file.trim_end_matches('/'),
                    entry.path
                );
                let original_bytes = git.read_blob(scratch, locked_commit, &nested_src)?;
                out.push(single_file_drift(
                    git,
                    fs,
                    project_root,
                    scratch,
                    locked_commit,
                    tip,
                    &nested_src,
                    &nested_dest,
                    &original_bytes,
                    detail,
                )?);
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn single_file_drift(
    git: &dyn GitClient,
    fs: &dyn FileSystem,
    project_root: &Path,
    scratch: &Path,
    _locked_commit: &str,
    tip: Option<&str>,
    src_path: &str,
    dest: &str,
    original_bytes: &[u8],
    detail: bool,
) -> VendorResult<FileDrift> {
    let original = String::from_utf8_lossy(original_bytes).to_string();

    let local_opt = fs
        .rooted_read(project_root, Path::new(dest))
        .ok()
        .map(|b| String::from_utf8_lossy(&b).to_string());

    let upstream_opt = match tip {
        Some(tip_commit) => git.read_blob(scratch, tip_commit, src_path).ok().map(|b| {
            String::from_utf8_lossy(&b).to_string()
        }),
        None => None,
    };

    let original_lines = original.lines().count();

    let (local_status, local_drift_pct, local_delta, local_diff) = match &local_opt {
        None => (
            FileStatus::Deleted,
            100.0,
            original_lines,
            diff_if(detail, &original, ""),
        ),
        Some(local) if local == &original => (FileStatus::Unchanged, 0.0, 0, None),
        Some(local) => (
            FileStatus::Modified,
            line_drift_pct(&original, local),
            line_delta(&original, local),
            diff_if(detail, &original, local),
        ),
    };

    let (upstream_status, upstream_drift_pct, upstream_delta) = match (tip, &upstream_opt) {
        (None, _) => (FileStatus::Unchanged, 0.0, 0),
        (Some(_), None) => (FileStatus::Deleted, 100.0, original_lines),
        (Some(_), Some(upstream)) if upstream == &original => (FileStatus::Unchanged, 0.0, 0),
        (Some(_), Some(upstream)) => (
            FileStatus::Modified,
            line_drift_pct(&original, upstream),
            line_delta(&original, upstream),
        ),
    };

    let has_conflict_risk =
        local_status != FileStatus::Unchanged && upstream_status != FileStatus::Unchanged;

    Ok(FileDrift {
        path: dest.to_string(),
        local_status,
        upstream_status,
        local_drift_pct,
        upstream_drift_pct,
        has_conflict_risk,
        diff: local_diff,
        original_lines,
        local_delta,
        upstream_delta,
    })
}

fn diff_if(detail: bool, original: &str, current: &str) -> Option<String> {
    if detail {
        Some(unified_diff(original, current))
    } else {
        None
    }
}

fn line_drift_pct(original: &str, current: &str) -> f64 {
    let denom = original.lines().count().max(1) as f64;
    (100.0 * line_delta(original, current) as f64 / denom).min(100.0)
}

/// `added + removed` line count between `original` and `current`, via LCS.
fn line_delta(original: &str, current: &str) -> usize {
    let a: Vec<&str> = original.lines().collect();
    let b: Vec<&str> = current.lines().collect();
    let common = lcs_length(&a, &b);
    let added = b.len().saturating_sub(common);
    let removed = a.len().saturating_sub(common);
    added + removed
}

fn lcs_length(a: &[&str], b: &[&str]) -> usize {
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }
    dp[0][0]
}

enum DiffOp<'a> {
    Equal(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

fn diff_ops<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<DiffOp<'a>> {
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }
    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(DiffOp::Equal(a[i]));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            ops.push(DiffOp::Delete(a[i]));
            i += 1;
        } else {
            ops.push(DiffOp::Insert(b[j]));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Delete(a[i]));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Insert(b[j]));
        j += 1;
    }
    ops
}

/// A unified-style diff with three lines of context around each change.
fn unified_diff(original: &str, current: &str) -> String {
    const CONTEXT: usize = 3;
    let a: Vec<&str> = original.lines().collect();
    let b: Vec<&str> = current.lines().collect();
    let ops = diff_ops(&a, &b);

    let mut out = String::new();
    let mut i = 0;
    while i < ops.len() {
        if matches!(ops[i], DiffOp::Equal(_)) {
            i += 1;
            continue;
        }
        let start = i.saturating_sub(CONTEXT);
        let mut end = i + 1;
        loop {
            let mut run = 0;
            let mut j = end;
            let mut extended = false;
            while j < ops.len() {
                if matches!(ops[j], DiffOp::Equal(_)) {
                    run += 1;
                    if run > CONTEXT * 2 {
                        break;
                    }
                } else {
                    end = j + 1;
                    extended = true;
                    run = 0;
                }
                j += 1;
            }
            if !extended {
                break;
            }
        }
        let hunk_end = (end + CONTEXT).min(ops.len());
        for op in &ops[start..hunk_end] {
            match op {
                DiffOp::Equal(l) => out.push_str(&format!(" {l}\n")),
                DiffOp::Delete(l) => out.push_str(&format!("-{l}\n")),
                DiffOp::Insert(l) => out.push_str(&format!("+{l}\n")),
            }
        }
        i = hunk_end;
    }
    out
}

fn aggregate_classification<'a>(
    classifications: impl Iterator<Item = &'a DriftClassification>,
) -> DriftClassification {
    let mut any_drifted = false;
    for c in classifications {
        match c {
            DriftClassification::Conflict => return DriftClassification::Conflict,
            DriftClassification::Drifted => any_drifted = true,
            DriftClassification::Clean => {}
        }
    }
    if any_drifted {
        DriftClassification::Drifted
    } else {
        DriftClassification::Clean
    }
}
