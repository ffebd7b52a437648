mod cli;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde_json::json;

use cli::{Cli, CliResponse, Commands, SbomFormat};
use git_vendor::capability::CancellationToken;
use git_vendor::engine::{drift, push, sbom, scan, sync};
use git_vendor::error::VendorResult;
use git_vendor::fsimpl::RealFileSystem;
use git_vendor::gitimpl::Git2Client;
use git_vendor::model::{BranchSpec, PathMapping, Source, VendorSpec};
use git_vendor::{ConfigStore, ContentCache, LockStore, YamlConfigStore, YamlLockStore};

fn main() {
    let cli = Cli::parse();
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let response = run(&cli.command, &project_root);
    let exit_code = match &response {
        Ok(data) => {
            CliResponse::ok(data.clone()).print();
            0
        }
        Err(err) => {
            let (code, error_code) = cli::classify(err);
            CliResponse::err(error_code, err.to_string()).print();
            code
        }
    };
    process::exit(exit_code);
}

fn run(command: &Commands, project_root: &PathBuf) -> VendorResult<serde_json::Value> {
    let config_store = YamlConfigStore::new(project_root.join("vendor.yml"));
    let lock_store = YamlLockStore::new(project_root.join("vendor.lock"));
    let git = Git2Client::new();
    let fs = RealFileSystem::new();
    let cancel = CancellationToken::new();
    let warning_sink = git_vendor::StderrWarningSink;

    match command {
        Commands::Init => {
            if config_store.exists() {
                return Err(git_vendor::VendorError::validation("vendor.yml already exists"));
            }
            let config = git_vendor::VendorConfig::default();
            config_store.save(&config)?;
            Ok(json!({ "initialized": true }))
        }

        Commands::Add {
            name,
            url,
            reference,
            from,
            to,
            license,
            internal,
            group,
        } => {
            let mut config = config_store.load()?;
            if config.find(name).is_some() {
                return Err(git_vendor::VendorError::validation(format!(
                    "vendor `{name}` already exists"
                )));
            }
            let vendor = VendorSpec {
                name: name.clone(),
                url: url.clone(),
                license: license.clone(),
                source: if *internal { Source::Internal } else { Source::External },
                branches: vec![BranchSpec {
                    reference: reference.clone(),
                    mappings: vec![PathMapping {
                        from: from.clone(),
                        to: to.clone(),
                    }],
                }],
                group: group.clone(),
            };
            vendor.validate()?;
            config.vendors.push(vendor);
            config_store.save(&config)?;
            Ok(json!({ "added": name }))
        }

        Commands::Remove { name } => {
            let mut config = config_store.load()?;
            if config.find(name).is_none() {
                return Err(git_vendor::VendorError::vendor_not_found(name));
            }
            config.vendors.retain(|v| &v.name != name);
            config_store.save(&config)?;
            Ok(json!({ "removed": name }))
        }

        Commands::List => {
            let config = config_store.load()?;
            let vendors: Vec<serde_json::Value> = config
                .vendors
                .iter()
                .map(|v| {
                    json!({
                        "name": v.name,
                        "url": v.url,
                        "source": match v.source {
                            Source::External => "external",
                            Source::Internal => "internal",
                        },
                        "branches": v.branches.iter().map(|b| &b.reference).collect::<Vec<_>>(),
                    })
                })
                .collect();
            Ok(json!({ "vendors": vendors }))
        }

        Commands::Pull { scope } => {
            let mut config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let mut cache = ContentCache::new();
            let options = sync::SyncOptions {
                locked: false,
                group: scope.group.clone(),
                vendor_name: scope.vendor.clone(),
                ..Default::default()
            };
            let (new_lock, report) = sync::sync(
                &git,
                &fs,
                &mut cache,
                project_root,
                &mut config,
                &lock,
                &options,
                &cancel,
            )?;
            lock_store.save(&new_lock)?;
            config_store.save(&config)?;
            Ok(sync_report_json(&report))
        }

        Commands::Sync {
            scope,
            locked,
            force,
            keep_local,
            no_cache,
            prune,
        } => {
            let mut config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let mut cache = ContentCache::new();
            let options = sync::SyncOptions {
                locked: *locked,
                force: *force,
                keep_local: *keep_local,
                no_cache: *no_cache,
                prune: *prune,
                vendor_name: scope.vendor.clone(),
                group: scope.group.clone(),
                interactive: false,
            };
            let (new_lock, report) = sync::sync(
                &git,
                &fs,
                &mut cache,
                project_root,
                &mut config,
                &lock,
                &options,
                &cancel,
            )?;
            lock_store.save(&new_lock)?;
            if *prune {
                config_store.save(&config)?;
            }
            Ok(sync_report_json(&report))
        }

        Commands::Update { scope } => {
            let mut config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let mut cache = ContentCache::new();
            let options = sync::SyncOptions {
                vendor_name: scope.vendor.clone(),
                group: scope.group.clone(),
                ..Default::default()
            };
            let (new_lock, report) = sync::sync(
                &git,
                &fs,
                &mut cache,
                project_root,
                &mut config,
                &lock,
                &options,
                &cancel,
            )?;
            lock_store.save(&new_lock)?;
            Ok(sync_report_json(&report))
        }

        Commands::Drift { scope, offline, detail } => {
            let config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let options = drift::DriftOptions {
                offline: *offline,
                detail: *detail,
                vendor_name: scope.vendor.clone(),
            };
            let summary = drift::drift(&git, &fs, project_root, &config, &lock, &options, &cancel)?;
            Ok(drift_summary_json(&summary))
        }

        Commands::Push {
            name,
            file,
            dry_run,
            downstream_project,
        } => {
            let config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let mut cache = ContentCache::new();
            let options = push::PushOptions {
                vendor_name: name.clone(),
                file_path: file.clone(),
                dry_run: *dry_run,
                downstream_project: downstream_project.clone(),
            };
            let result = push::push(
                &git,
                &fs,
                &mut cache,
                project_root,
                &config,
                &lock,
                &options,
                &cancel,
            )?;
            Ok(push_result_json(&result))
        }

        Commands::Sbom { format } => {
            let config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let doc = match format {
                SbomFormat::Cyclonedx => sbom::cyclonedx(&lock, &config),
                SbomFormat::Spdx => sbom::spdx(&lock, &config),
            };
            Ok(doc)
        }

        Commands::Scan { fail_on } => {
            let config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let transport = scan::HttpOsvTransport::default();
            let cache = scan::ScanCache::new(project_root.join(".git-vendor/osv-cache"));
            let result = scan::scan(&transport, &cache, &config, &lock, fail_on, &cancel)?;
            Ok(scan_result_json(&result))
        }

        Commands::Prune { scope } => {
            let mut config = config_store.load()?;
            let lock = lock_store.load(&warning_sink)?;
            let mut cache = ContentCache::new();
            let options = sync::SyncOptions {
                prune: true,
                vendor_name: scope.vendor.clone(),
                group: scope.group.clone(),
                ..Default::default()
            };
            let (new_lock, report) = sync::sync(
                &git,
                &fs,
                &mut cache,
                project_root,
                &mut config,
                &lock,
                &options,
                &cancel,
            )?;
            lock_store.save(&new_lock)?;
            config_store.save(&config)?;
            Ok(sync_report_json(&report))
        }

        Commands::Version => Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "lock_schema": git_vendor::model::current_schema_string(),
        })),
    }
}

fn sync_report_json(report: &sync::SyncReport) -> serde_json::Value {
    json!({
        "files_written": report.files_written,
        "files_skipped": report.files_skipped,
        "mappings_pruned": report.mappings_pruned,
        "updated": report.updated,
    })
}

fn drift_summary_json(summary: &drift::DriftSummary) -> serde_json::Value {
    let dependencies: Vec<serde_json::Value> = summary
        .dependencies
        .iter()
        .map(|dep| {
            json!({
                "name": dep.name,
                "reference": dep.reference,
                "classification": classification_str(&dep.classification),
                "has_conflict_risk": dep.has_conflict_risk,
                "offline": dep.offline,
                "local_drift_pct": dep.local_drift_pct,
                "upstream_drift_pct": dep.upstream_drift_pct,
                "files": dep.files.iter().map(|f| json!({
                    "path": f.path,
                    "local_drift_pct": f.local_drift_pct,
                    "upstream_drift_pct": f.upstream_drift_pct,
                    "has_conflict_risk": f.has_conflict_risk,
                    "diff": f.diff,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "dependencies": dependencies,
        "overall_classification": classification_str(&summary.overall_classification),
        "conflict_risk": summary.conflict_risk,
    })
}

fn classification_str(c: &drift::DriftClassification) -> &'static str {
    match c {
        drift::DriftClassification::Clean => "clean",
        drift::DriftClassification::Drifted => "drifted",
        drift::DriftClassification::Conflict => "conflict",
    }
}

fn push_result_json(result: &push::PushResult) -> serde_json::Value {
    let branches: Vec<serde_json::Value> = result
        .branches
        .iter()
        .map(|b| {
            json!({
                "reference": b.reference,
                "modified": b.modified,
                "pushed": b.pushed,
                "push_branch": b.push_branch,
                "pr_url": b.pr_url,
                "manual_instructions": b.manual_instructions,
            })
        })
        .collect();
    json!({
        "vendor": result.vendor,
        "dry_run": result.dry_run,
        "has_changes": result.has_changes(),
        "branches": branches,
    })
}

fn scan_result_json(result: &scan::ScanResult) -> serde_json::Value {
    let dependencies: Vec<serde_json::Value> = result
        .dependencies
        .iter()
        .map(|dep| {
            json!({
                "vendor_name": dep.vendor_name,
                "reference": dep.reference,
                "purl": dep.purl,
                "not_scanned_reason": dep.not_scanned_reason,
                "vulnerabilities": dep.vulnerabilities.iter().map(|v| json!({
                    "id": v.id,
                    "summary": v.summary,
                    "severity": v.severity,
                    "references": v.references,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "dependencies": dependencies,
        "threshold_exceeded": result.threshold_exceeded,
        "overall": match result.overall {
            scan::Overall::Pass => "pass",
            scan::Overall::Warn => "warn",
            scan::Overall::Fail => "fail",
        },
    })
}
