//! Command surface and structured JSON response shape (`spec.md` §6).

use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "git-vendor")]
#[command(author, version, about = "In-source vendoring with drift detection, vulnerability scanning, and reverse-push", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty vendor.yml at the project root
    Init,

    /// Declare a new vendored dependency
    Add {
        /// Vendor name
        name: String,
        /// Remote URL of the dependency repository
        url: String,
        /// Ref to track (branch, tag, or commit-ish)
        #[arg(short, long, default_value = "main")]
        reference: String,
        /// Upstream path to vendor (file or directory)
        #[arg(long)]
        from: String,
        /// Destination path (auto-derived when omitted)
        #[arg(long, default_value = "")]
        to: String,
        /// Declared upstream license (SPDX identifier)
        #[arg(long, default_value = "")]
        license: String,
        /// This dependency originates inside the organization
        #[arg(long)]
        internal: bool,
        /// Optional group name for bulk operations
        #[arg(long)]
        group: Option<String>,
    },

    /// Remove a declared vendored dependency
    Remove {
        name: String,
    },

    /// List declared vendors
    List,

    /// Re-resolve refs to their current tip, then materialize (update+sync)
    Pull {
        #[command(flatten)]
        scope: Scope,
    },

    /// Materialize declared vendors into the working tree
    Sync {
        #[command(flatten)]
        scope: Scope,
        /// Re-checkout the exact commit already recorded in vendor.lock
        #[arg(long)]
        locked: bool,
        /// Overwrite local edits unconditionally
        #[arg(long)]
        force: bool,
        /// Keep local edits when upstream content also changed
        #[arg(long)]
        keep_local: bool,
        /// Bypass the content hash cache
        #[arg(long)]
        no_cache: bool,
        /// Remove mappings whose upstream path no longer exists
        #[arg(long)]
        prune: bool,
    },

    /// Re-resolve refs to their current tip without materializing
    Update {
        #[command(flatten)]
        scope: Scope,
    },

    /// Three-way drift comparison: locked vs. local vs. upstream
    Drift {
        #[command(flatten)]
        scope: Scope,
        /// Skip the upstream fetch; compare only locked vs. local
        #[arg(long)]
        offline: bool,
        /// Include a unified-style diff per drifted file
        #[arg(long)]
        detail: bool,
    },

    /// Push locally modified vendored files back upstream as a branch/PR
    Push {
        name: String,
        /// Only push this single file
        #[arg(long)]
        file: Option<String>,
        /// Report what would be pushed without touching the network
        #[arg(long)]
        dry_run: bool,
        /// Name of the downstream project, used in the push branch and PR title
        #[arg(long)]
        downstream_project: String,
    },

    /// Emit a software bill of materials
    Sbom {
        #[command(subcommand)]
        format: SbomFormat,
    },

    /// Scan vendored dependencies against the OSV vulnerability database
    Scan {
        /// Minimum severity that causes a non-zero exit: critical, high, medium, low
        #[arg(long, default_value = "")]
        fail_on: String,
    },

    /// Remove mappings whose upstream path no longer exists
    Prune {
        #[command(flatten)]
        scope: Scope,
    },

    /// Print the resolved lock schema version
    Version,
}

#[derive(Subcommand)]
pub enum SbomFormat {
    Cyclonedx,
    Spdx,
}

#[derive(clap::Args)]
pub struct Scope {
    /// Restrict to a single vendor
    #[arg(long)]
    pub vendor: Option<String>,
    /// Restrict to a declared group
    #[arg(long)]
    pub group: Option<String>,
}

/// `{"success": bool, "data"?: {...}, "error"?: {"code": string, "message": string}}`.
#[derive(Debug, Serialize)]
pub struct CliResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
}

impl CliResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn print(&self) {
        println!("{}", serde_json::to_string_pretty(self).unwrap_or_default());
    }
}

/// Maps a [`crate::error::VendorError`] to the `(exit_code, error_code)` pair
/// `spec.md` §6 defines.
pub fn classify(err: &crate::error::VendorError) -> (i32, &'static str) {
    if err.is_not_initialized() {
        (1, "NOT_INITIALIZED")
    } else if err.is_vendor_not_found() {
        (2, "VENDOR_NOT_FOUND")
    } else if err.is_group_not_found() {
        (2, "VENDOR_NOT_FOUND")
    } else if err.is_validation_error() {
        (4, "VALIDATION_FAILED")
    } else if err.is_path_not_found() || err.is_stale_commit() || err.is_checkout_error() {
        (4, "VALIDATION_FAILED")
    } else if err.is_lock_conflict() {
        (4, "VALIDATION_FAILED")
    } else if err.is_compliance_failed() {
        (4, "VALIDATION_FAILED")
    } else if err.is_osv_api_error() {
        (5, "NETWORK_ERROR")
    } else if matches!(err, crate::error::VendorError::Http(_) | crate::error::VendorError::Git(_)) {
        (5, "NETWORK_ERROR")
    } else {
        (1, "INTERNAL_ERROR")
    }
}
