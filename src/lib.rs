//! In-source vendoring for Git repositories.
//!
//! `git-vendor` tracks declared upstream dependencies in `vendor.yml`,
//! materializes them into the project tree, records exact provenance in
//! `vendor.lock`, and can detect drift, scan for known vulnerabilities, push
//! local edits back upstream, and synthesize an SBOM — all driven through
//! the [`capability`] traits so the engine never talks to `git2`, the
//! filesystem, or the network directly.

pub mod cache;
pub mod capability;
pub mod cli;
pub mod configstore;
pub mod engine;
pub mod error;
pub mod fsimpl;
pub mod gitimpl;
pub mod lockstore;
pub mod model;
pub mod purl;

pub use cache::ContentCache;
pub use capability::{
    CancellationToken, CollectingWarningSink, FileSystem, GitClient, NullWarningSink,
    StderrWarningSink, WarningSink,
};
pub use configstore::{ConfigStore, YamlConfigStore};
pub use error::{VendorError, VendorResult};
pub use fsimpl::RealFileSystem;
pub use gitimpl::Git2Client;
pub use lockstore::{LockStore, YamlLockStore};
pub use model::{BranchSpec, LockDetails, PathMapping, Source, VendorConfig, VendorLock, VendorSpec};
