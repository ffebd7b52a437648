//! Tagged error taxonomy for the vendoring engine.
//!
//! Every kind renders as `Error: ... \nContext: ... \nFix: ...` for human
//! consumption (see [`ErrText`]) while keeping structured fields for
//! programmatic inspection (the `is_*` predicates, the CLI's exit-code and
//! error-code mapping).

use std::fmt;

/// The three-part human-readable text every [`VendorError`] carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrText {
    pub error: String,
    pub context: Option<String>,
    pub fix: Option<String>,
}

impl ErrText {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            context: None,
            fix: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

impl fmt::Display for ErrText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;
        if let Some(ctx) = &self.context {
            write!(f, "\nContext: {ctx}")?;
        }
        if let Some(fix) = &self.fix {
            write!(f, "\nFix: {fix}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LockConflictEntry {
    pub line_number: usize,
    pub ours_raw: Vec<String>,
    pub theirs_raw: Vec<String>,
}

/// The tagged error taxonomy described in `spec.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("{0}")]
    NotInitialized(ErrText),

    #[error("{0}")]
    ComplianceFailed(ErrText),

    #[error("{text}")]
    VendorNotFound { name: String, text: ErrText },

    #[error("{text}")]
    GroupNotFound { group: String, text: ErrText },

    #[error("{text}")]
    PathNotFound {
        path: String,
        vendor: String,
        reference: String,
        text: ErrText,
    },

    #[error("{text}")]
    StaleCommit {
        commit: String,
        vendor: String,
        reference: String,
        text: ErrText,
    },

    #[error("{text}")]
    Checkout {
        target: String,
        vendor: String,
        #[source]
        cause: Option<Box<VendorError>>,
        text: ErrText,
    },

    #[error("{text}")]
    Validation {
        vendor: Option<String>,
        reference: Option<String>,
        field: Option<String>,
        message: String,
        text: ErrText,
    },

    #[error("{text}")]
    LockConflict {
        conflicts: Vec<LockConflictEntry>,
        text: ErrText,
    },

    #[error("{text}")]
    OsvApi {
        status: u16,
        body: String,
        text: ErrText,
    },

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A lower layer wrapped a failure with extra context (`"load config: …"`).
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<VendorError>,
    },
}

impl VendorError {
    pub fn not_initialized() -> Self {
        Self::NotInitialized(
            ErrText::new("no vendor directory found")
                .with_context("expected vendor.yml at the project root")
                .with_fix("run `git-vendor init` first"),
        )
    }

    pub fn compliance_failed(message: impl Into<String>) -> Self {
        Self::ComplianceFailed(
            ErrText::new(message.into())
                .with_fix("internal-vendor propagation is out of scope for `git-vendor push`"),
        )
    }

    pub fn vendor_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::VendorNotFound {
            text: ErrText::new(format!("vendor `{name}` not found"))
                .with_fix("check `git-vendor list` for declared vendor names"),
            name,
        }
    }

    pub fn group_not_found(group: impl Into<String>) -> Self {
        let group = group.into();
        Self::GroupNotFound {
            text: ErrText::new(format!("group `{group}` not found")),
            group,
        }
    }

    pub fn path_not_found(path: impl Into<String>, vendor: &str, reference: &str) -> Self {
        let path = path.into();
        let suffix = vendor_ref_suffix(vendor, reference);
        Self::PathNotFound {
            text: ErrText::new(format!("path `{path}` does not exist{suffix}"))
                .with_fix("check the mapping's `from` against the upstream tree"),
            path,
            vendor: vendor.to_string(),
            reference: reference.to_string(),
        }
    }

    pub fn stale_commit(commit: &str, vendor: &str, reference: &str) -> Self {
        let short = truncate_hash(commit);
        let suffix = vendor_ref_suffix(vendor, reference);
        Self::StaleCommit {
            text: ErrText::new(format!("commit {short} is no longer reachable{suffix}"))
                .with_context("the upstream ref may have been force-pushed")
                .with_fix("re-resolve the ref with `git-vendor update`"),
            commit: commit.to_string(),
            vendor: vendor.to_string(),
            reference: reference.to_string(),
        }
    }

    pub fn checkout(target: impl Into<String>, vendor: &str, cause: Option<VendorError>) -> Self {
        let target = target.into();
        Self::Checkout {
            text: ErrText::new(format!("failed to check out `{target}` for `{vendor}`")),
            vendor: vendor.to_string(),
            cause: cause.map(Box::new),
            target,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            vendor: None,
            reference: None,
            field: None,
            text: ErrText::new(message.clone()),
            message,
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self.root(), VendorError::NotInitialized(_))
    }

    pub fn is_compliance_failed(&self) -> bool {
        matches!(self.root(), VendorError::ComplianceFailed(_))
    }

    pub fn is_vendor_not_found(&self) -> bool {
        matches!(self.root(), VendorError::VendorNotFound { .. })
    }

    pub fn is_group_not_found(&self) -> bool {
        matches!(self.root(), VendorError::GroupNotFound { .. })
    }

    pub fn is_path_not_found(&self) -> bool {
        matches!(self.root(), VendorError::PathNotFound { .. })
    }

    pub fn is_stale_commit(&self) -> bool {
        matches!(self.root(), VendorError::StaleCommit { .. })
    }

    pub fn is_checkout_error(&self) -> bool {
        matches!(self.context_root(), VendorError::Checkout { .. })
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self.root(), VendorError::Validation { .. })
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self.root(), VendorError::LockConflict { .. })
    }

    pub fn is_osv_api_error(&self) -> bool {
        matches!(self.root(), VendorError::OsvApi { .. })
    }

    /// Walk `Context` wrap chains only, stopping at the first non-`Context`
    /// variant. Used by `is_checkout_error` so an ordinary `Checkout` wrapping
    /// an opaque transport failure (a plain `Git`/`Http` cause, not one of the
    /// specifically-detectable kinds below) still classifies as a checkout
    /// error rather than disappearing into its cause.
    fn context_root(&self) -> &VendorError {
        match self {
            VendorError::Context { source, .. } => source.context_root(),
            other => other,
        }
    }

    /// Walk `Context`/`Checkout{cause}` wrap chains down to the originating kind.
    fn root(&self) -> &VendorError {
        match self {
            VendorError::Context { source, .. } => source.root(),
            VendorError::Checkout { cause: Some(inner), .. } => inner.root(),
            other => other,
        }
    }
}

fn vendor_ref_suffix(vendor: &str, reference: &str) -> String {
    match (vendor.is_empty(), reference.is_empty()) {
        (true, true) => String::new(),
        (false, true) => format!(" (vendor `{vendor}`)"),
        (true, false) => format!(" (ref `{reference}`)"),
        (false, false) => format!(" (vendor `{vendor}@{reference}`)"),
    }
}

pub fn truncate_hash(hash: &str) -> &str {
    if hash.len() > 7 { &hash[..7] } else { hash }
}

/// Extension trait mirroring `anyhow::Context`, but over the concrete
/// [`VendorError`] enum so variant-matching (CLI exit codes, `is_*`
/// predicates) still works after wrapping.
pub trait ResultExt<T> {
    fn vctx(self, context: impl Into<String>) -> Result<T, VendorError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<VendorError>,
{
    fn vctx(self, context: impl Into<String>) -> Result<T, VendorError> {
        self.map_err(|e| e.into().context(context))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathOutsideRootError;

impl From<PathOutsideRootError> for VendorError {
    fn from(_: PathOutsideRootError) -> Self {
        VendorError::Validation {
            vendor: None,
            reference: None,
            field: Some("to".to_string()),
            message: "destination path escapes the project root".to_string(),
            text: ErrText::new("destination path escapes the project root")
                .with_fix("remove any `..` segments from the mapping's `to` path"),
        }
    }
}

pub fn path_display(path: &std::path::Path) -> String {
    path.display().to_string()
}

pub type VendorResult<T> = Result<T, VendorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_text_renders_three_parts() {
        let text = ErrText::new("boom").with_context("while doing x").with_fix("do y");
        assert_eq!(text.to_string(), "Error: boom\nContext: while doing x\nFix: do y");
    }

    #[test]
    fn err_text_omits_missing_parts() {
        let text = ErrText::new("boom");
        assert_eq!(text.to_string(), "Error: boom");
    }

    #[test]
    fn predicate_sees_through_context_wrap() {
        let err = VendorError::vendor_not_found("libfoo").context("load config");
        assert!(err.is_vendor_not_found());
        assert!(!err.is_path_not_found());
    }

    #[test]
    fn predicate_sees_through_checkout_cause() {
        let cause = VendorError::stale_commit("abc1234567890", "libfoo", "main");
        let err = VendorError::checkout("main", "libfoo", Some(cause));
        assert!(err.is_checkout_error());
        assert!(err.is_stale_commit());
    }

    #[test]
    fn checkout_wrapping_opaque_cause_is_still_checkout_error() {
        let cause = VendorError::Io(std::io::Error::other("transport reset"));
        let err = VendorError::checkout("main", "libfoo", Some(cause));
        assert!(err.is_checkout_error());
        assert!(!err.is_stale_commit());
    }

    #[test]
    fn stale_commit_truncates_hash() {
        let err = VendorError::stale_commit("abc1234567890deadbeef", "libfoo", "main");
        assert!(err.to_string().contains("abc1234"));
        assert!(!err.to_string().contains("deadbeef"));
    }

    #[test]
    fn path_not_found_omits_empty_context() {
        let err = VendorError::path_not_found("src/x.go", "", "");
        assert!(!err.to_string().contains("vendor"));
    }
}
