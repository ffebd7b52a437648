//! OSV vulnerability scanner (`spec.md` §4.6). The HTTP transport is a
//! trait so tests substitute a local stub instead of touching the network
//! (`spec.md` §9, "OSV transport").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capability::CancellationToken;
use crate::error::{VendorError, VendorResult};
use crate::model::{VendorConfig, VendorLock};
use crate::purl;

const BATCH_SIZE: usize = 1000;
const CACHE_TTL: chrono::Duration = chrono::Duration::hours(24);
const MAX_KEY_LEN: usize = 210;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Maps a CVSS v3 base score. Non-numeric strings (a vector string,
    /// garbage) map to `UNKNOWN`.
    pub fn from_score_str(score: &str) -> Self {
        match score.trim().parse::<f64>() {
            Ok(v) if v >= 9.0 => Severity::Critical,
            Ok(v) if v >= 7.0 => Severity::High,
            Ok(v) if v >= 4.0 => Severity::Medium,
            Ok(v) if v > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        }
    }
}

/// Parses `--fail-on`; invalid values are rejected before any I/O happens.
pub fn parse_fail_on(value: &str) -> VendorResult<Option<Severity>> {
    match value {
        "" => Ok(None),
        "critical" => Ok(Some(Severity::Critical)),
        "high" => Ok(Some(Severity::High)),
        "medium" => Ok(Some(Severity::Medium)),
        "low" => Ok(Some(Severity::Low)),
        other => Err(VendorError::validation(format!(
            "invalid --fail-on value `{other}`; expected one of critical, high, medium, low"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub summary: String,
    pub severity: SeverityWire,
    pub references: Vec<String>,
}

/// A serializable mirror of [`Severity`] (the enum itself carries no
/// `Serialize`/`Deserialize` derive since ordering, not wire shape, is its
/// primary job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityWire {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl From<Severity> for SeverityWire {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Critical => SeverityWire::Critical,
            Severity::High => SeverityWire::High,
            Severity::Medium => SeverityWire::Medium,
            Severity::Low => SeverityWire::Low,
            Severity::Unknown => SeverityWire::Unknown,
        }
    }
}

impl From<SeverityWire> for Severity {
    fn from(value: SeverityWire) -> Self {
        match value {
            SeverityWire::Critical => Severity::Critical,
            SeverityWire::High => Severity::High,
            SeverityWire::Medium => Severity::Medium,
            SeverityWire::Low => Severity::Low,
            SeverityWire::Unknown => Severity::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyScan {
    pub vendor_name: String,
    pub reference: String,
    pub purl: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub not_scanned_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overall {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub dependencies: Vec<DependencyScan>,
    pub threshold_exceeded: bool,
    pub overall: Overall,
}

/// A batch of OSV vulnerabilities aligned positionally with the PURLs sent
/// in the same `query_batch` call; index `i` of the outer `Vec` corresponds
/// to the `i`-th PURL queried. Missing trailing entries (fewer results than
/// queries) are the caller's responsibility to pad.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVuln {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub severity: Vec<RawSeverity>,
    #[serde(default)]
    pub references: Vec<RawReference>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSeverity {
    #[serde(default)]
    pub score: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawReference {
    pub url: String,
}

pub enum TransportOutcome {
    Ok(Vec<Vec<RawVuln>>),
    RateLimited,
    ServerError,
    ClientError { status: u16, body: String },
    NetworkError,
}

/// Swappable HTTP collaborator so tests never touch the real OSV API
/// (`spec.md` §9).
pub trait OsvTransport: Send + Sync {
    fn query_batch(&self, purls: &[String], cancel: &CancellationToken) -> TransportOutcome;
}

/// `reqwest`-backed production transport against `POST /v1/querybatch`.
pub struct HttpOsvTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpOsvTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for HttpOsvTransport {
    fn default() -> Self {
        Self::new("https://api.osv.dev/v1/querybatch")
    }
}

#[derive(Serialize)]
struct QueryBatchRequest {
    queries: Vec<QueryEntry>,
}

#[derive(Serialize)]
struct QueryEntry {
    package: PackageRef,
}

#[derive(Serialize)]
struct PackageRef {
    purl: String,
}

#[derive(Deserialize)]
struct QueryBatchResponse {
    #[serde(default)]
    results: Vec<ResultEntry>,
}

#[derive(Deserialize)]
struct ResultEntry {
    #[serde(default)]
    vulns: Vec<RawVuln>,
}

impl OsvTransport for HttpOsvTransport {
    fn query_batch(&self, purls: &[String], cancel: &CancellationToken) -> TransportOutcome {
        if cancel.is_cancelled() {
            return TransportOutcome::NetworkError;
        }

        let body = QueryBatchRequest {
            queries: purls
                .iter()
                .map(|purl| QueryEntry {
                    package: PackageRef { purl: purl.clone() },
                })
                .collect(),
        };

        let response = match self.client.post(&self.endpoint).json(&body).send() {
            Ok(r) => r,
            Err(_) => return TransportOutcome::NetworkError,
        };

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            std::thread::sleep(Duration::from_secs(retry_after.min(5)));
            return TransportOutcome::RateLimited;
        }
        if status.is_server_error() {
            return TransportOutcome::ServerError;
        }
        if status.is_client_error() {
            let body_text = response.text().unwrap_or_default();
            return TransportOutcome::ClientError {
                status: status.as_u16(),
                body: body_text,
            };
        }

        match response.json::<QueryBatchResponse>() {
            Ok(parsed) => TransportOutcome::Ok(parsed.results.into_iter().map(|r| r.vulns).collect()),
            Err(_) => TransportOutcome::NetworkError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    fetched_at: DateTime<Utc>,
    vulnerabilities: Vec<Vulnerability>,
}

pub struct ScanCache {
    dir: PathBuf,
}

impl ScanCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn key(vendor_name: &str, commit_hash: &str, version_tag: Option<&str>, repo_url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(vendor_name.as_bytes());
        hasher.update(commit_hash.as_bytes());
        hasher.update(version_tag.unwrap_or("").as_bytes());
        hasher.update(repo_url.as_bytes());
        let digest = hex::encode(hasher.finalize());
        let mut filename = format!("{digest}.json");
        filename.truncate(MAX_KEY_LEN);
        filename
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn read(&self, key: &str) -> Option<CacheEntry> {
        let path = self.path(key);
        let raw = fs::read(&path).ok()?;
        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(_) => {
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Fresh (within the 24-hour TTL) cache read for a normal lookup.
    pub fn load_fresh(&self, key: &str) -> Option<Vec<Vulnerability>> {
        let entry = self.read(key)?;
        if Utc::now() - entry.fetched_at <= CACHE_TTL {
            Some(entry.vulnerabilities)
        } else {
            None
        }
    }

    /// TTL-ignoring read, used only as a network-failure fallback.
    pub fn load_stale(&self, key: &str) -> Option<Vec<Vulnerability>> {
        self.read(key).map(|e| e.vulnerabilities)
    }

    pub fn store(&self, key: &str, vulnerabilities: &[Vulnerability]) -> VendorResult<()> {
        fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            fetched_at: Utc::now(),
            vulnerabilities: vulnerabilities.to_vec(),
        };
        let json = serde_json::to_vec(&entry)?;
        crate::cache::atomic_write(&self.path(key), &json)
    }
}

struct Candidate {
    vendor_name: String,
    reference: String,
    purl: String,
    cache_key: String,
}

/// `Scan(fail_on?) -> ScanResult`.
pub fn scan(
    transport: &dyn OsvTransport,
    cache: &ScanCache,
    config: &VendorConfig,
    lock: &VendorLock,
    fail_on: &str,
    cancel: &CancellationToken,
) -> VendorResult<ScanResult> {
    let threshold = parse_fail_on(fail_on)?;

    let mut dependencies = Vec::new();
    let mut candidates = Vec::new();

    for vendor in &config.vendors {
        for branch in &vendor.branches {
            cancel.check()?;
            let Some(locked) = lock.find(&vendor.name, &branch.reference) else {
                continue;
            };

            if locked.commit_hash.is_empty() {
                dependencies.push(DependencyScan {
                    vendor_name: vendor.name.clone(),
                    reference: branch.reference.clone(),
                    purl: String::new(),
                    vulnerabilities: Vec::new(),
                    not_scanned_reason: Some("Empty commit hash".to_string()),
                });
                continue;
            }

            let version = locked
                .source_version_tag
                .as_deref()
                .unwrap_or(&locked.commit_hash);
            let purl = purl::synthesize(&vendor.url, &vendor.name, version);
            let cache_key = ScanCache::key(
                &vendor.name,
                &locked.commit_hash,
                locked.source_version_tag.as_deref(),
                &vendor.url,
            );

            if let Some(vulns) = cache.load_fresh(&cache_key) {
                dependencies.push(DependencyScan {
                    vendor_name: vendor.name.clone(),
                    reference: branch.reference.clone(),
                    purl,
                    vulnerabilities: vulns,
                    not_scanned_reason: None,
                });
                continue;
            }

            candidates.push(Candidate {
                vendor_name: vendor.name.clone(),
                reference: branch.reference.clone(),
                purl,
                cache_key,
            });
        }
    }

    for batch in candidates.chunks(BATCH_SIZE) {
        cancel.check()?;
        let purls: Vec<String> = batch.iter().map(|c| c.purl.clone()).collect();
        match transport.query_batch(&purls, cancel) {
            TransportOutcome::Ok(results) => {
                for (i, candidate) in batch.iter().enumerate() {
                    let raw = results.get(i).cloned().unwrap_or_default();
                    if i >= results.len() {
                        dependencies.push(DependencyScan {
                            vendor_name: candidate.vendor_name.clone(),
                            reference: candidate.reference.clone(),
                            purl: candidate.purl.clone(),
                            vulnerabilities: Vec::new(),
                            not_scanned_reason: Some(
                                "Fewer results returned than queried".to_string(),
                            ),
                        });
                        continue;
                    }
                    let vulns: Vec<Vulnerability> = raw.into_iter().map(to_vulnerability).collect();
                    cache.store(&candidate.cache_key, &vulns)?;
                    dependencies.push(DependencyScan {
                        vendor_name: candidate.vendor_name.clone(),
                        reference: candidate.reference.clone(),
                        purl: candidate.purl.clone(),
                        vulnerabilities: vulns,
                        not_scanned_reason: None,
                    });
                }
            }
            TransportOutcome::RateLimited => {
                for candidate in batch {
                    dependencies.push(not_scanned(candidate, "Rate limited"));
                }
            }
            TransportOutcome::ServerError => {
                for candidate in batch {
                    dependencies.push(not_scanned(candidate, "Upstream OSV error"));
                }
            }
            TransportOutcome::ClientError { status, body } => {
                return Err(VendorError::OsvApi {
                    status,
                    body: body.clone(),
                    text: crate::error::ErrText::new(format!(
                        "OSV API returned client error {status}"
                    ))
                    .with_context(body),
                });
            }
            TransportOutcome::NetworkError => {
                for candidate in batch {
                    if let Some(vulns) = cache.load_stale(&candidate.cache_key) {
                        dependencies.push(DependencyScan {
                            vendor_name: candidate.vendor_name.clone(),
                            reference: candidate.reference.clone(),
                            purl: candidate.purl.clone(),
                            vulnerabilities: vulns,
                            not_scanned_reason: None,
                        });
                    } else {
                        dependencies.push(not_scanned(candidate, "Network error: no cached data"));
                    }
                }
            }
        }
    }

    let mut any_vulns = false;
    let mut any_not_scanned = false;
    let mut max_severity = Severity::Unknown;

    for dep in &dependencies {
        if dep.not_scanned_reason.is_some() {
            any_not_scanned = true;
        }
        if !dep.vulnerabilities.is_empty() {
            any_vulns = true;
            for vuln in &dep.vulnerabilities {
                max_severity = max_severity.max(vuln.severity.into());
            }
        }
    }

    let threshold_exceeded = threshold.is_some_and(|t| max_severity >= t);

    let overall = if any_vulns {
        Overall::Fail
    } else if any_not_scanned {
        Overall::Warn
    } else {
        Overall::Pass
    };

    Ok(ScanResult {
        dependencies,
        threshold_exceeded,
        overall,
    })
}

fn not_scanned(candidate: &Candidate, reason: &str) -> DependencyScan {
    DependencyScan {
        vendor_name: candidate.vendor_name.clone(),
        reference: candidate.reference.clone(),
        purl: candidate.purl.clone(),
        vulnerabilities: Vec::new(),
        not_scanned_reason: Some(reason.to_string()),
    }
}

fn to_vulnerability(raw: RawVuln) -> Vulnerability {
    let severity = raw
        .severity
        .iter()
        .map(|s| Severity::from_score_str(&s.score))
        .max()
        .unwrap_or(Severity::Unknown);

    let mut references: Vec<String> = Vec::new();
    let mut seen: HashMap<String, ()> = HashMap::new();
    for reference in &raw.references {
        if seen.insert(reference.url.clone(), ()).is_none() {
            references.push(reference.url.clone());
        }
    }
    for alias in &raw.aliases {
        if let Some(cve) = alias.strip_prefix("CVE-").map(|_| alias.as_str()) {
            let nvd_url = format!("https://nvd.nist.gov/vuln/detail/{cve}");
            if seen.insert(nvd_url.clone(), ()).is_none() {
                references.push(nvd_url);
            }
        }
    }

    Vulnerability {
        id: raw.id,
        summary: raw.summary,
        severity: severity.into(),
        references,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchSpec, LockDetails, PathMapping, Source, VendorSpec};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn basic_config_and_lock(commit_hash: &str) -> (VendorConfig, VendorLock) {
        let config = VendorConfig {
            vendors: vec![VendorSpec {
                name: "libfoo".to_string(),
                url: "https://github.com/owner/libfoo.git".to_string(),
                license: "MIT".to_string(),
                source: Source::External,
                branches: vec![BranchSpec {
                    reference: "main".to_string(),
                    mappings: vec![PathMapping {
                        from: "src".to_string(),
                        to: "vendor/libfoo".to_string(),
                    }],
                }],
                group: None,
            }],
        };
        let lock = VendorLock {
            version: crate::model::current_schema_string(),
            vendors: vec![LockDetails {
                name: "libfoo".to_string(),
                reference: "main".to_string(),
                commit_hash: commit_hash.to_string(),
                source_version_tag: Some("v1.0.0".to_string()),
                file_hashes: Default::default(),
                updated: Utc::now().to_rfc3339(),
                vendored_at: Utc::now().to_rfc3339(),
                vendored_by: "git-vendor/test".to_string(),
                last_synced_at: Utc::now().to_rfc3339(),
                license_spdx: "MIT".to_string(),
                provenance: None,
                extra: serde_yaml::Mapping::new(),
            }],
        };
        (config, lock)
    }

    struct StubTransport {
        outcome: Mutex<Option<TransportOutcome>>,
    }

    impl StubTransport {
        fn once(outcome: TransportOutcome) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
            }
        }
    }

    impl OsvTransport for StubTransport {
        fn query_batch(&self, purls: &[String], _cancel: &CancellationToken) -> TransportOutcome {
            match self.outcome.lock().unwrap().take() {
                Some(outcome) => outcome,
                None => TransportOutcome::Ok(vec![Vec::new(); purls.len()]),
            }
        }
    }

    #[test]
    fn empty_commit_hash_is_not_scanned_without_querying() {
        let (config, lock) = basic_config_and_lock("");
        let cache = ScanCache::new(tempdir().unwrap().path());
        let transport = StubTransport::once(TransportOutcome::Ok(vec![]));

        let result = scan(&transport, &cache, &config, &lock, "", &CancellationToken::new()).unwrap();
        assert_eq!(result.dependencies.len(), 1);
        assert_eq!(
            result.dependencies[0].not_scanned_reason.as_deref(),
            Some("Empty commit hash")
        );
        assert_eq!(result.overall, Overall::Warn);
    }

    #[test]
    fn vulnerabilities_found_trigger_fail_and_cache_write() {
        let (config, lock) = basic_config_and_lock("abc123");
        let dir = tempdir().unwrap();
        let cache = ScanCache::new(dir.path());
        let raw = RawVuln {
            id: "GHSA-xxxx".to_string(),
            summary: "bad thing".to_string(),
            severity: vec![RawSeverity { score: "9.8".to_string() }],
            references: vec![RawReference { url: "https://example.com/advisory".to_string() }],
            aliases: vec!["CVE-2024-0001".to_string()],
        };
        let transport = StubTransport::once(TransportOutcome::Ok(vec![vec![raw]]));

        let result = scan(&transport, &cache, &config, &lock, "high", &CancellationToken::new()).unwrap();
        assert_eq!(result.overall, Overall::Fail);
        assert!(result.threshold_exceeded);
        let dep = &result.dependencies[0];
        assert_eq!(dep.vulnerabilities[0].severity, SeverityWire::Critical);
        assert!(dep.vulnerabilities[0]
            .references
            .iter()
            .any(|r| r.contains("nvd.nist.gov")));

        let key = ScanCache::key("libfoo", "abc123", Some("v1.0.0"), "https://github.com/owner/libfoo.git");
        assert!(cache.load_fresh(&key).is_some());
    }

    #[test]
    fn rate_limited_marks_not_scanned_without_caching() {
        let (config, lock) = basic_config_and_lock("abc123");
        let cache = ScanCache::new(tempdir().unwrap().path());
        let transport = StubTransport::once(TransportOutcome::RateLimited);

        let result = scan(&transport, &cache, &config, &lock, "", &CancellationToken::new()).unwrap();
        assert_eq!(
            result.dependencies[0].not_scanned_reason.as_deref(),
            Some("Rate limited")
        );
        assert_eq!(result.overall, Overall::Warn);
    }

    #[test]
    fn client_error_propagates_as_fatal() {
        let (config, lock) = basic_config_and_lock("abc123");
        let cache = ScanCache::new(tempdir().unwrap().path());
        let transport = StubTransport::once(TransportOutcome::ClientError {
            status: 400,
            body: "bad request".to_string(),
        });

        let err = scan(&transport, &cache, &config, &lock, "", &CancellationToken::new()).unwrap_err();
        assert!(err.is_osv_api_error());
    }

    #[test]
    fn network_error_falls_back_to_stale_cache() {
        let (config, lock) = basic_config_and_lock("abc123");
        let dir = tempdir().unwrap();
        let cache = ScanCache::new(dir.path());
        let key = ScanCache::key("libfoo", "abc123", Some("v1.0.0"), "https://github.com/owner/libfoo.git");
        cache
            .store(
                &key,
                &[Vulnerability {
                    id: "GHSA-stale".to_string(),
                    summary: "stale entry".to_string(),
                    severity: SeverityWire::Low,
                    references: vec![],
                }],
            )
            .unwrap();

        let transport = StubTransport::once(TransportOutcome::NetworkError);
        let result = scan(&transport, &cache, &config, &lock, "", &CancellationToken::new()).unwrap();
        assert_eq!(result.dependencies[0].vulnerabilities[0].id, "GHSA-stale");
        assert!(result.dependencies[0].not_scanned_reason.is_none());
    }

    #[test]
    fn invalid_fail_on_rejected_before_any_io() {
        let (config, lock) = basic_config_and_lock("abc123");
        let cache = ScanCache::new(tempdir().unwrap().path());
        let transport = StubTransport::once(TransportOutcome::Ok(vec![]));

        let err = scan(&transport, &cache, &config, &lock, "extreme", &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn severity_from_score_handles_non_numeric_vector_string() {
        assert_eq!(
            Severity::from_score_str("CVSS:3.1/AV:N/AC:L"),
            Severity::Unknown
        );
    }
}
