//! Vulnerability scanner with on-disk TTL cache.
//!
//! Each locked dependency is keyed by a package-URL synthesized from its
//! vendor URL and queried against an OSV-shaped advisory endpoint.
//! Responses cache as one JSON file per `(name, commit, tag)` fingerprint;
//! entries are fresh for the TTL (default 24 h) and expired entries still
//! serve as **stale fallback** when the network is down. Per-dependency
//! failures annotate that dependency without failing the whole scan.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use graft_retry::{RetryExecutor, RetryStrategyConfig};
use graft_types::{
    Aggregate, CancelToken, DependencyReport, Error, Result, SCHEMA_VERSION, ScanResult,
    Severity, VendorConfig, VendorLock, Vulnerability,
};
use serde::{Deserialize, Serialize};

use crate::license::owner_repo;

/// Default advisory endpoint (OSV-shaped).
pub const DEFAULT_ENDPOINT: &str = "https://api.osv.dev/v1/query";

/// Default cache freshness window.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Subdirectory of the vendor root holding scanner cache files.
pub const SCAN_CACHE_DIR: &str = ".graft/scan";

/// Synthesize a package-URL for a vendor.
///
/// Hosting providers get their purl type; everything else degrades to
/// `pkg:generic/<name>@<version>`. GitLab subgroup segments are
/// percent-encoded into the namespace, per the purl spec.
pub fn package_url(name: &str, url: &str, version: &str) -> String {
    if url.contains("github.com") {
        if let Some((owner, repo)) = owner_repo(url) {
            return format!("pkg:github/{owner}/{repo}@{version}");
        }
    }
    if url.contains("gitlab.com") {
        if let Some(path) = full_repo_path(url) {
            if let Some((namespace, repo)) = path.rsplit_once('/') {
                let encoded = namespace.replace('/', "%2F");
                return format!("pkg:gitlab/{encoded}/{repo}@{version}");
            }
        }
    }
    if url.contains("bitbucket.org") {
        if let Some((owner, repo)) = owner_repo(url) {
            return format!("pkg:bitbucket/{owner}/{repo}@{version}");
        }
    }
    format!("pkg:generic/{name}@{version}")
}

/// Full `namespace/.../repo` path of a hosting URL.
fn full_repo_path(url: &str) -> Option<String> {
    let trimmed = url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .trim_end_matches('/');
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let without_user = without_scheme
        .split_once('@')
        .map(|(_, rest)| rest)
        .unwrap_or(without_scheme);
    let path = without_user.split_once(['/', ':']).map(|(_, rest)| rest)?;
    if path.contains('/') {
        Some(path.to_string())
    } else {
        None
    }
}

/// Filesystem-safe cache key ending in `.json`.
pub fn cache_key(name: &str, commit_hash: &str, version_tag: Option<&str>) -> String {
    let mut token = format!("{name}-{}", &commit_hash[..12.min(commit_hash.len())]);
    if let Some(tag) = version_tag {
        token.push('-');
        token.push_str(tag);
    }
    let safe: String = token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{safe}.json")
}

/// One cached advisory response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedScan {
    cached_at: DateTime<Utc>,
    vulnerabilities: Vec<Vulnerability>,
}

// OSV wire shapes; only the fields the scanner consumes.

#[derive(Debug, Deserialize)]
struct OsvResponse {
    #[serde(default)]
    vulns: Vec<OsvVuln>,
}

#[derive(Debug, Deserialize)]
struct OsvVuln {
    id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    #[serde(default)]
    affected: Vec<OsvAffected>,
    #[serde(default)]
    references: Vec<OsvReference>,
}

#[derive(Debug, Deserialize)]
struct OsvSeverity {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    score: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OsvAffected {
    #[serde(default)]
    ranges: Vec<OsvRange>,
}

#[derive(Debug, Deserialize)]
struct OsvRange {
    #[serde(default)]
    events: Vec<OsvEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct OsvEvent {
    #[serde(default)]
    introduced: Option<String>,
    #[serde(default)]
    fixed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsvReference {
    #[serde(default)]
    url: String,
}

fn normalize_vuln(raw: OsvVuln) -> Vulnerability {
    let cvss_score = raw
        .severity
        .iter()
        .find(|s| s.kind == "CVSS_V3")
        .and_then(|s| match &s.score {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
    let severity = cvss_score
        .map(Severity::from_cvss_score)
        .unwrap_or(Severity::Unknown);
    let fixed_version = raw
        .affected
        .iter()
        .flat_map(|a| &a.ranges)
        .flat_map(|r| &r.events)
        .find_map(|e| e.fixed.clone());

    Vulnerability {
        id: raw.id,
        summary: raw.summary,
        aliases: raw.aliases,
        severity,
        cvss_score,
        fixed_version,
        references: raw
            .references
            .into_iter()
            .map(|r| r.url)
            .filter(|u| !u.is_empty())
            .collect(),
    }
}

/// Advisory scanner.
pub struct Scanner {
    endpoint: String,
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
    ttl: Duration,
    retry: RetryStrategyConfig,
}

impl Scanner {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: reqwest::blocking::Client::builder()
                .timeout(StdDuration::from_secs(20))
                .build()
                .unwrap_or_default(),
            cache_dir: cache_dir.into(),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            retry: RetryStrategyConfig::network(),
        }
    }

    /// Conventional cache location under the vendor root.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(SCAN_CACHE_DIR))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryStrategyConfig) -> Self {
        self.retry = retry;
        self
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    /// Read a cache file; the bool says whether it is still fresh.
    fn load_cached(&self, key: &str) -> Option<(Vec<Vulnerability>, bool)> {
        let content = fs::read_to_string(self.cache_path(key)).ok()?;
        let cached: CachedScan = serde_json::from_str(&content).ok()?;
        let fresh = Utc::now() - cached.cached_at < self.ttl;
        Some((cached.vulnerabilities, fresh))
    }

    fn store_cached(&self, key: &str, vulnerabilities: &[Vulnerability]) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| Error::io(&self.cache_dir, e))?;
        let path = self.cache_path(key);
        let doc = CachedScan {
            cached_at: Utc::now(),
            vulnerabilities: vulnerabilities.to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|e| Error::ConfigInvalid {
            message: format!("failed to serialize scan cache: {e}"),
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }

    /// POST the purl to the advisory endpoint.
    fn query_upstream(&self, purl: &str, cancel: &CancelToken) -> Result<Vec<Vulnerability>> {
        cancel.check()?;
        let body = serde_json::json!({ "package": { "purl": purl } });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| Error::NetworkRetryable {
                message: format!("advisory query failed: {e}"),
            })?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after });
        }
        if !response.status().is_success() {
            return Err(Error::NetworkRetryable {
                message: format!("advisory endpoint returned {}", response.status()),
            });
        }

        let parsed: OsvResponse = response.json().map_err(|e| Error::NetworkRetryable {
            message: format!("advisory response malformed: {e}"),
        })?;
        Ok(parsed.vulns.into_iter().map(normalize_vuln).collect())
    }

    /// Fetch-or-read-cache for one dependency.
    fn check_dependency(
        &self,
        name: &str,
        ref_: &str,
        purl: &str,
        key: &str,
        cancel: &CancelToken,
    ) -> DependencyReport {
        let mut report = DependencyReport {
            name: name.to_string(),
            ref_: ref_.to_string(),
            purl: purl.to_string(),
            vulnerabilities: Vec::new(),
            from_cache: false,
            stale: false,
            error: None,
        };

        if let Some((vulns, true)) = self.load_cached(key) {
            report.vulnerabilities = vulns;
            report.from_cache = true;
            return report;
        }

        let executor = RetryExecutor::new(self.retry.clone());
        let upstream = executor.run_classified(
            |_| self.query_upstream(purl, cancel),
            |e| matches!(e, Error::NetworkRetryable { .. }),
        );

        match upstream {
            Ok(vulns) => {
                if let Err(e) = self.store_cached(key, &vulns) {
                    report.error = Some(e.to_string());
                }
                report.vulnerabilities = vulns;
            }
            Err(e @ Error::RateLimited { .. }) => {
                // Rate limits surface as-is; no stale fallback.
                report.error = Some(e.to_string());
            }
            Err(e) => {
                // Stale fallback: an expired entry is better than nothing.
                if let Some((vulns, _)) = self.load_cached(key) {
                    report.vulnerabilities = vulns;
                    report.from_cache = true;
                    report.stale = true;
                } else {
                    report.error = Some(e.to_string());
                }
            }
        }
        report
    }

    /// Scan every locked external dependency.
    pub fn scan(
        &self,
        config: &VendorConfig,
        lock: &VendorLock,
        fail_on: Severity,
        cancel: &CancelToken,
    ) -> Result<ScanResult> {
        let mut result = ScanResult {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            dependencies: Vec::new(),
            total_vulnerabilities: 0,
            counts: Default::default(),
            fail_on,
            threshold_exceeded: false,
            aggregate: Aggregate::Pass,
        };

        for details in &lock.vendors {
            cancel.check()?;
            // Internal vendors and entries never locked to a commit are
            // not scannable.
            if details.is_internal() || details.ref_ == "local" || details.commit_hash.is_empty() {
                continue;
            }
            let url = config
                .vendor(&details.name)
                .map(|v| v.url.as_str())
                .unwrap_or("");
            let version = details
                .source_version_tag
                .clone()
                .unwrap_or_else(|| details.commit_hash.clone());
            let purl = package_url(&details.name, url, &version);
            let key = cache_key(
                &details.name,
                &details.commit_hash,
                details.source_version_tag.as_deref(),
            );
            result
                .dependencies
                .push(self.check_dependency(&details.name, &details.ref_, &purl, &key, cancel));
        }

        result.derive();
        Ok(result)
    }
}
