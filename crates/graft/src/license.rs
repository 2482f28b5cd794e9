//! Per-provider license detection with an SPDX allowlist.
//!
//! Detection is API-first: hosting providers that expose a license
//! endpoint (GitHub, GitLab) are asked directly; on any failure the
//! checker falls back to scanning the shallow clone's working tree for
//! `LICENSE`/`COPYING`-style files and classifying their text. Detection
//! never fails a sync by itself — the result degrades to `"UNKNOWN"` and
//! the caller decides whether to gate.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use graft_types::CancelToken;

/// SPDX identifier returned when nothing could be detected.
pub const UNKNOWN_LICENSE: &str = "UNKNOWN";

/// Default allowlist applied when the caller configures none.
pub const DEFAULT_ALLOWLIST: &[&str] = &[
    "MIT",
    "Apache-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "ISC",
    "Unlicense",
    "CC0-1.0",
];

/// Hosting provider derived from a vendor URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
    Generic,
}

/// Classify a URL's hosting provider.
pub fn detect_provider(url: &str) -> Provider {
    if url.contains("github.com") {
        Provider::GitHub
    } else if url.contains("gitlab.com") {
        Provider::GitLab
    } else if url.contains("bitbucket.org") {
        Provider::Bitbucket
    } else {
        Provider::Generic
    }
}

/// `owner/repo` segments of a hosting URL, `.git` suffix stripped.
pub fn owner_repo(url: &str) -> Option<(String, String)> {
    let trimmed = url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .trim_end_matches('/');
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    // scp-style git@host:owner/repo
    let without_user = without_scheme
        .split_once('@')
        .map(|(_, rest)| rest)
        .unwrap_or(without_scheme);
    let path = without_user
        .split_once([':', '/'])
        .map(|(_, rest)| rest)?;
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?.to_string();
    let repo = segments.next()?.to_string();
    Some((owner, repo))
}

/// License detector with API-first, tree-fallback strategy.
pub struct LicenseChecker {
    client: reqwest::blocking::Client,
    allowlist: Vec<String>,
    github_api: String,
    gitlab_api: String,
}

impl Default for LicenseChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl LicenseChecker {
    pub fn new() -> Self {
        Self::with_allowlist(DEFAULT_ALLOWLIST.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_allowlist(allowlist: Vec<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            allowlist,
            github_api: "https://api.github.com".to_string(),
            gitlab_api: "https://gitlab.com".to_string(),
        }
    }

    /// Point the provider APIs somewhere else (tests use a local fake).
    pub fn with_api_bases(mut self, github: impl Into<String>, gitlab: impl Into<String>) -> Self {
        self.github_api = github.into();
        self.gitlab_api = gitlab.into();
        self
    }

    /// Membership check against the configured allowlist.
    pub fn is_allowed(&self, spdx: &str) -> bool {
        self.allowlist.iter().any(|a| a == spdx)
    }

    /// Detect the license for a vendor.
    ///
    /// `worktree` is the shallow clone used for the fallback scan; pass
    /// `None` when only the API strategy applies.
    pub fn detect(&self, url: &str, worktree: Option<&Path>, cancel: &CancelToken) -> String {
        if cancel.is_cancelled() {
            return UNKNOWN_LICENSE.to_string();
        }

        let api_result = match detect_provider(url) {
            Provider::GitHub => self.github_license(url),
            Provider::GitLab => self.gitlab_license(url),
            Provider::Bitbucket | Provider::Generic => None,
        };
        if let Some(spdx) = api_result {
            return spdx;
        }

        worktree
            .and_then(detect_in_tree)
            .unwrap_or_else(|| UNKNOWN_LICENSE.to_string())
    }

    fn github_license(&self, url: &str) -> Option<String> {
        let (owner, repo) = owner_repo(url)?;
        let endpoint = format!("{}/repos/{owner}/{repo}/license", self.github_api);
        let response = self
            .client
            .get(&endpoint)
            .header("User-Agent", "graft")
            .header("Accept", "application/vnd.github+json")
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: serde_json::Value = response.json().ok()?;
        let spdx = body.get("license")?.get("spdx_id")?.as_str()?;
        if spdx.is_empty() || spdx == "NOASSERTION" {
            None
        } else {
            Some(spdx.to_string())
        }
    }

    fn gitlab_license(&self, url: &str) -> Option<String> {
        let (owner, repo) = owner_repo(url)?;
        let endpoint = format!(
            "{}/api/v4/projects/{owner}%2F{repo}?license=true",
            self.gitlab_api
        );
        let response = self
            .client
            .get(&endpoint)
            .header("User-Agent", "graft")
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: serde_json::Value = response.json().ok()?;
        let key = body.get("license")?.get("key")?.as_str()?;
        gitlab_key_to_spdx(key)
    }
}

/// GitLab license keys are lowercase slugs; map the common ones to SPDX.
fn gitlab_key_to_spdx(key: &str) -> Option<String> {
    let spdx = match key {
        "mit" => "MIT",
        "apache-2.0" => "Apache-2.0",
        "bsd-2-clause" => "BSD-2-Clause",
        "bsd-3-clause" => "BSD-3-Clause",
        "isc" => "ISC",
        "unlicense" => "Unlicense",
        "cc0-1.0" => "CC0-1.0",
        "gpl-2.0" => "GPL-2.0-only",
        "gpl-3.0" => "GPL-3.0-only",
        "lgpl-3.0" => "LGPL-3.0-only",
        "mpl-2.0" => "MPL-2.0",
        "agpl-3.0" => "AGPL-3.0-only",
        _ => return None,
    };
    Some(spdx.to_string())
}

/// Find the license-ish file in a working tree root.
pub fn find_license_file(worktree: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(worktree).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_ascii_uppercase();
            name.starts_with("LICENSE")
                || name.starts_with("LICENCE")
                || name.starts_with("COPYING")
                || name.starts_with("UNLICENSE")
        })
        .filter(|e| e.path().is_file())
        .map(|e| e.path())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn detect_in_tree(worktree: &Path) -> Option<String> {
    let path = find_license_file(worktree)?;
    let text = fs::read_to_string(&path).ok()?;
    Some(classify_license_text(&text))
}

/// Classify license body text into an SPDX identifier.
pub fn classify_license_text(text: &str) -> String {
    let upper = text.to_ascii_uppercase();

    if upper.contains("MIT LICENSE")
        || upper.contains("PERMISSION IS HEREBY GRANTED, FREE OF CHARGE")
    {
        return "MIT".to_string();
    }
    if upper.contains("APACHE LICENSE") && upper.contains("VERSION 2.0") {
        return "Apache-2.0".to_string();
    }
    if upper.contains("REDISTRIBUTION AND USE IN SOURCE AND BINARY FORMS") {
        return if upper.contains("NEITHER THE NAME") {
            "BSD-3-Clause".to_string()
        } else {
            "BSD-2-Clause".to_string()
        };
    }
    if upper.contains("PERMISSION TO USE, COPY, MODIFY") && upper.contains("ISC") {
        return "ISC".to_string();
    }
    if upper.contains("THIS IS FREE AND UNENCUMBERED SOFTWARE") {
        return "Unlicense".to_string();
    }
    if upper.contains("CC0 1.0") || upper.contains("CC0-1.0") {
        return "CC0-1.0".to_string();
    }
    if upper.contains("GNU GENERAL PUBLIC LICENSE") {
        return if upper.contains("VERSION 3") {
            "GPL-3.0-only".to_string()
        } else {
            "GPL-2.0-only".to_string()
        };
    }

    UNKNOWN_LICENSE.to_string()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn provider_detection_by_host() {
        assert_eq!(
            detect_provider("https://github.com/acme/utils"),
            Provider::GitHub
        );
        assert_eq!(
            detect_provider("https://gitlab.com/acme/utils"),
            Provider::GitLab
        );
        assert_eq!(
            detect_provider("https://bitbucket.org/acme/utils"),
            Provider::Bitbucket
        );
        assert_eq!(
            detect_provider("https://git.example.com/acme/utils"),
            Provider::Generic
        );
    }

    #[test]
    fn owner_repo_parses_common_shapes() {
        assert_eq!(
            owner_repo("https://github.com/acme/utils"),
            Some(("acme".to_string(), "utils".to_string()))
        );
        assert_eq!(
            owner_repo("https://github.com/acme/utils.git"),
            Some(("acme".to_string(), "utils".to_string()))
        );
        assert_eq!(
            owner_repo("git@github.com:acme/utils.git"),
            Some(("acme".to_string(), "utils".to_string()))
        );
        assert_eq!(owner_repo("https://github.com/"), None);
    }

    #[test]
    fn allowlist_membership() {
        let checker = LicenseChecker::new();
        assert!(checker.is_allowed("MIT"));
        assert!(checker.is_allowed("Apache-2.0"));
        assert!(!checker.is_allowed("GPL-3.0-only"));
        assert!(!checker.is_allowed("UNKNOWN"));

        let strict = LicenseChecker::with_allowlist(vec!["MIT".to_string()]);
        assert!(strict.is_allowed("MIT"));
        assert!(!strict.is_allowed("Apache-2.0"));
    }

    #[test]
    fn classifier_recognizes_common_licenses() {
        assert_eq!(
            classify_license_text(
                "MIT License\n\nPermission is hereby granted, free of charge..."
            ),
            "MIT"
        );
        assert_eq!(
            classify_license_text("Apache License\nVersion 2.0, January 2004"),
            "Apache-2.0"
        );
        assert_eq!(
            classify_license_text(
                "Redistribution and use in source and binary forms...\n\
                 Neither the name of the copyright holder..."
            ),
            "BSD-3-Clause"
        );
        assert_eq!(
            classify_license_text("Redistribution and use in source and binary forms..."),
            "BSD-2-Clause"
        );
        assert_eq!(
            classify_license_text("This is free and unencumbered software released..."),
            "Unlicense"
        );
        assert_eq!(
            classify_license_text("GNU GENERAL PUBLIC LICENSE\nVersion 3, 29 June 2007"),
            "GPL-3.0-only"
        );
        assert_eq!(classify_license_text("all rights reserved"), "UNKNOWN");
    }

    #[test]
    fn tree_fallback_finds_license_file() {
        let td = tempdir().expect("tempdir");
        std::fs::write(
            td.path().join("LICENSE"),
            "MIT License\nPermission is hereby granted, free of charge",
        )
        .expect("write");

        let checker = LicenseChecker::new();
        let spdx = checker.detect(
            "https://git.example.com/acme/utils",
            Some(td.path()),
            &CancelToken::new(),
        );
        assert_eq!(spdx, "MIT");
    }

    #[test]
    fn tree_fallback_handles_copying_name() {
        let td = tempdir().expect("tempdir");
        std::fs::write(
            td.path().join("COPYING"),
            "GNU GENERAL PUBLIC LICENSE\nVersion 2, June 1991",
        )
        .expect("write");

        let checker = LicenseChecker::new();
        let spdx = checker.detect(
            "https://git.example.com/acme/utils",
            Some(td.path()),
            &CancelToken::new(),
        );
        assert_eq!(spdx, "GPL-2.0-only");
    }

    #[test]
    fn detection_failure_degrades_to_unknown() {
        let td = tempdir().expect("tempdir");
        let checker = LicenseChecker::new()
            .with_api_bases("http://127.0.0.1:1", "http://127.0.0.1:1");
        let spdx = checker.detect(
            "https://github.com/acme/utils",
            Some(td.path()),
            &CancelToken::new(),
        );
        assert_eq!(spdx, "UNKNOWN");
    }

    #[test]
    fn github_api_answer_wins_over_tree() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("server");
        let base = format!("http://{}", server.server_addr());
        let handle = std::thread::spawn(move || {
            let request = server.recv().expect("request");
            assert!(request.url().ends_with("/repos/acme/utils/license"));
            let body = r#"{"license": {"spdx_id": "Apache-2.0"}}"#;
            let response = tiny_http::Response::from_string(body).with_header(
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .expect("header"),
            );
            request.respond(response).expect("respond");
        });

        let td = tempdir().expect("tempdir");
        // The tree says MIT, the API says Apache-2.0; API wins.
        std::fs::write(td.path().join("LICENSE"), "MIT License").expect("write");

        let checker = LicenseChecker::new().with_api_bases(&base, &base);
        let spdx = checker.detect(
            "https://github.com/acme/utils",
            Some(td.path()),
            &CancelToken::new(),
        );
        assert_eq!(spdx, "Apache-2.0");
        handle.join().expect("join");
    }

    #[test]
    fn gitlab_keys_map_to_spdx() {
        assert_eq!(gitlab_key_to_spdx("mit").as_deref(), Some("MIT"));
        assert_eq!(
            gitlab_key_to_spdx("apache-2.0").as_deref(),
            Some("Apache-2.0")
        );
        assert_eq!(gitlab_key_to_spdx("made-up"), None);
    }
}
