//! Git operations for graft.
//!
//! The engine drives the `git` binary through the [`GitClient`] trait; the
//! shipped implementor is [`SystemGit`], which shells out with shallow
//! fetches and never touches submodules, LFS, or tags beyond the target
//! ref. The program name is overridable via the `GRAFT_GIT_BIN`
//! environment variable so tests can substitute a scripted fake.
//!
//! Every call takes a [`CancelToken`] and returns `Error::Cancelled`
//! instead of spawning once the token is signaled.

use std::env;
use std::path::Path;
use std::process::Command;

use graft_types::{CancelToken, Error, Result};

/// Minimal git surface the engine needs.
pub trait GitClient: Send + Sync {
    /// `git init` in an (empty) directory.
    fn init(&self, dir: &Path, cancel: &CancelToken) -> Result<()>;

    /// Register a named remote.
    fn add_remote(&self, dir: &Path, name: &str, url: &str, cancel: &CancelToken) -> Result<()>;

    /// Shallow-fetch a single ref from the named remote.
    fn fetch(&self, dir: &Path, depth: u32, ref_: &str, cancel: &CancelToken) -> Result<()>;

    /// Check out a ref (typically `FETCH_HEAD`).
    fn checkout(&self, dir: &Path, ref_: &str, cancel: &CancelToken) -> Result<()>;

    /// Full hex hash of `HEAD`.
    fn head_hash(&self, dir: &Path, cancel: &CancelToken) -> Result<String>;

    /// Exact tag pointing at a commit, if any.
    fn tag_for_commit(
        &self,
        dir: &Path,
        hash: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>>;

    /// Resolve a ref on a remote without cloning.
    fn ls_remote(&self, url: &str, ref_: &str, cancel: &CancelToken) -> Result<String>;
}

/// [`GitClient`] backed by the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct SystemGit {
    /// Permit `file://` URLs and local paths as clone sources.
    pub allow_local: bool,
}

impl SystemGit {
    pub fn new(allow_local: bool) -> Self {
        Self { allow_local }
    }

    /// Reject URL schemes we refuse to pass to git.
    ///
    /// Remote schemes (http, https, git, ssh) and scp-style `user@host:`
    /// URLs are always allowed; anything that resolves to the local
    /// filesystem requires `allow_local`.
    fn validate_url(&self, url: &str) -> Result<()> {
        let remote = url.starts_with("http://")
            || url.starts_with("https://")
            || url.starts_with("git://")
            || url.starts_with("ssh://")
            || is_scp_like(url);
        if remote || self.allow_local {
            return Ok(());
        }
        Err(Error::GitFailed {
            stage: "validate-url".to_string(),
            stderr: format!("local source {url:?} requires --local"),
        })
    }
}

/// `user@host:path` without a scheme.
fn is_scp_like(url: &str) -> bool {
    match (url.find('@'), url.find(':')) {
        (Some(at), Some(colon)) => at < colon && !url[..at].is_empty(),
        _ => false,
    }
}

fn git_program() -> String {
    env::var("GRAFT_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

/// Substrings in git stderr that mark a transient network failure.
const NETWORK_MARKERS: &[&str] = &[
    "Could not resolve host",
    "unable to access",
    "Connection refused",
    "Connection reset",
    "Connection timed out",
    "Operation timed out",
    "early EOF",
    "The remote end hung up",
    "transfer closed",
];

fn classify_failure(stage: &str, stderr: String) -> Error {
    if NETWORK_MARKERS.iter().any(|m| stderr.contains(m)) {
        Error::NetworkRetryable {
            message: format!("git {stage}: {}", stderr.trim()),
        }
    } else {
        Error::GitFailed {
            stage: stage.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Run git with the given args, returning trimmed stdout on success.
fn run_git(
    dir: Option<&Path>,
    stage: &str,
    args: &[&str],
    cancel: &CancelToken,
) -> Result<String> {
    cancel.check()?;

    let mut cmd = Command::new(git_program());
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().map_err(|e| Error::GitFailed {
        stage: stage.to_string(),
        stderr: format!("failed to execute git: {e}"),
    })?;

    if !output.status.success() {
        return Err(classify_failure(
            stage,
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl GitClient for SystemGit {
    fn init(&self, dir: &Path, cancel: &CancelToken) -> Result<()> {
        run_git(Some(dir), "init", &["init", "--quiet"], cancel)?;
        Ok(())
    }

    fn add_remote(&self, dir: &Path, name: &str, url: &str, cancel: &CancelToken) -> Result<()> {
        self.validate_url(url)?;
        run_git(Some(dir), "add-remote", &["remote", "add", name, url], cancel)?;
        Ok(())
    }

    fn fetch(&self, dir: &Path, depth: u32, ref_: &str, cancel: &CancelToken) -> Result<()> {
        let depth_arg = depth.to_string();
        run_git(
            Some(dir),
            "fetch",
            &[
                "fetch",
                "--quiet",
                "--depth",
                &depth_arg,
                "--no-tags",
                "origin",
                ref_,
            ],
            cancel,
        )?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, ref_: &str, cancel: &CancelToken) -> Result<()> {
        run_git(
            Some(dir),
            "checkout",
            &[
                "-c",
                "advice.detachedHead=false",
                "checkout",
                "--quiet",
                ref_,
            ],
            cancel,
        )?;
        Ok(())
    }

    fn head_hash(&self, dir: &Path, cancel: &CancelToken) -> Result<String> {
        let out = run_git(Some(dir), "head-hash", &["rev-parse", "HEAD"], cancel)?;
        if out.len() != 40 || !out.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::GitFailed {
                stage: "head-hash".to_string(),
                stderr: format!("unexpected rev-parse output {out:?}"),
            });
        }
        Ok(out)
    }

    fn tag_for_commit(
        &self,
        dir: &Path,
        hash: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>> {
        match run_git(
            Some(dir),
            "tag-for-commit",
            &["describe", "--tags", "--exact-match", hash],
            cancel,
        ) {
            Ok(tag) if tag.is_empty() => Ok(None),
            Ok(tag) => Ok(Some(tag)),
            // No exact tag is an expected condition, not a failure.
            Err(Error::GitFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ls_remote(&self, url: &str, ref_: &str, cancel: &CancelToken) -> Result<String> {
        self.validate_url(url)?;
        let out = run_git(None, "ls-remote", &["ls-remote", url, ref_], cancel)?;
        let hash = out
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("");
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::GitFailed {
                stage: "ls-remote".to_string(),
                stderr: format!("ref {ref_:?} not found at {url}"),
            });
        }
        Ok(hash.to_string())
    }
}
