//! Hook and process execution for graft.
//!
//! Vendor hooks (`pre_sync` / `post_sync`) are shell command strings run
//! through the platform shell with an injected environment describing the
//! vendor being synced. Output is captured, duration is recorded, and an
//! optional wall-clock timeout kills runaways.
//!
//! # Example
//!
//! ```
//! use graft_process::run_shell_hook;
//! use graft_types::CancelToken;
//! use std::path::Path;
//!
//! let result = run_shell_hook(
//!     "true",
//!     Path::new("."),
//!     &[],
//!     None,
//!     &CancelToken::new(),
//! ).expect("run");
//! assert!(result.success());
//! ```

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use graft_types::{CancelToken, Error, Result};
use serde::{Deserialize, Serialize};

/// Captured outcome of one hook execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResult {
    /// Exit code (-1 when unavailable, e.g. killed by signal or timeout).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl HookResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

fn shell_command(script: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(script);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }
}

/// Run a hook command string through the shell.
///
/// `env` entries are appended to the inherited environment. With a timeout
/// the child is polled and killed once the deadline passes; the timeout
/// note is appended to captured stderr.
pub fn run_shell_hook(
    script: &str,
    working_dir: &Path,
    env: &[(String, String)],
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<HookResult> {
    cancel.check()?;

    let start = Instant::now();
    let mut cmd = shell_command(script);
    cmd.current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| Error::HookFailed {
        hook: script.to_string(),
        exit_code: -1,
        stderr: format!("failed to spawn shell: {e}"),
    })?;

    let deadline = timeout.map(|t| start + t);
    loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }

        match child.try_wait().map_err(|e| Error::HookFailed {
            hook: script.to_string(),
            exit_code: -1,
            stderr: format!("failed to poll hook: {e}"),
        })? {
            Some(status) => {
                return Ok(HookResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
            None => {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();

                        let mut stderr = read_pipe(child.stderr.take());
                        stderr.push_str(&format!(
                            "\nhook timed out after {}",
                            humantime::format_duration(timeout.unwrap_or_default())
                        ));

                        return Ok(HookResult {
                            exit_code: -1,
                            stdout: read_pipe(child.stdout.take()),
                            stderr,
                            timed_out: true,
                            duration_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                }

                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

/// Run a hook and convert a non-zero exit into [`Error::HookFailed`].
pub fn run_hook_checked(
    name: &str,
    script: &str,
    working_dir: &Path,
    env: &[(String, String)],
    cancel: &CancelToken,
) -> Result<HookResult> {
    let result = run_shell_hook(script, working_dir, env, None, cancel)?;
    if !result.success() {
        return Err(Error::HookFailed {
            hook: name.to_string(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }
    Ok(result)
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}
