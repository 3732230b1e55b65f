//! Pre-send hook execution.
//!
//! Every regular file in the hooks directory is run, in file name order,
//! against each staged unit before it is handed to delivery. Hooks receive
//! the staged path and the converted staging directory both as arguments
//! and as environment variables; anything they write into the converted
//! directory is picked up by the converted destination's orchestrator.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Environment variable carrying the staged unit path.
pub const ENV_STAGED_PATH: &str = "DROPSHIP_STAGED_PATH";

/// Environment variable carrying the converted staging directory.
pub const ENV_CONVERTED_DIR: &str = "DROPSHIP_CONVERTED_DIR";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Result of running one hook.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    /// Path of the hook executable.
    pub hook: PathBuf,

    /// Whether the hook exited successfully within its time limit.
    pub success: bool,

    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,

    /// Captured standard error, trimmed.
    pub stderr: String,

    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

/// Runs the pre-send hooks for staged units.
#[derive(Debug, Clone)]
pub struct HookRunner {
    hooks_dir: Option<PathBuf>,
    converted_dir: PathBuf,
    timeout: Duration,
}

impl HookRunner {
    /// Create a runner. With no hooks directory every run is a no-op.
    pub fn new(hooks_dir: Option<PathBuf>, converted_dir: impl Into<PathBuf>) -> Self {
        Self {
            hooks_dir,
            converted_dir: converted_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-hook time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// List the hook executables in name order.
    ///
    /// A missing hooks directory yields no hooks.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let Some(dir) = &self.hooks_dir else {
            return Ok(Vec::new());
        };
        if !dir.is_dir() {
            debug!("Hooks directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }

        let mut hooks = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                hooks.push(entry.path());
            }
        }
        hooks.sort();
        Ok(hooks)
    }

    /// Run every hook against `staged`.
    ///
    /// A failing hook is logged and does not stop the remaining hooks.
    pub async fn run(&self, staged: &Path) -> Result<Vec<HookOutcome>> {
        let hooks = self.discover()?;
        let mut outcomes = Vec::with_capacity(hooks.len());

        for hook in hooks {
            let outcome = self.run_one(&hook, staged).await;
            if outcome.success {
                info!(
                    "Hook {} finished for {} in {}ms",
                    hook.display(),
                    staged.display(),
                    outcome.duration_ms
                );
            } else {
                warn!(
                    "Hook {} failed for {} (exit code {:?}): {}",
                    hook.display(),
                    staged.display(),
                    outcome.exit_code,
                    outcome.stderr
                );
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn run_one(&self, hook: &Path, staged: &Path) -> HookOutcome {
        let start = Instant::now();
        let mut outcome = HookOutcome {
            hook: hook.to_path_buf(),
            success: false,
            exit_code: None,
            stderr: String::new(),
            duration_ms: 0,
        };

        let child = Command::new(hook)
            .arg(staged)
            .arg(&self.converted_dir)
            .env(ENV_STAGED_PATH, staged)
            .env(ENV_CONVERTED_DIR, &self.converted_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                outcome.stderr = format!("failed to spawn: {e}");
                outcome.duration_ms = elapsed_ms(start);
                return outcome;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                outcome.success = output.status.success();
                outcome.exit_code = output.status.code();
                outcome.stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            }
            Ok(Err(e)) => outcome.stderr = format!("failed to wait: {e}"),
            Err(_) => outcome.stderr = format!("timed out after {:?}", self.timeout),
        }
        outcome.duration_ms = elapsed_ms(start);
        outcome
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
