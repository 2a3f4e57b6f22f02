//! # External Commands
//!
//! Runs shell commands inside a module directory. The working directory is
//! always passed to the child; the parent process never changes directory.
//!
//! ## Modes
//!
//! - synchronous: wait, capture both streams, return the exit status
//! - background: detach, redirect output to `run_command.out` and
//!   `run_command.err`, return a [`BackgroundHandle`] immediately

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Background stdout file, relative to the command's directory
pub const BACKGROUND_STDOUT: &str = "run_command.out";
/// Background stderr file, relative to the command's directory
pub const BACKGROUND_STDERR: &str = "run_command.err";

/// Dependency-manager variables that must not leak into a module's bundle
const CLEAN_ENV_PREFIXES: &[&str] = &["BUNDLE_", "BUNDLER_"];
const CLEAN_ENV_VARS: &[&str] = &["RUBYOPT", "RUBYLIB"];

/// How to run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Synchronous,
    Background,
}

/// Captured result of a synchronous command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    /// Exit status, `-1` when killed by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// A detached command. Results are read later from the output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundHandle {
    pub pid: u32,
    pub command: String,
    pub dir: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// What a command run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Completed(CommandOutput),
    Detached(BackgroundHandle),
}

impl RunResult {
    /// Exit status of a completed run; detached runs count as success.
    pub fn status(&self) -> i32 {
        match self {
            RunResult::Completed(output) => output.status,
            RunResult::Detached(_) => 0,
        }
    }
}

/// Commands that drive the dependency manager get a clean environment.
pub fn needs_clean_env(command: &str) -> bool {
    let command = command.trim_start();
    command.starts_with("bundle") || command.starts_with("sh ")
}

/// Run `command` in `dir` using `mode`.
pub async fn run_command(dir: &Path, command: &str, mode: RunMode) -> Result<RunResult> {
    match mode {
        RunMode::Synchronous => Ok(RunResult::Completed(run(dir, command).await?)),
        RunMode::Background => Ok(RunResult::Detached(spawn_background(dir, command)?)),
    }
}

/// Run `command` through `sh -c` in `dir` and wait for it.
///
/// Stdout is logged; a non-zero exit is logged with stderr.
pub async fn run(dir: &Path, command: &str) -> Result<CommandOutput> {
    tracing::debug!(dir = %dir.display(), command = %command, "Running command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(dir);
    if needs_clean_env(command) {
        for key in polluting_vars() {
            cmd.env_remove(key);
        }
    }
    let output = cmd.output().await?;

    let result = CommandOutput {
        command: command.to_string(),
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.stdout.trim().is_empty() {
        tracing::info!("\n{}", result.stdout.trim_end());
    }
    if !result.success() {
        tracing::error!(
            status = result.status,
            "Unable to run command '{}': {}",
            command,
            result.stderr.trim_end()
        );
    }
    Ok(result)
}

/// Start `command` detached in `dir` without waiting for it.
pub fn spawn_background(dir: &Path, command: &str) -> Result<BackgroundHandle> {
    let stdout_path = dir.join(BACKGROUND_STDOUT);
    let stderr_path = dir.join(BACKGROUND_STDERR);

    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(std::process::Stdio::null())
        .stdout(File::create(&stdout_path)?)
        .stderr(File::create(&stderr_path)?);
    if needs_clean_env(command) {
        for key in polluting_vars() {
            cmd.env_remove(key);
        }
    }
    let child = cmd.spawn()?;

    let handle = BackgroundHandle {
        pid: child.id(),
        command: command.to_string(),
        dir: dir.to_path_buf(),
        stdout_path,
        stderr_path,
        started_at: Utc::now(),
    };
    tracing::info!(pid = handle.pid, command = %command, "Started background command");
    Ok(handle)
}

// --- Private helpers ---

fn polluting_vars() -> Vec<String> {
    std::env::vars()
        .map(|(key, _)| key)
        .filter(|key| {
            CLEAN_ENV_VARS.contains(&key.as_str())
                || CLEAN_ENV_PREFIXES.iter().any(|p| key.starts_with(p))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_needs_clean_env() {
        assert!(needs_clean_env("bundle exec rake spec"));
        assert!(needs_clean_env("sh acc.sh"));
        assert!(!needs_clean_env("pdk validate -a"));
        assert!(!needs_clean_env("shellcheck x.sh"));
    }

    #[tokio::test]
    async fn test_run_captures_streams_and_status() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let out = run(dir.path(), "ls; echo oops >&2; exit 3").await.unwrap();
        assert_eq!(out.status, 3);
        assert!(!out.success());
        assert!(out.stdout.contains("marker"));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_uses_directory_without_chdir() {
        let dir = TempDir::new().unwrap();
        let before = std::env::current_dir().unwrap();
        let out = run(dir.path(), "pwd").await.unwrap();
        assert!(out.success());
        assert_eq!(std::env::current_dir().unwrap(), before);
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_background_returns_handle() {
        let dir = TempDir::new().unwrap();
        let result = run_command(dir.path(), "echo started", RunMode::Background)
            .await
            .unwrap();
        match result {
            RunResult::Detached(handle) => {
                assert!(handle.pid > 0);
                assert!(handle.stdout_path.ends_with(BACKGROUND_STDOUT));
                assert!(handle.stdout_path.exists());
                assert!(handle.stderr_path.exists());
            }
            other => panic!("expected detached run, got {:?}", other),
        }
    }
}
