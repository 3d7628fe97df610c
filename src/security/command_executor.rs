//! SafeCommandExecutor: allow-listed external command execution
//!
//! Publishers shell out to `go`, `git`, `brew` and `golangci-lint`. Every
//! invocation goes through this executor, which:
//!
//! - rejects commands outside the allow-list
//! - passes arguments as a vector, never through a shell
//! - validates the working directory
//! - enforces a timeout and kills the child when it expires

use crate::core::error::DistributionError;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Commands publishers are allowed to run
const ALLOWED_COMMANDS: &[&str] = &["go", "git", "brew", "golangci-lint"];

/// Default limit for a single command
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed list
    #[error("Command '{0}' is not in the allowed list")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Spawning failed (binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command ran but exited unsuccessfully
    #[error("Command exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

impl CommandError {
    /// Attach the command line for the crate-level error
    pub fn into_distribution_error(self, command: &str, args: &[&str]) -> DistributionError {
        DistributionError::Command {
            command: format!("{} {}", command, args.join(" ")).trim_end().to_string(),
            message: self.to_string(),
        }
    }
}

/// Allow-listed async command executor
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    working_dir: PathBuf,
    timeout: Duration,
}

impl SafeCommandExecutor {
    /// Create an executor rooted at `working_dir`, which must exist
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.is_dir() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Check whether an allowed command is installed
    pub fn is_available(command: &str) -> bool {
        ALLOWED_COMMANDS.contains(&command) && which::which(command).is_ok()
    }

    /// Run a command and return its raw output regardless of exit status
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<Output, CommandError> {
        if !ALLOWED_COMMANDS.contains(&command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        debug!(command, ?args, dir = %self.working_dir.display(), "executing command");

        let child = Command::new(command)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CommandError::ExecutionFailed(e.to_string())),
            Err(_) => Err(CommandError::Timeout(self.timeout)),
        }
    }

    /// Run a command and return stdout, failing on a non-zero exit
    pub async fn run(&self, command: &str, args: &[&str]) -> Result<String, CommandError> {
        let output = self.execute(command, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CommandError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_rejected_command_rm() {
        let executor = SafeCommandExecutor::new(test_dir()).unwrap();
        let result = executor.execute("rm", &["-rf", "/"]).await;
        assert!(
            matches!(result, Err(CommandError::CommandNotAllowed(_))),
            "rm should be rejected as not in the allowed list"
        );
    }

    #[tokio::test]
    async fn test_rejected_shell() {
        let executor = SafeCommandExecutor::new(test_dir()).unwrap();
        let result = executor.run("sh", &["-c", "echo hi"]).await;
        assert!(matches!(result, Err(CommandError::CommandNotAllowed(_))));
    }

    #[test]
    fn test_invalid_working_directory() {
        let result = SafeCommandExecutor::new("/nonexistent/directory/that/does/not/exist");
        assert!(
            matches!(result, Err(CommandError::InvalidWorkingDirectory(_))),
            "Should reject non-existent working directory"
        );
    }

    #[test]
    fn test_disallowed_command_is_never_available() {
        assert!(!SafeCommandExecutor::is_available("curl"));
    }

    #[test]
    fn test_into_distribution_error_keeps_command_line() {
        let error = CommandError::Timeout(Duration::from_secs(1))
            .into_distribution_error("go", &["vet", "./..."]);

        assert_eq!(error.code(), "COMMAND_ERROR");
        assert!(error.to_string().contains("go vet ./..."));
    }
}
