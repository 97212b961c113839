//! Bounded external command execution
//!
//! Every external tool invocation in the pipeline goes through
//! [`run_checked`]: a timeout is an ordinary failed output, never a panic,
//! so callers can always proceed to the next retry attempt.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Captured output of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Whether the command completed with exit code zero.
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Stderr if non-empty, else stdout.
    #[must_use]
    pub fn primary_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Command invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The binary is not installed or not on PATH
    #[error("command not found: {0}")]
    NotFound(String),

    /// Spawn or wait failed for another reason
    #[error("command io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `argv` with a hard timeout, capturing stdout/stderr.
///
/// A timeout yields `CommandOutput { timed_out: true, exit_code: -1, .. }`.
/// A missing binary is the only spawn failure surfaced as its own variant,
/// so callers can record "tool unavailable" instead of failing a check.
pub async fn run_checked(
    argv: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CommandError::NotFound(String::new()))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CommandError::NotFound(program.clone()));
        }
        Err(e) => return Err(CommandError::Io(e)),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            })
        }
        Err(_) => Ok(CommandOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("command timed out after {}s", timeout.as_secs()),
            timed_out: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let argv = vec!["echo".to_string(), "hello".to_string()];
        let out = run_checked(&argv, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_value() {
        let argv = vec!["false".to_string()];
        let out = run_checked(&argv, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let argv = vec!["definitely-not-a-real-tool-xyz".to_string()];
        let err = run_checked(&argv, None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[tokio::test]
    async fn timeout_is_a_value_not_a_fault() {
        let argv = vec!["sleep".to_string(), "5".to_string()];
        let out = run_checked(&argv, None, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, -1);
    }
}
