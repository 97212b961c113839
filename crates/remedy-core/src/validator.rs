//! Validator
//!
//! Re-checks the artifact after a fix:
//! - Quick: syntax/static check of the modified artifact
//! - Standard: Quick plus the environment's lint (a missing lint tool is
//!   recorded and passes)
//! - Thorough: Standard plus re-running the artifact and re-invoking the
//!   original task, confirming the fault no longer reproduces
//!
//! Validation never mutates the artifact. An unapplied fix fails
//! trivially without running any check.

use crate::config::ValidationConfig;
use crate::types::{
    DetectedError, FixResult, TaskFault, ValidationCheck, ValidationLevel, ValidationResult,
};
use remedy_env::command::run_checked;
use remedy_env::{detect_kind_for_path, environment_for, CheckOutcome, EnvironmentKind};
use std::time::Duration;

/// Zero-argument re-invocation of the originally failing task.
pub type RerunTask = dyn Fn() -> std::result::Result<(), TaskFault> + Send + Sync;

/// Post-fix artifact checker.
#[derive(Debug)]
pub struct Validator {
    run_tests_after_fix: bool,
    command_timeout: Duration,
}

impl Validator {
    #[must_use]
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            run_tests_after_fix: config.run_tests_after_fix,
            command_timeout: config.command_timeout(),
        }
    }

    /// Validate `fix` against the original error at the given depth.
    pub async fn validate(
        &self,
        fix: &FixResult,
        original: &DetectedError,
        level: ValidationLevel,
        rerun: Option<&RerunTask>,
    ) -> ValidationResult {
        if !fix.applied {
            let detail = fix
                .command_output
                .clone()
                .unwrap_or_else(|| "fix was not applied".to_string());
            return ValidationResult::failed(level, Vec::new(), detail);
        }

        let mut checks = Vec::new();
        let target = fix
            .suggestion
            .target_file
            .as_deref()
            .or_else(|| fix.modified_files.iter().next().map(|p| p.as_path()))
            .or(original.file_path.as_deref());

        // File-based checks only apply when a file was involved.
        if let Some(path) = target {
            let env = detect_kind_for_path(path)
                .map(environment_for)
                .unwrap_or_else(|| environment_for(original.environment));

            checks.push(ValidationCheck::Syntax);
            if let Some(detail) = blocking(env.check_syntax(path).await) {
                return ValidationResult::failed(level, checks, detail);
            }

            if level != ValidationLevel::Quick {
                checks.push(ValidationCheck::Lint);
                if let Some(detail) = blocking(env.lint(path).await) {
                    return ValidationResult::failed(level, checks, detail);
                }
            }

            if level == ValidationLevel::Thorough && self.run_tests_after_fix {
                if let Some(argv) = env.rerun_command(path) {
                    checks.push(ValidationCheck::Tests);
                    if let Some(detail) = self.rerun_artifact(&argv).await {
                        return ValidationResult::failed(level, checks, detail);
                    }
                }
            }
        }

        if level == ValidationLevel::Thorough {
            if let Some(rerun) = rerun {
                checks.push(ValidationCheck::Reexecution);
                if let Err(fault) = rerun() {
                    return ValidationResult::failed(
                        level,
                        checks,
                        format!("fault still reproduces: {fault}"),
                    );
                }
            }
        }

        tracing::debug!(?checks, "validation passed");
        ValidationResult::passed(level, checks)
    }

    /// Pre-flight check of inline content, outside any fix cycle.
    pub async fn check_content(
        &self,
        content: &str,
        environment: EnvironmentKind,
    ) -> ValidationResult {
        let outcome = environment_for(environment)
            .check_syntax_content(content)
            .await;
        match blocking(outcome) {
            None => ValidationResult::passed(ValidationLevel::Quick, vec![ValidationCheck::Syntax]),
            Some(detail) => {
                ValidationResult::failed(ValidationLevel::Quick, vec![ValidationCheck::Syntax], detail)
            }
        }
    }

    async fn rerun_artifact(&self, argv: &[String]) -> Option<String> {
        match run_checked(argv, None, self.command_timeout).await {
            Ok(out) if out.success() => None,
            Ok(out) => Some(format!(
                "re-execution failed (exit {}): {}",
                out.exit_code,
                out.primary_output().trim()
            )),
            Err(e) => Some(e.to_string()),
        }
    }
}

/// Failure detail only when the outcome blocks; a missing tool passes.
fn blocking(outcome: CheckOutcome) -> Option<String> {
    match outcome {
        CheckOutcome::Passed => None,
        CheckOutcome::ToolUnavailable { tool } => {
            tracing::debug!(%tool, "check tool unavailable; recorded as pass");
            None
        }
        CheckOutcome::Failed { detail } => Some(detail),
    }
}
