//! Fixer
//!
//! Applies one [`FixSuggestion`] to the target artifact. Failure is a
//! value here: anything the orchestrator can retry past comes back as
//! `FixResult { applied: false, .. }` with the detail in
//! `command_output`. The only hard errors are the inability to create a
//! required backup and raw changelog corruption upstream.

use crate::config::SafetyPolicy;
use crate::error::{HealingError, Result};
use crate::types::{AnalysisResult, FixResult, FixStrategy, FixSuggestion};
use chrono::Utc;
use parking_lot::Mutex;
use remedy_env::command::{run_checked, CommandError};
use remedy_env::detect_kind_for_path;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Applies suggestions under the safety policy.
pub struct Fixer {
    safety: SafetyPolicy,
    backup_dir: PathBuf,
    command_timeout: Duration,
    /// Backups already restored once; a second rollback is a no-op
    consumed_backups: Mutex<HashSet<PathBuf>>,
}

impl Fixer {
    #[must_use]
    pub fn new(safety: SafetyPolicy, backup_dir: PathBuf, command_timeout: Duration) -> Self {
        Self {
            safety,
            backup_dir,
            command_timeout,
            consumed_backups: Mutex::new(HashSet::new()),
        }
    }

    /// Apply `suggestion`. Effective dry-run is the override when given,
    /// else the policy default. The analysis supplies the root cause for
    /// guard-code synthesis when a suggestion left content generation to
    /// the fixer. Only [`HealingError::BackupFailed`] (and io errors
    /// while creating the backup directory) escape as errors.
    pub async fn apply(
        &self,
        suggestion: &FixSuggestion,
        analysis: &AnalysisResult,
        dry_run_override: Option<bool>,
    ) -> Result<FixResult> {
        let dry_run = dry_run_override.unwrap_or(self.safety.dry_run);

        if let Some(target) = &suggestion.target_file {
            if self.safety.is_path_protected(target) {
                tracing::warn!(target = %target.display(), "refusing fix against protected path");
                return Ok(FixResult::unapplied(
                    suggestion.clone(),
                    format!("policy denied: {} is protected", target.display()),
                ));
            }
        }

        match suggestion.strategy {
            FixStrategy::ManualOnly => Ok(FixResult::unapplied(
                suggestion.clone(),
                "manual-only suggestion; no automatic action taken",
            )),
            FixStrategy::SuggestRetryWrapper => Ok(FixResult::unapplied(
                suggestion.clone(),
                "advisory: retry the task with backoff; no artifact change",
            )),
            FixStrategy::InstallDependency | FixStrategy::RunCommand => {
                Ok(self.apply_command(suggestion, dry_run).await)
            }
            FixStrategy::PatchFile | FixStrategy::AddGuardCode => {
                self.apply_file_change(suggestion, analysis, dry_run).await
            }
        }
    }

    async fn apply_command(&self, suggestion: &FixSuggestion, dry_run: bool) -> FixResult {
        let Some(command) = &suggestion.command_to_run else {
            return FixResult::unapplied(suggestion.clone(), "suggestion carries no command");
        };
        if !self.safety.is_command_allowed(command) {
            tracing::warn!(%command, "command not on the allow-list");
            return FixResult::unapplied(
                suggestion.clone(),
                format!("policy denied: command not allowed: {command}"),
            );
        }
        if dry_run {
            return FixResult::unapplied(
                suggestion.clone(),
                format!("[dry-run] would run: {command}"),
            );
        }

        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        match run_checked(&argv, None, self.command_timeout).await {
            Ok(out) => {
                let applied = out.success();
                tracing::info!(%command, exit_code = out.exit_code, applied, "fix command ran");
                FixResult {
                    suggestion: suggestion.clone(),
                    applied,
                    backup_path: None,
                    modified_files: BTreeSet::new(),
                    command_output: Some(format!(
                        "exit {}\n{}",
                        out.exit_code,
                        out.primary_output().trim()
                    )),
                    timestamp: Utc::now(),
                }
            }
            Err(CommandError::NotFound(tool)) => FixResult::unapplied(
                suggestion.clone(),
                format!("command not found: {tool}"),
            ),
            Err(e) => FixResult::unapplied(suggestion.clone(), e.to_string()),
        }
    }

    async fn apply_file_change(
        &self,
        suggestion: &FixSuggestion,
        analysis: &AnalysisResult,
        dry_run: bool,
    ) -> Result<FixResult> {
        let Some(target) = &suggestion.target_file else {
            return Ok(FixResult::unapplied(
                suggestion.clone(),
                "suggestion carries no target file",
            ));
        };
        let content = match &suggestion.proposed_content {
            Some(content) => content.clone(),
            None if suggestion.strategy == FixStrategy::AddGuardCode => guard_comment(analysis),
            None => {
                return Ok(FixResult::unapplied(
                    suggestion.clone(),
                    "suggestion carries no proposed content",
                ));
            }
        };
        let existing = match tokio::fs::read_to_string(target).await {
            Ok(existing) => existing,
            Err(e) => {
                return Ok(FixResult::unapplied(
                    suggestion.clone(),
                    format!("cannot read {}: {e}", target.display()),
                ));
            }
        };

        let new_content = match suggestion.strategy {
            FixStrategy::AddGuardCode => {
                let mut combined = existing.clone();
                if !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(&content);
                combined
            }
            _ => content,
        };

        if dry_run {
            return Ok(FixResult::unapplied(
                suggestion.clone(),
                format!(
                    "[dry-run] would write {} bytes to {}",
                    new_content.len(),
                    target.display()
                ),
            ));
        }

        if self.safety.sandbox_execution {
            if let Some(detail) = self.sandbox_reject(target, &new_content).await {
                return Ok(FixResult::unapplied(
                    suggestion.clone(),
                    format!("sandbox validation failed: {detail}"),
                ));
            }
        }

        let backup_path = if self.safety.backup_before_fix {
            Some(self.create_backup(target).await?)
        } else {
            None
        };

        if let Err(e) = tokio::fs::write(target, &new_content).await {
            return Ok(FixResult::unapplied(
                suggestion.clone(),
                format!("cannot write {}: {e}", target.display()),
            ));
        }
        tracing::info!(
            target = %target.display(),
            strategy = %suggestion.strategy,
            "fix applied"
        );

        Ok(FixResult {
            suggestion: suggestion.clone(),
            applied: true,
            backup_path,
            modified_files: BTreeSet::from([target.clone()]),
            command_output: None,
            timestamp: Utc::now(),
        })
    }

    /// Validate candidate content in a scratch copy before promotion.
    /// Returns the failure detail when the candidate is rejected.
    async fn sandbox_reject(&self, target: &Path, content: &str) -> Option<String> {
        let kind = detect_kind_for_path(target)?;
        let env = remedy_env::environment_for(kind);
        env.check_syntax_content(content)
            .await
            .detail()
            .map(str::to_string)
    }

    /// Copy the target to a timestamped backup and verify it reads back.
    /// Inability to back up aborts the attempt.
    async fn create_backup(&self, target: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let stamp = Utc::now().format("%Y%m%d%H%M%S%f");
        let backup = self.backup_dir.join(format!("{name}.{stamp}.bak"));

        let fail = |reason: String| HealingError::BackupFailed {
            path: target.to_path_buf(),
            reason,
        };
        tokio::fs::copy(target, &backup)
            .await
            .map_err(|e| fail(e.to_string()))?;
        tokio::fs::read(&backup)
            .await
            .map_err(|e| fail(format!("backup not readable: {e}")))?;
        Ok(backup)
    }

    /// Restore the backup over every modified file. Idempotent: the
    /// second call for the same result returns `false`, as does a result
    /// with nothing to roll back.
    pub async fn rollback(&self, fix: &FixResult) -> bool {
        let Some(backup) = &fix.backup_path else {
            return false;
        };
        if self.consumed_backups.lock().contains(backup) {
            return false;
        }
        for file in &fix.modified_files {
            if let Err(e) = tokio::fs::copy(backup, file).await {
                tracing::warn!(
                    backup = %backup.display(),
                    file = %file.display(),
                    error = %e,
                    "rollback copy failed"
                );
                return false;
            }
        }
        self.consumed_backups.lock().insert(backup.clone());
        tracing::info!(backup = %backup.display(), "rollback performed");
        true
    }

    /// Delete the backups of a successfully concluded session.
    pub async fn prune_backups(&self, backups: &[PathBuf]) {
        for backup in backups {
            if let Err(e) = tokio::fs::remove_file(backup).await {
                tracing::debug!(backup = %backup.display(), error = %e, "backup prune skipped");
            }
        }
    }
}

/// Last-resort guard body for suggestions that left content generation
/// to the fixer: a comment naming the root cause, valid in every
/// supported artifact syntax.
fn guard_comment(analysis: &AnalysisResult) -> String {
    format!("# guard: {}\n", analysis.root_cause)
}
