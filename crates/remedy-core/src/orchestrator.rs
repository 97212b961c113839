//! Orchestrator
//!
//! Sequences Detector -> Analyzer -> Fixer -> Validator -> changelog for
//! one fault at a time, owning the retry/backoff loop:
//!
//! Idle -> Detecting -> Analyzing -> Fixing -> Validating ->
//!   { Succeeded | RetryBackoff -> Analyzing | ManualInterventionRequired }
//!
//! Sessions are independent; stages within one session run strictly
//! sequentially. The safety policy is snapshotted when a session starts
//! and holds for its lifetime. Every terminal transition is appended to
//! the changelog before control returns to the caller.

use crate::analyzer::Analyzer;
use crate::changelog::{ChangelogStore, EventType, HealingStats, IncidentRecord, Severity};
use crate::config::{HealingConfig, SafetyPolicy};
use crate::detector::Detector;
use crate::error::Result;
use crate::fixer::Fixer;
use crate::types::{
    AnalysisResult, AttemptRecord, DetectedError, FinalResult, FixResult, FixStrategy,
    FixSuggestion, HealingSession, IncidentId, TaskFault, ValidationLevel,
};
use crate::validator::{RerunTask, Validator};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use remedy_env::{EnvironmentKind, ErrorType};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Caller-supplied approval gate consulted when `require_approval` is set.
pub type Approver = dyn Fn(&FixSuggestion) -> bool + Send + Sync;

/// Observer invoked when a session opens on a classified error.
pub type ErrorObserver = dyn Fn(&DetectedError) + Send + Sync;

/// Observer invoked after each fix application attempt.
pub type FixObserver = dyn Fn(&FixResult) + Send + Sync;

/// Observer invoked when a session closes, with its final state.
pub type CompletionObserver = dyn Fn(&HealingSession) + Send + Sync;

/// The healing state machine and its supervision surfaces.
pub struct Orchestrator {
    config: HealingConfig,
    detector: Detector,
    analyzer: Analyzer,
    fixer: Fixer,
    validator: Validator,
    changelog: ChangelogStore,
    active: DashMap<IncidentId, DateTime<Utc>>,
    cancel: CancellationToken,
    approver: Option<Box<Approver>>,
    on_error: Vec<Box<ErrorObserver>>,
    on_fix: Vec<Box<FixObserver>>,
    on_complete: Vec<Box<CompletionObserver>>,
}

impl Orchestrator {
    /// Build the pipeline from a configuration. Opens (or creates) the
    /// changelog store up front so corruption surfaces immediately.
    pub async fn new(config: HealingConfig) -> Result<Self> {
        let changelog = ChangelogStore::open(
            config.logging.changelog_path(),
            config.logging.to_console,
            config.logging.to_file,
        )
        .await?;
        let fixer = Fixer::new(
            config.safety.clone(),
            config.logging.backup_dir(),
            config.validation.command_timeout(),
        );
        let validator = Validator::new(&config.validation);
        Ok(Self {
            config,
            detector: Detector::new(),
            analyzer: Analyzer::new(),
            fixer,
            validator,
            changelog,
            active: DashMap::new(),
            cancel: CancellationToken::new(),
            approver: None,
            on_error: Vec::new(),
            on_fix: Vec::new(),
            on_complete: Vec::new(),
        })
    }

    /// Register the approval gate used when `require_approval` is set.
    /// Without one, approval-gated suggestions are denied by policy.
    #[must_use]
    pub fn with_approver(
        mut self,
        approver: impl Fn(&FixSuggestion) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.approver = Some(Box::new(approver));
        self
    }

    /// Register an observer for classified errors entering a session.
    #[must_use]
    pub fn on_error(mut self, observer: impl Fn(&DetectedError) + Send + Sync + 'static) -> Self {
        self.on_error.push(Box::new(observer));
        self
    }

    /// Register an observer for every fix application attempt.
    #[must_use]
    pub fn on_fix(mut self, observer: impl Fn(&FixResult) + Send + Sync + 'static) -> Self {
        self.on_fix.push(Box::new(observer));
        self
    }

    /// Register an observer for closed sessions.
    #[must_use]
    pub fn on_complete(
        mut self,
        observer: impl Fn(&HealingSession) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete.push(Box::new(observer));
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Token that cancels in-flight retry backoffs when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of sessions currently in flight.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.len()
    }

    /// Aggregate statistics from the changelog.
    pub async fn statistics(&self) -> HealingStats {
        self.changelog.statistics().await
    }

    /// Records for one incident, in append order.
    pub async fn incident_records(&self, incident_id: IncidentId) -> Vec<IncidentRecord> {
        self.changelog.records_for(incident_id).await
    }

    /// Heal a classified error, analyzing it first.
    pub async fn heal(
        &self,
        error: DetectedError,
        rerun: Option<&RerunTask>,
    ) -> Result<HealingSession> {
        let analysis = self.analyzer.analyze(&error);
        self.heal_with_analysis(error, analysis, rerun).await
    }

    /// Heal with a pre-computed analysis (callers that bring their own
    /// ranked suggestions).
    pub async fn heal_with_analysis(
        &self,
        error: DetectedError,
        analysis: AnalysisResult,
        rerun: Option<&RerunTask>,
    ) -> Result<HealingSession> {
        let incident_id = IncidentId::new();
        let started_at = Utc::now();
        self.active.insert(incident_id, started_at);
        let result = self
            .run_session(incident_id, started_at, error, analysis, rerun)
            .await;
        self.active.remove(&incident_id);
        if let Ok(session) = &result {
            for observer in &self.on_complete {
                observer(session);
            }
        }
        result
    }

    /// Heal a fault raised by a supervised task.
    pub async fn heal_fault(
        &self,
        fault: &TaskFault,
        rerun: Option<&RerunTask>,
    ) -> Result<HealingSession> {
        let error = self.detector.classify_fault(fault);
        self.heal(error, rerun).await
    }

    /// Heal from captured process output.
    pub async fn heal_from_output(
        &self,
        text: &str,
        exit_code: i32,
        environment: EnvironmentKind,
        file_path: Option<&Path>,
        rerun: Option<&RerunTask>,
    ) -> Result<HealingSession> {
        let error = self
            .detector
            .classify_output(text, exit_code, environment, file_path);
        self.heal(error, rerun).await
    }

    /// Run `task` under supervision: on fault, heal, and when healing
    /// succeeds re-invoke the task once. A fault raised during that
    /// re-invocation is returned to the caller as-is, never re-healed.
    /// If healing does not succeed, the original fault propagates.
    pub async fn protect<T, F>(&self, task: F) -> std::result::Result<T, TaskFault>
    where
        F: Fn() -> std::result::Result<T, TaskFault> + Send + Sync + 'static,
    {
        match task() {
            Ok(value) => Ok(value),
            Err(fault) => {
                let task = Arc::new(task);
                let rerun = {
                    let task = Arc::clone(&task);
                    move || (*task)().map(|_| ())
                };
                let session = match self.heal_fault(&fault, Some(&rerun)).await {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::error!(error = %e, "healing aborted; propagating original fault");
                        return Err(fault);
                    }
                };
                if session.succeeded() {
                    (*task)()
                } else {
                    Err(fault)
                }
            }
        }
    }

    /// Scoped-block supervision: run `scope` once. `Ok(Some(value))` on
    /// normal completion, `Ok(None)` when a fault occurred but was
    /// healed, `Err(fault)` when healing did not succeed.
    pub async fn supervise<T, F>(&self, scope: F) -> std::result::Result<Option<T>, TaskFault>
    where
        F: FnOnce() -> std::result::Result<T, TaskFault>,
    {
        match scope() {
            Ok(value) => Ok(Some(value)),
            Err(fault) => {
                let session = match self.heal_fault(&fault, None).await {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::error!(error = %e, "healing aborted; propagating original fault");
                        return Err(fault);
                    }
                };
                if session.succeeded() {
                    Ok(None)
                } else {
                    Err(fault)
                }
            }
        }
    }

    async fn run_session(
        &self,
        incident_id: IncidentId,
        started_at: DateTime<Utc>,
        error: DetectedError,
        analysis: AnalysisResult,
        rerun: Option<&RerunTask>,
    ) -> Result<HealingSession> {
        if !self.config.enabled {
            tracing::warn!(%incident_id, "healing disabled; closing session unhandled");
            return Ok(close(incident_id, started_at, Vec::new(), FinalResult::Failed));
        }
        if !self.config.environments.contains(&error.environment) {
            tracing::warn!(
                %incident_id,
                environment = %error.environment,
                "environment not enabled; closing session unhandled"
            );
            return Ok(close(incident_id, started_at, Vec::new(), FinalResult::Failed));
        }

        // Policy snapshot: the rules at session start hold for its lifetime.
        let policy = self.config.safety.clone();

        self.changelog
            .append(
                detected_record(incident_id, &error)
            )
            .await?;
        for observer in &self.on_error {
            observer(&error);
        }
        self.changelog
            .append(
                IncidentRecord::new(incident_id, EventType::AnalysisComplete, Severity::Info)
                    .with_environment(error.environment)
                    .with_error(error.error_type, analysis.root_cause.clone()),
            )
            .await?;

        let level = self.validation_level(rerun.is_some());
        let max_attempts = self.config.retry.max_attempts;
        let mut excluded: HashSet<usize> = HashSet::new();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut attempt: u32 = 0;

        let final_result = loop {
            let Some((index, suggestion)) = self
                .select_suggestion(incident_id, &policy, &analysis.suggestions, &mut excluded)
                .await?
            else {
                break FinalResult::ManualInterventionRequired;
            };
            attempt += 1;

            self.changelog
                .append(
                    IncidentRecord::new(incident_id, EventType::FixGenerated, Severity::Info)
                        .with_fix(suggestion.description.clone(), suggestion.reasoning.clone())
                        .with_attempt(attempt),
                )
                .await?;

            let fix = self.fixer.apply(&suggestion, &analysis, None).await?;
            for observer in &self.on_fix {
                observer(&fix);
            }
            let applied_event = if fix.applied {
                EventType::FixApplied
            } else {
                EventType::FixFailed
            };
            let mut applied_record =
                IncidentRecord::new(incident_id, applied_event, Severity::Info)
                    .with_fix(suggestion.description.clone(), suggestion.reasoning.clone())
                    .with_attempt(attempt);
            if fix.applied {
                if let Some(content) = &suggestion.proposed_content {
                    applied_record = applied_record.with_diff(content.clone());
                }
            }
            self.changelog.append(applied_record).await?;

            let validation = self.validator.validate(&fix, &error, level, rerun).await;
            let validated_event = if validation.success {
                EventType::FixValidated
            } else {
                EventType::FixFailed
            };
            self.changelog
                .append(
                    IncidentRecord::new(incident_id, validated_event, Severity::Info)
                        .with_validation(validation.success)
                        .with_attempt(attempt),
                )
                .await?;

            excluded.insert(index);
            let success = validation.success;
            let needs_rollback = !success && self.config.validation.rollback_on_failure;
            attempts.push(AttemptRecord {
                error: error.clone(),
                suggestion,
                fix,
                validation,
            });

            if success {
                break FinalResult::Succeeded;
            }

            if needs_rollback {
                if let Some(last) = attempts.last() {
                    if self.fixer.rollback(&last.fix).await {
                        self.changelog
                            .append(
                                IncidentRecord::new(
                                    incident_id,
                                    EventType::RollbackPerformed,
                                    Severity::Warning,
                                )
                                .with_attempt(attempt),
                            )
                            .await?;
                    }
                }
            }

            if attempt >= max_attempts {
                break FinalResult::ManualInterventionRequired;
            }

            let delay = self.config.retry.delay_before(attempt + 1);
            self.changelog
                .append(
                    IncidentRecord::new(incident_id, EventType::RetryScheduled, Severity::Info)
                        .with_attempt(attempt + 1),
                )
                .await?;
            tokio::select! {
                _ = self.cancel.cancelled() => break FinalResult::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.log_terminal(incident_id, &error, final_result, attempts.len() as u32)
            .await?;
        if final_result == FinalResult::Succeeded {
            let backups: Vec<PathBuf> = attempts
                .iter()
                .filter_map(|a| a.fix.backup_path.clone())
                .collect();
            self.fixer.prune_backups(&backups).await;
        }
        Ok(close(incident_id, started_at, attempts, final_result))
    }

    /// Highest-confidence suggestion not yet attempted and not vetoed.
    /// Vetoed suggestions are logged as policy-denied and marked
    /// exhausted; manual-only suggestions are never auto-applied.
    async fn select_suggestion(
        &self,
        incident_id: IncidentId,
        policy: &SafetyPolicy,
        suggestions: &[FixSuggestion],
        excluded: &mut HashSet<usize>,
    ) -> Result<Option<(usize, FixSuggestion)>> {
        for (index, suggestion) in suggestions.iter().enumerate() {
            if excluded.contains(&index) || suggestion.strategy == FixStrategy::ManualOnly {
                continue;
            }
            match policy_veto(policy, self.approver.as_deref(), suggestion) {
                None => return Ok(Some((index, suggestion.clone()))),
                Some(reason) => {
                    // Exhausted for this session; the snapshot cannot change.
                    excluded.insert(index);
                    tracing::warn!(%incident_id, %reason, "suggestion denied by policy");
                    self.changelog
                        .append(
                            IncidentRecord::new(
                                incident_id,
                                EventType::PolicyDenied,
                                Severity::Warning,
                            )
                            .with_fix(suggestion.description.clone(), reason),
                        )
                        .await?;
                }
            }
        }
        Ok(None)
    }

    fn validation_level(&self, has_rerun: bool) -> ValidationLevel {
        if self.config.validation.run_tests_after_fix || has_rerun {
            ValidationLevel::Thorough
        } else if self.config.validation.syntax_check_after_fix {
            ValidationLevel::Standard
        } else {
            ValidationLevel::Quick
        }
    }

    async fn log_terminal(
        &self,
        incident_id: IncidentId,
        error: &DetectedError,
        final_result: FinalResult,
        attempts: u32,
    ) -> Result<()> {
        let record = match final_result {
            FinalResult::Succeeded => {
                IncidentRecord::new(incident_id, EventType::HealingComplete, Severity::Info)
            }
            FinalResult::Cancelled => IncidentRecord::new(
                incident_id,
                EventType::ManualInterventionRequired,
                Severity::Warning,
            )
            .with_error(error.error_type, "session cancelled during retry backoff"),
            FinalResult::Failed | FinalResult::ManualInterventionRequired => {
                IncidentRecord::new(
                    incident_id,
                    EventType::ManualInterventionRequired,
                    Severity::Error,
                )
                .with_error(error.error_type, error.message.clone())
            }
        };
        self.changelog
            .append(record.with_environment(error.environment).with_attempt(attempts))
            .await
    }
}

fn close(
    incident_id: IncidentId,
    started_at: DateTime<Utc>,
    attempts: Vec<AttemptRecord>,
    final_result: FinalResult,
) -> HealingSession {
    tracing::info!(%incident_id, ?final_result, attempts = attempts.len(), "session closed");
    HealingSession {
        incident_id,
        attempts,
        final_result,
        started_at,
        ended_at: Utc::now(),
    }
}

fn detected_record(incident_id: IncidentId, error: &DetectedError) -> IncidentRecord {
    let mut record =
        IncidentRecord::new(incident_id, EventType::ErrorDetected, severity_for(error.error_type))
            .with_environment(error.environment)
            .with_error(error.error_type, error.message.clone());
    if let Some(path) = &error.file_path {
        record = record.with_file(path);
    }
    if let Some(line) = error.line_number {
        record = record.with_line(line);
    }
    if let Some(context) = &error.raw_context {
        record = record.with_stack_trace(context.clone());
    }
    record
}

fn severity_for(error_type: ErrorType) -> Severity {
    match error_type {
        ErrorType::Permission | ErrorType::Resource | ErrorType::Network => Severity::Error,
        _ => Severity::Warning,
    }
}

/// Denial reason when `suggestion` is vetoed, `None` when it may run.
fn policy_veto(
    policy: &SafetyPolicy,
    approver: Option<&Approver>,
    suggestion: &FixSuggestion,
) -> Option<String> {
    if let Some(target) = &suggestion.target_file {
        if policy.is_path_protected(target) {
            return Some(format!("protected path: {}", target.display()));
        }
    }
    if let Some(command) = &suggestion.command_to_run {
        if !policy.is_command_allowed(command) {
            return Some(format!("command not allowed: {command}"));
        }
    }
    if policy.require_approval {
        match approver {
            None => return Some("approval required but no approver registered".to_string()),
            Some(approve) if !approve(suggestion) => {
                return Some("approver rejected the suggestion".to_string());
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn policy_veto_catches_protected_paths_and_commands() {
        let policy = SafetyPolicy {
            protected_paths: vec![PathBuf::from("/etc")],
            allowed_external_commands: vec!["pip".to_string()],
            ..SafetyPolicy::default()
        };
        let protected = FixSuggestion::new("d", "r", 0.9, FixStrategy::PatchFile)
            .with_target_file("/etc/config");
        assert!(policy_veto(&policy, None, &protected).is_some());

        let forbidden = FixSuggestion::new("d", "r", 0.9, FixStrategy::RunCommand)
            .with_command("rm -rf /");
        assert!(policy_veto(&policy, None, &forbidden).is_some());

        let fine = FixSuggestion::new("d", "r", 0.9, FixStrategy::RunCommand)
            .with_command("pip install requests");
        assert!(policy_veto(&policy, None, &fine).is_none());
    }

    #[test]
    fn approval_gate_denies_without_an_approver() {
        let policy = SafetyPolicy {
            require_approval: true,
            ..SafetyPolicy::default()
        };
        let suggestion = FixSuggestion::new("d", "r", 0.9, FixStrategy::RunCommand)
            .with_command("pip install requests");
        assert!(policy_veto(&policy, None, &suggestion).is_some());

        let approve: Box<Approver> = Box::new(|_| true);
        assert!(policy_veto(&policy, Some(approve.as_ref()), &suggestion).is_none());

        let reject: Box<Approver> = Box::new(|_| false);
        assert!(policy_veto(&policy, Some(reject.as_ref()), &suggestion).is_some());
    }

    #[tokio::test]
    async fn observers_fire_per_stage() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let mut config = HealingConfig::enabled_default();
        config.logging.directory = dir.path().to_path_buf();
        config.logging.to_console = false;
        config.retry.max_attempts = 1;

        let errors = Arc::new(AtomicUsize::new(0));
        let fixes = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new(config)
            .await
            .unwrap()
            .on_error({
                let count = Arc::clone(&errors);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_fix({
                let count = Arc::clone(&fixes);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_complete({
                let count = Arc::clone(&completions);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });

        let script = dir.path().join("job.sh");
        std::fs::write(&script, "echo start\n").unwrap();
        let suggestion =
            FixSuggestion::new("append guard", "test fixture", 0.9, FixStrategy::AddGuardCode)
                .with_target_file(&script)
                .with_content("echo guarded\n");
        let analysis = AnalysisResult {
            root_cause: "test".to_string(),
            suggestions: vec![suggestion],
        };
        let error = DetectedError::new(
            ErrorType::Syntax,
            EnvironmentKind::ShellScript,
            "syntax error",
        )
        .with_file(&script);

        let session = orchestrator
            .heal_with_analysis(error, analysis, None)
            .await
            .unwrap();
        assert_eq!(session.final_result, FinalResult::Succeeded);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(fixes.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_pipeline_closes_sessions_unhandled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HealingConfig::default();
        config.logging.directory = dir.path().to_path_buf();
        config.logging.to_console = false;
        let orchestrator = Orchestrator::new(config).await.unwrap();

        let error = DetectedError::new(
            ErrorType::Dependency,
            EnvironmentKind::Scripting,
            "No module named 'requests'",
        );
        let session = orchestrator.heal(error, None).await.unwrap();
        assert_eq!(session.final_result, FinalResult::Failed);
        assert!(session.attempts.is_empty());
    }
}
