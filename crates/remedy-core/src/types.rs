//! Core data model
//!
//! Value types flowing through the pipeline stages:
//! - [`TaskFault`] - the raised-fault signal from a supervised task
//! - [`DetectedError`] - classified failure (detector output)
//! - [`FixSuggestion`] - proposed corrective action with confidence
//! - [`FixResult`] - outcome of applying one suggestion
//! - [`ValidationResult`] - outcome of re-checking the artifact
//! - [`HealingSession`] - one end-to-end remediation for one fault

use chrono::{DateTime, Utc};
use remedy_env::{EnvironmentKind, ErrorType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier of one healing session / incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(Uuid);

impl IncidentId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Category of a fault raised by a supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Lookup failure (missing key, index, attribute)
    Lookup,
    /// Type mismatch
    TypeMismatch,
    /// Value out of bounds or otherwise invalid
    BoundViolation,
    /// Memory, disk, or handle exhaustion
    ResourceExhaustion,
    /// Access denied
    PermissionDenied,
    /// Connectivity or timeout
    NetworkFailure,
    /// Anything else
    Other,
}

/// A fault raised by a supervised task, as handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFault {
    pub kind: FaultKind,
    pub message: String,
    pub file_path: Option<PathBuf>,
}

impl TaskFault {
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file_path: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

impl std::fmt::Display for TaskFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskFault {}

/// A classified failure. Immutable once produced by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    pub error_type: ErrorType,
    pub environment: EnvironmentKind,
    /// Truncated, human-readable message
    pub message: String,
    pub file_path: Option<PathBuf>,
    pub line_number: Option<u32>,
    /// Full captured output / traceback, untruncated
    pub raw_context: Option<String>,
    pub exit_code: Option<i32>,
}

impl DetectedError {
    #[must_use]
    pub fn new(
        error_type: ErrorType,
        environment: EnvironmentKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            environment,
            message: message.into(),
            file_path: None,
            line_number: None,
            raw_context: None,
            exit_code: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    #[must_use]
    pub fn with_context(mut self, raw: impl Into<String>) -> Self {
        self.raw_context = Some(raw.into());
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// How a suggestion proposes to correct the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    /// Replace the target file's content
    PatchFile,
    /// Install a missing dependency via an external command
    InstallDependency,
    /// Run an arbitrary (allow-listed) external command
    RunCommand,
    /// Append defensive code to the target file
    AddGuardCode,
    /// Advisory only: the task should be retried with backoff
    SuggestRetryWrapper,
    /// No automatic action; a human must intervene
    ManualOnly,
}

impl FixStrategy {
    /// Whether applying this strategy mutates artifact content.
    #[inline]
    #[must_use]
    pub fn is_destructive(self) -> bool {
        matches!(self, FixStrategy::PatchFile | FixStrategy::AddGuardCode)
    }

    /// Tie-break rank: lower sorts first among equal confidences.
    #[inline]
    #[must_use]
    pub(crate) fn rank(self) -> u8 {
        match self {
            FixStrategy::InstallDependency => 0,
            FixStrategy::RunCommand => 1,
            FixStrategy::SuggestRetryWrapper => 2,
            FixStrategy::AddGuardCode => 3,
            FixStrategy::PatchFile => 4,
            FixStrategy::ManualOnly => 5,
        }
    }
}

impl std::fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FixStrategy::PatchFile => "patch_file",
            FixStrategy::InstallDependency => "install_dependency",
            FixStrategy::RunCommand => "run_command",
            FixStrategy::AddGuardCode => "add_guard_code",
            FixStrategy::SuggestRetryWrapper => "suggest_retry_wrapper",
            FixStrategy::ManualOnly => "manual_only",
        };
        f.write_str(s)
    }
}

/// A proposed, not-yet-applied corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub description: String,
    pub reasoning: String,
    confidence: f64,
    pub strategy: FixStrategy,
    pub target_file: Option<PathBuf>,
    pub proposed_content: Option<String>,
    pub command_to_run: Option<String>,
}

impl FixSuggestion {
    /// Confidence is clamped into `0.0..=1.0` at construction.
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        reasoning: impl Into<String>,
        confidence: f64,
        strategy: FixStrategy,
    ) -> Self {
        Self {
            description: description.into(),
            reasoning: reasoning.into(),
            confidence: confidence.clamp(0.0, 1.0),
            strategy,
            target_file: None,
            proposed_content: None,
            command_to_run: None,
        }
    }

    #[must_use]
    pub fn with_target_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.proposed_content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command_to_run = Some(command.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Analyzer output: root cause plus ranked suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub root_cause: String,
    /// Non-increasing by confidence
    pub suggestions: Vec<FixSuggestion>,
}

/// Outcome of applying one suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixResult {
    pub suggestion: FixSuggestion,
    pub applied: bool,
    /// Present iff a file was modified with backups enabled
    pub backup_path: Option<PathBuf>,
    pub modified_files: BTreeSet<PathBuf>,
    pub command_output: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FixResult {
    /// An attempt that changed nothing, carrying its failure detail.
    #[must_use]
    pub fn unapplied(suggestion: FixSuggestion, detail: impl Into<String>) -> Self {
        Self {
            suggestion,
            applied: false,
            backup_path: None,
            modified_files: BTreeSet::new(),
            command_output: Some(detail.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Depth of post-fix validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Syntax/static check only
    Quick,
    /// Quick plus lint
    Standard,
    /// Standard plus test/re-execution
    Thorough,
}

/// One check performed during validation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCheck {
    Syntax,
    Lint,
    Tests,
    Reexecution,
}

/// Outcome of re-checking the artifact after a fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub level: ValidationLevel,
    pub checks_performed: Vec<ValidationCheck>,
    pub failure_detail: Option<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn passed(level: ValidationLevel, checks: Vec<ValidationCheck>) -> Self {
        Self {
            success: true,
            level,
            checks_performed: checks,
            failure_detail: None,
        }
    }

    #[must_use]
    pub fn failed(
        level: ValidationLevel,
        checks: Vec<ValidationCheck>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            level,
            checks_performed: checks,
            failure_detail: Some(detail.into()),
        }
    }
}

/// One complete detect-fix-validate cycle within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub error: DetectedError,
    pub suggestion: FixSuggestion,
    pub fix: FixResult,
    pub validation: ValidationResult,
}

/// How a healing session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalResult {
    /// A fix was applied and validated
    Succeeded,
    /// Healing could not run (disabled, or a fatal condition)
    Failed,
    /// Attempts exhausted or every suggestion vetoed
    ManualInterventionRequired,
    /// Cancellation observed during retry backoff
    Cancelled,
}

/// One end-to-end remediation for a single originating fault.
/// Immutable once closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSession {
    pub incident_id: IncidentId,
    pub attempts: Vec<AttemptRecord>,
    pub final_result: FinalResult,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl HealingSession {
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.final_result == FinalResult::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let high = FixSuggestion::new("d", "r", 3.0, FixStrategy::RunCommand);
        let low = FixSuggestion::new("d", "r", -1.0, FixStrategy::RunCommand);
        assert_eq!(high.confidence(), 1.0);
        assert_eq!(low.confidence(), 0.0);
    }

    #[test]
    fn destructive_strategies() {
        assert!(FixStrategy::PatchFile.is_destructive());
        assert!(FixStrategy::AddGuardCode.is_destructive());
        assert!(!FixStrategy::InstallDependency.is_destructive());
        assert!(!FixStrategy::ManualOnly.is_destructive());
    }

    #[test]
    fn non_destructive_ranks_first() {
        assert!(FixStrategy::InstallDependency.rank() < FixStrategy::PatchFile.rank());
        assert!(FixStrategy::RunCommand.rank() < FixStrategy::AddGuardCode.rank());
    }

    #[test]
    fn incident_ids_are_unique() {
        assert_ne!(IncidentId::new(), IncidentId::new());
    }
}
