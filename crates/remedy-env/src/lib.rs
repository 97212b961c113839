//! Remedy Env - Target environment capability
//!
//! A target environment describes how to validate, execute, and interpret
//! output for one kind of managed artifact:
//! - Scripting (interpreter-run source files)
//! - Infrastructure provisioning (declarative infra plans)
//! - Configuration automation (playbook-style YAML)
//! - Shell scripts
//!
//! Each environment contributes an ordered error-pattern table (consumed by
//! the detector), syntax/lint checks, and a re-execution command.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod command;
pub mod pattern;

mod automation;
mod provisioning;
mod scripting;
mod shell;

pub use automation::ConfigurationAutomation;
pub use command::{run_checked, CommandError, CommandOutput};
pub use pattern::{CompiledPattern, ErrorPattern};
pub use provisioning::InfrastructureProvisioning;
pub use scripting::Scripting;
pub use shell::ShellScript;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported target environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    /// Interpreter-run script source
    Scripting,
    /// Declarative infrastructure plans
    InfrastructureProvisioning,
    /// Playbook-style configuration automation
    ConfigurationAutomation,
    /// Shell scripts
    ShellScript,
}

impl EnvironmentKind {
    /// All variants, in matcher-table order.
    pub const ALL: [EnvironmentKind; 4] = [
        EnvironmentKind::Scripting,
        EnvironmentKind::InfrastructureProvisioning,
        EnvironmentKind::ConfigurationAutomation,
        EnvironmentKind::ShellScript,
    ];
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvironmentKind::Scripting => "scripting",
            EnvironmentKind::InfrastructureProvisioning => "infrastructure_provisioning",
            EnvironmentKind::ConfigurationAutomation => "configuration_automation",
            EnvironmentKind::ShellScript => "shell_script",
        };
        f.write_str(s)
    }
}

/// Classification of a detected error.
///
/// `Configuration` covers environment-specific misconfiguration; `Unknown`
/// is the degraded class for signals no matcher recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Syntax,
    Dependency,
    Type,
    Value,
    Network,
    Permission,
    Resource,
    Configuration,
    Unknown,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::Syntax => "syntax",
            ErrorType::Dependency => "dependency",
            ErrorType::Type => "type",
            ErrorType::Value => "value",
            ErrorType::Network => "network",
            ErrorType::Permission => "permission",
            ErrorType::Resource => "resource",
            ErrorType::Configuration => "configuration",
            ErrorType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of a syntax or lint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Check ran and passed
    Passed,
    /// Check ran and failed
    Failed { detail: String },
    /// The checking tool is not installed; treated as a pass with a note
    ToolUnavailable { tool: String },
}

impl CheckOutcome {
    /// Whether the check should block (only a real failure blocks).
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        !matches!(self, CheckOutcome::Failed { .. })
    }

    /// Failure detail, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            CheckOutcome::Failed { detail } => Some(detail),
            _ => None,
        }
    }
}

/// One kind of managed artifact: how to validate it, lint it, re-run it,
/// and read its error output.
#[async_trait::async_trait]
pub trait TargetEnvironment: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> EnvironmentKind;

    /// File extensions handled by this environment (lowercase, no dot)
    fn file_extensions(&self) -> &'static [&'static str];

    /// Ordered matcher table for classifying error output
    fn error_patterns(&self) -> &'static [CompiledPattern];

    /// Validate an artifact on disk without executing it
    async fn check_syntax(&self, path: &Path) -> CheckOutcome;

    /// Validate inline content without executing it
    async fn check_syntax_content(&self, content: &str) -> CheckOutcome;

    /// Lint-equivalent check; a missing lint tool does not block
    async fn lint(&self, path: &Path) -> CheckOutcome;

    /// Command line that re-executes the artifact, if it has one
    fn rerun_command(&self, path: &Path) -> Option<Vec<String>>;
}

static SCRIPTING: Scripting = Scripting;
static PROVISIONING: InfrastructureProvisioning = InfrastructureProvisioning;
static AUTOMATION: ConfigurationAutomation = ConfigurationAutomation;
static SHELL: ShellScript = ShellScript;

/// Resolve the environment implementation for a variant.
#[must_use]
pub fn environment_for(kind: EnvironmentKind) -> &'static dyn TargetEnvironment {
    match kind {
        EnvironmentKind::Scripting => &SCRIPTING,
        EnvironmentKind::InfrastructureProvisioning => &PROVISIONING,
        EnvironmentKind::ConfigurationAutomation => &AUTOMATION,
        EnvironmentKind::ShellScript => &SHELL,
    }
}

/// Detect the environment variant from a file extension.
#[must_use]
pub fn detect_kind_for_path(path: &Path) -> Option<EnvironmentKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EnvironmentKind::ALL
        .into_iter()
        .find(|kind| environment_for(*kind).file_extensions().contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn kind_display_roundtrip() {
        assert_eq!(EnvironmentKind::Scripting.to_string(), "scripting");
        assert_eq!(
            EnvironmentKind::ConfigurationAutomation.to_string(),
            "configuration_automation"
        );
    }

    #[test]
    fn detect_kind_by_extension() {
        assert_eq!(
            detect_kind_for_path(&PathBuf::from("job.py")),
            Some(EnvironmentKind::Scripting)
        );
        assert_eq!(
            detect_kind_for_path(&PathBuf::from("main.tf")),
            Some(EnvironmentKind::InfrastructureProvisioning)
        );
        assert_eq!(
            detect_kind_for_path(&PathBuf::from("site.yml")),
            Some(EnvironmentKind::ConfigurationAutomation)
        );
        assert_eq!(
            detect_kind_for_path(&PathBuf::from("deploy.sh")),
            Some(EnvironmentKind::ShellScript)
        );
        assert_eq!(detect_kind_for_path(&PathBuf::from("notes.txt")), None);
    }

    #[test]
    fn registry_kinds_match() {
        for kind in EnvironmentKind::ALL {
            assert_eq!(environment_for(kind).kind(), kind);
        }
    }

    #[test]
    fn every_environment_has_patterns() {
        for kind in EnvironmentKind::ALL {
            assert!(!environment_for(kind).error_patterns().is_empty());
        }
    }
}
