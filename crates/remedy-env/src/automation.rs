//! Configuration automation environment
//!
//! Playbook-style YAML. Syntax is validated in-process with a YAML parse,
//! so the check works without any tooling installed; lint falls back to
//! `ansible-lint` when present.

use crate::command::{run_checked, CommandError};
use crate::pattern::{compile, CompiledPattern, ErrorPattern};
use crate::{CheckOutcome, EnvironmentKind, ErrorType, TargetEnvironment};
use once_cell::sync::Lazy;
use std::path::Path;
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

static PATTERNS: Lazy<Vec<CompiledPattern>> = Lazy::new(|| {
    compile(&[
        // Syntax
        ErrorPattern::new(r"ERROR! Syntax Error while loading YAML", ErrorType::Syntax),
        ErrorPattern::new(r"mapping values are not allowed", ErrorType::Syntax),
        ErrorPattern::new(r"could not find expected ':'", ErrorType::Syntax),
        ErrorPattern::new(r"found unexpected end of stream", ErrorType::Syntax),
        // Dependencies
        ErrorPattern::capturing(
            r"couldn't resolve module/action '([\w.]+)'",
            ErrorType::Dependency,
            "module",
        ),
        ErrorPattern::capturing(
            r"the role '([\w.-]+)' was not found",
            ErrorType::Dependency,
            "role",
        ),
        ErrorPattern::new(r"No module named ", ErrorType::Dependency),
        // Configuration
        ErrorPattern::capturing(
            r"'(\w+)' is undefined",
            ErrorType::Configuration,
            "variable",
        ),
        ErrorPattern::new(r"ERROR! the field '\w+' has an invalid value", ErrorType::Configuration),
        ErrorPattern::new(r"Unsupported parameters for", ErrorType::Configuration),
        // Network
        ErrorPattern::new(r"UNREACHABLE!", ErrorType::Network),
        ErrorPattern::new(r"Failed to connect to the host", ErrorType::Network),
        ErrorPattern::new(r"Connection timed out", ErrorType::Network),
        // Permission
        ErrorPattern::new(r"Permission denied \(publickey", ErrorType::Permission),
        ErrorPattern::new(r"Missing sudo password", ErrorType::Permission),
        ErrorPattern::new(r"was not found.*?privilege escalation", ErrorType::Permission),
        // Value
        ErrorPattern::new(r"The task includes an option with an undefined variable", ErrorType::Value),
    ])
});

fn parse_yaml(content: &str) -> CheckOutcome {
    match serde_yaml::from_str::<serde_yaml::Value>(content) {
        Ok(_) => CheckOutcome::Passed,
        Err(e) => CheckOutcome::Failed {
            detail: e.to_string(),
        },
    }
}

/// Playbook-style configuration automation environment.
#[derive(Debug, Default)]
pub struct ConfigurationAutomation;

#[async_trait::async_trait]
impl TargetEnvironment for ConfigurationAutomation {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::ConfigurationAutomation
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["yml", "yaml"]
    }

    fn error_patterns(&self) -> &'static [CompiledPattern] {
        &PATTERNS
    }

    async fn check_syntax(&self, path: &Path) -> CheckOutcome {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => parse_yaml(&content),
            Err(e) => CheckOutcome::Failed {
                detail: format!("cannot read {}: {e}", path.display()),
            },
        }
    }

    async fn check_syntax_content(&self, content: &str) -> CheckOutcome {
        parse_yaml(content)
    }

    async fn lint(&self, path: &Path) -> CheckOutcome {
        let argv = vec!["ansible-lint".to_string(), path.display().to_string()];
        match run_checked(&argv, None, CHECK_TIMEOUT).await {
            Ok(out) if out.success() => CheckOutcome::Passed,
            Ok(out) => CheckOutcome::Failed {
                detail: out.primary_output().trim().to_string(),
            },
            Err(CommandError::NotFound(tool)) => CheckOutcome::ToolUnavailable { tool },
            Err(e) => CheckOutcome::Failed {
                detail: e.to_string(),
            },
        }
    }

    fn rerun_command(&self, path: &Path) -> Option<Vec<String>> {
        Some(vec![
            "ansible-playbook".to_string(),
            path.display().to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn well_formed_yaml_passes() {
        let env = ConfigurationAutomation;
        let outcome = env
            .check_syntax_content("- hosts: all\n  tasks:\n    - ping:\n")
            .await;
        assert_eq!(outcome, CheckOutcome::Passed);
    }

    #[tokio::test]
    async fn malformed_yaml_fails_with_detail() {
        let env = ConfigurationAutomation;
        let outcome = env.check_syntax_content("hosts: [unclosed\n").await;
        assert!(!outcome.is_ok());
        assert!(outcome.detail().is_some());
    }

    #[test]
    fn playbook_errors_classify() {
        let env = ConfigurationAutomation;
        let cases = [
            (
                "ERROR! Syntax Error while loading YAML.",
                ErrorType::Syntax,
            ),
            ("fatal: [web1]: UNREACHABLE!", ErrorType::Network),
            (
                "Permission denied (publickey,password)",
                ErrorType::Permission,
            ),
        ];
        for (text, expected) in cases {
            let matched = env
                .error_patterns()
                .iter()
                .find(|p| p.is_match(text))
                .unwrap_or_else(|| panic!("no match for {text:?}"));
            assert_eq!(matched.error_type(), expected, "{text}");
        }
    }

    #[test]
    fn missing_module_is_captured() {
        let env = ConfigurationAutomation;
        let text = "ERROR! couldn't resolve module/action 'community.docker.docker_container'";
        let matched = env.error_patterns().iter().find(|p| p.is_match(text)).unwrap();
        assert_eq!(matched.error_type(), ErrorType::Dependency);
        assert_eq!(
            matched.extract(text),
            Some("community.docker.docker_container")
        );
    }
}
