//! Infrastructure provisioning environment
//!
//! Declarative infra plans. Validation runs against the plan's directory
//! rather than a single file; inline content is staged into a scratch
//! working directory first.

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
        ErrorPattern::new(r"Error: Invalid block definition", ErrorType::Syntax),
        ErrorPattern::new(r"Error: Argument or block definition required", ErrorType::Syntax),
        ErrorPattern::new(r"Error: Unclosed configuration block", ErrorType::Syntax),
        ErrorPattern::new(r"Error: Invalid expression", ErrorType::Syntax),
        // Dependencies
        ErrorPattern::capturing(
            r#"Error: Could not load plugin.*?provider ["']?([\w/-]+)"#,
            ErrorType::Dependency,
            "provider",
        ),
        ErrorPattern::capturing(
            r#"Error: Failed to query available provider packages.*?provider ([\w./-]+)"#,
            ErrorType::Dependency,
            "provider",
        ),
        ErrorPattern::new(r"Error: Module not installed", ErrorType::Dependency),
        // Configuration
        ErrorPattern::capturing(
            r#"Error: Reference to undeclared (?:input variable|resource) ["']?([\w.]+)"#,
            ErrorType::Configuration,
            "reference",
        ),
        ErrorPattern::new(r"Error: Unsupported argument", ErrorType::Configuration),
        ErrorPattern::new(r"Error: Missing required argument", ErrorType::Configuration),
        ErrorPattern::new(r"Error: Duplicate resource", ErrorType::Configuration),
        // Resource contention
        ErrorPattern::new(r"Error: Error acquiring the state lock", ErrorType::Resource),
        ErrorPattern::new(r"Error: Insufficient.*?capacity", ErrorType::Resource),
        // Permission
        ErrorPattern::new(r"Error: AccessDenied", ErrorType::Permission),
        ErrorPattern::new(r"UnauthorizedOperation", ErrorType::Permission),
        ErrorPattern::new(r"Error: error configuring .* no valid credential", ErrorType::Permission),
        // Network
        ErrorPattern::new(r"Error: Failed to request discovery document", ErrorType::Network),
        ErrorPattern::new(r"connection refused", ErrorType::Network),
        ErrorPattern::new(r"dial tcp.*?timeout", ErrorType::Network),
    ])
});

async fn run_tool(argv: Vec<String>, cwd: Option<&Path>) -> CheckOutcome {
    match run_checked(&argv, cwd, CHECK_TIMEOUT).await {
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

/// Declarative infrastructure plan environment.
#[derive(Debug, Default)]
pub struct InfrastructureProvisioning;

#[async_trait::async_trait]
impl TargetEnvironment for InfrastructureProvisioning {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::InfrastructureProvisioning
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["tf"]
    }

    fn error_patterns(&self) -> &'static [CompiledPattern] {
        &PATTERNS
    }

    async fn check_syntax(&self, path: &Path) -> CheckOutcome {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        run_tool(
            vec!["terraform".to_string(), "validate".to_string()],
            Some(dir),
        )
        .await
    }

    async fn check_syntax_content(&self, content: &str) -> CheckOutcome {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return CheckOutcome::Failed {
                    detail: format!("scratch dir failed: {e}"),
                }
            }
        };
        if let Err(e) = std::fs::write(dir.path().join("main.tf"), content) {
            return CheckOutcome::Failed {
                detail: format!("scratch file failed: {e}"),
            };
        }
        run_tool(
            vec!["terraform".to_string(), "validate".to_string()],
            Some(dir.path()),
        )
        .await
    }

    async fn lint(&self, path: &Path) -> CheckOutcome {
        run_tool(
            vec![
                "terraform".to_string(),
                "fmt".to_string(),
                "-check".to_string(),
                path.display().to_string(),
            ],
            None,
        )
        .await
    }

    fn rerun_command(&self, path: &Path) -> Option<Vec<String>> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Some(vec![
            "terraform".to_string(),
            format!("-chdir={}", dir.display()),
            "plan".to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_errors_classify() {
        let env = InfrastructureProvisioning;
        let cases = [
            ("Error: Invalid block definition", ErrorType::Syntax),
            (
                "Error: Error acquiring the state lock",
                ErrorType::Resource,
            ),
            ("Error: AccessDenied when calling CreateBucket", ErrorType::Permission),
            ("Error: Unsupported argument", ErrorType::Configuration),
            ("dial tcp 10.0.0.1:443: i/o timeout", ErrorType::Network),
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
    fn undeclared_reference_is_captured() {
        let env = InfrastructureProvisioning;
        let text = "Error: Reference to undeclared input variable \"region\"";
        let matched = env.error_patterns().iter().find(|p| p.is_match(text)).unwrap();
        assert_eq!(matched.error_type(), ErrorType::Configuration);
        assert_eq!(matched.extract(text), Some("region"));
    }
}
