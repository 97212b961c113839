//! Shell script environment
//!
//! Syntax via `bash -n` (parse without executing), lint via `shellcheck`
//! when installed.

use crate::command::{run_checked, CommandError};
use crate::pattern::{compile, CompiledPattern, ErrorPattern};
use crate::{CheckOutcome, EnvironmentKind, ErrorType, TargetEnvironment};
use once_cell::sync::Lazy;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

static PATTERNS: Lazy<Vec<CompiledPattern>> = Lazy::new(|| {
    compile(&[
        // Syntax
        ErrorPattern::new(r"syntax error near unexpected token", ErrorType::Syntax),
        ErrorPattern::new(r"unexpected end of file", ErrorType::Syntax),
        ErrorPattern::new(r"unexpected EOF while looking for matching", ErrorType::Syntax),
        // Dependencies
        ErrorPattern::capturing(
            r"(?:bash: )?([\w.-]+): command not found",
            ErrorType::Dependency,
            "command",
        ),
        ErrorPattern::capturing(
            r"([\w./-]+): No such file or directory",
            ErrorType::Value,
            "path",
        ),
        // Permission
        ErrorPattern::new(r"Permission denied", ErrorType::Permission),
        ErrorPattern::new(r"Operation not permitted", ErrorType::Permission),
        // Value
        ErrorPattern::new(r"unbound variable", ErrorType::Value),
        ErrorPattern::new(r"bad substitution", ErrorType::Value),
        // Resource
        ErrorPattern::new(r"No space left on device", ErrorType::Resource),
        ErrorPattern::new(r"Argument list too long", ErrorType::Resource),
        ErrorPattern::new(r"Cannot allocate memory", ErrorType::Resource),
        // Network
        ErrorPattern::new(r"Connection refused", ErrorType::Network),
        ErrorPattern::new(r"Could not resolve host", ErrorType::Network),
        ErrorPattern::new(r"Network is unreachable", ErrorType::Network),
    ])
});

async fn run_tool(argv: Vec<String>) -> CheckOutcome {
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

/// Shell script environment.
#[derive(Debug, Default)]
pub struct ShellScript;

#[async_trait::async_trait]
impl TargetEnvironment for ShellScript {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::ShellScript
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["sh", "bash"]
    }

    fn error_patterns(&self) -> &'static [CompiledPattern] {
        &PATTERNS
    }

    async fn check_syntax(&self, path: &Path) -> CheckOutcome {
        run_tool(vec![
            "bash".to_string(),
            "-n".to_string(),
            path.display().to_string(),
        ])
        .await
    }

    async fn check_syntax_content(&self, content: &str) -> CheckOutcome {
        let mut tmp = match tempfile::Builder::new().suffix(".sh").tempfile() {
            Ok(tmp) => tmp,
            Err(e) => {
                return CheckOutcome::Failed {
                    detail: format!("scratch file failed: {e}"),
                }
            }
        };
        if let Err(e) = tmp.write_all(content.as_bytes()) {
            return CheckOutcome::Failed {
                detail: format!("scratch file failed: {e}"),
            };
        }
        self.check_syntax(tmp.path()).await
    }

    async fn lint(&self, path: &Path) -> CheckOutcome {
        run_tool(vec![
            "shellcheck".to_string(),
            path.display().to_string(),
        ])
        .await
    }

    fn rerun_command(&self, path: &Path) -> Option<Vec<String>> {
        Some(vec!["bash".to_string(), path.display().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_script_passes_syntax() {
        let env = ShellScript;
        let outcome = env
            .check_syntax_content("#!/bin/bash\necho ok\n")
            .await;
        assert_eq!(outcome, CheckOutcome::Passed);
    }

    #[tokio::test]
    async fn broken_script_fails_syntax() {
        let env = ShellScript;
        let outcome = env
            .check_syntax_content("if [ -f x ]; then\necho missing fi\n")
            .await;
        assert!(!outcome.is_ok());
    }

    #[test]
    fn shell_errors_classify() {
        let env = ShellScript;
        let cases = [
            (
                "line 3: syntax error near unexpected token `fi'",
                ErrorType::Syntax,
            ),
            ("bash: jq: command not found", ErrorType::Dependency),
            ("rm: /data: Permission denied", ErrorType::Permission),
            ("VAR: unbound variable", ErrorType::Value),
            ("cp: No space left on device", ErrorType::Resource),
            ("curl: Could not resolve host", ErrorType::Network),
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
    fn missing_command_is_captured() {
        let env = ShellScript;
        let text = "bash: terraform: command not found";
        let matched = env.error_patterns().iter().find(|p| p.is_match(text)).unwrap();
        assert_eq!(matched.extract(text), Some("terraform"));
    }
}
