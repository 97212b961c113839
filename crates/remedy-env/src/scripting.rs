//! Scripting environment
//!
//! Interpreter-run script sources. Syntax is validated by compiling
//! without executing (`py_compile`); runtime error grammars follow the
//! interpreter's traceback vocabulary.

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
        ErrorPattern::new(r"SyntaxError: ", ErrorType::Syntax),
        ErrorPattern::new(r"IndentationError: ", ErrorType::Syntax),
        ErrorPattern::new(r"TabError: ", ErrorType::Syntax),
        // Dependencies
        ErrorPattern::capturing(
            r"ModuleNotFoundError: No module named '([^']+)'",
            ErrorType::Dependency,
            "module",
        ),
        ErrorPattern::capturing(
            r"ImportError: cannot import name '([^']+)'",
            ErrorType::Dependency,
            "name",
        ),
        ErrorPattern::new(r"ImportError: ", ErrorType::Dependency),
        // Type mismatches
        ErrorPattern::new(r"TypeError: ", ErrorType::Type),
        ErrorPattern::capturing(
            r"AttributeError: '(\w+)' object has no attribute",
            ErrorType::Type,
            "object",
        ),
        ErrorPattern::new(r"AttributeError: ", ErrorType::Type),
        // Bound/value violations
        ErrorPattern::new(r"ValueError: ", ErrorType::Value),
        ErrorPattern::new(r"KeyError: ", ErrorType::Value),
        ErrorPattern::new(r"IndexError: ", ErrorType::Value),
        // Resource exhaustion
        ErrorPattern::new(r"MemoryError", ErrorType::Resource),
        ErrorPattern::new(r"RecursionError: ", ErrorType::Resource),
        ErrorPattern::new(r"OSError: \[Errno 28\]", ErrorType::Resource),
        // Permission
        ErrorPattern::new(r"PermissionError: ", ErrorType::Permission),
        ErrorPattern::new(r"OSError: \[Errno 13\]", ErrorType::Permission),
        // Network
        ErrorPattern::new(r"ConnectionError: ", ErrorType::Network),
        ErrorPattern::new(r"TimeoutError: ", ErrorType::Network),
        ErrorPattern::new(r"connection refused", ErrorType::Network),
    ])
});

/// Interpreter-run script environment.
#[derive(Debug, Default)]
pub struct Scripting;

impl Scripting {
    async fn compile_check(&self, path: &Path) -> CheckOutcome {
        let argv = vec![
            "python3".to_string(),
            "-m".to_string(),
            "py_compile".to_string(),
            path.display().to_string(),
        ];
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
}

#[async_trait::async_trait]
impl TargetEnvironment for Scripting {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Scripting
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn error_patterns(&self) -> &'static [CompiledPattern] {
        &PATTERNS
    }

    async fn check_syntax(&self, path: &Path) -> CheckOutcome {
        self.compile_check(path).await
    }

    async fn check_syntax_content(&self, content: &str) -> CheckOutcome {
        let mut tmp = match tempfile::Builder::new().suffix(".py").tempfile() {
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
        self.compile_check(tmp.path()).await
    }

    async fn lint(&self, path: &Path) -> CheckOutcome {
        let argv = vec!["flake8".to_string(), path.display().to_string()];
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
        Some(vec!["python3".to_string(), path.display().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceback_lines_classify() {
        let env = Scripting;
        let cases = [
            ("SyntaxError: invalid syntax", ErrorType::Syntax),
            (
                "ModuleNotFoundError: No module named 'requests'",
                ErrorType::Dependency,
            ),
            (
                "TypeError: unsupported operand type(s)",
                ErrorType::Type,
            ),
            ("KeyError: 'ticker'", ErrorType::Value),
            ("MemoryError", ErrorType::Resource),
            ("PermissionError: [Errno 13] denied", ErrorType::Permission),
            ("ConnectionError: refused", ErrorType::Network),
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
    fn module_name_is_captured() {
        let env = Scripting;
        let text = "ModuleNotFoundError: No module named 'pandas'";
        let matched = env.error_patterns().iter().find(|p| p.is_match(text)).unwrap();
        assert_eq!(matched.extract(text), Some("pandas"));
    }
}
