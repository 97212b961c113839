//! Detector
//!
//! Turns raw failure signals into a structured [`DetectedError`]:
//! - a raised [`TaskFault`] maps its category straight to an error type
//! - captured process output is walked through the environment's ordered
//!   pattern table, first match wins
//! - inline content can be statically validated without execution
//!
//! Classification is pure and never fails: anything unrecognized becomes
//! [`ErrorType::Unknown`] with the full output preserved.

use crate::types::{DetectedError, FaultKind, TaskFault};
use once_cell::sync::Lazy;
use regex::Regex;
use remedy_env::{detect_kind_for_path, environment_for, EnvironmentKind, ErrorType};
use std::path::{Path, PathBuf};

const MESSAGE_LIMIT: usize = 500;

static LINE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)line (\d+)").unwrap_or_else(|e| panic!("invalid line regex: {e}"))
});

/// A failure signal entering the pipeline.
#[derive(Debug)]
pub enum FaultSignal {
    /// A fault raised by a supervised task
    Raised(TaskFault),
    /// Captured output of an external process
    Output {
        text: String,
        exit_code: i32,
        environment: EnvironmentKind,
        file_path: Option<PathBuf>,
    },
    /// Inline content to validate statically
    Content {
        content: String,
        environment: EnvironmentKind,
    },
}

/// Pure classifier from failure signals to [`DetectedError`] values.
#[derive(Debug, Default)]
pub struct Detector;

impl Detector {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify any signal. Returns `None` only for `Content` that
    /// validates clean; raised faults and captured output always
    /// classify (possibly as `Unknown`).
    pub async fn classify(&self, signal: FaultSignal) -> Option<DetectedError> {
        match signal {
            FaultSignal::Raised(fault) => Some(self.classify_fault(&fault)),
            FaultSignal::Output {
                text,
                exit_code,
                environment,
                file_path,
            } => Some(self.classify_output(&text, exit_code, environment, file_path.as_deref())),
            FaultSignal::Content {
                content,
                environment,
            } => self.validate_content(&content, environment).await,
        }
    }

    /// Map a raised fault's category directly to an error type.
    #[must_use]
    pub fn classify_fault(&self, fault: &TaskFault) -> DetectedError {
        let error_type = match fault.kind {
            FaultKind::Lookup => ErrorType::Value,
            FaultKind::TypeMismatch => ErrorType::Type,
            FaultKind::BoundViolation => ErrorType::Value,
            FaultKind::ResourceExhaustion => ErrorType::Resource,
            FaultKind::PermissionDenied => ErrorType::Permission,
            FaultKind::NetworkFailure => ErrorType::Network,
            FaultKind::Other => ErrorType::Unknown,
        };
        let environment = fault
            .file_path
            .as_deref()
            .and_then(detect_kind_for_path)
            .unwrap_or(EnvironmentKind::Scripting);

        let mut error = DetectedError::new(error_type, environment, truncate(&fault.message))
            .with_context(fault.message.clone());
        if let Some(path) = &fault.file_path {
            error = error.with_file(path);
        }
        if let Some(line) = extract_line_number(&fault.message) {
            error = error.with_line(line);
        }
        error
    }

    /// Walk the environment's pattern table over captured output.
    #[must_use]
    pub fn classify_output(
        &self,
        text: &str,
        exit_code: i32,
        environment: EnvironmentKind,
        file_path: Option<&Path>,
    ) -> DetectedError {
        let env = environment_for(environment);
        let error_type = env
            .error_patterns()
            .iter()
            .find(|p| p.is_match(text))
            .map(|p| p.error_type())
            .unwrap_or(ErrorType::Unknown);

        if error_type == ErrorType::Unknown {
            tracing::debug!(%environment, exit_code, "no pattern matched captured output");
        }

        let mut error = DetectedError::new(error_type, environment, truncate(text))
            .with_context(text.to_string())
            .with_exit_code(exit_code);
        if let Some(path) = file_path {
            error = error.with_file(path);
        }
        if let Some(line) = extract_line_number(text) {
            error = error.with_line(line);
        }
        error
    }

    /// Statically validate inline content. `Some` iff validation fails;
    /// `None` is the "no error" sentinel.
    pub async fn validate_content(
        &self,
        content: &str,
        environment: EnvironmentKind,
    ) -> Option<DetectedError> {
        let env = environment_for(environment);
        let detail = env.check_syntax_content(content).await.detail()?.to_string();
        let mut error = DetectedError::new(ErrorType::Syntax, environment, truncate(&detail))
            .with_context(detail.clone());
        if let Some(line) = extract_line_number(&detail) {
            error = error.with_line(line);
        }
        Some(error)
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MESSAGE_LIMIT {
        return text.to_string();
    }
    let mut end = MESSAGE_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn extract_line_number(text: &str) -> Option<u32> {
    LINE_NUMBER
        .captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_fault_maps_category() {
        let detector = Detector::new();
        let fault = TaskFault::new(FaultKind::NetworkFailure, "connection refused by host");
        let error = detector.classify_fault(&fault);
        assert_eq!(error.error_type, ErrorType::Network);
        assert_eq!(error.raw_context.as_deref(), Some("connection refused by host"));
    }

    #[test]
    fn fault_environment_follows_file_extension() {
        let detector = Detector::new();
        let fault =
            TaskFault::new(FaultKind::PermissionDenied, "denied").with_file("deploy.sh");
        let error = detector.classify_fault(&fault);
        assert_eq!(error.environment, EnvironmentKind::ShellScript);
    }

    #[test]
    fn output_first_match_wins() {
        let detector = Detector::new();
        let text = "Traceback (most recent call last):\n  File \"job.py\", line 12\nModuleNotFoundError: No module named 'requests'";
        let error =
            detector.classify_output(text, 1, EnvironmentKind::Scripting, Some(Path::new("job.py")));
        assert_eq!(error.error_type, ErrorType::Dependency);
        assert_eq!(error.line_number, Some(12));
        assert_eq!(error.exit_code, Some(1));
    }

    #[test]
    fn unrecognized_output_degrades_to_unknown() {
        let detector = Detector::new();
        let error = detector.classify_output(
            "something completely novel happened",
            2,
            EnvironmentKind::Scripting,
            None,
        );
        assert_eq!(error.error_type, ErrorType::Unknown);
        assert!(error.raw_context.is_some());
    }

    #[test]
    fn long_output_is_truncated_but_context_kept() {
        let detector = Detector::new();
        let text = "x".repeat(2000);
        let error = detector.classify_output(&text, 1, EnvironmentKind::ShellScript, None);
        assert_eq!(error.message.len(), 500);
        assert_eq!(error.raw_context.as_deref().map(str::len), Some(2000));
    }

    #[tokio::test]
    async fn clean_content_yields_no_error() {
        let detector = Detector::new();
        let result = detector
            .validate_content("key: value\n", EnvironmentKind::ConfigurationAutomation)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn broken_content_yields_syntax_error() {
        let detector = Detector::new();
        let result = detector
            .validate_content("key: [unclosed\n", EnvironmentKind::ConfigurationAutomation)
            .await;
        let error = result.expect("syntax error expected");
        assert_eq!(error.error_type, ErrorType::Syntax);
    }
}
