//! Error-pattern tables
//!
//! Each environment declares an ordered table of error grammars. Tables
//! are compiled once at first use and shared; the detector walks them in
//! order and takes the first match.

use crate::ErrorType;
use regex::Regex;

/// A declared (source) pattern: regex text plus its classification.
#[derive(Debug, Clone, Copy)]
pub struct ErrorPattern {
    /// Regex source, matched case-insensitively against raw output
    pub pattern: &'static str,
    /// Error class this grammar indicates
    pub error_type: ErrorType,
    /// Semantic name of capture group 1, when the grammar captures a
    /// detail the analyzer can use (module name, command name, ...)
    pub capture: Option<&'static str>,
}

impl ErrorPattern {
    pub(crate) const fn new(pattern: &'static str, error_type: ErrorType) -> Self {
        Self {
            pattern,
            error_type,
            capture: None,
        }
    }

    pub(crate) const fn capturing(
        pattern: &'static str,
        error_type: ErrorType,
        capture: &'static str,
    ) -> Self {
        Self {
            pattern,
            error_type,
            capture: Some(capture),
        }
    }
}

/// A compiled pattern, ready for matching.
#[derive(Debug)]
pub struct CompiledPattern {
    regex: Regex,
    error_type: ErrorType,
    capture: Option<&'static str>,
}

impl CompiledPattern {
    #[inline]
    #[must_use]
    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// Semantic name of the captured detail, if the grammar has one.
    #[inline]
    #[must_use]
    pub fn capture_name(&self) -> Option<&'static str> {
        self.capture
    }

    /// Whether this grammar matches anywhere in `text`.
    #[inline]
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// First captured detail in `text`, if the grammar captures one.
    #[must_use]
    pub fn extract<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.capture?;
        self.regex
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

/// Compile a declared table. Patterns are authored statically, so a
/// malformed regex is a programmer error.
#[must_use]
pub fn compile(table: &[ErrorPattern]) -> Vec<CompiledPattern> {
    table
        .iter()
        .map(|p| CompiledPattern {
            regex: Regex::new(&format!("(?i){}", p.pattern))
                .unwrap_or_else(|e| panic!("invalid error pattern {:?}: {e}", p.pattern)),
            error_type: p.error_type,
            capture: p.capture,
        })
        .collect()
}
