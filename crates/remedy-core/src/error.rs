//! Error types
//!
//! Almost every failure in the pipeline is a value (an unapplied fix, a
//! failed validation, a policy denial). The variants here are the narrow
//! set of conditions that abort an attempt instead of degrading.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum HealingError {
    /// The changelog store cannot be parsed; continuing would risk
    /// silently losing incident history
    #[error("changelog store corrupted: {0}")]
    ChangelogCorrupted(String),

    /// A required pre-fix backup could not be created or read back
    #[error("backup failed for {path}: {reason}")]
    BackupFailed { path: PathBuf, reason: String },

    /// Filesystem error outside the fix-application path
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Changelog or config (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HealingError>;
