//! Remedy Core - Automated error-remediation pipeline
//!
//! Observes a failure from a running task, determines its root cause,
//! proposes and applies a corrective change, verifies the change resolves
//! the failure, and durably records every step.
//!
//! Pipeline: Detector -> Analyzer -> Fixer -> Validator -> changelog,
//! sequenced by the [`Orchestrator`] with retry/backoff, a safety policy,
//! and pluggable target environments (see `remedy-env`).
//!
//! ```no_run
//! use remedy_core::{FaultKind, HealingConfig, Orchestrator, TaskFault};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(HealingConfig::enabled_default()).await?;
//! let result = orchestrator
//!     .protect(|| {
//!         run_batch_job().map_err(|e| TaskFault::new(FaultKind::Other, e.to_string()))
//!     })
//!     .await;
//! # Ok(())
//! # }
//! # fn run_batch_job() -> Result<(), std::io::Error> { Ok(()) }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod analyzer;
pub mod changelog;
pub mod config;
pub mod detector;
pub mod error;
pub mod fixer;
pub mod hook;
pub mod orchestrator;
pub mod types;
pub mod validator;

pub use analyzer::Analyzer;
pub use changelog::{ChangelogStore, EventType, HealingStats, IncidentRecord, Severity};
pub use config::{
    init_tracing, HealingConfig, LoggingConfig, RetryPolicy, SafetyPolicy, ValidationConfig,
};
pub use detector::{Detector, FaultSignal};
pub use error::{HealingError, Result};
pub use fixer::Fixer;
pub use hook::{fault_hook_installed, install_fault_hook, uninstall_fault_hook};
pub use orchestrator::{
    Approver, CompletionObserver, ErrorObserver, FixObserver, Orchestrator,
};
pub use types::{
    AnalysisResult, AttemptRecord, DetectedError, FaultKind, FinalResult, FixResult, FixStrategy,
    FixSuggestion, HealingSession, IncidentId, TaskFault, ValidationCheck, ValidationLevel,
    ValidationResult,
};
pub use validator::{RerunTask, Validator};

// Re-exported so callers name environments without a second import.
pub use remedy_env::{EnvironmentKind, ErrorType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
