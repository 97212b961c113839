//! Pipeline configuration
//!
//! A [`HealingConfig`] is loadable from and savable to a JSON file, with
//! environment-variable overrides under a fixed `REMEDY_<SECTION>_<FIELD>`
//! convention (`REMEDY_ENABLED` is the master switch).

use crate::error::Result;
use remedy_env::EnvironmentKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Retry and backoff settings for one healing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub backoff_multiplier: f64,
    pub max_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 60.0,
        }
    }
}

impl RetryPolicy {
    /// Delay inserted before attempt `n`. Attempt 1 runs immediately;
    /// attempt n (n >= 2) waits min(initial * multiplier^(n-2), max).
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2) as i32;
        let secs = self.initial_delay_secs * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay_secs).max(0.0))
    }
}

/// Where and how incidents are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub changelog_file: String,
    pub verbose: bool,
    pub to_console: bool,
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".remedy"),
            changelog_file: "changelog.json".to_string(),
            verbose: false,
            to_console: true,
            to_file: true,
        }
    }
}

impl LoggingConfig {
    /// Full path of the changelog document.
    #[must_use]
    pub fn changelog_path(&self) -> PathBuf {
        self.directory.join(&self.changelog_file)
    }

    /// Directory holding pre-fix backups.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.directory.join("backups")
    }
}

/// Guard rails every fix must pass before touching anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    pub dry_run: bool,
    pub require_approval: bool,
    pub backup_before_fix: bool,
    pub sandbox_execution: bool,
    /// Path prefixes no fix may touch
    pub protected_paths: Vec<PathBuf>,
    /// Command names the fixer may invoke
    pub allowed_external_commands: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            dry_run: false,
            require_approval: false,
            backup_before_fix: true,
            sandbox_execution: false,
            protected_paths: vec![
                PathBuf::from("/etc"),
                PathBuf::from("/usr"),
                PathBuf::from("/bin"),
                PathBuf::from("/boot"),
            ],
            allowed_external_commands: vec![
                "pip".to_string(),
                "pip3".to_string(),
                "terraform".to_string(),
                "ansible-galaxy".to_string(),
                "apt-get".to_string(),
                "chmod".to_string(),
            ],
        }
    }
}

impl SafetyPolicy {
    /// Whether `path` falls under any protected prefix.
    #[must_use]
    pub fn is_path_protected(&self, path: &Path) -> bool {
        self.protected_paths
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }

    /// Whether the first word of `command_line` is on the allow-list.
    #[must_use]
    pub fn is_command_allowed(&self, command_line: &str) -> bool {
        let Some(first) = command_line.split_whitespace().next() else {
            return false;
        };
        let name = Path::new(first)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(first);
        self.allowed_external_commands.iter().any(|c| c == name)
    }
}

/// Post-fix validation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub run_tests_after_fix: bool,
    pub syntax_check_after_fix: bool,
    pub rollback_on_failure: bool,
    /// Hard ceiling for any external command run during fix or validation
    pub command_timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            run_tests_after_fix: false,
            syntax_check_after_fix: true,
            rollback_on_failure: true,
            command_timeout_secs: 60,
        }
    }
}

impl ValidationConfig {
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub enabled: bool,
    pub environments: Vec<EnvironmentKind>,
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
    pub safety: SafetyPolicy,
    pub validation: ValidationConfig,
}

impl HealingConfig {
    /// A ready-to-use configuration with healing switched on and all
    /// environment variants enabled.
    #[must_use]
    pub fn enabled_default() -> Self {
        Self {
            enabled: true,
            environments: EnvironmentKind::ALL.to_vec(),
            ..Self::default()
        }
    }

    /// Load from a JSON file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save as pretty-printed JSON, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Apply `REMEDY_*` environment-variable overrides in place.
    pub fn apply_env_overrides(&mut self) {
        override_var("REMEDY_ENABLED", &mut self.enabled);

        override_var("REMEDY_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_var(
            "REMEDY_RETRY_INITIAL_DELAY_SECS",
            &mut self.retry.initial_delay_secs,
        );
        override_var(
            "REMEDY_RETRY_BACKOFF_MULTIPLIER",
            &mut self.retry.backoff_multiplier,
        );
        override_var("REMEDY_RETRY_MAX_DELAY_SECS", &mut self.retry.max_delay_secs);

        override_var("REMEDY_LOGGING_VERBOSE", &mut self.logging.verbose);
        override_var("REMEDY_LOGGING_TO_CONSOLE", &mut self.logging.to_console);
        override_var("REMEDY_LOGGING_TO_FILE", &mut self.logging.to_file);
        if let Ok(dir) = std::env::var("REMEDY_LOGGING_DIRECTORY") {
            self.logging.directory = PathBuf::from(dir);
        }
        override_var(
            "REMEDY_LOGGING_CHANGELOG_FILE",
            &mut self.logging.changelog_file,
        );

        override_var("REMEDY_SAFETY_DRY_RUN", &mut self.safety.dry_run);
        override_var(
            "REMEDY_SAFETY_REQUIRE_APPROVAL",
            &mut self.safety.require_approval,
        );
        override_var(
            "REMEDY_SAFETY_BACKUP_BEFORE_FIX",
            &mut self.safety.backup_before_fix,
        );
        override_var(
            "REMEDY_SAFETY_SANDBOX_EXECUTION",
            &mut self.safety.sandbox_execution,
        );

        override_var(
            "REMEDY_VALIDATION_RUN_TESTS_AFTER_FIX",
            &mut self.validation.run_tests_after_fix,
        );
        override_var(
            "REMEDY_VALIDATION_SYNTAX_CHECK_AFTER_FIX",
            &mut self.validation.syntax_check_after_fix,
        );
        override_var(
            "REMEDY_VALIDATION_ROLLBACK_ON_FAILURE",
            &mut self.validation.rollback_on_failure,
        );
        override_var(
            "REMEDY_VALIDATION_COMMAND_TIMEOUT_SECS",
            &mut self.validation.command_timeout_secs,
        );
    }
}

/// Overwrite `slot` from the named variable when set and parseable.
/// Unparseable values are ignored rather than fatal.
fn override_var<T: FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        if let Ok(value) = raw.parse::<T>() {
            *slot = value;
        } else {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable override");
        }
    }
}

/// Initialize console diagnostics per the logging settings. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    if !logging.to_console {
        return;
    }
    let default = if logging.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_delays_grow_geometrically() {
        let retry = RetryPolicy {
            max_attempts: 4,
            initial_delay_secs: 1.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 10.0,
        };
        assert_eq!(retry.delay_before(1), Duration::ZERO);
        assert_eq!(retry.delay_before(2), Duration::from_secs(1));
        assert_eq!(retry.delay_before(3), Duration::from_secs(2));
        assert_eq!(retry.delay_before(4), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryPolicy {
            max_attempts: 10,
            initial_delay_secs: 1.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 10.0,
        };
        assert_eq!(retry.delay_before(9), Duration::from_secs(10));
    }

    #[test]
    fn protected_path_prefix_match() {
        let safety = SafetyPolicy {
            protected_paths: vec![PathBuf::from("/etc")],
            ..SafetyPolicy::default()
        };
        assert!(safety.is_path_protected(Path::new("/etc/config")));
        assert!(safety.is_path_protected(Path::new("/etc")));
        assert!(!safety.is_path_protected(Path::new("/tmp/etc/config")));
    }

    #[test]
    fn command_allow_list_checks_first_word() {
        let safety = SafetyPolicy {
            allowed_external_commands: vec!["pip".to_string()],
            ..SafetyPolicy::default()
        };
        assert!(safety.is_command_allowed("pip install requests"));
        assert!(safety.is_command_allowed("/usr/bin/pip install requests"));
        assert!(!safety.is_command_allowed("rm -rf /"));
        assert!(!safety.is_command_allowed(""));
    }

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remedy.json");
        let mut config = HealingConfig::enabled_default();
        config.retry.max_attempts = 7;
        config.save_to_file(&path).unwrap();

        let loaded = HealingConfig::from_file(&path).unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.retry.max_attempts, 7);
        assert_eq!(loaded.environments.len(), 4);
    }

    #[test]
    fn defaults_are_safe() {
        let config = HealingConfig::default();
        assert!(!config.enabled);
        assert!(config.safety.backup_before_fix);
        assert!(config.validation.rollback_on_failure);
    }
}
