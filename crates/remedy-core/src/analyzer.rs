//! Analyzer
//!
//! Maps a [`DetectedError`] to a root cause and a ranked list of
//! [`FixSuggestion`]s. The knowledge base is an immutable rule table
//! keyed by (environment, error type), resolved once at first use.
//!
//! Confidence policy:
//! - exact signature with a captured detail: >= 0.8
//! - category match without a capturable detail: 0.4 to 0.6
//! - unknown error type: <= 0.2 and forced to manual-only

use crate::types::{AnalysisResult, DetectedError, FixStrategy, FixSuggestion};
use once_cell::sync::Lazy;
use regex::Regex;
use remedy_env::{EnvironmentKind, ErrorType};
use std::collections::HashMap;

type RuleFn = fn(&DetectedError) -> Vec<FixSuggestion>;

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid analyzer regex {pattern:?}: {e}"))
}

static MISSING_MODULE: Lazy<Regex> = Lazy::new(|| rx(r"No module named '([^']+)'"));
static MISSING_KEY: Lazy<Regex> = Lazy::new(|| rx(r"KeyError: '([^']+)'"));
static MISSING_PROVIDER: Lazy<Regex> =
    Lazy::new(|| rx(r#"provider ["']?([\w./-]+)"#));
static UNDECLARED_REF: Lazy<Regex> = Lazy::new(|| {
    rx(r#"Reference to undeclared (?:input variable|resource) ["']?([\w.]+)"#)
});
static MISSING_ANSIBLE_MODULE: Lazy<Regex> =
    Lazy::new(|| rx(r"couldn't resolve module/action '([\w.]+)'"));
static MISSING_ROLE: Lazy<Regex> = Lazy::new(|| rx(r"the role '([\w.-]+)' was not found"));
static UNDEFINED_VAR: Lazy<Regex> = Lazy::new(|| rx(r"'(\w+)' is undefined"));
static MISSING_COMMAND: Lazy<Regex> = Lazy::new(|| rx(r"([\w.-]+): command not found"));
static MISSING_PATH: Lazy<Regex> = Lazy::new(|| rx(r"([\w./-]+): No such file or directory"));

/// Import names whose installable package is spelled differently.
static PACKAGE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("cv2", "opencv-python"),
        ("PIL", "pillow"),
        ("sklearn", "scikit-learn"),
        ("yaml", "pyyaml"),
        ("bs4", "beautifulsoup4"),
        ("dotenv", "python-dotenv"),
        ("dateutil", "python-dateutil"),
    ])
});

fn package_for_module(module: &str) -> &str {
    let root = module.split('.').next().unwrap_or(module);
    PACKAGE_ALIASES.get(root).copied().unwrap_or(root)
}

static RULES: Lazy<HashMap<(EnvironmentKind, ErrorType), RuleFn>> = Lazy::new(|| {
    let mut table: HashMap<(EnvironmentKind, ErrorType), RuleFn> = HashMap::new();
    use EnvironmentKind::*;
    use ErrorType::*;

    table.insert((Scripting, Dependency), scripting_dependency);
    table.insert((Scripting, Syntax), scripting_syntax);
    table.insert((Scripting, Type), scripting_type);
    table.insert((Scripting, Value), scripting_value);
    table.insert((Scripting, Network), retry_with_backoff);
    table.insert((Scripting, Permission), scripting_permission);
    table.insert((Scripting, Resource), resource_pressure);

    table.insert((InfrastructureProvisioning, Dependency), provisioning_dependency);
    table.insert((InfrastructureProvisioning, Syntax), provisioning_syntax);
    table.insert((InfrastructureProvisioning, Configuration), provisioning_configuration);
    table.insert((InfrastructureProvisioning, Resource), provisioning_resource);
    table.insert((InfrastructureProvisioning, Network), retry_with_backoff);
    table.insert((InfrastructureProvisioning, Permission), manual_credentials);

    table.insert((ConfigurationAutomation, Dependency), automation_dependency);
    table.insert((ConfigurationAutomation, Syntax), automation_syntax);
    table.insert((ConfigurationAutomation, Configuration), automation_configuration);
    table.insert((ConfigurationAutomation, Network), automation_network);
    table.insert((ConfigurationAutomation, Permission), manual_credentials);
    table.insert((ConfigurationAutomation, Value), automation_configuration);

    table.insert((ShellScript, Dependency), shell_dependency);
    table.insert((ShellScript, Syntax), shell_syntax);
    table.insert((ShellScript, Permission), shell_permission);
    table.insert((ShellScript, Value), shell_value);
    table.insert((ShellScript, Resource), resource_pressure);
    table.insert((ShellScript, Network), retry_with_backoff);

    table
});

/// Deterministic rule-table analyzer. Stateless and pure.
#[derive(Debug, Default)]
pub struct Analyzer;

impl Analyzer {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produce a root cause and suggestions sorted non-increasing by
    /// confidence, ties broken toward non-destructive strategies.
    /// Never fails; no confident match yields one manual-only entry.
    #[must_use]
    pub fn analyze(&self, error: &DetectedError) -> AnalysisResult {
        let mut suggestions = if error.error_type == ErrorType::Unknown {
            vec![manual_only_suggestion(error, 0.2)]
        } else {
            RULES
                .get(&(error.environment, error.error_type))
                .map(|rule| rule(error))
                .unwrap_or_default()
        };

        if suggestions.is_empty() {
            suggestions.push(manual_only_suggestion(error, 0.0));
        }

        suggestions.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.strategy.rank().cmp(&b.strategy.rank()))
        });

        tracing::debug!(
            error_type = %error.error_type,
            environment = %error.environment,
            count = suggestions.len(),
            "analysis complete"
        );

        AnalysisResult {
            root_cause: root_cause_for(error),
            suggestions,
        }
    }
}

fn manual_only_suggestion(error: &DetectedError, confidence: f64) -> FixSuggestion {
    let mut s = FixSuggestion::new(
        "Manual investigation required",
        format!(
            "No recognized signature for this {} failure in a {} artifact",
            error.error_type, error.environment
        ),
        confidence,
        FixStrategy::ManualOnly,
    );
    if let Some(path) = &error.file_path {
        s = s.with_target_file(path);
    }
    s
}

fn root_cause_for(error: &DetectedError) -> String {
    let detail = searchable(error);
    if let Some(m) = MISSING_MODULE.captures(detail).and_then(|c| c.get(1)) {
        return format!("missing dependency: {}", m.as_str());
    }
    if let Some(m) = MISSING_COMMAND.captures(detail).and_then(|c| c.get(1)) {
        return format!("missing command: {}", m.as_str());
    }
    match error.error_type {
        ErrorType::Syntax => "malformed source or markup".to_string(),
        ErrorType::Dependency => "a required dependency is not installed".to_string(),
        ErrorType::Type => "an operation was applied to an incompatible type".to_string(),
        ErrorType::Value => "a value or lookup target is missing or out of range".to_string(),
        ErrorType::Network => "a remote endpoint is unreachable or timing out".to_string(),
        ErrorType::Permission => "the process lacks required access rights".to_string(),
        ErrorType::Resource => "a system resource is exhausted or locked".to_string(),
        ErrorType::Configuration => "the artifact references undefined configuration".to_string(),
        ErrorType::Unknown => "unrecognized failure signature".to_string(),
    }
}

/// Message plus raw context, so captures survive truncation.
fn searchable(error: &DetectedError) -> &str {
    error.raw_context.as_deref().unwrap_or(&error.message)
}

// Rule bodies. Each returns unsorted candidates; the analyzer orders them.

fn scripting_dependency(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(module) = MISSING_MODULE
        .captures(searchable(error))
        .and_then(|c| c.get(1))
    {
        let package = package_for_module(module.as_str());
        return vec![FixSuggestion::new(
            format!("Install missing package '{package}'"),
            format!(
                "Import of '{}' failed; the package is not installed in this interpreter",
                module.as_str()
            ),
            0.9,
            FixStrategy::InstallDependency,
        )
        .with_command(format!("pip install {package}"))];
    }
    vec![FixSuggestion::new(
        "Reinstall project dependencies",
        "An import failed without a recognizable module name",
        0.5,
        FixStrategy::RunCommand,
    )
    .with_command("pip install -r requirements.txt")]
}

fn scripting_syntax(error: &DetectedError) -> Vec<FixSuggestion> {
    let line = error
        .line_number
        .map(|l| format!(" near line {l}"))
        .unwrap_or_default();
    let mut s = FixSuggestion::new(
        format!("Correct the syntax error{line}"),
        "The interpreter rejected the source before execution",
        0.5,
        FixStrategy::PatchFile,
    );
    if let Some(path) = &error.file_path {
        s = s.with_target_file(path);
    }
    vec![s]
}

fn scripting_type(error: &DetectedError) -> Vec<FixSuggestion> {
    let mut s = FixSuggestion::new(
        "Guard the failing access with a type check",
        "An operation was applied to an object of an unexpected type",
        0.5,
        FixStrategy::AddGuardCode,
    )
    .with_content(
        "\n\ndef safe_getattr(value, attribute, default=None):\n    \
         if value is None:\n        return default\n    \
         return getattr(value, attribute, default)\n",
    );
    if let Some(path) = &error.file_path {
        s = s.with_target_file(path);
    }
    vec![s]
}

fn scripting_value(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(key) = MISSING_KEY.captures(searchable(error)).and_then(|c| c.get(1)) {
        let mut s = FixSuggestion::new(
            format!("Guard the lookup of missing key '{}'", key.as_str()),
            "A dictionary lookup used a key that is not present; a defaulted access avoids the fault",
            0.8,
            FixStrategy::AddGuardCode,
        )
        .with_content(format!(
            "\n\ndef lookup_with_default(mapping, key='{}', default=None):\n    \
             return mapping.get(key, default)\n",
            key.as_str()
        ));
        if let Some(path) = &error.file_path {
            s = s.with_target_file(path);
        }
        return vec![s];
    }
    let mut s = FixSuggestion::new(
        "Validate inputs before the failing operation",
        "A value or index was out of the accepted range",
        0.4,
        FixStrategy::AddGuardCode,
    );
    if let Some(path) = &error.file_path {
        s = s.with_target_file(path);
    }
    vec![s]
}

fn scripting_permission(error: &DetectedError) -> Vec<FixSuggestion> {
    match &error.file_path {
        Some(path) => vec![FixSuggestion::new(
            "Make the artifact executable",
            "The interpreter or shell was denied access to the file",
            0.6,
            FixStrategy::RunCommand,
        )
        .with_target_file(path)
        .with_command(format!("chmod +x {}", path.display()))],
        None => vec![manual_credentials_suggestion()],
    }
}

fn retry_with_backoff(_error: &DetectedError) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        "Retry the task with backoff",
        "The failure is transient connectivity; no artifact change is warranted",
        0.6,
        FixStrategy::SuggestRetryWrapper,
    )]
}

fn resource_pressure(_error: &DetectedError) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        "Retry once resource pressure subsides",
        "Memory, disk, or handles were exhausted at the time of failure",
        0.4,
        FixStrategy::SuggestRetryWrapper,
    )]
}

fn manual_credentials_suggestion() -> FixSuggestion {
    FixSuggestion::new(
        "Review credentials and access policy",
        "Access was denied by the target system; credential changes need a human",
        0.3,
        FixStrategy::ManualOnly,
    )
}

fn manual_credentials(_error: &DetectedError) -> Vec<FixSuggestion> {
    vec![manual_credentials_suggestion()]
}

fn provisioning_dependency(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(provider) = MISSING_PROVIDER
        .captures(searchable(error))
        .and_then(|c| c.get(1))
    {
        return vec![FixSuggestion::new(
            format!("Initialize providers (missing '{}')", provider.as_str()),
            "A provider plugin referenced by the plan is not installed locally",
            0.85,
            FixStrategy::RunCommand,
        )
        .with_command("terraform init")];
    }
    vec![FixSuggestion::new(
        "Re-initialize the working directory",
        "A module or plugin referenced by the plan is missing",
        0.6,
        FixStrategy::RunCommand,
    )
    .with_command("terraform init -upgrade")]
}

fn provisioning_syntax(_error: &DetectedError) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        "Normalize plan formatting",
        "The plan failed structural validation; formatting surfaces the offending block",
        0.5,
        FixStrategy::RunCommand,
    )
    .with_command("terraform fmt")]
}

fn provisioning_configuration(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(name) = UNDECLARED_REF
        .captures(searchable(error))
        .and_then(|c| c.get(1))
    {
        let mut s = FixSuggestion::new(
            format!("Declare the missing variable '{}'", name.as_str()),
            "The plan references a variable that is never declared",
            0.8,
            FixStrategy::AddGuardCode,
        )
        .with_content(format!("\nvariable \"{}\" {{\n}}\n", name.as_str()));
        if let Some(path) = &error.file_path {
            s = s.with_target_file(path);
        }
        return vec![s];
    }
    vec![FixSuggestion::new(
        "Review plan arguments against the provider schema",
        "An argument is unsupported, missing, or duplicated",
        0.4,
        FixStrategy::ManualOnly,
    )]
}

fn provisioning_resource(_error: &DetectedError) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            "Retry once the state lock is released",
            "Another operation holds the state lock; locks normally clear on their own",
            0.6,
            FixStrategy::SuggestRetryWrapper,
        ),
        FixSuggestion::new(
            "Force-unlock the state",
            "If the holder crashed, the lock needs a manual force-unlock with its lock ID",
            0.3,
            FixStrategy::ManualOnly,
        ),
    ]
}

fn automation_dependency(error: &DetectedError) -> Vec<FixSuggestion> {
    let detail = searchable(error);
    if let Some(module) = MISSING_ANSIBLE_MODULE.captures(detail).and_then(|c| c.get(1)) {
        let name = module.as_str();
        let collection = name
            .rsplit_once('.')
            .map(|(ns, _)| ns.to_string())
            .unwrap_or_else(|| name.to_string());
        return vec![FixSuggestion::new(
            format!("Install the collection providing '{name}'"),
            "The playbook uses a module from a collection that is not installed",
            0.85,
            FixStrategy::InstallDependency,
        )
        .with_command(format!("ansible-galaxy collection install {collection}"))];
    }
    if let Some(role) = MISSING_ROLE.captures(detail).and_then(|c| c.get(1)) {
        return vec![FixSuggestion::new(
            format!("Install the missing role '{}'", role.as_str()),
            "The playbook references a role that is not present locally",
            0.85,
            FixStrategy::InstallDependency,
        )
        .with_command(format!("ansible-galaxy role install {}", role.as_str()))];
    }
    vec![FixSuggestion::new(
        "Install playbook requirements",
        "A module or role dependency is missing without a recognizable name",
        0.5,
        FixStrategy::RunCommand,
    )
    .with_command("ansible-galaxy install -r requirements.yml")]
}

fn automation_syntax(error: &DetectedError) -> Vec<FixSuggestion> {
    let line = error
        .line_number
        .map(|l| format!(" near line {l}"))
        .unwrap_or_default();
    let mut s = FixSuggestion::new(
        format!("Correct the playbook markup{line}"),
        "The playbook failed to parse as YAML",
        0.5,
        FixStrategy::PatchFile,
    );
    if let Some(path) = &error.file_path {
        s = s.with_target_file(path);
    }
    vec![s]
}

fn automation_configuration(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(var) = UNDEFINED_VAR.captures(searchable(error)).and_then(|c| c.get(1)) {
        let name = var.as_str();
        let mut s = FixSuggestion::new(
            format!("Default the undefined variable '{name}'"),
            "A template references a variable with no value; a default filter avoids the fault",
            0.8,
            FixStrategy::AddGuardCode,
        )
        .with_content(format!(
            "# provide a default where '{name}' is referenced: \
             {{{{ {name} | default('') }}}}\n"
        ));
        if let Some(path) = &error.file_path {
            s = s.with_target_file(path);
        }
        return vec![s];
    }
    vec![FixSuggestion::new(
        "Review task parameters against module documentation",
        "A task option is invalid or unsupported",
        0.4,
        FixStrategy::ManualOnly,
    )]
}

fn automation_network(_error: &DetectedError) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        "Retry once the host is reachable",
        "The managed host did not answer; connectivity faults are usually transient",
        0.7,
        FixStrategy::SuggestRetryWrapper,
    )]
}

fn shell_dependency(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(command) = MISSING_COMMAND
        .captures(searchable(error))
        .and_then(|c| c.get(1))
    {
        return vec![FixSuggestion::new(
            format!("Install the missing command '{}'", command.as_str()),
            "The script invokes a binary that is not installed",
            0.8,
            FixStrategy::InstallDependency,
        )
        .with_command(format!("apt-get install -y {}", command.as_str()))];
    }
    vec![FixSuggestion::new(
        "Identify and install the missing tool",
        "A command the script depends on is unavailable",
        0.4,
        FixStrategy::ManualOnly,
    )]
}

fn shell_syntax(error: &DetectedError) -> Vec<FixSuggestion> {
    let line = error
        .line_number
        .map(|l| format!(" near line {l}"))
        .unwrap_or_default();
    let mut s = FixSuggestion::new(
        format!("Correct the shell syntax error{line}"),
        "The shell rejected the script during parsing",
        0.5,
        FixStrategy::PatchFile,
    );
    if let Some(path) = &error.file_path {
        s = s.with_target_file(path);
    }
    vec![s]
}

fn shell_permission(error: &DetectedError) -> Vec<FixSuggestion> {
    match &error.file_path {
        Some(path) => vec![FixSuggestion::new(
            "Make the script executable",
            "Execution was denied on the script file itself",
            0.7,
            FixStrategy::RunCommand,
        )
        .with_target_file(path)
        .with_command(format!("chmod +x {}", path.display()))],
        None => vec![manual_credentials_suggestion()],
    }
}

fn shell_value(error: &DetectedError) -> Vec<FixSuggestion> {
    if let Some(path) = MISSING_PATH.captures(searchable(error)).and_then(|c| c.get(1)) {
        let mut s = FixSuggestion::new(
            format!("Create the missing path '{}' before use", path.as_str()),
            "The script references a path that does not exist yet",
            0.8,
            FixStrategy::AddGuardCode,
        )
        .with_content(format!("mkdir -p {}\n", path.as_str()));
        if let Some(file) = &error.file_path {
            s = s.with_target_file(file);
        }
        return vec![s];
    }
    vec![FixSuggestion::new(
        "Guard unset variables with defaults",
        "An unset variable or bad substitution aborted the script",
        0.5,
        FixStrategy::AddGuardCode,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(
        error_type: ErrorType,
        environment: EnvironmentKind,
        message: &str,
    ) -> DetectedError {
        DetectedError::new(error_type, environment, message).with_context(message.to_string())
    }

    #[test]
    fn missing_module_gets_high_confidence_install() {
        let analyzer = Analyzer::new();
        let result = analyzer.analyze(&error(
            ErrorType::Dependency,
            EnvironmentKind::Scripting,
            "ModuleNotFoundError: No module named 'requests'",
        ));
        let top = &result.suggestions[0];
        assert_eq!(top.strategy, FixStrategy::InstallDependency);
        assert!(top.confidence() >= 0.8);
        assert_eq!(top.command_to_run.as_deref(), Some("pip install requests"));
        assert!(result.root_cause.contains("requests"));
    }

    #[test]
    fn aliased_module_maps_to_package_name() {
        let analyzer = Analyzer::new();
        let result = analyzer.analyze(&error(
            ErrorType::Dependency,
            EnvironmentKind::Scripting,
            "ModuleNotFoundError: No module named 'cv2'",
        ));
        assert_eq!(
            result.suggestions[0].command_to_run.as_deref(),
            Some("pip install opencv-python")
        );
    }

    #[test]
    fn guard_suggestions_carry_appendable_content() {
        let analyzer = Analyzer::new();
        let result = analyzer.analyze(&error(
            ErrorType::Value,
            EnvironmentKind::Scripting,
            "KeyError: 'ticker'",
        ));
        let top = &result.suggestions[0];
        assert_eq!(top.strategy, FixStrategy::AddGuardCode);
        assert!(top.confidence() >= 0.8);
        assert!(top.proposed_content.as_deref().unwrap().contains("'ticker'"));

        let result = analyzer.analyze(&error(
            ErrorType::Configuration,
            EnvironmentKind::ConfigurationAutomation,
            "'build_id' is undefined",
        ));
        assert!(result.suggestions[0]
            .proposed_content
            .as_deref()
            .unwrap()
            .contains("build_id | default('')"));
    }

    #[test]
    fn unknown_error_forces_manual_only() {
        let analyzer = Analyzer::new();
        let result = analyzer.analyze(&error(
            ErrorType::Unknown,
            EnvironmentKind::Scripting,
            "no idea",
        ));
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.suggestions[0].strategy, FixStrategy::ManualOnly);
        assert!(result.suggestions[0].confidence() <= 0.2);
    }

    #[test]
    fn suggestions_are_non_increasing_by_confidence() {
        let analyzer = Analyzer::new();
        let inputs = [
            error(
                ErrorType::Resource,
                EnvironmentKind::InfrastructureProvisioning,
                "Error: Error acquiring the state lock",
            ),
            error(
                ErrorType::Dependency,
                EnvironmentKind::ShellScript,
                "bash: jq: command not found",
            ),
            error(ErrorType::Unknown, EnvironmentKind::ShellScript, "???"),
        ];
        for input in inputs {
            let result = analyzer.analyze(&input);
            let confidences: Vec<f64> =
                result.suggestions.iter().map(|s| s.confidence()).collect();
            assert!(
                confidences.windows(2).all(|w| w[0] >= w[1]),
                "out of order: {confidences:?}"
            );
        }
    }

    #[test]
    fn ties_prefer_non_destructive_strategies() {
        let a = FixSuggestion::new("patch", "r", 0.5, FixStrategy::PatchFile);
        let b = FixSuggestion::new("run", "r", 0.5, FixStrategy::RunCommand);
        let mut v = vec![a, b];
        v.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap()
                .then_with(|| a.strategy.rank().cmp(&b.strategy.rank()))
        });
        assert_eq!(v[0].strategy, FixStrategy::RunCommand);
    }

    #[test]
    fn unmapped_pair_falls_back_to_manual_only() {
        let analyzer = Analyzer::new();
        let result = analyzer.analyze(&error(
            ErrorType::Type,
            EnvironmentKind::InfrastructureProvisioning,
            "strange type failure",
        ));
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.suggestions[0].strategy, FixStrategy::ManualOnly);
        assert_eq!(result.suggestions[0].confidence(), 0.0);
    }

    #[test]
    fn unreachable_host_suggests_retry() {
        let analyzer = Analyzer::new();
        let result = analyzer.analyze(&error(
            ErrorType::Network,
            EnvironmentKind::ConfigurationAutomation,
            "fatal: [web1]: UNREACHABLE!",
        ));
        assert_eq!(
            result.suggestions[0].strategy,
            FixStrategy::SuggestRetryWrapper
        );
    }
}
