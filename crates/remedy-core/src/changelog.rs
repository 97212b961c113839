//! Changelog store
//!
//! Append-only JSON document recording every pipeline transition:
//! `{ metadata: { created, version }, incidents: [...] }`. Writes go
//! through a single async mutex; a store that fails to parse is fatal,
//! never silently rebuilt. Records are mirrored to the console through
//! `tracing` at a severity-mapped level.

use crate::error::{HealingError, Result};
use crate::types::IncidentId;
use chrono::{DateTime, Utc};
use remedy_env::{EnvironmentKind, ErrorType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

const SCHEMA_VERSION: &str = "1.0";

/// Pipeline transition being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ErrorDetected,
    AnalysisComplete,
    FixGenerated,
    FixApplied,
    FixValidated,
    FixFailed,
    PolicyDenied,
    RetryScheduled,
    RollbackPerformed,
    HealingComplete,
    ManualInterventionRequired,
}

/// Record severity, mapped onto tracing levels for the console mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One changelog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: IncidentId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub environment: Option<EnvironmentKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fix_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fix_reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fix_diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub attempt_number: Option<u32>,
}

impl IncidentRecord {
    #[must_use]
    pub fn new(incident_id: IncidentId, event_type: EventType, severity: Severity) -> Self {
        Self {
            incident_id,
            event_type,
            timestamp: Utc::now(),
            severity,
            environment: None,
            file_path: None,
            line_number: None,
            error_type: None,
            error_message: None,
            fix_description: None,
            fix_reasoning: None,
            fix_diff: None,
            stack_trace: None,
            validation_result: None,
            attempt_number: None,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentKind) -> Self {
        self.environment = Some(environment);
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error_type: ErrorType, message: impl Into<String>) -> Self {
        self.error_type = Some(error_type);
        self.error_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_fix(
        mut self,
        description: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        self.fix_description = Some(description.into());
        self.fix_reasoning = Some(reasoning.into());
        self
    }

    #[must_use]
    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.fix_diff = Some(diff.into());
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    #[must_use]
    pub fn with_validation(mut self, success: bool) -> Self {
        self.validation_result = Some(success);
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt_number = Some(attempt);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    created: DateTime<Utc>,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChangelogDocument {
    metadata: Metadata,
    incidents: Vec<IncidentRecord>,
}

/// Aggregate numbers computed over the changelog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingStats {
    pub total_incidents: usize,
    pub successful_fixes: usize,
    pub failed_fixes: usize,
    pub success_rate: f64,
    pub manual_interventions: usize,
    pub error_types: HashMap<String, usize>,
}

/// Durable, single-writer incident log.
#[derive(Debug)]
pub struct ChangelogStore {
    path: PathBuf,
    to_console: bool,
    to_file: bool,
    state: Mutex<ChangelogDocument>,
}

impl ChangelogStore {
    /// Open or create the store. An existing document that fails to
    /// parse is [`HealingError::ChangelogCorrupted`].
    pub async fn open(path: PathBuf, to_console: bool, to_file: bool) -> Result<Self> {
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                HealingError::ChangelogCorrupted(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ChangelogDocument {
                metadata: Metadata {
                    created: Utc::now(),
                    version: SCHEMA_VERSION.to_string(),
                },
                incidents: Vec::new(),
            },
            Err(e) => return Err(e.into()),
        };
        let store = Self {
            path,
            to_console,
            to_file,
            state: Mutex::new(document),
        };
        if store.to_file {
            let state = store.state.lock().await;
            store.persist(&state).await?;
        }
        Ok(store)
    }

    /// Append one record and persist the document.
    pub async fn append(&self, record: IncidentRecord) -> Result<()> {
        if self.to_console {
            mirror(&record);
        }
        let mut state = self.state.lock().await;
        state.incidents.push(record);
        if self.to_file {
            self.persist(&state).await?;
        }
        Ok(())
    }

    async fn persist(&self, state: &ChangelogDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.state.lock().await.incidents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Records for one incident, in append order.
    pub async fn records_for(&self, incident_id: IncidentId) -> Vec<IncidentRecord> {
        self.state
            .lock()
            .await
            .incidents
            .iter()
            .filter(|r| r.incident_id == incident_id)
            .cloned()
            .collect()
    }

    /// Aggregate statistics over every recorded incident.
    pub async fn statistics(&self) -> HealingStats {
        let state = self.state.lock().await;
        let mut stats = HealingStats {
            total_incidents: 0,
            successful_fixes: 0,
            failed_fixes: 0,
            success_rate: 0.0,
            manual_interventions: 0,
            error_types: HashMap::new(),
        };
        for record in &state.incidents {
            match record.event_type {
                EventType::ErrorDetected => {
                    stats.total_incidents += 1;
                    if let Some(error_type) = record.error_type {
                        *stats.error_types.entry(error_type.to_string()).or_insert(0) += 1;
                    }
                }
                EventType::HealingComplete => stats.successful_fixes += 1,
                EventType::FixFailed => stats.failed_fixes += 1,
                EventType::ManualInterventionRequired => stats.manual_interventions += 1,
                _ => {}
            }
        }
        if stats.total_incidents > 0 {
            stats.success_rate = stats.successful_fixes as f64 / stats.total_incidents as f64;
        }
        stats
    }
}

fn mirror(record: &IncidentRecord) {
    let incident = record.incident_id.to_string();
    let event = format!("{:?}", record.event_type);
    let message = record.error_message.as_deref().unwrap_or("");
    match record.severity {
        Severity::Info => tracing::info!(%incident, %event, %message, "incident"),
        Severity::Warning => tracing::warn!(%incident, %event, %message, "incident"),
        Severity::Error | Severity::Critical => {
            tracing::error!(%incident, %event, %message, "incident");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in(dir: &std::path::Path) -> ChangelogStore {
        ChangelogStore::open(dir.join("changelog.json"), false, true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn records_append_in_order_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let id = IncidentId::new();

        store
            .append(IncidentRecord::new(id, EventType::ErrorDetected, Severity::Warning))
            .await
            .unwrap();
        store
            .append(IncidentRecord::new(id, EventType::HealingComplete, Severity::Info))
            .await
            .unwrap();

        let records = store.records_for(id).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, EventType::ErrorDetected);
        assert_eq!(records[1].event_type, EventType::HealingComplete);

        // A reopened store sees the same history.
        drop(store);
        let reopened = ChangelogStore::open(dir.path().join("changelog.json"), false, true)
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn corrupt_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ChangelogStore::open(path, false, true).await.unwrap_err();
        assert!(matches!(err, HealingError::ChangelogCorrupted(_)));
    }

    #[tokio::test]
    async fn statistics_aggregate_by_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        for _ in 0..3 {
            let id = IncidentId::new();
            store
                .append(
                    IncidentRecord::new(id, EventType::ErrorDetected, Severity::Warning)
                        .with_error(ErrorType::Dependency, "missing"),
                )
                .await
                .unwrap();
        }
        let id = IncidentId::new();
        store
            .append(IncidentRecord::new(id, EventType::HealingComplete, Severity::Info))
            .await
            .unwrap();
        store
            .append(IncidentRecord::new(
                id,
                EventType::ManualInterventionRequired,
                Severity::Error,
            ))
            .await
            .unwrap();

        let stats = store.statistics().await;
        assert_eq!(stats.total_incidents, 3);
        assert_eq!(stats.successful_fixes, 1);
        assert_eq!(stats.manual_interventions, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.error_types.get("dependency"), Some(&3));
    }

    #[tokio::test]
    async fn console_only_store_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.json");
        let store = ChangelogStore::open(path.clone(), false, false).await.unwrap();
        store
            .append(IncidentRecord::new(
                IncidentId::new(),
                EventType::ErrorDetected,
                Severity::Warning,
            ))
            .await
            .unwrap();
        assert!(!path.exists());
        assert_eq!(store.len().await, 1);
    }
}
