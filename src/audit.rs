//! Append-only audit trail for query processing.
//!
//! Every stage of a query (resolution, planning, counting, execution,
//! validation, tool routing) records an event tagged with the query's
//! correlation id. Recording is infallible from the caller's point of
//! view: lock poisoning is logged and swallowed, and nothing here can
//! fail a query that would otherwise succeed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Resolution,
    PlanBuilt,
    ToolMatched,
    ToolRun,
    PreCount,
    Execution,
    Validation,
    Error,
}

impl AuditStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStage::Resolution => "resolution",
            AuditStage::PlanBuilt => "plan_built",
            AuditStage::ToolMatched => "tool_matched",
            AuditStage::ToolRun => "tool_run",
            AuditStage::PreCount => "pre_count",
            AuditStage::Execution => "execution",
            AuditStage::Validation => "validation",
            AuditStage::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stage: AuditStage,
    pub detail: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct QueryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl QueryAudit {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Appends one event. Never fails; a poisoned lock is logged and the
    /// event is dropped.
    pub fn record(&self, correlation_id: Uuid, stage: AuditStage, detail: serde_json::Value) {
        let event = AuditEvent {
            correlation_id,
            timestamp: Utc::now(),
            stage,
            detail,
        };
        debug!("Audit [{}] {}", correlation_id, stage.as_str());
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(e) => error!("Audit lock poisoned, dropping event: {}", e),
        }
    }

    pub fn record_error(&self, correlation_id: Uuid, message: &str) {
        self.record(
            correlation_id,
            AuditStage::Error,
            serde_json::json!({ "message": message }),
        );
    }

    /// Snapshot of all events in insertion order.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(e) => {
                error!("Audit lock poisoned, returning empty trail: {}", e);
                Vec::new()
            }
        }
    }

    /// Events for a single query, in the order they were recorded.
    pub fn events_for(&self, correlation_id: Uuid) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.correlation_id == correlation_id)
            .collect()
    }

    /// Per-stage event counts across the whole trail.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for event in self.events() {
            *counts.entry(event.stage.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Writes the full trail as pretty JSON and returns the file path.
    pub fn export_json(&self, dir: &Path) -> crate::error::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let filename = format!("audit_trail_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(filename);
        let json = serde_json::to_string_pretty(&self.events())?;
        fs::write(&path, json)?;
        Ok(path)
    }
}
