//! Audit log records and queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kinds of audited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    GateEvaluation,
    AgentInvoked,
    Recycle,
    RoutingDecision,
    PatternFallback,
}

impl AuditEventType {
    /// Returns the storage form of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution_started",
            Self::ExecutionCompleted => "execution_completed",
            Self::ExecutionFailed => "execution_failed",
            Self::NodeStarted => "node_started",
            Self::NodeCompleted => "node_completed",
            Self::NodeFailed => "node_failed",
            Self::NodeSkipped => "node_skipped",
            Self::GateEvaluation => "gate_evaluation",
            Self::AgentInvoked => "agent_invoked",
            Self::Recycle => "recycle",
            Self::RoutingDecision => "routing_decision",
            Self::PatternFallback => "pattern_fallback",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution_started" => Ok(Self::ExecutionStarted),
            "execution_completed" => Ok(Self::ExecutionCompleted),
            "execution_failed" => Ok(Self::ExecutionFailed),
            "node_started" => Ok(Self::NodeStarted),
            "node_completed" => Ok(Self::NodeCompleted),
            "node_failed" => Ok(Self::NodeFailed),
            "node_skipped" => Ok(Self::NodeSkipped),
            "gate_evaluation" => Ok(Self::GateEvaluation),
            "agent_invoked" => Ok(Self::AgentInvoked),
            "recycle" => Ok(Self::Recycle),
            "routing_decision" => Ok(Self::RoutingDecision),
            "pattern_fallback" => Ok(Self::PatternFallback),
            other => Err(format!("unknown audit event type: {}", other)),
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique identifier.
    pub id: String,
    /// Owning execution, if any.
    pub execution_id: Option<String>,
    /// Node the event concerns, if any.
    pub node_id: Option<String>,
    /// Event kind.
    pub event_type: AuditEventType,
    /// Event payload.
    pub event_data: Value,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Filters for [`crate::storage::FlowStore::get_audit_logs`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuditQuery {
    /// Restrict to one execution.
    pub execution_id: Option<String>,
    /// Restrict to one event type.
    pub event_type: Option<AuditEventType>,
    /// Inclusive lower time bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper time bound.
    pub until: Option<DateTime<Utc>>,
    /// Maximum rows, newest first.
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self { execution_id: None, event_type: None, since: None, until: None, limit: 100 }
    }
}

impl AuditQuery {
    /// Query for one execution.
    pub fn for_execution(execution_id: impl Into<String>) -> Self {
        Self { execution_id: Some(execution_id.into()), ..Self::default() }
    }

    /// Restricts to one event type.
    #[must_use]
    pub fn with_event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Restricts to a time window.
    #[must_use]
    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Caps the number of rows.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Aggregates over an execution's audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    /// Number of events.
    pub total_events: usize,
    /// Count per event type.
    pub event_types: BTreeMap<String, usize>,
    /// Count per gate decision.
    pub gate_decisions: BTreeMap<String, usize>,
}

/// Chronological audit log of an execution plus statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    /// Execution the trail belongs to.
    pub execution_id: String,
    /// Events, oldest first.
    pub logs: Vec<AuditLogEntry>,
    /// Aggregates.
    pub statistics: AuditStatistics,
}

impl AuditTrail {
    /// Builds a trail from events in chronological order.
    pub fn from_logs(execution_id: impl Into<String>, logs: Vec<AuditLogEntry>) -> Self {
        let mut statistics = AuditStatistics { total_events: logs.len(), ..AuditStatistics::default() };

        for log in &logs {
            *statistics.event_types.entry(log.event_type.as_str().to_string()).or_insert(0) += 1;

            if log.event_type == AuditEventType::GateEvaluation {
                if let Some(decision) = log.event_data.get("decision").and_then(Value::as_str) {
                    *statistics.gate_decisions.entry(decision.to_string()).or_insert(0) += 1;
                }
            }
        }

        Self { execution_id: execution_id.into(), logs, statistics }
    }
}
