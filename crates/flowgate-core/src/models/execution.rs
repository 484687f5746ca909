//! Execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a flow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not started.
    Pending,
    /// Walking the tree.
    InProgress,
    /// Finished without a terminating failure.
    Completed,
    /// Finished with a terminating failure.
    Failed,
}

impl ExecutionStatus {
    /// Returns the storage form of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed executions never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Checks whether moving to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::InProgress => next.is_terminal() || next == Self::InProgress,
            Self::Completed | Self::Failed => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Lifecycle of a single node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    /// Recorded, not started.
    Pending,
    /// Running.
    InProgress,
    /// Finished.
    Completed,
    /// Raised an error.
    Failed,
    /// Deliberately not run.
    Skipped,
}

impl NodeExecutionStatus {
    /// Returns the storage form of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown node execution status: {}", other)),
        }
    }
}

/// One run of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier.
    pub id: String,
    /// Flow being run.
    pub flow_id: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// Context supplied by the caller.
    pub initial_context: Value,
    /// Final result of the tree walk, once finished.
    pub result: Option<Value>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Set when the status becomes terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error text for failed executions.
    pub error: Option<String>,
}

/// One visit of a node within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Unique identifier.
    pub id: String,
    /// Owning execution.
    pub execution_id: String,
    /// Visited node.
    pub node_id: String,
    /// Current status.
    pub status: NodeExecutionStatus,
    /// Input handed to the node.
    pub input: Value,
    /// Output produced by the node itself.
    pub output: Option<Value>,
    /// Error text for failed visits.
    pub error: Option<String>,
    /// 1 for the first visit of the node in this execution, 2 for the next, and so on.
    pub attempt_count: u32,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Set when the visit finishes.
    pub completed_at: Option<DateTime<Utc>>,
}
