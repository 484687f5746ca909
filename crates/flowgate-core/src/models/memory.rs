//! Working and episodic memory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution-scoped key/value entry. The last write for a key wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    /// Owning execution.
    pub execution_id: String,
    /// Node that wrote the entry, if any.
    pub node_id: Option<String>,
    /// Key, unique per execution.
    pub key: String,
    /// Stored value.
    pub value: Value,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
    /// Entries past this instant are invisible to reads.
    pub expires_at: Option<DateTime<Utc>>,
}

impl WorkingMemoryEntry {
    /// Checks whether the entry is still readable at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Cross-execution example grouped by goal signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMemoryEntry {
    /// Unique identifier.
    pub id: String,
    /// Owning flow.
    pub flow_id: String,
    /// Node that produced the example, if any.
    pub node_id: Option<String>,
    /// Goal signature the example belongs to.
    pub goal_signature: String,
    /// The example document.
    pub example: Value,
    /// Whether the example came from a successful run.
    pub success: bool,
    /// How many times the example has been retrieved.
    pub access_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last retrieval timestamp.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Free-form metadata.
    pub metadata: Value,
}
