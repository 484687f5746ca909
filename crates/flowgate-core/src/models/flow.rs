//! Flow and node definitions.
//!
//! A flow owns a tree of nodes rooted at exactly one parentless node. Children are found
//! through `parent_id` and ordered by `position`, which sequential patterns depend on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of a node in the flow tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point of the tree.
    Root,
    /// A reasoning step delegated to the agent invoker.
    Agent,
    /// A workflow pattern applied to the node's children.
    ControlFlow,
    /// A deterministic rule-driven checkpoint.
    Gate,
}

impl NodeKind {
    /// Returns the storage form of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Agent => "agent",
            Self::ControlFlow => "control_flow",
            Self::Gate => "gate",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "agent" => Ok(Self::Agent),
            "control_flow" => Ok(Self::ControlFlow),
            "gate" => Ok(Self::Gate),
            other => Err(format!("unknown node type: {}", other)),
        }
    }
}

/// Top-level flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the flow is for.
    pub description: String,
    /// Free-form metadata.
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A node of a flow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier.
    pub id: String,
    /// Owning flow.
    pub flow_id: String,
    /// Parent node, `None` only for the root.
    pub parent_id: Option<String>,
    /// Node kind.
    pub kind: NodeKind,
    /// Name, unique among siblings by convention; routing and recycling refer to it.
    pub name: String,
    /// Description; agent nodes fall back to it when no goal is configured.
    pub description: String,
    /// Order among siblings.
    pub position: i64,
    /// Kind-specific configuration map.
    pub config: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Returns true for the parentless root node.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Reads a string entry from the config map.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Request to append a node to a flow tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    /// Owning flow.
    pub flow_id: String,
    /// Parent node, `None` for the root.
    pub parent_id: Option<String>,
    /// Node kind.
    pub kind: NodeKind,
    /// Node name.
    pub name: String,
    /// Node description.
    pub description: String,
    /// Explicit sibling position; defaults to the current sibling count.
    pub position: Option<i64>,
    /// Configuration map.
    pub config: Value,
}

impl NewNode {
    /// Creates a node request with an empty config.
    pub fn new(flow_id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            parent_id: None,
            kind,
            name: name.into(),
            description: String::new(),
            position: None,
            config: Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the parent node.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets an explicit sibling position.
    #[must_use]
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }

    /// Replaces the config map.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}
