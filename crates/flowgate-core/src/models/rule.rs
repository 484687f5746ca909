//! Business rule definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What a rule is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Scored at a gate.
    Gate,
    /// Data validation.
    Validation,
    /// Data transformation through its action.
    Transformation,
    /// Chooses a child in the routing pattern.
    Routing,
}

impl RuleType {
    /// Returns the storage form of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gate => "gate",
            Self::Validation => "validation",
            Self::Transformation => "transformation",
            Self::Routing => "routing",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gate" => Ok(Self::Gate),
            "validation" => Ok(Self::Validation),
            "transformation" => Ok(Self::Transformation),
            "routing" => Ok(Self::Routing),
            other => Err(format!("unknown rule type: {}", other)),
        }
    }
}

/// Scoring flags attached to a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    /// Weight in the gate average; the gate default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// A failure forces recycle/hold.
    #[serde(default)]
    pub critical: bool,
    /// A failure kills the gate immediately.
    #[serde(default)]
    pub auto_kill_if_fail: bool,
    /// A failure asks for human review.
    #[serde(default)]
    pub requires_human_if_fail: bool,
    /// Anything else the author attached.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A stored business rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier.
    pub id: String,
    /// Owning flow.
    pub flow_id: String,
    /// Gate or control-flow node the rule belongs to; `None` is flow-scoped.
    pub gate_node_id: Option<String>,
    /// Rule name used in reasons.
    pub name: String,
    /// Description.
    pub description: String,
    /// Rule type.
    pub rule_type: RuleType,
    /// Condition expression tree.
    pub condition: Value,
    /// Optional action map (`route_to` for routing, transformations for actions).
    pub action: Option<Value>,
    /// Ordering hint, higher first.
    pub priority: i64,
    /// Scoring flags.
    pub metadata: RuleMetadata,
    /// Disabled rules are never fetched for evaluation.
    pub enabled: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Request to attach a rule to a flow.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    /// Owning flow.
    pub flow_id: String,
    /// Gate or control-flow node scope.
    pub gate_node_id: Option<String>,
    /// Rule name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Rule type.
    pub rule_type: RuleType,
    /// Condition expression tree.
    pub condition: Value,
    /// Optional action.
    pub action: Option<Value>,
    /// Priority.
    pub priority: i64,
    /// Scoring flags.
    pub metadata: RuleMetadata,
    /// Enabled flag.
    pub enabled: bool,
}

impl NewRule {
    /// Creates an enabled rule with priority 0 and no action.
    pub fn new(
        flow_id: impl Into<String>,
        name: impl Into<String>,
        rule_type: RuleType,
        condition: Value,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            gate_node_id: None,
            name: name.into(),
            description: String::new(),
            rule_type,
            condition,
            action: None,
            priority: 0,
            metadata: RuleMetadata::default(),
            enabled: true,
        }
    }

    /// Scopes the rule to a gate or control-flow node.
    #[must_use]
    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.gate_node_id = Some(node_id.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the action.
    #[must_use]
    pub fn with_action(mut self, action: Value) -> Self {
        self.action = Some(action);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.metadata.weight = Some(weight);
        self
    }

    /// Marks the rule critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.metadata.critical = true;
        self
    }

    /// Makes a failure of this rule kill the gate.
    #[must_use]
    pub fn auto_kill(mut self) -> Self {
        self.metadata.auto_kill_if_fail = true;
        self
    }

    /// Makes a failure of this rule request human review.
    #[must_use]
    pub fn requires_human(mut self) -> Self {
        self.metadata.requires_human_if_fail = true;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
