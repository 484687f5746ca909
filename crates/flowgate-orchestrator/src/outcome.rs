//! What a node visit hands back to its parent.

use flowgate_core::Decision;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Result of executing one node and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The node finished and produced `output`.
    Completed {
        /// Document handed to the next node.
        output: Value,
    },
    /// A gate stopped this branch without failing the execution.
    Blocked {
        /// Gate that blocked.
        node_id: String,
        /// Gate name.
        node_name: String,
        /// HOLD, QUEUE or PENDING_HUMAN_REVIEW.
        decision: Decision,
        /// Aggregate gate reason.
        reason: String,
        /// Set when the branch waits for a human.
        pending_review: bool,
    },
    /// A root without children.
    NoOp,
}

impl NodeOutcome {
    /// Wraps an output document.
    pub fn completed(output: Value) -> Self {
        Self::Completed { output }
    }

    /// Status label stored with node executions and audit entries.
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Blocked { .. } => "blocked",
            Self::NoOp => "no_op",
        }
    }

    /// The produced document, when the node completed.
    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Completed { output } => Some(output),
            _ => None,
        }
    }

    /// Consumes the outcome, returning the produced document when the node completed.
    pub fn into_output(self) -> Option<Value> {
        match self {
            Self::Completed { output } => Some(output),
            _ => None,
        }
    }

    /// Whether the branch stopped at a gate.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// JSON form recorded as a node or execution result.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Completed { output } => json!({ "status": "completed", "output": output }),
            Self::Blocked { node_id, node_name, decision, reason, pending_review } => json!({
                "status": "blocked",
                "node_id": node_id,
                "node_name": node_name,
                "decision": decision,
                "reason": reason,
                "pending_review": pending_review,
            }),
            Self::NoOp => json!({ "status": "no_op" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_value_matches_serde_form() {
        let blocked = NodeOutcome::Blocked {
            node_id: "g1".to_string(),
            node_name: "review".to_string(),
            decision: Decision::PendingHumanReview,
            reason: "Human review required".to_string(),
            pending_review: true,
        };
        assert_eq!(blocked.to_value(), serde_json::to_value(&blocked).unwrap());
        assert_eq!(blocked.to_value()["decision"], "PENDING_HUMAN_REVIEW");

        let done = NodeOutcome::completed(json!({"summary": "ok"}));
        assert_eq!(done.to_value(), serde_json::to_value(&done).unwrap());
        assert_eq!(NodeOutcome::NoOp.to_value(), json!({"status": "no_op"}));
    }

    #[test]
    fn test_accessors() {
        let done = NodeOutcome::completed(json!(1));
        assert_eq!(done.status_str(), "completed");
        assert_eq!(done.output(), Some(&json!(1)));
        assert!(!done.is_blocked());
        assert_eq!(NodeOutcome::NoOp.into_output(), None);
    }
}
