//! Gate decisions and their audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Closed set of gate outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Go,
    Pass,
    Approve,
    Release,
    Recycle,
    Hold,
    Queue,
    Kill,
    Reject,
    PendingHumanReview,
}

/// How the orchestrator reacts to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionClass {
    /// Run the gate's children.
    Proceed,
    /// Re-run the recycle target.
    Recycle,
    /// Stop this branch without failing.
    Block,
    /// Stop this branch until a human resumes it.
    PendingReview,
    /// Fail the whole execution.
    Terminate,
}

impl Decision {
    /// Returns the canonical upper-case form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Go => "GO",
            Self::Pass => "PASS",
            Self::Approve => "APPROVE",
            Self::Release => "RELEASE",
            Self::Recycle => "RECYCLE",
            Self::Hold => "HOLD",
            Self::Queue => "QUEUE",
            Self::Kill => "KILL",
            Self::Reject => "REJECT",
            Self::PendingHumanReview => "PENDING_HUMAN_REVIEW",
        }
    }

    /// Groups the decision by orchestrator behavior.
    pub fn class(self) -> DecisionClass {
        match self {
            Self::Go | Self::Pass | Self::Approve | Self::Release => DecisionClass::Proceed,
            Self::Recycle => DecisionClass::Recycle,
            Self::Hold | Self::Queue => DecisionClass::Block,
            Self::PendingHumanReview => DecisionClass::PendingReview,
            Self::Kill | Self::Reject => DecisionClass::Terminate,
        }
    }

    /// Pass-class decisions.
    pub fn is_pass(self) -> bool {
        self.class() == DecisionClass::Proceed
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GO" => Ok(Self::Go),
            "PASS" => Ok(Self::Pass),
            "APPROVE" => Ok(Self::Approve),
            "RELEASE" => Ok(Self::Release),
            "RECYCLE" => Ok(Self::Recycle),
            "HOLD" => Ok(Self::Hold),
            "QUEUE" => Ok(Self::Queue),
            "KILL" => Ok(Self::Kill),
            "REJECT" => Ok(Self::Reject),
            "PENDING_HUMAN_REVIEW" => Ok(Self::PendingHumanReview),
            other => Err(format!("unknown gate decision: {}", other)),
        }
    }
}

/// Outcome of one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Pass,
    Fail,
    /// The condition could not be evaluated.
    Error,
    /// Not evaluated because an earlier rule killed the gate.
    Skipped,
}

impl RuleStatus {
    /// Returns the storage form of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "error" => Ok(Self::Error),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown rule status: {}", other)),
        }
    }
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    /// Evaluated rule.
    pub rule_id: String,
    /// Rule name.
    pub rule_name: String,
    /// Outcome.
    pub status: RuleStatus,
    /// 100 when passed, 0 otherwise.
    pub score: f64,
    /// Weight used in the gate average.
    pub weight: f64,
    /// Human-readable explanation.
    pub reason: String,
    /// Every referenced field path mapped to its resolved value (null when absent).
    pub context_snapshot: Map<String, Value>,
}

impl RuleResult {
    /// True when the condition held.
    pub fn passed(&self) -> bool {
        self.status == RuleStatus::Pass
    }
}

/// Aggregate gate outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// The evaluated gate.
    pub gate_node_id: String,
    /// Decision taken.
    pub decision: Decision,
    /// Weighted average of rule scores, 0..=100.
    pub overall_score: f64,
    /// True for pass-class decisions.
    pub passed: bool,
    /// One entry per enabled rule fetched for the gate.
    pub rule_results: Vec<RuleResult>,
    /// Why the decision was taken.
    pub reason: String,
    /// Follow-ups for a human.
    pub recommendations: Vec<String>,
}

/// Append-only audit record for one rule at one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    /// Unique identifier.
    pub id: String,
    /// Owning execution.
    pub execution_id: String,
    /// Gate node.
    pub gate_node_id: String,
    /// Evaluated rule.
    pub rule_id: String,
    /// Rule outcome.
    pub status: RuleStatus,
    /// Aggregate decision of the gate this rule contributed to.
    pub decision: Decision,
    /// Rule score.
    pub score: f64,
    /// Rule reason.
    pub reason: String,
    /// Referenced fields at evaluation time.
    pub context_snapshot: Value,
    /// Evaluation timestamp.
    pub evaluated_at: DateTime<Utc>,
}
