//! Typed views over a node's config map.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::models::{Decision, Node};

fn view<T: for<'de> Deserialize<'de> + Default>(config: &Value) -> Result<T, serde_json::Error> {
    if config.is_null() { Ok(T::default()) } else { serde_json::from_value(config.clone()) }
}

/// Agent node settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentNodeConfig {
    /// Goal handed to the invoker; the node description is used when unset.
    #[serde(default)]
    pub goal: Option<String>,
    /// Invocation budget in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Invocation budget in minutes, used when `timeout_secs` is unset.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    /// Append the invocation to episodic memory.
    #[serde(default)]
    pub store_episodic: bool,
    /// Overrides the computed goal signature.
    #[serde(default)]
    pub episodic_goal_signature: Option<String>,
    /// Working memory keys the agent reads; all keys when empty.
    #[serde(default)]
    pub working_memory_input: Vec<String>,
    /// Working memory keys the agent writes from its output.
    #[serde(default)]
    pub working_memory_output: Vec<String>,
}

impl AgentNodeConfig {
    /// Reads the agent view of `node.config`.
    pub fn from_node(node: &Node) -> Result<Self, serde_json::Error> {
        view(&node.config)
    }

    /// Resolves the goal, falling back to the node description.
    pub fn goal_for(&self, node: &Node) -> String {
        self.goal.clone().unwrap_or_else(|| node.description.clone())
    }

    /// Resolves the timeout in seconds, falling back to `default_secs`.
    pub fn timeout_secs(&self, default_secs: u64) -> u64 {
        self.timeout_secs
            .or_else(|| self.timeout_minutes.map(|minutes| minutes.saturating_mul(60)))
            .unwrap_or(default_secs)
    }
}

/// Gate node settings; unset fields take the configured gate defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GateNodeConfig {
    /// `"automated"` or `"human"`.
    #[serde(default)]
    pub gate_type: Option<String>,
    /// Score needed for a pass-class decision.
    #[serde(default)]
    pub pass_threshold: Option<f64>,
    /// Decisions this gate may emit.
    #[serde(default)]
    pub decision_options: Option<Vec<Decision>>,
    /// Node name or id re-run on RECYCLE.
    #[serde(default)]
    pub recycle_target: Option<String>,
    /// Bound on recycles from this gate within one execution.
    #[serde(default)]
    pub max_recycles: Option<u32>,
}

impl GateNodeConfig {
    /// Reads the gate view of `node.config`.
    pub fn from_node(node: &Node) -> Result<Self, serde_json::Error> {
        view(&node.config)
    }
}

/// The five workflow patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowPattern {
    PromptChaining,
    Routing,
    Parallelization,
    OrchestratorWorkers,
    EvaluatorOptimizer,
}

impl WorkflowPattern {
    /// Parses a configured pattern name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "prompt_chaining" => Some(Self::PromptChaining),
            "routing" => Some(Self::Routing),
            "parallelization" => Some(Self::Parallelization),
            "orchestrator_workers" => Some(Self::OrchestratorWorkers),
            "evaluator_optimizer" => Some(Self::EvaluatorOptimizer),
            _ => None,
        }
    }

    /// Returns the configured name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PromptChaining => "prompt_chaining",
            Self::Routing => "routing",
            Self::Parallelization => "parallelization",
            Self::OrchestratorWorkers => "orchestrator_workers",
            Self::EvaluatorOptimizer => "evaluator_optimizer",
        }
    }
}

impl fmt::Display for WorkflowPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_pattern() -> String {
    "prompt_chaining".to_string()
}

fn default_max_iterations() -> u32 {
    3
}

fn default_quality_threshold() -> f64 {
    0.8
}

/// Control-flow node settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlFlowConfig {
    /// Pattern name; unknown names fall back to sequential execution.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Evaluator-optimizer loop bound.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Evaluator-optimizer early-stop score.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
}

impl Default for ControlFlowConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            max_iterations: default_max_iterations(),
            quality_threshold: default_quality_threshold(),
        }
    }
}

impl ControlFlowConfig {
    /// Reads the control-flow view of `node.config`.
    pub fn from_node(node: &Node) -> Result<Self, serde_json::Error> {
        view(&node.config)
    }

    /// The configured pattern, or `None` when the name is not recognized.
    pub fn workflow_pattern(&self) -> Option<WorkflowPattern> {
        WorkflowPattern::parse(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;
    use chrono::Utc;
    use serde_json::json;

    fn node(kind: NodeKind, config: Value) -> Node {
        Node {
            id: "n1".to_string(),
            flow_id: "f1".to_string(),
            parent_id: Some("root".to_string()),
            kind,
            name: "node".to_string(),
            description: "Write the summary".to_string(),
            position: 0,
            config,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_agent_config_goal_falls_back_to_description() {
        let node = node(NodeKind::Agent, json!({}));
        let config = AgentNodeConfig::from_node(&node).unwrap();
        assert_eq!(config.goal_for(&node), "Write the summary");
    }

    #[test]
    fn test_agent_timeout_resolution() {
        let minutes = AgentNodeConfig { timeout_minutes: Some(2), ..AgentNodeConfig::default() };
        assert_eq!(minutes.timeout_secs(300), 120);

        let both = AgentNodeConfig {
            timeout_secs: Some(5),
            timeout_minutes: Some(2),
            ..AgentNodeConfig::default()
        };
        assert_eq!(both.timeout_secs(300), 5);
        assert_eq!(AgentNodeConfig::default().timeout_secs(300), 300);

        let huge = AgentNodeConfig { timeout_minutes: Some(u64::MAX), ..AgentNodeConfig::default() };
        assert_eq!(huge.timeout_secs(300), u64::MAX);
    }

    #[test]
    fn test_gate_config_parses_decision_options() {
        let node = node(
            NodeKind::Gate,
            json!({"gate_type": "human", "decision_options": ["GO", "HOLD"], "recycle_target": "writer"}),
        );
        let config = GateNodeConfig::from_node(&node).unwrap();
        assert_eq!(config.decision_options, Some(vec![Decision::Go, Decision::Hold]));
        assert_eq!(config.recycle_target.as_deref(), Some("writer"));
        assert_eq!(config.pass_threshold, None);
    }

    #[test]
    fn test_gate_config_rejects_unknown_decision() {
        let node = node(NodeKind::Gate, json!({"decision_options": ["MAYBE"]}));
        assert!(GateNodeConfig::from_node(&node).is_err());
    }

    #[test]
    fn test_control_flow_defaults() {
        let config = ControlFlowConfig::from_node(&node(NodeKind::ControlFlow, Value::Null)).unwrap();
        assert_eq!(config.workflow_pattern(), Some(WorkflowPattern::PromptChaining));
        assert_eq!(config.max_iterations, 3);
        assert!((config.quality_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_pattern_is_none() {
        let config =
            ControlFlowConfig::from_node(&node(NodeKind::ControlFlow, json!({"pattern": "swarm"}))).unwrap();
        assert_eq!(config.workflow_pattern(), None);
    }
}
