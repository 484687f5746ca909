//! Data models for Flowgate.
//!
//! Flows, nodes and rules describe what to run; executions, node executions, gate
//! evaluations, memory entries and audit entries record what happened.

pub mod audit;
pub mod execution;
pub mod flow;
pub mod gate;
pub mod memory;
pub mod node_config;
pub mod rule;

pub use audit::{AuditEventType, AuditLogEntry, AuditQuery, AuditStatistics, AuditTrail};
pub use execution::{Execution, ExecutionStatus, NodeExecution, NodeExecutionStatus};
pub use flow::{Flow, NewNode, Node, NodeKind};
pub use gate::{Decision, DecisionClass, GateDecision, GateEvaluation, RuleResult, RuleStatus};
pub use memory::{EpisodicMemoryEntry, WorkingMemoryEntry};
pub use node_config::{AgentNodeConfig, ControlFlowConfig, GateNodeConfig, WorkflowPattern};
pub use rule::{NewRule, Rule, RuleMetadata, RuleType};
