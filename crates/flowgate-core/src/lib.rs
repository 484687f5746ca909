//! Flowgate Core - business rules and flow records for gated agent workflows.
//!
//! This crate provides:
//! - The flow data model (flows, nodes, rules, executions, audit records)
//! - The condition language and the gate decision engine
//! - Working and episodic memory
//! - The storage collaborator and its SQLite implementation
//! - Flow definition, configuration and logging setup
//!
//! # Example
//!
//! ```rust,no_run
//! use flowgate_core::rules::conditions::field_is_not_null;
//! use flowgate_core::{FlowBuilder, FlowgateConfig, NewNode, NewRule, NodeKind, RuleType, SqliteFlowStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! fn main() -> flowgate_core::Result<()> {
//!     let config = FlowgateConfig::load()?;
//!     let store = Arc::new(SqliteFlowStore::from_config(&config.storage)?);
//!     let builder = FlowBuilder::new(store);
//!
//!     let flow = builder.create_flow("prd-review", "PRD quality gate", &json!({}))?;
//!     let root = builder.add_node(NewNode::new(&flow.id, NodeKind::Root, "start"))?;
//!     let gate = builder.add_node(NewNode::new(&flow.id, NodeKind::Gate, "completeness").with_parent(&root.id))?;
//!     builder.add_rule(
//!         NewRule::new(&flow.id, "has title", RuleType::Gate, field_is_not_null("prd.title"))
//!             .for_node(&gate.id)
//!             .critical(),
//!     )?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod models;
pub mod rules;
pub mod storage;

pub use builder::{BuildError, FlowBuilder, FlowTree, MemoryContractWarning, TreeNode, load_flow_tree};
pub use config::{
    ConfigError, FlowgateConfig, GateDefaults, LoggingConfig, OrchestratorConfig, StorageConfig,
};
pub use error::{FlowgateError, Result};
pub use logging::init_logging;
pub use memory::{MemoryStore, goal_signature};
pub use models::{
    AgentNodeConfig, AuditEventType, AuditLogEntry, AuditQuery, AuditStatistics, AuditTrail,
    ControlFlowConfig, Decision, DecisionClass, EpisodicMemoryEntry, Execution, ExecutionStatus,
    Flow, GateDecision, GateEvaluation, GateNodeConfig, NewNode, NewRule, Node, NodeExecution,
    NodeExecutionStatus, NodeKind, Rule, RuleMetadata, RuleResult, RuleStatus, RuleType,
    WorkflowPattern, WorkingMemoryEntry,
};
pub use rules::{ExpressionError, GateEngine, GateSettings};
pub use storage::{Database, FlowStore, SqliteFlowStore, StorageError, StorageResult};
