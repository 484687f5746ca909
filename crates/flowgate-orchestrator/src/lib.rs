//! Flow orchestrator for Flowgate.
//!
//! Walks a flow's node tree from its root: agent nodes call the configured
//! [`AgentInvoker`], gate nodes apply the gate decision engine, and control-flow nodes run
//! their children with one of the five workflow patterns. Every visit is recorded as a
//! node execution and in the audit log.
//!
//! # Example
//!
//! ```rust,no_run
//! use flowgate_core::{NewNode, NodeKind, SqliteFlowStore};
//! use flowgate_orchestrator::{FlowOrchestrator, ScriptedInvoker};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteFlowStore::open_in_memory()?);
//! let orchestrator = FlowOrchestrator::new(store, Arc::new(ScriptedInvoker::new()));
//!
//! let builder = orchestrator.builder();
//! let flow = builder.create_flow("summaries", "", &json!({}))?;
//! let root = builder.add_node(NewNode::new(&flow.id, NodeKind::Root, "start"))?;
//! builder.add_node(
//!     NewNode::new(&flow.id, NodeKind::Agent, "writer")
//!         .with_parent(&root.id)
//!         .with_config(json!({"goal": "Summarize the document"})),
//! )?;
//!
//! let execution_id = orchestrator.execute_flow(&flow.id, json!({"document": "..."})).await?;
//! let report = orchestrator.get_execution_status(&execution_id)?;
//! println!("{:?}", report.execution.status);
//! # Ok(())
//! # }
//! ```

mod agent;
pub mod error;
mod gate;
pub mod orchestrator;
pub mod outcome;
mod patterns;

pub use error::{OrchestrationError, Result};
pub use flowgate_abstraction::{AgentInvoker, InvocationError, ScriptedInvoker};
pub use orchestrator::{ExecutionStatusReport, FlowOrchestrator};
pub use outcome::NodeOutcome;
