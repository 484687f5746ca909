//! Execution entry points and the node dispatch state machine.
//!
//! Every node visit goes through [`FlowOrchestrator::execute_node`], which records a
//! node execution, dispatches on the node kind and records the outcome. Gates, agents and
//! control-flow patterns live in their own modules as further `impl` blocks.

use chrono::Utc;
use flowgate_abstraction::AgentInvoker;
use flowgate_core::{
    AuditEventType, AuditLogEntry, AuditQuery, AuditTrail, Execution, ExecutionStatus, Flow,
    FlowBuilder, FlowStore, FlowTree, FlowgateConfig, GateEngine, GateEvaluation, MemoryStore,
    Node, NodeExecution, NodeExecutionStatus, NodeKind, OrchestratorConfig, SqliteFlowStore,
    StorageError, load_flow_tree,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{OrchestrationError, Result};
use crate::outcome::NodeOutcome;

/// Everything recorded about one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    /// The execution record.
    pub execution: Execution,
    /// Node visits in start order.
    pub node_executions: Vec<NodeExecution>,
    /// Per-rule gate records in append order.
    pub gate_evaluations: Vec<GateEvaluation>,
    /// Audit entries, oldest first.
    pub audit_trail: Vec<AuditLogEntry>,
}

/// Per-execution state shared by every node visit of one run.
pub(crate) struct ExecutionRun {
    pub(crate) execution_id: String,
    pub(crate) flow_id: String,
    recycles: Mutex<HashMap<String, u32>>,
    replays: Mutex<HashMap<String, NodeOutcome>>,
}

impl ExecutionRun {
    fn new(execution_id: &str, flow_id: &str) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            flow_id: flow_id.to_string(),
            recycles: Mutex::new(HashMap::new()),
            replays: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one more recycle requested by `gate_id` and returns the new total.
    pub(crate) fn bump_recycle(&self, gate_id: &str) -> u32 {
        let mut recycles = self.recycles.lock().unwrap_or_else(PoisonError::into_inner);
        let count = recycles.entry(gate_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Marks the enclosing visit of `node_id` as superseded by a recycled re-run.
    pub(crate) fn supersede(&self, node_id: &str, outcome: NodeOutcome) {
        let mut replays = self.replays.lock().unwrap_or_else(PoisonError::into_inner);
        replays.insert(node_id.to_string(), outcome);
    }

    /// Outcome of the re-run that superseded the current visit of `node_id`, if any.
    fn take_replay(&self, node_id: &str) -> Option<NodeOutcome> {
        self.replays.lock().unwrap_or_else(PoisonError::into_inner).remove(node_id)
    }

    /// Whether some enclosing visit has been superseded and must not run further children.
    pub(crate) fn replay_pending(&self) -> bool {
        !self.replays.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

/// Result of running a list of children one after another.
pub(crate) enum ChildRun {
    /// Every child completed; their outputs in order.
    Finished(Vec<Value>),
    /// A child blocked; later children did not run.
    Stopped(NodeOutcome),
}

/// Walks flow trees, invoking agents and applying gate decisions.
pub struct FlowOrchestrator {
    pub(crate) store: Arc<dyn FlowStore>,
    pub(crate) invoker: Arc<dyn AgentInvoker>,
    pub(crate) engine: GateEngine,
    pub(crate) memory: MemoryStore,
    pub(crate) config: OrchestratorConfig,
}

impl FlowOrchestrator {
    /// Creates an orchestrator with default gate and orchestrator settings.
    pub fn new(store: Arc<dyn FlowStore>, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self::with_config(store, invoker, &FlowgateConfig::default())
    }

    /// Creates an orchestrator over an existing store using `config`.
    pub fn with_config(
        store: Arc<dyn FlowStore>,
        invoker: Arc<dyn AgentInvoker>,
        config: &FlowgateConfig,
    ) -> Self {
        Self {
            memory: MemoryStore::new(Arc::clone(&store)),
            engine: GateEngine::new(config.gates.clone()),
            config: config.orchestrator.clone(),
            store,
            invoker,
        }
    }

    /// Opens the configured SQLite store and builds an orchestrator over it.
    ///
    /// # Errors
    /// * `OrchestrationError::Storage` - If the database cannot be opened
    pub fn from_config(config: &FlowgateConfig, invoker: Arc<dyn AgentInvoker>) -> Result<Self> {
        let store = SqliteFlowStore::from_config(&config.storage)?;
        Ok(Self::with_config(Arc::new(store), invoker, config))
    }

    /// A flow builder writing to the same store.
    pub fn builder(&self) -> FlowBuilder {
        FlowBuilder::new(Arc::clone(&self.store))
    }

    /// Working and episodic memory of this orchestrator's store.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Runs a flow from its root and returns the new execution's id.
    ///
    /// Failures inside the tree, gate rejections included, finish the execution as
    /// `failed` and still return its id. Only a missing flow, a flow without exactly one
    /// root, or a storage failure is returned as an error.
    ///
    /// # Errors
    /// * `OrchestrationError::FlowNotFound` - If the flow does not exist
    /// * `OrchestrationError::MissingRoot` / `MultipleRoots` - If the flow has no single root
    /// * `OrchestrationError::Storage` - If execution records cannot be written
    #[instrument(skip(self, initial_context))]
    pub async fn execute_flow(&self, flow_id: &str, initial_context: Value) -> Result<String> {
        let flow = match self.store.get_flow(flow_id) {
            Ok(flow) => flow,
            Err(StorageError::NotFound(_)) => return Err(OrchestrationError::FlowNotFound(flow_id.to_string())),
            Err(e) => return Err(e.into()),
        };
        let root = self.single_root(&flow)?;

        let execution = self.store.create_execution(&flow.id, &initial_context)?;
        self.store.update_execution_status(&execution.id, ExecutionStatus::InProgress, None, None)?;
        self.seed_working_memory(&execution.id, &initial_context)?;
        self.store.append_audit(
            Some(&execution.id),
            None,
            AuditEventType::ExecutionStarted,
            &json!({ "flow_id": flow.id, "flow_name": flow.name, "initial_context": initial_context }),
        )?;
        info!(execution_id = %execution.id, flow = %flow.name, "Execution started");

        let run = ExecutionRun::new(&execution.id, &flow.id);
        let outcome = self.execute_node(&run, &root, initial_context).await;

        let working_memory = Value::Object(self.memory.snapshot(&execution.id)?);
        let duration_ms = (Utc::now() - execution.started_at).num_milliseconds();

        match outcome {
            Ok(outcome) => {
                let result = outcome.to_value();
                self.store.update_execution_status(&execution.id, ExecutionStatus::Completed, Some(&result), None)?;
                self.store.append_audit(
                    Some(&execution.id),
                    None,
                    AuditEventType::ExecutionCompleted,
                    &json!({
                        "status": outcome.status_str(),
                        "result": result,
                        "working_memory": working_memory,
                        "duration_ms": duration_ms,
                    }),
                )?;
                info!(
                    execution_id = %execution.id,
                    outcome = outcome.status_str(),
                    duration_ms,
                    "Execution completed"
                );
            }
            Err(err) => {
                let message = err.to_string();
                self.store.update_execution_status(&execution.id, ExecutionStatus::Failed, None, Some(&message))?;
                self.store.append_audit(
                    Some(&execution.id),
                    None,
                    AuditEventType::ExecutionFailed,
                    &json!({
                        "error": message,
                        "working_memory": working_memory,
                        "duration_ms": duration_ms,
                    }),
                )?;
                error!(execution_id = %execution.id, error = %message, "Execution failed");
            }
        }

        let cleared = self.memory.clear(&execution.id)?;
        debug!(execution_id = %execution.id, cleared, "Working memory cleared");
        Ok(execution.id)
    }

    /// Execution record, node visits, gate records and the audit trail of an execution.
    ///
    /// # Errors
    /// * `OrchestrationError::Storage` - If the execution does not exist or cannot be read
    pub fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionStatusReport> {
        Ok(ExecutionStatusReport {
            execution: self.store.get_execution(execution_id)?,
            node_executions: self.store.list_node_executions(execution_id)?,
            gate_evaluations: self.store.list_gate_evaluations(execution_id)?,
            audit_trail: self.chronological_logs(execution_id)?,
        })
    }

    /// Audit trail of an execution, oldest first, with statistics.
    ///
    /// # Errors
    /// * `OrchestrationError::Storage` - If the log cannot be read
    pub fn get_execution_audit_trail(&self, execution_id: &str) -> Result<AuditTrail> {
        Ok(AuditTrail::from_logs(execution_id, self.chronological_logs(execution_id)?))
    }

    /// Every flow, newest first.
    pub fn list_flows(&self) -> Result<Vec<Flow>> {
        Ok(self.store.list_flows()?)
    }

    /// The node tree and rules of a flow.
    pub fn get_flow_tree(&self, flow_id: &str) -> Result<FlowTree> {
        Ok(load_flow_tree(&*self.store, flow_id)?)
    }

    // =========================================================================
    // Node dispatch
    // =========================================================================

    /// Visits `node` with `input`, recording the visit around the kind-specific handler.
    ///
    /// Errors mark this visit failed and are returned to the caller unchanged.
    pub(crate) fn execute_node<'a>(
        &'a self,
        run: &'a ExecutionRun,
        node: &'a Node,
        input: Value,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let record = self.store.create_node_execution(
                &run.execution_id,
                &node.id,
                &input,
                NodeExecutionStatus::InProgress,
            )?;
            self.store.append_audit(
                Some(&run.execution_id),
                Some(&node.id),
                AuditEventType::NodeStarted,
                &json!({
                    "node_name": node.name,
                    "node_type": node.kind.as_str(),
                    "attempt": record.attempt_count,
                }),
            )?;
            debug!(
                execution_id = %run.execution_id,
                node_id = %node.id,
                node = %node.name,
                kind = node.kind.as_str(),
                attempt = record.attempt_count,
                "Node started"
            );

            let dispatched = self
                .dispatch(run, node, input)
                .await
                .map(|outcome| run.take_replay(&node.id).unwrap_or(outcome));
            match dispatched {
                Ok(outcome) => {
                    self.store.finish_node_execution(
                        &record.id,
                        NodeExecutionStatus::Completed,
                        Some(&outcome.to_value()),
                        None,
                    )?;
                    self.store.append_audit(
                        Some(&run.execution_id),
                        Some(&node.id),
                        AuditEventType::NodeCompleted,
                        &json!({ "node_name": node.name, "status": outcome.status_str() }),
                    )?;
                    debug!(node_id = %node.id, outcome = outcome.status_str(), "Node completed");
                    Ok(outcome)
                }
                Err(err) => {
                    let message = err.to_string();
                    error!(
                        execution_id = %run.execution_id,
                        node_id = %node.id,
                        node = %node.name,
                        error = %message,
                        "Node failed"
                    );
                    if let Err(record_err) = self.record_failure(run, node, &record.id, &message) {
                        warn!(node_id = %node.id, error = %record_err, "Could not record node failure");
                    }
                    Err(err)
                }
            }
        })
    }

    async fn dispatch(&self, run: &ExecutionRun, node: &Node, input: Value) -> Result<NodeOutcome> {
        match node.kind {
            NodeKind::Root => self.execute_root(run, node, input).await,
            NodeKind::Agent => self.execute_agent(run, node, input).await,
            NodeKind::Gate => self.execute_gate(run, node, input).await,
            NodeKind::ControlFlow => self.execute_control_flow(run, node, input).await,
        }
    }

    async fn execute_root(&self, run: &ExecutionRun, node: &Node, input: Value) -> Result<NodeOutcome> {
        let children = self.store.get_children(&node.id)?;
        let Some(first) = children.first() else {
            info!(execution_id = %run.execution_id, "Root has no children");
            return Ok(NodeOutcome::NoOp);
        };
        if children.len() > 1 {
            warn!(
                execution_id = %run.execution_id,
                root = %node.name,
                children = children.len(),
                "Root has several children; only the first runs"
            );
        }
        self.execute_node(run, first, input).await
    }

    /// Runs `children` in order, each with its own copy of `input`.
    pub(crate) async fn run_children(&self, run: &ExecutionRun, children: &[Node], input: &Value) -> Result<ChildRun> {
        let mut outputs = Vec::with_capacity(children.len());
        for child in children {
            match self.execute_node(run, child, input.clone()).await? {
                NodeOutcome::Completed { output } => outputs.push(output),
                NodeOutcome::NoOp => outputs.push(Value::Null),
                blocked @ NodeOutcome::Blocked { .. } => return Ok(ChildRun::Stopped(blocked)),
            }
            if run.replay_pending() {
                break;
            }
        }
        Ok(ChildRun::Finished(outputs))
    }

    /// `input` as a map with live working memory merged over it.
    pub(crate) fn rule_context(&self, run: &ExecutionRun, input: &Value) -> Result<Value> {
        let mut context = match input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };
        context.extend(self.memory.snapshot(&run.execution_id)?);
        Ok(Value::Object(context))
    }

    /// Maps a node config deserialization failure.
    pub(crate) fn invalid_config(node: &Node, err: &serde_json::Error) -> OrchestrationError {
        OrchestrationError::InvalidNodeConfig { node: node.name.clone(), reason: err.to_string() }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn single_root(&self, flow: &Flow) -> Result<Node> {
        let mut roots = self.store.get_root_nodes(&flow.id)?;
        match roots.len() {
            0 => Err(OrchestrationError::MissingRoot(flow.id.clone())),
            1 => {
                let root = roots.remove(0);
                if root.kind == NodeKind::Root {
                    Ok(root)
                } else {
                    Err(OrchestrationError::Structural(format!(
                        "Parentless node '{}' of flow '{}' is not a root",
                        root.name, flow.name
                    )))
                }
            }
            _ => Err(OrchestrationError::MultipleRoots(flow.id.clone())),
        }
    }

    fn seed_working_memory(&self, execution_id: &str, initial_context: &Value) -> Result<()> {
        if let Value::Object(map) = initial_context {
            for (key, value) in map {
                self.memory.put(execution_id, None, key, value)?;
            }
        }
        Ok(())
    }

    fn record_failure(&self, run: &ExecutionRun, node: &Node, record_id: &str, message: &str) -> Result<()> {
        self.store.finish_node_execution(record_id, NodeExecutionStatus::Failed, None, Some(message))?;
        self.store.append_audit(
            Some(&run.execution_id),
            Some(&node.id),
            AuditEventType::NodeFailed,
            &json!({ "node_name": node.name, "node_type": node.kind.as_str(), "error": message }),
        )?;
        Ok(())
    }

    fn chronological_logs(&self, execution_id: &str) -> Result<Vec<AuditLogEntry>> {
        let query = AuditQuery::for_execution(execution_id).with_limit(usize::MAX);
        let mut logs = self.store.get_audit_logs(&query)?;
        logs.reverse();
        Ok(logs)
    }
}
