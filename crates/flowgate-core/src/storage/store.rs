//! The storage collaborator consumed by the gate engine, memory store and orchestrator.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{
    AuditEventType, AuditLogEntry, AuditQuery, EpisodicMemoryEntry, Execution, ExecutionStatus,
    Flow, GateEvaluation, NewNode, NewRule, Node, NodeExecution, NodeExecutionStatus, Rule,
    RuleType, WorkingMemoryEntry,
};
use crate::storage::error::StorageResult;

/// Record store for flows and their executions.
///
/// Implementations must serialize concurrent writes; a single key of working memory is
/// written as a unit.
pub trait FlowStore: Send + Sync {
    // Flows

    /// Creates a flow.
    fn create_flow(&self, name: &str, description: &str, metadata: &Value) -> StorageResult<Flow>;

    /// Fetches a flow.
    fn get_flow(&self, flow_id: &str) -> StorageResult<Flow>;

    /// Lists flows, newest first.
    fn list_flows(&self) -> StorageResult<Vec<Flow>>;

    // Nodes

    /// Appends a node. Position defaults to the number of existing siblings.
    fn create_node(&self, node: &NewNode) -> StorageResult<Node>;

    /// Fetches a node.
    fn get_node(&self, node_id: &str) -> StorageResult<Node>;

    /// Children of a node ordered by position, then creation order.
    fn get_children(&self, parent_id: &str) -> StorageResult<Vec<Node>>;

    /// Every node of a flow, parents before children.
    fn get_flow_nodes(&self, flow_id: &str) -> StorageResult<Vec<Node>>;

    /// Parentless nodes of a flow.
    fn get_root_nodes(&self, flow_id: &str) -> StorageResult<Vec<Node>>;

    /// Looks a node up by name within a flow.
    fn find_node_by_name(&self, flow_id: &str, name: &str) -> StorageResult<Option<Node>>;

    // Rules

    /// Attaches a rule.
    fn create_rule(&self, rule: &NewRule) -> StorageResult<Rule>;

    /// Fetches a rule.
    fn get_rule(&self, rule_id: &str) -> StorageResult<Rule>;

    /// Enabled rules scoped to `node_id`, highest priority first.
    fn get_rules_for_node(&self, node_id: &str) -> StorageResult<Vec<Rule>>;

    /// Enabled rules of a flow, optionally filtered by type, highest priority first.
    fn get_rules_for_flow(&self, flow_id: &str, rule_type: Option<RuleType>) -> StorageResult<Vec<Rule>>;

    // Executions

    /// Creates a pending execution.
    fn create_execution(&self, flow_id: &str, initial_context: &Value) -> StorageResult<Execution>;

    /// Fetches an execution.
    fn get_execution(&self, execution_id: &str) -> StorageResult<Execution>;

    /// Moves an execution to `status`, refusing to leave a terminal status.
    fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> StorageResult<Execution>;

    // Node executions

    /// Records the start of a node visit. The attempt count is derived from earlier visits.
    fn create_node_execution(
        &self,
        execution_id: &str,
        node_id: &str,
        input: &Value,
        status: NodeExecutionStatus,
    ) -> StorageResult<NodeExecution>;

    /// Records the end of a node visit.
    fn finish_node_execution(
        &self,
        node_execution_id: &str,
        status: NodeExecutionStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> StorageResult<()>;

    /// Node visits of an execution in start order.
    fn list_node_executions(&self, execution_id: &str) -> StorageResult<Vec<NodeExecution>>;

    // Gate evaluations

    /// Appends gate evaluation records in one transaction.
    fn append_gate_evaluations(&self, evaluations: &[GateEvaluation]) -> StorageResult<()>;

    /// Gate evaluations of an execution in append order.
    fn list_gate_evaluations(&self, execution_id: &str) -> StorageResult<Vec<GateEvaluation>>;

    // Working memory

    /// Writes a key, replacing any previous value.
    fn put_working_memory(
        &self,
        execution_id: &str,
        node_id: Option<&str>,
        key: &str,
        value: &Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Reads a live key.
    fn get_working_memory(&self, execution_id: &str, key: &str) -> StorageResult<Option<WorkingMemoryEntry>>;

    /// All live entries of an execution.
    fn list_working_memory(&self, execution_id: &str) -> StorageResult<Vec<WorkingMemoryEntry>>;

    /// Drops every entry of an execution.
    fn clear_working_memory(&self, execution_id: &str) -> StorageResult<usize>;

    // Episodic memory

    /// Appends an example.
    fn append_episodic_memory(
        &self,
        flow_id: &str,
        node_id: Option<&str>,
        goal_signature: &str,
        example: &Value,
        success: bool,
        metadata: &Value,
    ) -> StorageResult<EpisodicMemoryEntry>;

    /// Returns up to `limit` examples ranked by access count then recency, and bumps
    /// their access counters.
    fn retrieve_episodic_memory(
        &self,
        flow_id: &str,
        goal_signature: &str,
        limit: usize,
        success_only: bool,
    ) -> StorageResult<Vec<EpisodicMemoryEntry>>;

    // Audit log

    /// Appends an audit entry.
    fn append_audit(
        &self,
        execution_id: Option<&str>,
        node_id: Option<&str>,
        event_type: AuditEventType,
        event_data: &Value,
    ) -> StorageResult<AuditLogEntry>;

    /// Queries the audit log, newest first.
    fn get_audit_logs(&self, query: &AuditQuery) -> StorageResult<Vec<AuditLogEntry>>;
}
