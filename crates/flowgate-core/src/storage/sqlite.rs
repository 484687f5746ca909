//! SQLite implementation of [`FlowStore`].

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::models::{
    AuditEventType, AuditLogEntry, AuditQuery, EpisodicMemoryEntry, Execution, ExecutionStatus,
    Flow, GateEvaluation, NewNode, NewRule, Node, NodeExecution, NodeExecutionStatus, Rule,
    RuleMetadata, RuleType, WorkingMemoryEntry,
};
use crate::storage::database::Database;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::FlowStore;

// ============================================================================
// Row Parsing Helpers
// ============================================================================

fn column_error(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), rusqlite::types::Type::Text)
}

fn parse_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: String = row.get(idx)?;
    serde_json::from_str(&json_str).map_err(|_| column_error(idx, column_name))
}

fn parse_optional_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: Option<String> = row.get(idx)?;
    json_str
        .map(|s| serde_json::from_str(&s).map_err(|_| column_error(idx, column_name)))
        .transpose()
}

fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let timestamp_str: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| column_error(idx, column_name))
}

fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let timestamp_str: Option<String> = row.get(idx)?;
    timestamp_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| column_error(idx, column_name))
        })
        .transpose()
}

fn parse_enum<T: FromStr>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|_| column_error(idx, column_name))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(table: &str, id: &str) -> StorageError {
    StorageError::NotFound(format!("{} with id {} not found", table, id))
}

const FLOW_COLUMNS: &str = "id, name, description, metadata, created_at";

fn flow_from_row(row: &Row) -> rusqlite::Result<Flow> {
    Ok(Flow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        metadata: parse_json_field(row, 3, "metadata")?,
        created_at: parse_timestamp(row, 4, "created_at")?,
    })
}

const NODE_COLUMNS: &str =
    "id, flow_id, parent_id, node_type, name, description, position, config, created_at";

fn node_from_row(row: &Row) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        parent_id: row.get(2)?,
        kind: parse_enum(row, 3, "node_type")?,
        name: row.get(4)?,
        description: row.get(5)?,
        position: row.get(6)?,
        config: parse_json_field(row, 7, "config")?,
        created_at: parse_timestamp(row, 8, "created_at")?,
    })
}

const RULE_COLUMNS: &str = "id, flow_id, gate_node_id, name, description, rule_type, condition, action, priority, metadata, enabled, created_at";

fn rule_from_row(row: &Row) -> rusqlite::Result<Rule> {
    let metadata: RuleMetadata = parse_json_field(row, 9, "metadata")?;
    Ok(Rule {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        gate_node_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        rule_type: parse_enum(row, 5, "rule_type")?,
        condition: parse_json_field(row, 6, "condition")?,
        action: parse_optional_json_field(row, 7, "action")?,
        priority: row.get(8)?,
        metadata,
        enabled: row.get(10)?,
        created_at: parse_timestamp(row, 11, "created_at")?,
    })
}

const EXECUTION_COLUMNS: &str =
    "id, flow_id, status, initial_context, result, started_at, completed_at, error";

fn execution_from_row(row: &Row) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        status: parse_enum(row, 2, "status")?,
        initial_context: parse_json_field(row, 3, "initial_context")?,
        result: parse_optional_json_field(row, 4, "result")?,
        started_at: parse_timestamp(row, 5, "started_at")?,
        completed_at: parse_optional_timestamp(row, 6, "completed_at")?,
        error: row.get(7)?,
    })
}

const NODE_EXECUTION_COLUMNS: &str =
    "id, execution_id, node_id, status, input, output, error, attempt_count, started_at, completed_at";

fn node_execution_from_row(row: &Row) -> rusqlite::Result<NodeExecution> {
    Ok(NodeExecution {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        node_id: row.get(2)?,
        status: parse_enum(row, 3, "status")?,
        input: parse_json_field(row, 4, "input")?,
        output: parse_optional_json_field(row, 5, "output")?,
        error: row.get(6)?,
        attempt_count: row.get(7)?,
        started_at: parse_timestamp(row, 8, "started_at")?,
        completed_at: parse_optional_timestamp(row, 9, "completed_at")?,
    })
}

const GATE_EVALUATION_COLUMNS: &str = "id, execution_id, gate_node_id, rule_id, status, decision, score, reason, context_snapshot, evaluated_at";

fn gate_evaluation_from_row(row: &Row) -> rusqlite::Result<GateEvaluation> {
    Ok(GateEvaluation {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        gate_node_id: row.get(2)?,
        rule_id: row.get(3)?,
        status: parse_enum(row, 4, "status")?,
        decision: parse_enum(row, 5, "decision")?,
        score: row.get(6)?,
        reason: row.get(7)?,
        context_snapshot: parse_json_field(row, 8, "context_snapshot")?,
        evaluated_at: parse_timestamp(row, 9, "evaluated_at")?,
    })
}

const WORKING_MEMORY_COLUMNS: &str = "execution_id, node_id, key, value, created_at, expires_at";

fn working_memory_from_row(row: &Row) -> rusqlite::Result<WorkingMemoryEntry> {
    Ok(WorkingMemoryEntry {
        execution_id: row.get(0)?,
        node_id: row.get(1)?,
        key: row.get(2)?,
        value: parse_json_field(row, 3, "value")?,
        created_at: parse_timestamp(row, 4, "created_at")?,
        expires_at: parse_optional_timestamp(row, 5, "expires_at")?,
    })
}

const EPISODIC_COLUMNS: &str = "id, flow_id, node_id, goal_signature, example, success, access_count, created_at, last_accessed, metadata";

fn episodic_from_row(row: &Row) -> rusqlite::Result<EpisodicMemoryEntry> {
    Ok(EpisodicMemoryEntry {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        node_id: row.get(2)?,
        goal_signature: row.get(3)?,
        example: parse_json_field(row, 4, "example")?,
        success: row.get(5)?,
        access_count: row.get(6)?,
        created_at: parse_timestamp(row, 7, "created_at")?,
        last_accessed: parse_optional_timestamp(row, 8, "last_accessed")?,
        metadata: parse_json_field(row, 9, "metadata")?,
    })
}

const AUDIT_COLUMNS: &str = "id, execution_id, node_id, event_type, event_data, timestamp";

fn audit_from_row(row: &Row) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        node_id: row.get(2)?,
        event_type: parse_enum(row, 3, "event_type")?,
        event_data: parse_json_field(row, 4, "event_data")?,
        timestamp: parse_timestamp(row, 5, "timestamp")?,
    })
}

// ============================================================================
// SQLite Flow Store
// ============================================================================

/// [`FlowStore`] over a shared SQLite connection.
///
/// All operations take the connection mutex for their duration, which serializes writes
/// across executions.
#[derive(Clone)]
pub struct SqliteFlowStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteFlowStore {
    /// Wraps an opened database.
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(Mutex::new(db)) }
    }

    /// Shares an already wrapped database.
    pub fn from_shared(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Opens a database file.
    pub fn open(path: &str) -> StorageResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Opens the configured file, or an in-memory database when no path is set.
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        match &config.path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn db(&self) -> StorageResult<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn query_nodes(&self, sql: &str, arg: &str) -> StorageResult<Vec<Node>> {
        let db = self.db()?;
        let mut stmt = db.conn().prepare(sql)?;
        let nodes = stmt
            .query_map(params![arg], node_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    fn query_rules(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> StorageResult<Vec<Rule>> {
        let db = self.db()?;
        let mut stmt = db.conn().prepare(sql)?;
        let rules =
            stmt.query_map(args, rule_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

impl FlowStore for SqliteFlowStore {
    fn create_flow(&self, name: &str, description: &str, metadata: &Value) -> StorageResult<Flow> {
        let flow = Flow {
            id: new_id(),
            name: name.to_string(),
            description: description.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        };
        self.db()?.conn().execute(
            "INSERT INTO flows (id, name, description, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![flow.id, flow.name, flow.description, serde_json::to_string(&flow.metadata)?, timestamp(flow.created_at)],
        )?;
        info!(flow_id = %flow.id, name = %flow.name, "Created flow");
        Ok(flow)
    }

    fn get_flow(&self, flow_id: &str) -> StorageResult<Flow> {
        let db = self.db()?;
        db.conn()
            .query_row(&format!("SELECT {} FROM flows WHERE id = ?1", FLOW_COLUMNS), params![flow_id], flow_from_row)
            .optional()?
            .ok_or_else(|| not_found("flow", flow_id))
    }

    fn list_flows(&self) -> StorageResult<Vec<Flow>> {
        let db = self.db()?;
        let mut stmt = db
            .conn()
            .prepare(&format!("SELECT {} FROM flows ORDER BY created_at DESC, rowid DESC", FLOW_COLUMNS))?;
        let flows = stmt.query_map([], flow_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(flows)
    }

    fn create_node(&self, node: &NewNode) -> StorageResult<Node> {
        let db = self.db()?;
        let conn = db.conn();

        let position = match node.position {
            Some(position) => position,
            None => match &node.parent_id {
                Some(parent_id) => conn.query_row(
                    "SELECT COUNT(*) FROM nodes WHERE parent_id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )?,
                None => 0,
            },
        };

        let created = Node {
            id: new_id(),
            flow_id: node.flow_id.clone(),
            parent_id: node.parent_id.clone(),
            kind: node.kind,
            name: node.name.clone(),
            description: node.description.clone(),
            position,
            config: node.config.clone(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO nodes (id, flow_id, parent_id, node_type, name, description, position, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                created.id,
                created.flow_id,
                created.parent_id,
                created.kind.as_str(),
                created.name,
                created.description,
                created.position,
                serde_json::to_string(&created.config)?,
                timestamp(created.created_at)
            ],
        )?;
        debug!(node_id = %created.id, flow_id = %created.flow_id, kind = %created.kind, "Created node");
        Ok(created)
    }

    fn get_node(&self, node_id: &str) -> StorageResult<Node> {
        let db = self.db()?;
        db.conn()
            .query_row(&format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS), params![node_id], node_from_row)
            .optional()?
            .ok_or_else(|| not_found("node", node_id))
    }

    fn get_children(&self, parent_id: &str) -> StorageResult<Vec<Node>> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM nodes WHERE parent_id = ?1 ORDER BY position, created_at, rowid",
                NODE_COLUMNS
            ),
            parent_id,
        )
    }

    fn get_flow_nodes(&self, flow_id: &str) -> StorageResult<Vec<Node>> {
        // rowid order is insertion order, and a parent always exists before its children
        self.query_nodes(&format!("SELECT {} FROM nodes WHERE flow_id = ?1 ORDER BY rowid", NODE_COLUMNS), flow_id)
    }

    fn get_root_nodes(&self, flow_id: &str) -> StorageResult<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {} FROM nodes WHERE flow_id = ?1 AND parent_id IS NULL ORDER BY rowid", NODE_COLUMNS),
            flow_id,
        )
    }

    fn find_node_by_name(&self, flow_id: &str, name: &str) -> StorageResult<Option<Node>> {
        let db = self.db()?;
        let node = db
            .conn()
            .query_row(
                &format!("SELECT {} FROM nodes WHERE flow_id = ?1 AND name = ?2 ORDER BY rowid LIMIT 1", NODE_COLUMNS),
                params![flow_id, name],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    fn create_rule(&self, rule: &NewRule) -> StorageResult<Rule> {
        let created = Rule {
            id: new_id(),
            flow_id: rule.flow_id.clone(),
            gate_node_id: rule.gate_node_id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            rule_type: rule.rule_type,
            condition: rule.condition.clone(),
            action: rule.action.clone(),
            priority: rule.priority,
            metadata: rule.metadata.clone(),
            enabled: rule.enabled,
            created_at: Utc::now(),
        };
        let action = created.action.as_ref().map(serde_json::to_string).transpose()?;

        self.db()?.conn().execute(
            "INSERT INTO business_rules (id, flow_id, gate_node_id, name, description, rule_type, condition, action, priority, metadata, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                created.id,
                created.flow_id,
                created.gate_node_id,
                created.name,
                created.description,
                created.rule_type.as_str(),
                serde_json::to_string(&created.condition)?,
                action,
                created.priority,
                serde_json::to_string(&created.metadata)?,
                created.enabled,
                timestamp(created.created_at)
            ],
        )?;
        debug!(rule_id = %created.id, rule_type = %created.rule_type, "Created rule");
        Ok(created)
    }

    fn get_rule(&self, rule_id: &str) -> StorageResult<Rule> {
        let db = self.db()?;
        db.conn()
            .query_row(
                &format!("SELECT {} FROM business_rules WHERE id = ?1", RULE_COLUMNS),
                params![rule_id],
                rule_from_row,
            )
            .optional()?
            .ok_or_else(|| not_found("rule", rule_id))
    }

    fn get_rules_for_node(&self, node_id: &str) -> StorageResult<Vec<Rule>> {
        self.query_rules(
            &format!(
                "SELECT {} FROM business_rules WHERE gate_node_id = ?1 AND enabled = 1 ORDER BY priority DESC, rowid",
                RULE_COLUMNS
            ),
            &[&node_id],
        )
    }

    fn get_rules_for_flow(&self, flow_id: &str, rule_type: Option<RuleType>) -> StorageResult<Vec<Rule>> {
        match rule_type {
            Some(rule_type) => self.query_rules(
                &format!(
                    "SELECT {} FROM business_rules WHERE flow_id = ?1 AND rule_type = ?2 AND enabled = 1 ORDER BY priority DESC, rowid",
                    RULE_COLUMNS
                ),
                &[&flow_id, &rule_type.as_str()],
            ),
            None => self.query_rules(
                &format!(
                    "SELECT {} FROM business_rules WHERE flow_id = ?1 AND enabled = 1 ORDER BY priority DESC, rowid",
                    RULE_COLUMNS
                ),
                &[&flow_id],
            ),
        }
    }

    fn create_execution(&self, flow_id: &str, initial_context: &Value) -> StorageResult<Execution> {
        let execution = Execution {
            id: new_id(),
            flow_id: flow_id.to_string(),
            status: ExecutionStatus::Pending,
            initial_context: initial_context.clone(),
            result: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        self.db()?.conn().execute(
            "INSERT INTO executions (id, flow_id, status, initial_context, started_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution.id,
                execution.flow_id,
                execution.status.as_str(),
                serde_json::to_string(&execution.initial_context)?,
                timestamp(execution.started_at)
            ],
        )?;
        info!(execution_id = %execution.id, flow_id = %flow_id, "Created execution");
        Ok(execution)
    }

    fn get_execution(&self, execution_id: &str) -> StorageResult<Execution> {
        let db = self.db()?;
        db.conn()
            .query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                params![execution_id],
                execution_from_row,
            )
            .optional()?
            .ok_or_else(|| not_found("execution", execution_id))
    }

    fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> StorageResult<Execution> {
        let result_json = result.map(serde_json::to_string).transpose()?;
        let mut db = self.db()?;

        db.transaction(|tx| {
            let current = tx
                .query_row(
                    &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                    params![execution_id],
                    execution_from_row,
                )
                .optional()?
                .ok_or_else(|| not_found("execution", execution_id))?;

            if !current.status.can_transition_to(status) {
                return Err(StorageError::InvalidTransition {
                    execution_id: execution_id.to_string(),
                    from: current.status.to_string(),
                    to: status.to_string(),
                });
            }

            let completed_at = status.is_terminal().then(|| timestamp(Utc::now()));
            tx.execute(
                "UPDATE executions SET status = ?2, result = COALESCE(?3, result), error = COALESCE(?4, error),
                 completed_at = COALESCE(?5, completed_at) WHERE id = ?1",
                params![execution_id, status.as_str(), result_json, error, completed_at],
            )?;

            let updated = tx.query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                params![execution_id],
                execution_from_row,
            )?;
            debug!(execution_id = %execution_id, from = %current.status, to = %status, "Execution status changed");
            Ok(updated)
        })
    }

    fn create_node_execution(
        &self,
        execution_id: &str,
        node_id: &str,
        input: &Value,
        status: NodeExecutionStatus,
    ) -> StorageResult<NodeExecution> {
        let db = self.db()?;
        let conn = db.conn();

        let previous: u32 = conn.query_row(
            "SELECT COUNT(*) FROM node_executions WHERE execution_id = ?1 AND node_id = ?2 AND status != 'skipped'",
            params![execution_id, node_id],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        let record = NodeExecution {
            id: new_id(),
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status,
            input: input.clone(),
            output: None,
            error: None,
            attempt_count: previous + 1,
            started_at: now,
            completed_at: (status == NodeExecutionStatus::Skipped).then_some(now),
        };

        conn.execute(
            "INSERT INTO node_executions (id, execution_id, node_id, status, input, attempt_count, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.execution_id,
                record.node_id,
                record.status.as_str(),
                serde_json::to_string(&record.input)?,
                record.attempt_count,
                timestamp(record.started_at),
                record.completed_at.map(timestamp)
            ],
        )?;
        Ok(record)
    }

    fn finish_node_execution(
        &self,
        node_execution_id: &str,
        status: NodeExecutionStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let output_json = output.map(serde_json::to_string).transpose()?;
        let rows_affected = self.db()?.conn().execute(
            "UPDATE node_executions SET status = ?2, output = ?3, error = ?4, completed_at = ?5 WHERE id = ?1",
            params![node_execution_id, status.as_str(), output_json, error, timestamp(Utc::now())],
        )?;
        if rows_affected == 0 {
            return Err(not_found("node execution", node_execution_id));
        }
        Ok(())
    }

    fn list_node_executions(&self, execution_id: &str) -> StorageResult<Vec<NodeExecution>> {
        let db = self.db()?;
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {} FROM node_executions WHERE execution_id = ?1 ORDER BY started_at, rowid",
            NODE_EXECUTION_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![execution_id], node_execution_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn append_gate_evaluations(&self, evaluations: &[GateEvaluation]) -> StorageResult<()> {
        let mut db = self.db()?;
        db.transaction(|tx| {
            for evaluation in evaluations {
                tx.execute(
                    "INSERT INTO gate_evaluations (id, execution_id, gate_node_id, rule_id, status, decision, score, reason, context_snapshot, evaluated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        evaluation.id,
                        evaluation.execution_id,
                        evaluation.gate_node_id,
                        evaluation.rule_id,
                        evaluation.status.as_str(),
                        evaluation.decision.as_str(),
                        evaluation.score,
                        evaluation.reason,
                        serde_json::to_string(&evaluation.context_snapshot)?,
                        timestamp(evaluation.evaluated_at)
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn list_gate_evaluations(&self, execution_id: &str) -> StorageResult<Vec<GateEvaluation>> {
        let db = self.db()?;
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {} FROM gate_evaluations WHERE execution_id = ?1 ORDER BY rowid",
            GATE_EVALUATION_COLUMNS
        ))?;
        let evaluations = stmt
            .query_map(params![execution_id], gate_evaluation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(evaluations)
    }

    fn put_working_memory(
        &self,
        execution_id: &str,
        node_id: Option<&str>,
        key: &str,
        value: &Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        self.db()?.conn().execute(
            "INSERT INTO working_memory (execution_id, node_id, key, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(execution_id, key) DO UPDATE SET
                node_id = excluded.node_id,
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![
                execution_id,
                node_id,
                key,
                serde_json::to_string(value)?,
                timestamp(Utc::now()),
                expires_at.map(timestamp)
            ],
        )?;
        debug!(execution_id = %execution_id, key = %key, "Stored working memory");
        Ok(())
    }

    fn get_working_memory(&self, execution_id: &str, key: &str) -> StorageResult<Option<WorkingMemoryEntry>> {
        let db = self.db()?;
        let entry = db
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM working_memory WHERE execution_id = ?1 AND key = ?2
                     AND (expires_at IS NULL OR expires_at > ?3)",
                    WORKING_MEMORY_COLUMNS
                ),
                params![execution_id, key, timestamp(Utc::now())],
                working_memory_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn list_working_memory(&self, execution_id: &str) -> StorageResult<Vec<WorkingMemoryEntry>> {
        let db = self.db()?;
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {} FROM working_memory WHERE execution_id = ?1
             AND (expires_at IS NULL OR expires_at > ?2) ORDER BY created_at, key",
            WORKING_MEMORY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![execution_id, timestamp(Utc::now())], working_memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn clear_working_memory(&self, execution_id: &str) -> StorageResult<usize> {
        let removed = self
            .db()?
            .conn()
            .execute("DELETE FROM working_memory WHERE execution_id = ?1", params![execution_id])?;
        debug!(execution_id = %execution_id, removed, "Cleared working memory");
        Ok(removed)
    }

    fn append_episodic_memory(
        &self,
        flow_id: &str,
        node_id: Option<&str>,
        goal_signature: &str,
        example: &Value,
        success: bool,
        metadata: &Value,
    ) -> StorageResult<EpisodicMemoryEntry> {
        let entry = EpisodicMemoryEntry {
            id: new_id(),
            flow_id: flow_id.to_string(),
            node_id: node_id.map(str::to_string),
            goal_signature: goal_signature.to_string(),
            example: example.clone(),
            success,
            access_count: 0,
            created_at: Utc::now(),
            last_accessed: None,
            metadata: metadata.clone(),
        };
        self.db()?.conn().execute(
            "INSERT INTO episodic_memory (id, flow_id, node_id, goal_signature, example, success, access_count, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
            params![
                entry.id,
                entry.flow_id,
                entry.node_id,
                entry.goal_signature,
                serde_json::to_string(&entry.example)?,
                entry.success,
                timestamp(entry.created_at),
                serde_json::to_string(&entry.metadata)?
            ],
        )?;
        debug!(memory_id = %entry.id, goal_signature = %goal_signature, "Stored episodic memory");
        Ok(entry)
    }

    fn retrieve_episodic_memory(
        &self,
        flow_id: &str,
        goal_signature: &str,
        limit: usize,
        success_only: bool,
    ) -> StorageResult<Vec<EpisodicMemoryEntry>> {
        let mut db = self.db()?;
        db.transaction(|tx| {
            let sql = format!(
                "SELECT {} FROM episodic_memory WHERE flow_id = ?1 AND goal_signature = ?2 {}
                 ORDER BY access_count DESC, created_at DESC, rowid DESC LIMIT ?3",
                EPISODIC_COLUMNS,
                if success_only { "AND success = 1" } else { "" }
            );
            let mut entries = {
                let mut stmt = tx.prepare(&sql)?;
                stmt.query_map(params![flow_id, goal_signature, i64::try_from(limit).unwrap_or(i64::MAX)], episodic_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let now = Utc::now();
            for entry in &mut entries {
                tx.execute(
                    "UPDATE episodic_memory SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
                    params![entry.id, timestamp(now)],
                )?;
                entry.access_count += 1;
                entry.last_accessed = Some(now);
            }
            Ok(entries)
        })
    }

    fn append_audit(
        &self,
        execution_id: Option<&str>,
        node_id: Option<&str>,
        event_type: AuditEventType,
        event_data: &Value,
    ) -> StorageResult<AuditLogEntry> {
        let entry = AuditLogEntry {
            id: new_id(),
            execution_id: execution_id.map(str::to_string),
            node_id: node_id.map(str::to_string),
            event_type,
            event_data: event_data.clone(),
            timestamp: Utc::now(),
        };
        self.db()?.conn().execute(
            "INSERT INTO audit_log (id, execution_id, node_id, event_type, event_data, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.execution_id,
                entry.node_id,
                entry.event_type.as_str(),
                serde_json::to_string(&entry.event_data)?,
                timestamp(entry.timestamp)
            ],
        )?;
        Ok(entry)
    }

    fn get_audit_logs(&self, query: &AuditQuery) -> StorageResult<Vec<AuditLogEntry>> {
        let mut sql = format!("SELECT {} FROM audit_log WHERE 1=1", AUDIT_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if let Some(execution_id) = &query.execution_id {
            args.push(execution_id.clone());
            sql.push_str(&format!(" AND execution_id = ?{}", args.len()));
        }
        if let Some(event_type) = query.event_type {
            args.push(event_type.as_str().to_string());
            sql.push_str(&format!(" AND event_type = ?{}", args.len()));
        }
        if let Some(since) = query.since {
            args.push(timestamp(since));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(until) = query.until {
            args.push(timestamp(until));
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        sql.push_str(&format!(" ORDER BY timestamp DESC, rowid DESC LIMIT {}", limit));

        let db = self.db()?;
        let mut stmt = db.conn().prepare(&sql)?;
        let logs = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), audit_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}
