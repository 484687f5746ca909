//! Database connection and schema management.

use rusqlite::Connection;
use tracing::info;

use crate::storage::error::StorageResult;

/// SQLite connection wrapper.
///
/// Owns the connection and creates the flow schema on open.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) a database file at `path`.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database cannot be opened or the schema created
    pub fn open(path: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If schema creation fails
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Gets a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Gets a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Creates every table and index used by the flow store. Safe to run repeatedly.
    fn init_schema(&self) -> StorageResult<()> {
        info!("Initializing flow database schema");

        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                parent_id TEXT,
                node_type TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                position INTEGER NOT NULL,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (flow_id) REFERENCES flows(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES nodes(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS business_rules (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                gate_node_id TEXT,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                condition TEXT NOT NULL,
                action TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                FOREIGN KEY (flow_id) REFERENCES flows(id) ON DELETE CASCADE,
                FOREIGN KEY (gate_node_id) REFERENCES nodes(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                initial_context TEXT NOT NULL,
                result TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT,
                FOREIGN KEY (flow_id) REFERENCES flows(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS node_executions (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 1,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                FOREIGN KEY (execution_id) REFERENCES executions(id) ON DELETE CASCADE,
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS gate_evaluations (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                gate_node_id TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                status TEXT NOT NULL,
                decision TEXT NOT NULL,
                score REAL NOT NULL,
                reason TEXT NOT NULL,
                context_snapshot TEXT NOT NULL,
                evaluated_at TEXT NOT NULL,
                FOREIGN KEY (execution_id) REFERENCES executions(id) ON DELETE CASCADE,
                FOREIGN KEY (gate_node_id) REFERENCES nodes(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS working_memory (
                execution_id TEXT NOT NULL,
                node_id TEXT,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (execution_id, key),
                FOREIGN KEY (execution_id) REFERENCES executions(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS episodic_memory (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                node_id TEXT,
                goal_signature TEXT NOT NULL,
                example TEXT NOT NULL,
                success INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_accessed TEXT,
                metadata TEXT NOT NULL,
                FOREIGN KEY (flow_id) REFERENCES flows(id) ON DELETE CASCADE,
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE SET NULL
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                execution_id TEXT,
                node_id TEXT,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
            [],
        )?;

        self.conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_nodes_flow ON nodes(flow_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
            CREATE INDEX IF NOT EXISTS idx_rules_flow ON business_rules(flow_id);
            CREATE INDEX IF NOT EXISTS idx_rules_gate ON business_rules(gate_node_id);
            CREATE INDEX IF NOT EXISTS idx_executions_flow ON executions(flow_id);
            CREATE INDEX IF NOT EXISTS idx_node_exec_execution ON node_executions(execution_id);
            CREATE INDEX IF NOT EXISTS idx_gate_eval_execution ON gate_evaluations(execution_id);
            CREATE INDEX IF NOT EXISTS idx_episodic_signature ON episodic_memory(flow_id, goal_signature);
            CREATE INDEX IF NOT EXISTS idx_audit_execution ON audit_log(execution_id);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_log(event_type);
            "#,
        )?;

        info!("Flow database schema initialized");
        Ok(())
    }

    /// Runs `f` inside a transaction, committing on success and rolling back on error.
    pub fn transaction<F, R>(&mut self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&rusqlite::Transaction) -> StorageResult<R>,
    {
        let tx = self.conn.transaction()?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        let mut stmt = db.conn().prepare("SELECT name FROM sqlite_master WHERE type='table'").unwrap();
        stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_database_open_in_memory_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        let tables = table_names(&db);
        for table in [
            "flows",
            "nodes",
            "business_rules",
            "executions",
            "node_executions",
            "gate_evaluations",
            "working_memory",
            "episodic_memory",
            "audit_log",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_database_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO flows (id, name, description, metadata, created_at) VALUES ('f', 'n', '', '{}', 'now')",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(path).unwrap();
        let count: i64 = db.conn().query_row("SELECT COUNT(*) FROM flows", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_database_schema_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db.init_schema().unwrap();
    }

    #[test]
    fn test_database_indexes_created() {
        let db = Database::open_in_memory().unwrap();
        let mut stmt = db.conn().prepare("SELECT name FROM sqlite_master WHERE type='index'").unwrap();
        let indexes: Vec<String> = stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect();
        assert!(indexes.contains(&"idx_nodes_parent".to_string()));
        assert!(indexes.contains(&"idx_episodic_signature".to_string()));
        assert!(indexes.contains(&"idx_audit_event_type".to_string()));
    }

    #[test]
    fn test_database_transaction_rollback() {
        let mut db = Database::open_in_memory().unwrap();
        let result: StorageResult<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO flows (id, name, description, metadata, created_at) VALUES ('f', 'n', '', '{}', 'now')",
                [],
            )?;
            Err(crate::storage::StorageError::InvalidData("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db.conn().query_row("SELECT COUNT(*) FROM flows", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_database_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.conn().execute(
            "INSERT INTO nodes (id, flow_id, parent_id, node_type, name, description, position, config, created_at)
             VALUES ('n', 'missing', NULL, 'root', 'root', '', 0, '{}', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
