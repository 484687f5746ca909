//! Working and episodic memory.
//!
//! Working memory is a per-execution key/value map; the last write for a key wins and
//! expired entries are invisible. Episodic memory is an append-only set of examples grouped
//! by goal signature, shared across executions of a flow.
//!
//! # Example
//!
//! ```rust,no_run
//! use flowgate_core::memory::{MemoryStore, goal_signature};
//! use flowgate_core::storage::SqliteFlowStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let memory = MemoryStore::new(Arc::new(SqliteFlowStore::open_in_memory()?));
//!
//! memory.put("exec-1", None, "draft", &json!("first pass"))?;
//! let context = memory.snapshot("exec-1")?;
//!
//! let signature = goal_signature("Summarize the PRD");
//! let examples = memory.recall("flow-1", &signature, 3)?;
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::{MemoryStore, goal_signature};
