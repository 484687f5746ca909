//! Memory facade over the storage collaborator.

use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::models::EpisodicMemoryEntry;
use crate::storage::{FlowStore, StorageResult};

/// Hex characters kept from the goal digest.
const SIGNATURE_LEN: usize = 16;

/// Stable signature for a goal: the first 16 hex characters of its SHA-256.
pub fn goal_signature(goal: &str) -> String {
    let digest = Sha256::digest(goal.as_bytes());
    let mut signature: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
    signature.truncate(SIGNATURE_LEN);
    signature
}

/// Working and episodic memory for executions.
#[derive(Clone)]
pub struct MemoryStore {
    store: Arc<dyn FlowStore>,
}

impl MemoryStore {
    /// Creates a memory store backed by `store`.
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Writes a working memory key.
    pub fn put(&self, execution_id: &str, node_id: Option<&str>, key: &str, value: &Value) -> StorageResult<()> {
        self.store.put_working_memory(execution_id, node_id, key, value, None)
    }

    /// Writes a working memory key that disappears after `ttl`.
    pub fn put_with_ttl(
        &self,
        execution_id: &str,
        node_id: Option<&str>,
        key: &str,
        value: &Value,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.store.put_working_memory(execution_id, node_id, key, value, Some(Utc::now() + ttl))
    }

    /// Reads a live working memory key.
    pub fn get(&self, execution_id: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.store.get_working_memory(execution_id, key)?.map(|entry| entry.value))
    }

    /// Every live key of an execution as one flat map.
    pub fn snapshot(&self, execution_id: &str) -> StorageResult<Map<String, Value>> {
        Ok(self
            .store
            .list_working_memory(execution_id)?
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect())
    }

    /// Like [`snapshot`](Self::snapshot), restricted to `keys` unless `keys` is empty.
    pub fn snapshot_keys(&self, execution_id: &str, keys: &[String]) -> StorageResult<Map<String, Value>> {
        let mut snapshot = self.snapshot(execution_id)?;
        if !keys.is_empty() {
            snapshot.retain(|key, _| keys.contains(key));
        }
        Ok(snapshot)
    }

    /// Drops the working memory of an execution.
    pub fn clear(&self, execution_id: &str) -> StorageResult<usize> {
        self.store.clear_working_memory(execution_id)
    }

    /// Appends an episodic example.
    pub fn remember(
        &self,
        flow_id: &str,
        node_id: Option<&str>,
        goal_signature: &str,
        example: &Value,
        success: bool,
        metadata: &Value,
    ) -> StorageResult<EpisodicMemoryEntry> {
        self.store.append_episodic_memory(flow_id, node_id, goal_signature, example, success, metadata)
    }

    /// Up to `limit` successful examples for a signature, most used first.
    pub fn recall(&self, flow_id: &str, goal_signature: &str, limit: usize) -> StorageResult<Vec<EpisodicMemoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.retrieve_episodic_memory(flow_id, goal_signature, limit, true)
    }
}
