//! Agent invocation abstraction for Flowgate.
//!
//! Agent nodes never reason on their own. They hand a goal, a context document and an
//! input document to an [`AgentInvoker`] and only look at the returned document for the
//! keys they declared. Any provider (a model API, a subprocess, a remote worker) plugs in
//! behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// Represents an error that can occur when invoking an agent.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationError {
    /// The invocation exceeded its time budget.
    #[error("Invocation timed out after {seconds}s")]
    Timeout {
        /// The budget that was exceeded, in seconds.
        seconds: u64,
    },

    /// The provider behind the invoker failed.
    #[error("Provider Error: {0}")]
    Provider(String),

    /// The provider answered with something that is not a usable document.
    #[error("Invalid Output: {0}")]
    InvalidOutput(String),

    /// Other unexpected errors.
    #[error("Other Invocation Error: {0}")]
    Other(String),
}

/// A capability provider that executes one reasoning step.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Executes `goal` with the given context and input.
    ///
    /// `context` carries the episodic examples and the working memory snapshot; `input`
    /// is the document handed down by the parent node.
    ///
    /// # Errors
    ///
    /// Returns an [`InvocationError`] when the provider fails or produces unusable output.
    async fn invoke(
        &self,
        goal: &str,
        context: &Value,
        input: &Value,
    ) -> Result<Value, InvocationError>;
}

/// A recorded call made against a [`ScriptedInvoker`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// The goal the agent was asked to pursue.
    pub goal: String,
    /// The context document passed along.
    pub context: Value,
    /// The input document passed along.
    pub input: Value,
}

/// Deterministic invoker that answers from a script keyed by goal.
///
/// Each goal owns a queue of canned replies. Replies are consumed in order and the last
/// one is repeated once the queue runs dry. Goals without a script echo their input back
/// as `{"goal": ..., "input": ...}`.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, InvocationError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedInvoker {
    /// Creates an invoker with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply for `goal`.
    #[must_use]
    pub fn with_reply(self, goal: impl Into<String>, output: Value) -> Self {
        self.push(goal.into(), Ok(output));
        self
    }

    /// Queues a failing reply for `goal`.
    #[must_use]
    pub fn with_failure(self, goal: impl Into<String>, error: InvocationError) -> Self {
        self.push(goal.into(), Err(error));
        self
    }

    /// Returns every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Returns how many times `goal` was invoked.
    pub fn call_count(&self, goal: &str) -> usize {
        self.calls().iter().filter(|call| call.goal == goal).count()
    }

    fn push(&self, goal: String, reply: Result<Value, InvocationError>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(goal).or_default().push_back(reply);
        }
    }

    fn next_reply(&self, goal: &str) -> Option<Result<Value, InvocationError>> {
        let mut scripts = self.scripts.lock().ok()?;
        let queue = scripts.get_mut(goal)?;
        if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        goal: &str,
        context: &Value,
        input: &Value,
    ) -> Result<Value, InvocationError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                goal: goal.to_string(),
                context: context.clone(),
                input: input.clone(),
            });
        }

        match self.next_reply(goal) {
            Some(reply) => reply,
            None => Ok(serde_json::json!({ "goal": goal, "input": input })),
        }
    }
}
