// Error types for flow orchestration

use flowgate_abstraction::InvocationError;
use flowgate_core::{BuildError, Decision, ExpressionError, FlowgateError, StorageError};
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Flow does not exist
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Node does not exist
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Flow has no root node
    #[error("Flow '{0}' has no root node")]
    MissingRoot(String),

    /// Flow has more than one root node
    #[error("Flow '{0}' has more than one root node")]
    MultipleRoots(String),

    /// The flow tree cannot be executed as defined
    #[error("Structural error: {0}")]
    Structural(String),

    /// A node whose config does not fit its kind
    #[error("Invalid config on node '{node}': {reason}")]
    InvalidNodeConfig {
        /// Node name
        node: String,
        /// Deserializer message
        reason: String,
    },

    /// No routing rule selected a child
    #[error("No routing rule matched at '{node}'")]
    NoRoutingMatch {
        /// Routing node name
        node: String,
    },

    /// The agent invoker failed or timed out
    #[error("Agent '{node}' failed: {source}")]
    Invocation {
        /// Agent node name
        node: String,
        /// Invoker error
        #[source]
        source: InvocationError,
    },

    /// A gate decided to kill or reject
    #[error("Gate '{gate}' rejected with {decision}: {reason}")]
    GateRejected {
        /// Gate node name
        gate: String,
        /// Terminating decision
        decision: Decision,
        /// Aggregate reason
        reason: String,
    },

    /// A gate asked for more recycles than allowed
    #[error("Gate '{gate}' exceeded {limit} recycles of '{target}'")]
    RecycleLimitExceeded {
        /// Gate node name
        gate: String,
        /// Recycle target
        target: String,
        /// Configured bound
        limit: u32,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed condition or action
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Flow definition error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Core error
    #[error(transparent)]
    Core(#[from] FlowgateError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestrationError {
    /// Errors that end the whole execution even inside an isolated parallel branch.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::GateRejected { .. })
    }
}
