//! Error types for Flowgate Core.

use crate::builder::BuildError;
use crate::config::ConfigError;
use crate::rules::ExpressionError;
use crate::storage::StorageError;
use thiserror::Error;

/// Core error type for Flowgate operations.
#[derive(Error, Debug)]
pub enum FlowgateError {
    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed condition or action
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Flow definition errors
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A node whose config does not fit its kind
    #[error("Invalid config on node '{node}': {reason}")]
    InvalidNodeConfig {
        /// Node name.
        node: String,
        /// Deserializer message.
        reason: String,
    },
}

/// Result type alias for Flowgate operations.
pub type Result<T> = std::result::Result<T, FlowgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flowgate_error_storage_conversion() {
        let storage_err = StorageError::NotFound("flow-1".to_string());
        let err: FlowgateError = storage_err.into();
        match err {
            FlowgateError::Storage(StorageError::NotFound(msg)) => assert_eq!(msg, "flow-1"),
            _ => panic!("Expected Storage error variant"),
        }
    }

    #[test]
    fn test_flowgate_error_display() {
        let err: FlowgateError = ExpressionError::UnknownOperator("~=".to_string()).into();
        assert_eq!(err.to_string(), "Expression error: Unknown operator '~='");

        let err = FlowgateError::InvalidNodeConfig { node: "gate".to_string(), reason: "bad".to_string() };
        assert_eq!(err.to_string(), "Invalid config on node 'gate': bad");
    }
}
