//! Structural errors in rule expressions and actions.

use thiserror::Error;

/// Result type for expression parsing.
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// A condition or action that does not fit the grammar.
///
/// These are distinct from a condition that evaluates to false.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    /// A node of the tree is not a JSON object.
    #[error("Expression node must be an object, got: {0}")]
    NotAnObject(String),

    /// An object matching none of the known node shapes.
    #[error("Unknown expression node: {0}")]
    UnknownNode(String),

    /// A comparison with an operator outside the closed set.
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    /// A required member is missing.
    #[error("{node} requires '{member}'")]
    MissingOperand {
        /// The node kind, e.g. `AND` or `comparison`.
        node: String,
        /// The missing member.
        member: String,
    },

    /// A member has the wrong shape.
    #[error("{node} has an invalid '{member}': {reason}")]
    InvalidOperand {
        /// The node kind.
        node: String,
        /// The offending member.
        member: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A MATCHES pattern that is not a valid regular expression.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A transformation action outside the supported set.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}
