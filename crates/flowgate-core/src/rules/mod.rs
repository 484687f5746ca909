//! Business rules: the condition language, rule actions and the gate decision engine.
//!
//! Conditions are JSON trees:
//!
//! ```json
//! {"AND": [
//!     {"field": "prd.title", "operator": "IS NOT NULL"},
//!     {"field": "prd.sections.length", "operator": ">=", "value": 3},
//!     {"MATCHES": {"field": "prd.id", "pattern": "PRD-[0-9]+"}}
//! ]}
//! ```

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod error;
pub mod expression;
pub mod resolver;

pub use actions::apply_action;
pub use engine::{GateEngine, GateSettings};
pub use error::{ExpressionError, Result};
pub use expression::{
    CheckTrace, CompareOp, Evaluation, Expression, context_snapshot, evaluate, referenced_fields,
    validate_syntax,
};
pub use resolver::{resolve, resolve_ref};
