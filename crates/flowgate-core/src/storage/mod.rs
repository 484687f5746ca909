//! Storage collaborator for Flowgate.
//!
//! The engine and orchestrator only see the [`FlowStore`] trait. [`SqliteFlowStore`] is the
//! bundled implementation over a single SQLite connection.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod sqlite;
pub mod store;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteFlowStore;
pub use store::FlowStore;
