//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod command;
pub mod endpoint;
pub mod parameter;
pub mod row;
pub mod value;

// Re-export commonly used types
pub use command::{CommandKind, CommandSpec, IsolationLevel, Statement};
pub use endpoint::{DatabaseType, TransactionState, mask_endpoint};
pub use parameter::{Direction, Parameter};
pub use row::Row;
pub use value::{ParamType, Value};
