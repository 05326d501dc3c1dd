//! Command-related data models.
//!
//! This module defines the caller-facing description of a single call and the
//! driver-facing statement it is turned into.

use super::parameter::Parameter;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Plain SQL text
    #[default]
    Text,
    /// Name of a stored procedure
    StoredProcedure,
    /// Name of a table, read in full
    TableDirect,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Use the server default
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, `None` for the server default.
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            Self::Unspecified => None,
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Description of one call: what to run and with which parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default)]
    pub kind: CommandKind,
    pub text: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Overrides the layer's default command timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandSpec {
    /// Create a text command.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Text,
            text: sql.into(),
            ..Self::default()
        }
    }

    /// Create a stored procedure command.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::StoredProcedure,
            text: name.into(),
            ..Self::default()
        }
    }

    /// Create a table-direct command.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::TableDirect,
            text: name.into(),
            ..Self::default()
        }
    }

    /// Add a parameter to this command.
    pub fn with_param(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// The part of a command a driver needs to run it.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub kind: CommandKind,
    pub text: String,
    pub parameters: Vec<Parameter>,
}

impl Statement {
    /// Parameters whose values are sent to the database, in order.
    pub fn inputs(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.direction.is_input())
    }

    pub fn has_outputs(&self) -> bool {
        self.parameters.iter().any(|p| p.direction.is_output())
    }
}
