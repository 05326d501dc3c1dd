//! Command objects.
//!
//! A [`Command`] carries the statement, its attached parameter collection and the
//! connection (and transaction) it is bound to. Non-query and scalar execution
//! empty the parameter collection on return; reader execution leaves it for the
//! caller to clear after reading output values.

use crate::db::connection::Connection;
use crate::db::driver::Driver;
use crate::models::{CommandKind, Parameter, Statement, Value};
use std::time::Duration;
use uuid::Uuid;

pub struct Command<D: Driver> {
    statement: Statement,
    connection: Option<Connection<D>>,
    transaction_id: Option<Uuid>,
    timeout: Option<Duration>,
}

impl<D: Driver> std::fmt::Debug for Command<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.statement.kind)
            .field("text", &self.statement.text)
            .field("parameters", &self.statement.parameters.len())
            .field("connection", &self.connection)
            .field("transaction_id", &self.transaction_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<D: Driver> Command<D> {
    /// Create an empty text command, optionally bound to a connection.
    pub fn new(connection: Option<Connection<D>>) -> Self {
        Self {
            statement: Statement::default(),
            connection,
            transaction_id: None,
            timeout: None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.statement.kind
    }

    pub fn text(&self) -> &str {
        &self.statement.text
    }

    pub fn set_command(&mut self, kind: CommandKind, text: impl Into<String>) {
        self.statement.kind = kind;
        self.statement.text = text.into();
    }

    pub fn connection(&self) -> Option<&Connection<D>> {
        self.connection.as_ref()
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        self.transaction_id
    }

    pub(crate) fn bind(&mut self, connection: Connection<D>, transaction_id: Option<Uuid>) {
        self.connection = Some(connection);
        self.transaction_id = transaction_id;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.statement.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Vec<Parameter> {
        &mut self.statement.parameters
    }

    /// Look up a parameter by name, with or without its prefix.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        let bare = name.trim_start_matches(['@', ':', '$', '?']);
        self.statement
            .parameters
            .iter()
            .find(|p| p.name == name || p.bare_name() == bare)
    }

    /// Value of an output parameter once the driver has populated it.
    pub fn output_value(&self, name: &str) -> Option<&Value> {
        self.parameter(name)
            .filter(|p| p.direction.is_output())
            .and_then(|p| p.value.as_ref())
    }

    /// Empty the parameter collection, returning what it held.
    pub fn clear_parameters(&mut self) -> Vec<Parameter> {
        std::mem::take(&mut self.statement.parameters)
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }
}
