//! Command preparation.
//!
//! Resolves which connection governs a call and who is responsible for closing
//! it, then attaches the call's parameters. All argument checks happen before
//! any I/O; once the connection has been touched, failures clean up after
//! themselves before propagating.

use crate::db::command::Command;
use crate::db::connection::Connection;
use crate::db::driver::Driver;
use crate::db::params::ParameterBuilder;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::CommandSpec;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Per-call execution state. Never shared between calls.
pub struct ExecutionContext<D: Driver> {
    connection: Connection<D>,
    transaction_id: Option<Uuid>,
    owns_connection: bool,
}

impl<D: Driver> std::fmt::Debug for ExecutionContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("connection", &self.connection)
            .field("transaction_id", &self.transaction_id)
            .field("owns_connection", &self.owns_connection)
            .finish()
    }
}

impl<D: Driver> ExecutionContext<D> {
    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        self.transaction_id
    }

    /// True if this call opened the connection and must close it.
    pub fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    /// Close the connection if this call owns it.
    pub(crate) async fn release(&self) -> DbResult<()> {
        if self.owns_connection {
            self.connection.close().await
        } else {
            Ok(())
        }
    }
}

pub struct CommandPreparer;

impl CommandPreparer {
    /// Bind `command` to the governing connection and attach the parameters of `spec`.
    ///
    /// With a transaction the command runs on the transaction's connection and
    /// the call never owns it. Otherwise the supplied connection is used, and
    /// opened (and owned) if it was closed.
    pub async fn prepare<D: Driver>(
        command: &mut Command<D>,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> DbResult<ExecutionContext<D>> {
        if spec.text.trim().is_empty() {
            return Err(DbError::invalid_argument("command text cannot be blank"));
        }

        let (governing, transaction_id) = match transaction {
            Some(tx) => {
                let tx_connection = tx.connection().ok_or_else(|| {
                    DbError::invalid_transaction_state(format!(
                        "transaction {} has no connection; it was already committed or rolled back",
                        tx.id()
                    ))
                })?;
                if let Some(conn) = connection {
                    if !conn.same_as(tx_connection) {
                        return Err(DbError::conflicting_resources(format!(
                            "connection {} is not the connection of transaction {}",
                            conn.id(),
                            tx.id()
                        )));
                    }
                }
                (tx_connection.clone(), Some(tx.id()))
            }
            None => {
                let conn = connection.ok_or_else(|| {
                    DbError::invalid_argument("a connection is required when no transaction is supplied")
                })?;
                (conn.clone(), None)
            }
        };

        command.set_command(spec.kind, spec.text.as_str());
        if let Some(timeout) = spec.timeout() {
            command.set_timeout(Some(timeout));
        }
        ParameterBuilder::attach(command.parameters_mut(), &spec.parameters)?;
        command.bind(governing.clone(), transaction_id);

        let owns_connection = transaction.is_none() && !governing.is_open();
        if owns_connection {
            if let Err(e) = governing.open(cancel).await {
                command.clear_parameters();
                return Err(e);
            }
        }

        debug!(
            connection_id = %governing.id(),
            transaction_id = ?transaction_id,
            owns_connection,
            parameters = command.parameters().len(),
            "Command prepared"
        );

        Ok(ExecutionContext {
            connection: governing,
            transaction_id,
            owns_connection,
        })
    }
}
