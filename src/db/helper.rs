//! The layer facade.
//!
//! [`SqlHelper`] is constructed once from a [`LayerConfig`] and a driver. It
//! builds connections, commands, parameters and scoped transactions, and runs
//! commands through the preparer and executor.
//!
//! Every execution call takes an optional connection and an optional
//! transaction. With a transaction the call runs on the transaction's
//! connection. With only a connection, that connection is used and closed
//! afterwards only if the call had to open it. With neither, a connection is
//! drawn from the server pool for the configured role, opened for the call
//! and closed when the call (or, for readers, the cursor) is done.

use crate::config::LayerConfig;
use crate::db::command::Command;
use crate::db::connection::{Connection, ConnectionFactory};
use crate::db::driver::Driver;
use crate::db::executor::Executor;
use crate::db::params::ParameterBuilder;
use crate::db::preparer::{CommandPreparer, ExecutionContext};
use crate::db::reader::{Reader, ReaderBehavior, ReaderHandle};
use crate::db::server_pool::{ServerPool, ServerRole};
use crate::db::transaction::{ScopedTransaction, Transaction};
use crate::error::{DbError, DbResult};
use crate::models::{CommandSpec, Direction, IsolationLevel, ParamType, Parameter, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct SqlHelper<D: Driver> {
    config: LayerConfig,
    servers: Arc<ServerPool>,
    factory: ConnectionFactory<D>,
    executor: Executor,
}

impl<D: Driver> std::fmt::Debug for SqlHelper<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlHelper")
            .field("role", &self.config.role)
            .field("polling", &self.config.polling)
            .field("servers", &self.servers)
            .field("executor", &self.executor)
            .finish()
    }
}

impl<D: Driver> SqlHelper<D> {
    /// Build the layer. The configuration is validated and must target the
    /// driver's backend.
    pub fn new(driver: D, config: LayerConfig) -> DbResult<Self> {
        let database_type = config.validate()?;
        if database_type != driver.database_type() {
            return Err(DbError::configuration(format!(
                "endpoints are {} but the driver is for {}",
                database_type,
                driver.database_type()
            )));
        }

        let servers = Arc::new(ServerPool::new(
            config.masters.clone(),
            config.replicas.clone(),
            config.polling,
        ));
        let factory = ConnectionFactory::new(driver, Arc::clone(&servers), config.role);
        let executor = Executor::with_timeout(config.command_timeout());

        info!(
            database_type = %database_type,
            masters = config.masters.len(),
            replicas = config.replicas.len(),
            role = %config.role,
            polling = ?config.polling,
            "Database layer configured"
        );

        Ok(Self {
            config,
            servers,
            factory,
            executor,
        })
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn servers(&self) -> &Arc<ServerPool> {
        &self.servers
    }

    pub fn role(&self) -> ServerRole {
        self.config.role
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Build a closed connection to `endpoint`, or to the next pool endpoint
    /// for the configured role.
    pub fn build_connection(&self, endpoint: Option<&str>) -> DbResult<Connection<D>> {
        self.factory.create(endpoint)
    }

    /// Build a closed connection to the next pool endpoint for `role`.
    pub fn build_connection_for_role(&self, role: ServerRole) -> DbResult<Connection<D>> {
        self.factory.create_for_role(role)
    }

    /// Build and open a connection. The caller owns it.
    pub async fn build_connection_and_open(
        &self,
        endpoint: Option<&str>,
        cancel: &CancellationToken,
    ) -> DbResult<Connection<D>> {
        self.factory.open(endpoint, cancel).await
    }

    /// Build an empty command, optionally bound to a connection.
    pub fn build_command(&self, connection: Option<&Connection<D>>) -> Command<D> {
        Command::new(connection.cloned())
    }

    pub fn build_parameter(&self, name: impl Into<String>, value: Option<Value>) -> Parameter {
        ParameterBuilder::build(name, value)
    }

    pub fn build_parameter_typed(
        &self,
        name: impl Into<String>,
        param_type: ParamType,
        size: Option<usize>,
        direction: Direction,
        value: Option<Value>,
    ) -> Parameter {
        ParameterBuilder::build_typed(name, param_type, size, direction, value)
    }

    pub fn reset_parameter(
        &self,
        param: &mut Parameter,
        name: &str,
        param_type: ParamType,
        size: Option<usize>,
        direction: Direction,
        value: Option<Value>,
    ) {
        ParameterBuilder::reset(param, name, param_type, size, direction, value);
    }

    pub fn reset_or_build_parameter<'a>(
        &self,
        slot: &'a mut Option<Parameter>,
        name: &str,
        param_type: ParamType,
        size: Option<usize>,
        direction: Direction,
        value: Option<Value>,
    ) -> &'a mut Parameter {
        ParameterBuilder::reset_or_build(slot, name, param_type, size, direction, value)
    }

    /// Open a master connection and begin a transaction on it. The connection
    /// is closed when the returned scope is committed, rolled back or dropped.
    pub async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> DbResult<ScopedTransaction<D>> {
        let connection = self.factory.open_for_role(ServerRole::Master, cancel).await?;
        ScopedTransaction::begin(connection, isolation, cancel).await
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn prepare(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> DbResult<(Command<D>, ExecutionContext<D>)> {
        let pooled;
        let connection = match (connection, transaction) {
            (None, None) => {
                pooled = self.factory.create(None)?;
                Some(&pooled)
            }
            (connection, _) => connection,
        };

        let mut command = Command::new(None);
        let ctx =
            CommandPreparer::prepare(&mut command, connection, transaction, spec, cancel).await?;
        Ok((command, ctx))
    }

    /// Run a command and return the number of affected rows.
    pub async fn execute_non_query(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> DbResult<u64> {
        let (mut command, ctx) = self.prepare(connection, transaction, spec, cancel).await?;
        self.executor
            .execute_non_query(&mut command, ctx, cancel)
            .await
    }

    /// Run a command and return the number of affected rows along with the
    /// populated output parameters.
    pub async fn execute_non_query_with_outputs(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> DbResult<(u64, Vec<Parameter>)> {
        let (mut command, ctx) = self.prepare(connection, transaction, spec, cancel).await?;
        self.executor
            .execute_non_query_with_outputs(&mut command, ctx, cancel)
            .await
    }

    /// Run a command and return the first column of its first row.
    pub async fn execute_scalar(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> DbResult<Option<Value>> {
        let (mut command, ctx) = self.prepare(connection, transaction, spec, cancel).await?;
        self.executor.execute_scalar(&mut command, ctx, cancel).await
    }

    /// Open a row cursor.
    pub async fn execute_reader(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        behavior: ReaderBehavior,
        cancel: &CancellationToken,
    ) -> DbResult<Reader<D>> {
        let (mut command, ctx) = self.prepare(connection, transaction, spec, cancel).await?;
        self.executor
            .execute_reader(&mut command, ctx, behavior, cancel)
            .await
    }

    /// Open a row cursor and keep its command for reading output parameters.
    pub async fn execute_reader_with_command(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        behavior: ReaderBehavior,
        cancel: &CancellationToken,
    ) -> DbResult<ReaderHandle<D>> {
        let (command, ctx) = self.prepare(connection, transaction, spec, cancel).await?;
        self.executor
            .execute_reader_with_command(command, ctx, behavior, cancel)
            .await
    }
}
