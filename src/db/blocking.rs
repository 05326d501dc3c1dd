//! Blocking mirror of [`SqlHelper`].
//!
//! [`BlockingSqlHelper`] owns a current-thread runtime and drives every async
//! operation to completion on it. Cursors and transactions it returns borrow
//! the helper so they are always closed on the same runtime that opened them.
//!
//! None of these types may be used from inside an async context: `block_on`
//! panics there.

use crate::config::LayerConfig;
use crate::db::command::Command;
use crate::db::connection::Connection;
use crate::db::driver::Driver;
use crate::db::helper::SqlHelper;
use crate::db::reader::{Reader, ReaderBehavior, ReaderHandle};
use crate::db::transaction::{ScopedTransaction, Transaction};
use crate::error::{DbError, DbResult};
use crate::models::{CommandSpec, IsolationLevel, Parameter, Row, Value};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug)]
pub struct BlockingSqlHelper<D: Driver> {
    inner: SqlHelper<D>,
    runtime: Runtime,
}

impl<D: Driver> BlockingSqlHelper<D> {
    pub fn new(driver: D, config: LayerConfig) -> DbResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DbError::configuration(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            inner: SqlHelper::new(driver, config)?,
            runtime,
        })
    }

    /// The async helper, for builders that do no I/O.
    pub fn helper(&self) -> &SqlHelper<D> {
        &self.inner
    }

    pub fn build_connection(&self, endpoint: Option<&str>) -> DbResult<Connection<D>> {
        self.inner.build_connection(endpoint)
    }

    pub fn build_connection_and_open(&self, endpoint: Option<&str>) -> DbResult<Connection<D>> {
        self.runtime.block_on(
            self.inner
                .build_connection_and_open(endpoint, &CancellationToken::new()),
        )
    }

    pub fn close_connection(&self, connection: &Connection<D>) -> DbResult<()> {
        self.runtime.block_on(connection.close())
    }

    pub fn begin_transaction(&self, isolation: IsolationLevel) -> DbResult<BlockingTransaction<'_, D>> {
        let scope = self
            .runtime
            .block_on(self.inner.begin_transaction(isolation, &CancellationToken::new()))?;
        Ok(BlockingTransaction {
            scope: Some(scope),
            runtime: &self.runtime,
        })
    }

    pub fn execute_non_query(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
    ) -> DbResult<u64> {
        self.runtime.block_on(self.inner.execute_non_query(
            connection,
            transaction,
            spec,
            &CancellationToken::new(),
        ))
    }

    pub fn execute_non_query_with_outputs(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
    ) -> DbResult<(u64, Vec<Parameter>)> {
        self.runtime
            .block_on(self.inner.execute_non_query_with_outputs(
                connection,
                transaction,
                spec,
                &CancellationToken::new(),
            ))
    }

    pub fn execute_scalar(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
    ) -> DbResult<Option<Value>> {
        self.runtime.block_on(self.inner.execute_scalar(
            connection,
            transaction,
            spec,
            &CancellationToken::new(),
        ))
    }

    pub fn execute_reader(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        behavior: ReaderBehavior,
    ) -> DbResult<BlockingReader<'_, D>> {
        let reader = self.runtime.block_on(self.inner.execute_reader(
            connection,
            transaction,
            spec,
            behavior,
            &CancellationToken::new(),
        ))?;
        Ok(BlockingReader {
            reader: Some(reader),
            runtime: &self.runtime,
        })
    }

    pub fn execute_reader_with_command(
        &self,
        connection: Option<&Connection<D>>,
        transaction: Option<&Transaction<D>>,
        spec: &CommandSpec,
        behavior: ReaderBehavior,
    ) -> DbResult<BlockingReaderHandle<'_, D>> {
        let handle = self
            .runtime
            .block_on(self.inner.execute_reader_with_command(
                connection,
                transaction,
                spec,
                behavior,
                &CancellationToken::new(),
            ))?;
        Ok(BlockingReaderHandle {
            handle: Some(handle),
            runtime: &self.runtime,
        })
    }
}

/// Blocking row cursor. Dropping it closes it.
#[derive(Debug)]
pub struct BlockingReader<'a, D: Driver> {
    reader: Option<Reader<D>>,
    runtime: &'a Runtime,
}

impl<D: Driver> BlockingReader<'_, D> {
    pub fn connection(&self) -> Option<&Connection<D>> {
        self.reader.as_ref().map(Reader::connection)
    }

    pub fn next(&mut self) -> DbResult<Option<Row>> {
        match self.reader.as_mut() {
            Some(reader) => self.runtime.block_on(reader.next(&CancellationToken::new())),
            None => Ok(None),
        }
    }

    pub fn collect(&mut self) -> DbResult<Vec<Row>> {
        match self.reader.as_mut() {
            Some(reader) => self
                .runtime
                .block_on(reader.collect(&CancellationToken::new())),
            None => Ok(Vec::new()),
        }
    }

    pub fn close(mut self) -> DbResult<()> {
        match self.reader.take() {
            Some(reader) => self.runtime.block_on(reader.close()),
            None => Ok(()),
        }
    }
}

impl<D: Driver> Drop for BlockingReader<'_, D> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take()
            && let Err(e) = self.runtime.block_on(reader.close())
        {
            warn!(error = %e, "Failed to close dropped reader");
        }
    }
}

/// Blocking reader paired with its command.
#[derive(Debug)]
pub struct BlockingReaderHandle<'a, D: Driver> {
    handle: Option<ReaderHandle<D>>,
    runtime: &'a Runtime,
}

impl<D: Driver> BlockingReaderHandle<'_, D> {
    pub fn next(&mut self) -> DbResult<Option<Row>> {
        match self.handle.as_mut() {
            Some(handle) => self.runtime.block_on(handle.next(&CancellationToken::new())),
            None => Ok(None),
        }
    }

    /// Close the cursor and return the command with its output parameters.
    pub fn finish(mut self) -> DbResult<Option<Command<D>>> {
        match self.handle.take() {
            Some(handle) => self
                .runtime
                .block_on(handle.finish(&CancellationToken::new()))
                .map(Some),
            None => Ok(None),
        }
    }
}

impl<D: Driver> Drop for BlockingReaderHandle<'_, D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = self
                .runtime
                .block_on(handle.finish(&CancellationToken::new()))
        {
            warn!(error = %e, "Failed to close dropped reader");
        }
    }
}

/// Blocking scoped transaction. Dropping it without commit rolls back.
#[derive(Debug)]
pub struct BlockingTransaction<'a, D: Driver> {
    scope: Option<ScopedTransaction<D>>,
    runtime: &'a Runtime,
}

impl<D: Driver> BlockingTransaction<'_, D> {
    /// The transaction, to pass to execution calls.
    pub fn transaction(&self) -> Option<&Transaction<D>> {
        self.scope.as_ref().map(ScopedTransaction::transaction)
    }

    pub fn commit(mut self) -> DbResult<()> {
        match self.scope.take() {
            Some(scope) => self.runtime.block_on(scope.commit(&CancellationToken::new())),
            None => Err(DbError::invalid_transaction_state("transaction already ended")),
        }
    }

    pub fn rollback(mut self) -> DbResult<()> {
        match self.scope.take() {
            Some(scope) => self
                .runtime
                .block_on(scope.rollback(&CancellationToken::new())),
            None => Err(DbError::invalid_transaction_state("transaction already ended")),
        }
    }
}

impl<D: Driver> Drop for BlockingTransaction<'_, D> {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take()
            && let Err(e) = self
                .runtime
                .block_on(scope.rollback(&CancellationToken::new()))
        {
            warn!(error = %e, "Failed to roll back dropped transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{MockDriver, row};

    fn helper(driver: &MockDriver) -> BlockingSqlHelper<MockDriver> {
        BlockingSqlHelper::new(
            driver.clone(),
            LayerConfig::new(vec!["sqlite:a.db".into(), "sqlite:b.db".into()]),
        )
        .unwrap()
    }

    #[test]
    fn test_non_query_rotates_endpoints() {
        let driver = MockDriver::new();
        driver.set_affected(3);
        let helper = helper(&driver);
        let spec = CommandSpec::text("DELETE FROM t");

        assert_eq!(helper.execute_non_query(None, None, &spec).unwrap(), 3);
        assert_eq!(helper.execute_non_query(None, None, &spec).unwrap(), 3);

        let stats = driver.stats();
        assert_eq!(stats.connected_endpoints, vec!["sqlite:a.db", "sqlite:b.db"]);
        assert_eq!(stats.closes, 2);
    }

    #[test]
    fn test_dropped_reader_closes_owned_connection() {
        let driver = MockDriver::with_rows(vec![row("n", Value::Int(1)), row("n", Value::Int(2))]);
        let helper = helper(&driver);

        let connection = {
            let mut reader = helper
                .execute_reader(None, None, &CommandSpec::text("SELECT n"), ReaderBehavior::default())
                .unwrap();
            assert_eq!(reader.next().unwrap(), Some(row("n", Value::Int(1))));
            reader.connection().cloned().unwrap()
        };

        assert!(!connection.is_open());
        assert_eq!(driver.stats().closes, 1);
    }

    #[test]
    fn test_external_connection_survives_reader() {
        let driver = MockDriver::with_rows(vec![row("n", Value::Int(1))]);
        let helper = helper(&driver);
        let connection = helper.build_connection_and_open(None).unwrap();

        let mut reader = helper
            .execute_reader(
                Some(&connection),
                None,
                &CommandSpec::text("SELECT n"),
                ReaderBehavior::default(),
            )
            .unwrap();
        assert_eq!(reader.collect().unwrap().len(), 1);
        reader.close().unwrap();

        assert!(connection.is_open());
        helper.close_connection(&connection).unwrap();
        assert!(!connection.is_open());
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let driver = MockDriver::new();
        let helper = helper(&driver);

        {
            let tx = helper.begin_transaction(IsolationLevel::Unspecified).unwrap();
            helper
                .execute_non_query(None, tx.transaction(), &CommandSpec::text("UPDATE t SET a = 1"))
                .unwrap();
        }

        let stats = driver.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.connects, stats.closes);
    }

    #[test]
    fn test_reader_handle_reads_outputs() {
        let driver = MockDriver::with_rows(vec![row("n", Value::Int(1))]);
        let helper = helper(&driver);
        let spec = CommandSpec::text("SELECT n")
            .with_param(Parameter::output("@total", crate::models::ParamType::Integer));

        let mut handle = helper
            .execute_reader_with_command(None, None, &spec, ReaderBehavior::default())
            .unwrap();
        assert!(handle.next().unwrap().is_some());
        let command = handle.finish().unwrap().unwrap();
        assert_eq!(command.output_value("@total"), Some(&Value::Int(42)));
    }
}
