//! Transactions.
//!
//! [`Transaction`] is a handle over a caller-owned connection. Once committed or
//! rolled back it no longer has a connection, and executing against it fails with
//! [`DbError::InvalidTransactionState`].
//!
//! [`ScopedTransaction`] also owns its connection and closes it when the scope
//! ends, whichever way it ends.

use crate::db::connection::Connection;
use crate::db::driver::{Driver, cancellable};
use crate::error::{DbError, DbResult};
use crate::models::{IsolationLevel, TransactionState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Transaction<D: Driver> {
    id: Uuid,
    isolation: IsolationLevel,
    state: TransactionState,
    connection: Option<Connection<D>>,
}

impl<D: Driver> std::fmt::Debug for Transaction<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .field("connection", &self.connection)
            .finish()
    }
}

impl<D: Driver> Transaction<D> {
    /// Begin a transaction on an open connection.
    pub async fn begin(
        connection: &Connection<D>,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> DbResult<Self> {
        if !connection.is_open() {
            return Err(DbError::invalid_argument(
                "a transaction can only be started on an open connection",
            ));
        }

        {
            let mut slot = connection.lock()?;
            let raw = slot.as_mut().ok_or_else(|| connection.closed_error())?;
            cancellable(
                cancel,
                "begin transaction",
                connection.driver().begin(raw, isolation),
            )
            .await?;
        }

        let id = Uuid::new_v4();
        info!(
            transaction_id = %id,
            connection_id = %connection.id(),
            isolation = ?isolation,
            "Transaction started"
        );

        Ok(Self {
            id,
            isolation,
            state: TransactionState::Active,
            connection: Some(connection.clone()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Connection governing this transaction, `None` once it has completed.
    pub fn connection(&self) -> Option<&Connection<D>> {
        self.connection.as_ref()
    }

    pub async fn commit(&mut self, cancel: &CancellationToken) -> DbResult<()> {
        self.finish(true, cancel).await
    }

    pub async fn rollback(&mut self, cancel: &CancellationToken) -> DbResult<()> {
        self.finish(false, cancel).await
    }

    /// Send the commit or rollback. The connection is detached and the state
    /// updated only once the server has accepted it; on failure the
    /// transaction stays active on its connection so the caller can retry or
    /// roll back.
    async fn finish(&mut self, commit: bool, cancel: &CancellationToken) -> DbResult<()> {
        let operation = if commit { "commit" } else { "rollback" };
        let connection = self.connection.as_ref().ok_or_else(|| {
            DbError::invalid_transaction_state(format!(
                "transaction {} has already completed",
                self.id
            ))
        })?;

        let result = match connection.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(raw) if commit => {
                    cancellable(cancel, operation, connection.driver().commit(raw)).await
                }
                Some(raw) => {
                    cancellable(cancel, operation, connection.driver().rollback(raw)).await
                }
                None => Err(connection.closed_error()),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(
                transaction_id = %self.id,
                operation,
                error = %e,
                "Transaction still active after failed completion"
            );
            return Err(e);
        }

        self.connection = None;
        self.state = if commit {
            TransactionState::Committed
        } else {
            TransactionState::RolledBack
        };
        info!(
            transaction_id = %self.id,
            state = ?self.state,
            "Transaction completed"
        );
        Ok(())
    }

    /// Detach the connection without completing the transaction.
    fn detach(&mut self) -> Option<Connection<D>> {
        self.state = TransactionState::RolledBack;
        self.connection.take()
    }
}

/// Transaction that owns its connection.
///
/// `commit` and `rollback` always close the connection. Dropping an unfinished
/// scope rolls back and closes on a spawned task.
pub struct ScopedTransaction<D: Driver> {
    transaction: Transaction<D>,
    connection: Connection<D>,
    finished: bool,
}

impl<D: Driver> std::fmt::Debug for ScopedTransaction<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction")
            .field("transaction", &self.transaction)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ScopedTransaction<D> {
    /// Begin a transaction on a connection the scope takes ownership of.
    /// If the transaction cannot be started the connection is closed.
    pub async fn begin(
        connection: Connection<D>,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> DbResult<Self> {
        match Transaction::begin(&connection, isolation, cancel).await {
            Ok(transaction) => Ok(Self {
                transaction,
                connection,
                finished: false,
            }),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to close connection after begin failure");
                }
                Err(e)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.transaction.id()
    }

    /// Transaction handle to pass to execution calls.
    pub fn transaction(&self) -> &Transaction<D> {
        &self.transaction
    }

    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }

    /// Commit, then close the connection. If the commit fails the pending work
    /// is rolled back before the connection is closed.
    pub async fn commit(mut self, cancel: &CancellationToken) -> DbResult<()> {
        self.finished = true;
        match self.transaction.commit(cancel).await {
            Ok(()) => self.connection.close().await,
            Err(e) => {
                rollback_and_close(&self.connection).await;
                Err(e)
            }
        }
    }

    /// Roll back, then close the connection.
    pub async fn rollback(mut self, cancel: &CancellationToken) -> DbResult<()> {
        self.finished = true;
        let result = self.transaction.rollback(cancel).await;
        let closed = self.connection.close().await;
        result.and(closed)
    }
}

impl<D: Driver> Drop for ScopedTransaction<D> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let transaction_id = self.transaction.id();
        let connection = self.transaction.detach().unwrap_or_else(|| self.connection.clone());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    rollback_and_close(&connection).await;
                    warn!(
                        transaction_id = %transaction_id,
                        "Transaction rolled back via Drop - call commit() or rollback() explicitly"
                    );
                });
            }
            Err(_) => warn!(
                transaction_id = %transaction_id,
                "Transaction dropped outside a runtime; connection released without rollback"
            ),
        }
    }
}

/// Roll back whatever is pending on a connection and close it.
pub(crate) async fn rollback_and_close<D: Driver>(connection: &Connection<D>) {
    let rolled_back = match connection.lock() {
        Ok(mut slot) => match slot.as_mut() {
            Some(raw) => connection.driver().rollback(raw).await,
            None => Ok(()),
        },
        Err(e) => Err(e),
    };
    if let Err(e) = rolled_back {
        warn!(error = %e, "Rollback of abandoned transaction failed");
    }
    if let Err(e) = connection.close().await {
        warn!(error = %e, "Failed to close connection of abandoned transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::command::Command;
    use crate::db::executor::Executor;
    use crate::db::preparer::CommandPreparer;
    use crate::db::reader::ReaderBehavior;
    use crate::db::testing::{MockDriver, row};
    use crate::models::{CommandSpec, Value};

    async fn open_connection(driver: &MockDriver) -> Connection<MockDriver> {
        let conn = Connection::new(driver.clone(), "A");
        conn.open(&CancellationToken::new()).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_commit_detaches_connection() {
        let driver = MockDriver::new();
        let cancel = CancellationToken::new();
        let conn = open_connection(&driver).await;

        let mut tx = Transaction::begin(&conn, IsolationLevel::ReadCommitted, &cancel)
            .await
            .unwrap();
        assert!(tx.connection().unwrap().same_as(&conn));

        tx.commit(&cancel).await.unwrap();
        assert!(tx.connection().is_none());
        assert_eq!(tx.state(), TransactionState::Committed);
        // The caller still owns the connection
        assert!(conn.is_open());
        assert_eq!(driver.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_second_completion_is_invalid_state() {
        let driver = MockDriver::new();
        let cancel = CancellationToken::new();
        let conn = open_connection(&driver).await;

        let mut tx = Transaction::begin(&conn, IsolationLevel::Unspecified, &cancel)
            .await
            .unwrap();
        tx.rollback(&cancel).await.unwrap();
        let err = tx.commit(&cancel).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidTransactionState { .. }));
    }

    #[tokio::test]
    async fn test_begin_requires_open_connection() {
        let driver = MockDriver::new();
        let conn = Connection::new(driver.clone(), "A");
        let err = Transaction::begin(&conn, IsolationLevel::Unspecified, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
        assert_eq!(driver.stats().begins, 0);
    }

    #[tokio::test]
    async fn test_scoped_commit_closes_connection() {
        let driver = MockDriver::new();
        let cancel = CancellationToken::new();
        let conn = open_connection(&driver).await;

        let scope = ScopedTransaction::begin(conn.clone(), IsolationLevel::Serializable, &cancel)
            .await
            .unwrap();
        scope.commit(&cancel).await.unwrap();

        assert!(!conn.is_open());
        let stats = driver.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.closes, 1);
    }

    #[tokio::test]
    async fn test_scoped_rollback_closes_connection() {
        let driver = MockDriver::new();
        let cancel = CancellationToken::new();
        let conn = open_connection(&driver).await;

        let scope = ScopedTransaction::begin(conn.clone(), IsolationLevel::Unspecified, &cancel)
            .await
            .unwrap();
        scope.rollback(&cancel).await.unwrap();

        assert!(!conn.is_open());
        assert_eq!(driver.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_scoped_drop_rolls_back_and_closes() {
        let driver = MockDriver::new();
        let cancel = CancellationToken::new();
        let conn = open_connection(&driver).await;

        {
            let _scope =
                ScopedTransaction::begin(conn.clone(), IsolationLevel::Unspecified, &cancel)
                    .await
                    .unwrap();
        }

        for _ in 0..50 {
            if !conn.is_open() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!conn.is_open());
        assert_eq!(driver.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_cancelled_commit_leaves_transaction_active() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver).await;
        let mut tx =
            Transaction::begin(&conn, IsolationLevel::Unspecified, &CancellationToken::new())
                .await
                .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = tx.commit(&cancelled).await.unwrap_err();
        assert!(matches!(err, DbError::Cancelled { .. }));
        assert_eq!(tx.state(), TransactionState::Active);
        assert!(tx.connection().unwrap().same_as(&conn));
        assert_eq!(driver.stats().commits, 0);

        // The caller can still finish it
        tx.rollback(&CancellationToken::new()).await.unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(tx.connection().is_none());
        assert_eq!(driver.stats().rollbacks, 1);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_commit_while_reader_open_can_be_retried() {
        let driver = MockDriver::with_rows(vec![row("n", Value::Int(1))]);
        let cancel = CancellationToken::new();
        let conn = open_connection(&driver).await;
        let mut tx = Transaction::begin(&conn, IsolationLevel::Unspecified, &cancel)
            .await
            .unwrap();

        let mut command = Command::new(None);
        let ctx = CommandPreparer::prepare(
            &mut command,
            None,
            Some(&tx),
            &CommandSpec::text("SELECT n FROM t"),
            &cancel,
        )
        .await
        .unwrap();
        let reader = Executor::new()
            .execute_reader(&mut command, ctx, ReaderBehavior::default(), &cancel)
            .await
            .unwrap();

        let err = tx.commit(&cancel).await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionBusy { .. }));
        assert_eq!(tx.state(), TransactionState::Active);
        assert!(tx.connection().is_some());

        reader.close().await.unwrap();
        tx.commit(&cancel).await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(driver.stats().commits, 1);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_scoped_failed_commit_rolls_back_and_closes() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver).await;
        let scope = ScopedTransaction::begin(
            conn.clone(),
            IsolationLevel::Unspecified,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = scope.commit(&cancelled).await.unwrap_err();
        assert!(matches!(err, DbError::Cancelled { .. }));

        let stats = driver.stats();
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.rollbacks, 1);
        assert!(!conn.is_open());
    }
}
