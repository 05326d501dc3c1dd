//! Driver capability contract.
//!
//! Everything backend-specific sits behind [`Driver`]: opening and closing raw
//! connections, transaction control, statement execution and output parameter
//! retrieval. The engine (preparer, executor, reader) is written once against it.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, IsolationLevel, Parameter, Row, Statement};
use futures_util::Stream;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

/// Rows produced by a cursor.
pub type RowStream = BoxStream<'static, DbResult<Row>>;

/// Exclusive hold on a raw connection slot, owned by a row stream while it runs.
/// The slot is `None` once the connection has been closed.
pub type RawConnectionGuard<C> = OwnedMutexGuard<Option<C>>;

pub trait Driver: Clone + Send + Sync + 'static {
    /// Backend connection type.
    type Conn: Send + 'static;

    fn database_type(&self) -> DatabaseType;

    /// Open a raw connection to an endpoint.
    fn connect(&self, endpoint: &str) -> impl Future<Output = DbResult<Self::Conn>> + Send;

    /// Close a raw connection.
    fn close(&self, conn: Self::Conn) -> impl Future<Output = DbResult<()>> + Send;

    fn begin(
        &self,
        conn: &mut Self::Conn,
        isolation: IsolationLevel,
    ) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&self, conn: &mut Self::Conn) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&self, conn: &mut Self::Conn) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        conn: &mut Self::Conn,
        statement: &Statement,
    ) -> impl Future<Output = DbResult<u64>> + Send;

    /// Run a statement and stream its rows. The stream keeps the connection guard
    /// until it is dropped.
    fn fetch(&self, conn: RawConnectionGuard<Self::Conn>, statement: Statement) -> RowStream;

    /// Populate output-direction parameters after the statement (and any cursor
    /// over it) has completed.
    fn read_outputs(
        &self,
        conn: &mut Self::Conn,
        parameters: &mut [Parameter],
    ) -> impl Future<Output = DbResult<()>> + Send;
}

/// Box a row stream, fixing its error type.
pub(crate) fn boxed_rows<S>(stream: S) -> RowStream
where
    S: Stream<Item = DbResult<Row>> + Send + 'static,
{
    Box::pin(stream)
}

/// Run a future unless the token fires first.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    future: F,
) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::cancelled(operation)),
        result = future => result,
    }
}

/// Run a future under an optional time limit, unless the token fires first.
pub(crate) async fn guarded<T, F>(
    limit: Option<Duration>,
    cancel: &CancellationToken,
    operation: &str,
    future: F,
) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, cancellable(cancel, operation, future))
            .await
            .unwrap_or_else(|_| Err(DbError::timeout(operation, limit.as_secs()))),
        None => cancellable(cancel, operation, future).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_passes_result() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, "noop", async { Ok::<_, DbError>(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_cancellable_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, "open", std::future::pending::<DbResult<()>>()).await;
        assert!(matches!(result, Err(DbError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_times_out() {
        let cancel = CancellationToken::new();
        let result = guarded(
            Some(Duration::from_secs(2)),
            &cancel,
            "execute",
            std::future::pending::<DbResult<()>>(),
        )
        .await;
        match result {
            Err(DbError::Timeout { elapsed_secs, .. }) => assert_eq!(elapsed_secs, 2),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
