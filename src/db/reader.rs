//! Row cursors.
//!
//! A [`Reader`] streams the rows of one command and holds its connection
//! exclusively until it is closed. With close propagation on, closing the
//! reader also closes the connection; the flag is forced on when the layer
//! opened the connection for the call.
//!
//! [`ReaderHandle`] pairs a reader with its command so output parameters can
//! be read once the rows have been consumed.

use crate::db::command::Command;
use crate::db::connection::Connection;
use crate::db::driver::{Driver, RowStream, guarded};
use crate::error::DbResult;
use crate::models::Row;
use futures_util::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Flags passed when opening a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderBehavior {
    /// Close the connection when the reader is closed
    pub close_connection: bool,
}

impl ReaderBehavior {
    pub fn close_connection() -> Self {
        Self {
            close_connection: true,
        }
    }
}

pub struct Reader<D: Driver> {
    rows: Option<RowStream>,
    pending: Option<Row>,
    connection: Connection<D>,
    close_connection: bool,
    limit: Option<Duration>,
    closed: bool,
}

impl<D: Driver> std::fmt::Debug for Reader<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("connection", &self.connection)
            .field("close_connection", &self.close_connection)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Reader<D> {
    /// Start the command's cursor and wait for its first row, so execution
    /// errors surface here rather than on the first `next`.
    pub(crate) async fn open(
        command: &Command<D>,
        connection: &Connection<D>,
        close_connection: bool,
        limit: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DbResult<Self> {
        let guard = connection.lock_owned()?;
        if guard.is_none() {
            return Err(connection.closed_error());
        }

        debug!(
            sql = %command.text(),
            params = command.parameters().len(),
            close_connection,
            "Opening reader"
        );

        let mut rows = connection
            .driver()
            .fetch(guard, command.statement().clone());
        let pending = guarded(limit, cancel, "reader open", async {
            rows.next().await.transpose()
        })
        .await?;

        Ok(Self {
            rows: Some(rows),
            pending,
            connection: connection.clone(),
            close_connection,
            limit,
            closed: false,
        })
    }

    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }

    /// Whether closing the reader closes the connection.
    pub fn closes_connection(&self) -> bool {
        self.close_connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next row, `None` once the cursor is exhausted.
    pub async fn next(&mut self, cancel: &CancellationToken) -> DbResult<Option<Row>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let next = guarded(self.limit, cancel, "row fetch", async {
            rows.next().await.transpose()
        })
        .await?;
        if next.is_none() {
            self.rows = None;
        }
        Ok(next)
    }

    /// Read all remaining rows.
    pub async fn collect(&mut self, cancel: &CancellationToken) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next(cancel).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the cursor, and the connection if close propagation is on.
    pub async fn close(mut self) -> DbResult<()> {
        self.close_inner().await
    }

    /// Drop the cursor and give the connection back.
    fn release_rows(&mut self) {
        self.pending = None;
        self.rows = None;
    }

    async fn close_inner(&mut self) -> DbResult<()> {
        if self.closed {
            return Ok(());
        }
        self.release_rows();
        self.closed = true;
        if self.close_connection {
            self.connection.close().await?;
        }
        debug!(
            connection_id = %self.connection.id(),
            closed_connection = self.close_connection,
            "Reader closed"
        );
        Ok(())
    }
}

impl<D: Driver> Drop for Reader<D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.release_rows();
        if !self.close_connection {
            return;
        }

        let connection = self.connection.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = connection.close().await {
                        warn!(error = %e, "Failed to close connection of dropped reader");
                    }
                });
                warn!("Reader dropped without close() - closing its connection in the background");
            }
            Err(_) => warn!("Reader dropped outside a runtime; its connection was not closed"),
        }
    }
}

/// A reader together with the command it runs.
///
/// Output parameters are only available after the rows have been consumed:
/// call [`ReaderHandle::finish`], read them from the returned command, then
/// clear its parameters.
#[derive(Debug)]
pub struct ReaderHandle<D: Driver> {
    reader: Reader<D>,
    command: Command<D>,
}

impl<D: Driver> ReaderHandle<D> {
    pub(crate) fn new(reader: Reader<D>, command: Command<D>) -> Self {
        Self { reader, command }
    }

    pub fn reader(&mut self) -> &mut Reader<D> {
        &mut self.reader
    }

    pub fn command(&self) -> &Command<D> {
        &self.command
    }

    pub async fn next(&mut self, cancel: &CancellationToken) -> DbResult<Option<Row>> {
        self.reader.next(cancel).await
    }

    /// Close the cursor, populate output parameters, then close the connection
    /// if close propagation is on. The command keeps its parameters.
    pub async fn finish(self, cancel: &CancellationToken) -> DbResult<Command<D>> {
        let Self {
            mut reader,
            mut command,
        } = self;
        reader.release_rows();

        let outputs = if command.statement().has_outputs() {
            let connection = reader.connection();
            match connection.lock() {
                Ok(mut slot) => match slot.as_mut() {
                    Some(raw) => {
                        guarded(
                            reader.limit,
                            cancel,
                            "output parameter retrieval",
                            connection.driver().read_outputs(raw, command.parameters_mut()),
                        )
                        .await
                    }
                    None => Err(connection.closed_error()),
                },
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };

        let closed = reader.close().await;
        outputs?;
        closed?;
        Ok(command)
    }
}
