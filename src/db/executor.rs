//! Command execution.
//!
//! This module runs prepared commands in the non-query, scalar and reader shapes:
//! - Command timeouts (per command, falling back to the executor default)
//! - Cancellation at every driver call
//! - Output parameter retrieval after the statement completes
//!
//! # Cleanup
//!
//! For non-query and scalar calls every exit path, including driver faults,
//! timeouts and cancellation, empties the command's parameter collection and
//! closes the connection if the call owns it. The original error is returned
//! unchanged; a failure while closing is only reported when the call itself
//! succeeded. Reader calls only clean up when the reader fails to open.

use crate::db::command::Command;
use crate::db::driver::{Driver, guarded};
use crate::db::preparer::ExecutionContext;
use crate::db::reader::{Reader, ReaderBehavior, ReaderHandle};
use crate::error::DbResult;
use crate::models::{Parameter, Value};
use futures_util::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs prepared commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    default_timeout: Option<Duration>,
}

impl Executor {
    /// Create an executor without a default command timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor whose commands time out after `timeout` unless they set their own.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            default_timeout: timeout,
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Timeout that applies to a command.
    pub fn timeout_for<D: Driver>(&self, command: &Command<D>) -> Option<Duration> {
        command.timeout().or(self.default_timeout)
    }

    /// Run a command and return the number of affected rows.
    pub async fn execute_non_query<D: Driver>(
        &self,
        command: &mut Command<D>,
        ctx: ExecutionContext<D>,
        cancel: &CancellationToken,
    ) -> DbResult<u64> {
        self.execute_non_query_with_outputs(command, ctx, cancel)
            .await
            .map(|(affected, _)| affected)
    }

    /// Run a command and return the number of affected rows together with its
    /// output-direction parameters, populated by the driver.
    pub async fn execute_non_query_with_outputs<D: Driver>(
        &self,
        command: &mut Command<D>,
        ctx: ExecutionContext<D>,
        cancel: &CancellationToken,
    ) -> DbResult<(u64, Vec<Parameter>)> {
        let result = self.run_non_query(command, &ctx, cancel).await;
        let outputs = finish(command, &ctx, result.is_ok()).await;
        let affected = result?;
        Ok((affected, outputs?))
    }

    /// Run a command and return the first column of its first row, `None` if
    /// it produced no rows.
    pub async fn execute_scalar<D: Driver>(
        &self,
        command: &mut Command<D>,
        ctx: ExecutionContext<D>,
        cancel: &CancellationToken,
    ) -> DbResult<Option<Value>> {
        let result = self.run_scalar(command, &ctx, cancel).await;
        let cleanup = finish(command, &ctx, result.is_ok()).await;
        let scalar = result?;
        cleanup?;
        Ok(scalar)
    }

    /// Open a row cursor over a command.
    ///
    /// Close propagation is forced on when the call owns its connection. The
    /// command keeps its parameters; if the reader cannot be opened they are
    /// cleared and an owned connection is closed.
    pub async fn execute_reader<D: Driver>(
        &self,
        command: &mut Command<D>,
        ctx: ExecutionContext<D>,
        behavior: ReaderBehavior,
        cancel: &CancellationToken,
    ) -> DbResult<Reader<D>> {
        let close_connection = behavior.close_connection || ctx.owns_connection();
        let limit = self.timeout_for(command);

        match Reader::open(command, ctx.connection(), close_connection, limit, cancel).await {
            Ok(reader) => Ok(reader),
            Err(e) => {
                if let Err(cleanup_err) = finish(command, &ctx, false).await {
                    warn!(error = %cleanup_err, "Failed to clean up after reader open failure");
                }
                Err(e)
            }
        }
    }

    /// Open a row cursor and keep the command alongside it for output parameters.
    pub async fn execute_reader_with_command<D: Driver>(
        &self,
        mut command: Command<D>,
        ctx: ExecutionContext<D>,
        behavior: ReaderBehavior,
        cancel: &CancellationToken,
    ) -> DbResult<ReaderHandle<D>> {
        let reader = self
            .execute_reader(&mut command, ctx, behavior, cancel)
            .await?;
        Ok(ReaderHandle::new(reader, command))
    }

    async fn run_non_query<D: Driver>(
        &self,
        command: &mut Command<D>,
        ctx: &ExecutionContext<D>,
        cancel: &CancellationToken,
    ) -> DbResult<u64> {
        let limit = self.timeout_for(command);
        let connection = ctx.connection();
        let driver = connection.driver();

        debug!(
            sql = %command.text(),
            params = command.parameters().len(),
            timeout_secs = ?limit.map(|t| t.as_secs()),
            "Executing non-query"
        );

        let mut slot = connection.lock()?;
        let raw = slot.as_mut().ok_or_else(|| connection.closed_error())?;
        let affected = guarded(
            limit,
            cancel,
            "non-query execution",
            driver.execute(raw, command.statement()),
        )
        .await?;

        if command.statement().has_outputs() {
            guarded(
                limit,
                cancel,
                "output parameter retrieval",
                driver.read_outputs(raw, command.parameters_mut()),
            )
            .await?;
        }
        Ok(affected)
    }

    async fn run_scalar<D: Driver>(
        &self,
        command: &mut Command<D>,
        ctx: &ExecutionContext<D>,
        cancel: &CancellationToken,
    ) -> DbResult<Option<Value>> {
        let limit = self.timeout_for(command);
        let connection = ctx.connection();
        let driver = connection.driver();

        debug!(
            sql = %command.text(),
            params = command.parameters().len(),
            timeout_secs = ?limit.map(|t| t.as_secs()),
            "Executing scalar"
        );

        let guard = connection.lock_owned()?;
        if guard.is_none() {
            return Err(connection.closed_error());
        }

        let mut rows = driver.fetch(guard, command.statement().clone());
        let first = guarded(limit, cancel, "scalar execution", async {
            rows.next().await.transpose()
        })
        .await?;
        // Releases the connection
        drop(rows);

        if command.statement().has_outputs() {
            let mut slot = connection.lock()?;
            let raw = slot.as_mut().ok_or_else(|| connection.closed_error())?;
            guarded(
                limit,
                cancel,
                "output parameter retrieval",
                driver.read_outputs(raw, command.parameters_mut()),
            )
            .await?;
        }

        Ok(first.and_then(|row| row.into_values().into_iter().next()))
    }
}

/// Empty the parameter collection and release an owned connection.
///
/// Returns the output parameters that were attached.
async fn finish<D: Driver>(
    command: &mut Command<D>,
    ctx: &ExecutionContext<D>,
    succeeded: bool,
) -> DbResult<Vec<Parameter>> {
    let parameters = command.clear_parameters();
    let released = ctx.release().await;

    if let Err(e) = &released {
        if succeeded {
            debug!(error = %e, "Failed to close owned connection");
        } else {
            warn!(error = %e, "Failed to close owned connection after a failed command");
        }
    }
    released?;

    Ok(parameters
        .into_iter()
        .filter(|p| p.direction.is_output())
        .collect())
}
