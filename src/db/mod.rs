//! Database access layer.
//!
//! This module provides:
//! - Endpoint selection by server role
//! - Connection handles and their factory
//! - Parameter construction and normalization
//! - Command preparation with connection-ownership tracking
//! - Execution, row cursors and transactions
//! - sqlx-backed drivers for MySQL, PostgreSQL and SQLite
//! - A blocking mirror of the async facade

pub mod blocking;
pub mod command;
pub mod connection;
pub mod driver;
pub mod drivers;
pub mod executor;
pub mod helper;
pub mod params;
pub mod preparer;
pub mod reader;
pub mod server_pool;
#[cfg(test)]
pub(crate) mod testing;
pub mod transaction;
pub mod types;

pub use blocking::{BlockingReader, BlockingReaderHandle, BlockingSqlHelper, BlockingTransaction};
pub use command::Command;
pub use connection::{Connection, ConnectionFactory};
pub use driver::{Driver, RowStream};
pub use drivers::{MySqlDriver, PostgresDriver, SqliteDriver};
pub use executor::Executor;
pub use helper::SqlHelper;
pub use params::ParameterBuilder;
pub use preparer::{CommandPreparer, ExecutionContext};
pub use reader::{Reader, ReaderBehavior, ReaderHandle};
pub use server_pool::{EndpointPool, PollingMode, ServerPool, ServerRole};
pub use transaction::{ScopedTransaction, Transaction};
