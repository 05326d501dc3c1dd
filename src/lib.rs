//! Relational database access layer.
//!
//! This library resolves connections from master and replica endpoint lists,
//! builds and normalizes command parameters, and runs commands while tracking
//! whether the layer or the caller owns the connection (SQLite, PostgreSQL,
//! MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, LayerConfig};
pub use db::{BlockingSqlHelper, SqlHelper};
pub use error::{DbError, DbResult};
