//! sqlx-backed [`Driver`](crate::db::Driver) implementations.
//!
//! Each backend renders a [`Statement`] into SQL text plus positional
//! arguments, binds them the way sqlx expects for that database and decodes
//! result rows through [`crate::db::types`].
//!
//! Statements without arguments are sent as raw SQL to avoid prepared
//! statement issues (some SQL such as `CREATE PROCEDURE` cannot be prepared).

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use crate::error::DbError;
use crate::models::{CommandKind, DatabaseType, Parameter, Statement, Value};

static NULL: Value = Value::Null;

/// Value sent for a parameter. Inputs are normalized before they get here;
/// anything still unset goes as NULL.
pub(crate) fn bound_value(param: &Parameter) -> &Value {
    param.value.as_ref().unwrap_or(&NULL)
}

/// Quote a possibly schema-qualified identifier.
pub(crate) fn quote_ident(name: &str, quote: char) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim().trim_matches(['`', '"', '[', ']']);
            let escaped = part.replace(quote, &format!("{quote}{quote}"));
            format!("{quote}{escaped}{quote}")
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Error for a raw connection slot emptied while a statement was pending.
pub(crate) fn detached(db: DatabaseType) -> DbError {
    DbError::connection_closed(db.display_name())
}

/// A statement rendered for one backend.
#[derive(Debug)]
pub(crate) struct Rendered<'a> {
    /// Statements that must run first, with their arguments
    pub setup: Vec<(String, Vec<&'a Value>)>,
    pub sql: String,
    pub args: Vec<&'a Value>,
}

impl<'a> Rendered<'a> {
    /// Render a text or table-direct command.
    ///
    /// Text is sent as written with the input parameters as positional
    /// arguments. A table name becomes `SELECT * FROM <quoted name>`.
    pub fn plain(statement: &'a Statement, quote: char) -> Self {
        match statement.kind {
            CommandKind::TableDirect => Self {
                setup: Vec::new(),
                sql: format!("SELECT * FROM {}", quote_ident(&statement.text, quote)),
                args: Vec::new(),
            },
            _ => Self {
                setup: Vec::new(),
                sql: statement.text.clone(),
                args: statement.inputs().map(bound_value).collect(),
            },
        }
    }
}
