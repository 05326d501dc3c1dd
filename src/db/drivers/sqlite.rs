//! SQLite driver.
//!
//! SQLite has no stored procedures: such commands fail with
//! [`DbError::InvalidArgument`] and there are never output values to read.

use super::{Rendered, detached};
use crate::db::driver::{Driver, RawConnectionGuard, RowStream, boxed_rows};
use crate::db::types::{RowToValues, column_names};
use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, DatabaseType, IsolationLevel, Parameter, Statement, Value};
use async_stream::try_stream;
use futures_util::TryStreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Executor as _, Sqlite};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

fn render(statement: &Statement) -> DbResult<Rendered<'_>> {
    if statement.kind == CommandKind::StoredProcedure {
        return Err(DbError::invalid_argument(format!(
            "SQLite does not support stored procedures (called '{}')",
            statement.text
        )));
    }
    Ok(Rendered::plain(statement, '"'))
}

fn bind_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        Value::Json(v) => query.bind(v.to_string()),
    }
}

fn build_query<'q>(sql: &'q str, args: &[&'q Value]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_param(query, *value))
}

async fn run_raw(conn: &mut SqliteConnection, sql: &str) -> DbResult<()> {
    (&mut *conn).execute(sql).await?;
    Ok(())
}

impl Driver for SqliteDriver {
    type Conn = SqliteConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self, endpoint: &str) -> DbResult<SqliteConnection> {
        let options = SqliteConnectOptions::from_str(endpoint)
            .map_err(|e| DbError::configuration(format!("Invalid SQLite connection string: {e}")))?
            .create_if_missing(true);
        Ok(SqliteConnection::connect_with(&options).await?)
    }

    async fn close(&self, conn: SqliteConnection) -> DbResult<()> {
        conn.close().await?;
        Ok(())
    }

    async fn begin(&self, conn: &mut SqliteConnection, isolation: IsolationLevel) -> DbResult<()> {
        // SQLite transactions are serializable; IMMEDIATE takes the write lock up front
        let sql = match isolation {
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            _ => "BEGIN",
        };
        run_raw(conn, sql).await
    }

    async fn commit(&self, conn: &mut SqliteConnection) -> DbResult<()> {
        run_raw(conn, "COMMIT").await
    }

    async fn rollback(&self, conn: &mut SqliteConnection) -> DbResult<()> {
        run_raw(conn, "ROLLBACK").await
    }

    async fn execute(&self, conn: &mut SqliteConnection, statement: &Statement) -> DbResult<u64> {
        let rendered = render(statement)?;
        let result = if rendered.args.is_empty() {
            (&mut *conn).execute(rendered.sql.as_str()).await?
        } else {
            build_query(&rendered.sql, &rendered.args)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    fn fetch(&self, conn: RawConnectionGuard<SqliteConnection>, statement: Statement) -> RowStream {
        boxed_rows(try_stream! {
            let mut guard = conn;
            let conn = guard.as_mut().ok_or_else(|| detached(DatabaseType::SQLite))?;
            let rendered = render(&statement)?;

            let mut rows = if rendered.args.is_empty() {
                (&mut *conn).fetch(rendered.sql.as_str())
            } else {
                build_query(&rendered.sql, &rendered.args).fetch(&mut *conn)
            };

            let mut columns = None;
            while let Some(row) = rows.try_next().await? {
                let columns = columns.get_or_insert_with(|| column_names(&row));
                yield row.to_row(columns);
            }
        })
    }

    async fn read_outputs(
        &self,
        _conn: &mut SqliteConnection,
        _parameters: &mut [Parameter],
    ) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedures_rejected() {
        let statement = Statement {
            kind: CommandKind::StoredProcedure,
            text: "sp_anything".into(),
            parameters: vec![],
        };
        let err = render(&statement).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let driver = SqliteDriver::new();
        let mut conn = driver.connect("sqlite::memory:").await.unwrap();

        let create = Statement {
            kind: CommandKind::Text,
            text: "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)".into(),
            parameters: vec![],
        };
        driver.execute(&mut conn, &create).await.unwrap();

        let insert = Statement {
            kind: CommandKind::Text,
            text: "INSERT INTO t (name) VALUES (?), (?)".into(),
            parameters: vec![
                Parameter::new("@a", Some(Value::Text("alpha".into()))),
                Parameter::new("@b", Some(Value::Null)),
            ],
        };
        assert_eq!(driver.execute(&mut conn, &insert).await.unwrap(), 2);

        driver.close(conn).await.unwrap();
    }
}
