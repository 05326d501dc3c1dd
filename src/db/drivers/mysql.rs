//! MySQL / MariaDB driver.
//!
//! Stored procedures are called with `CALL`. Output parameters travel through
//! session variables named `@dbal_<name>`: they are reset (or seeded, for
//! in/out parameters) before the call and selected back by `read_outputs`.
//! MySQL procedures have no return value, so `ReturnValue` parameters stay unset.

use super::{Rendered, bound_value, detached, quote_ident};
use crate::db::driver::{Driver, RawConnectionGuard, RowStream, boxed_rows};
use crate::db::types::{RowToValues, column_names};
use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, DatabaseType, Direction, IsolationLevel, Parameter, Statement, Value};
use async_stream::try_stream;
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection};
use sqlx::query::Query;
use sqlx::{Connection, Executor as _, MySql};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Session variable carrying an output parameter.
fn session_variable(param: &Parameter) -> String {
    let name: String = param
        .bare_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("@dbal_{name}")
}

fn render(statement: &Statement) -> Rendered<'_> {
    if statement.kind != CommandKind::StoredProcedure {
        return Rendered::plain(statement, '`');
    }

    let mut setup = Vec::new();
    let mut args = Vec::new();
    let mut slots = Vec::new();
    for param in &statement.parameters {
        match param.direction {
            Direction::In => {
                slots.push("?".to_string());
                args.push(bound_value(param));
            }
            Direction::InOut => {
                let var = session_variable(param);
                setup.push((format!("SET {var} = ?"), vec![bound_value(param)]));
                slots.push(var);
            }
            Direction::Out => {
                let var = session_variable(param);
                setup.push((format!("SET {var} = NULL"), Vec::new()));
                slots.push(var);
            }
            Direction::ReturnValue => {}
        }
    }

    Rendered {
        setup,
        sql: format!(
            "CALL {}({})",
            quote_ident(&statement.text, '`'),
            slots.join(", ")
        ),
        args,
    }
}

fn bind_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

fn build_query<'q>(sql: &'q str, args: &[&'q Value]) -> Query<'q, MySql, MySqlArguments> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_param(query, *value))
}

async fn run_setup(conn: &mut MySqlConnection, rendered: &Rendered<'_>) -> DbResult<()> {
    for (sql, args) in &rendered.setup {
        if args.is_empty() {
            (&mut *conn).execute(sql.as_str()).await?;
        } else {
            build_query(sql, args).execute(&mut *conn).await?;
        }
    }
    Ok(())
}

async fn run_raw(conn: &mut MySqlConnection, sql: &str) -> DbResult<()> {
    (&mut *conn).execute(sql).await?;
    Ok(())
}

impl Driver for MySqlDriver {
    type Conn = MySqlConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn connect(&self, endpoint: &str) -> DbResult<MySqlConnection> {
        let options = MySqlConnectOptions::from_str(endpoint)
            .map_err(|e| DbError::configuration(format!("Invalid MySQL connection string: {e}")))?
            .charset("utf8mb4");
        Ok(MySqlConnection::connect_with(&options).await?)
    }

    async fn close(&self, conn: MySqlConnection) -> DbResult<()> {
        conn.close().await?;
        Ok(())
    }

    async fn begin(&self, conn: &mut MySqlConnection, isolation: IsolationLevel) -> DbResult<()> {
        if let Some(level) = isolation.as_sql() {
            run_raw(conn, &format!("SET TRANSACTION ISOLATION LEVEL {level}")).await?;
        }
        run_raw(conn, "START TRANSACTION").await
    }

    async fn commit(&self, conn: &mut MySqlConnection) -> DbResult<()> {
        run_raw(conn, "COMMIT").await
    }

    async fn rollback(&self, conn: &mut MySqlConnection) -> DbResult<()> {
        run_raw(conn, "ROLLBACK").await
    }

    async fn execute(&self, conn: &mut MySqlConnection, statement: &Statement) -> DbResult<u64> {
        let rendered = render(statement);
        run_setup(conn, &rendered).await?;

        let result = if rendered.args.is_empty() {
            (&mut *conn).execute(rendered.sql.as_str()).await?
        } else {
            build_query(&rendered.sql, &rendered.args)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    fn fetch(&self, conn: RawConnectionGuard<MySqlConnection>, statement: Statement) -> RowStream {
        boxed_rows(try_stream! {
            let mut guard = conn;
            let conn = guard.as_mut().ok_or_else(|| detached(DatabaseType::MySQL))?;
            let rendered = render(&statement);
            run_setup(conn, &rendered).await?;

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
        conn: &mut MySqlConnection,
        parameters: &mut [Parameter],
    ) -> DbResult<()> {
        let variables: Vec<(usize, String)> = parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p.direction, Direction::Out | Direction::InOut))
            .map(|(idx, p)| (idx, session_variable(p)))
            .collect();
        if variables.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "SELECT {}",
            variables
                .iter()
                .map(|(_, var)| var.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let row = (&mut *conn).fetch_one(sql.as_str()).await?;
        for ((idx, _), value) in variables.iter().zip(row.to_values()) {
            parameters[*idx].value = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedure(parameters: Vec<Parameter>) -> Statement {
        Statement {
            kind: CommandKind::StoredProcedure,
            text: "sp_order_total".into(),
            parameters,
        }
    }

    #[test]
    fn test_render_procedure_with_outputs() {
        let statement = procedure(vec![
            Parameter::new("@customer", Some(Value::Int(7))),
            Parameter::new("@total", None).with_direction(Direction::Out),
            Parameter::new("@counter", Some(Value::Int(1))).with_direction(Direction::InOut),
            Parameter::new("@ret", None).with_direction(Direction::ReturnValue),
        ]);
        let rendered = render(&statement);

        assert_eq!(
            rendered.sql,
            "CALL `sp_order_total`(?, @dbal_total, @dbal_counter)"
        );
        assert_eq!(rendered.args, vec![&Value::Int(7)]);
        assert_eq!(rendered.setup.len(), 2);
        assert_eq!(rendered.setup[0].0, "SET @dbal_total = NULL");
        assert_eq!(rendered.setup[1].0, "SET @dbal_counter = ?");
        assert_eq!(rendered.setup[1].1, vec![&Value::Int(1)]);
    }

    #[test]
    fn test_session_variable_is_sanitized() {
        let param = Parameter::new("@first-name", None);
        assert_eq!(session_variable(&param), "@dbal_first_name");
    }

    #[test]
    fn test_render_text_passthrough() {
        let statement = Statement {
            kind: CommandKind::Text,
            text: "UPDATE t SET a = ?".into(),
            parameters: vec![Parameter::new("@a", Some(Value::Int(1)))],
        };
        let rendered = render(&statement);
        assert_eq!(rendered.sql, "UPDATE t SET a = ?");
        assert!(rendered.setup.is_empty());
    }
}
