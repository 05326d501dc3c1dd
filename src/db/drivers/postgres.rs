//! PostgreSQL driver.
//!
//! Procedures are invoked as `CALL name($1, ..., NULL)` with `NULL` in the
//! slot of every OUT parameter. The server answers with one row holding the
//! OUT and INOUT values in declaration order; it is kept on the session until
//! `read_outputs` copies it into the parameters.

use super::{Rendered, bound_value, detached, quote_ident};
use crate::db::driver::{Driver, RawConnectionGuard, RowStream, boxed_rows};
use crate::db::types::{RowToValues, column_names};
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, DatabaseType, Direction, IsolationLevel, Parameter, Statement, Value,
};
use async_stream::try_stream;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection};
use sqlx::query::Query;
use sqlx::{Connection, Executor as _, Postgres};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Raw connection plus the output row of the last procedure call.
#[derive(Debug)]
pub struct PgSession {
    conn: PgConnection,
    outputs: Option<Vec<Value>>,
}

fn render(statement: &Statement) -> Rendered<'_> {
    if statement.kind != CommandKind::StoredProcedure {
        return Rendered::plain(statement, '"');
    }

    let mut args = Vec::new();
    let mut slots = Vec::new();
    for param in &statement.parameters {
        match param.direction {
            Direction::In | Direction::InOut => {
                args.push(bound_value(param));
                slots.push(format!("${}", args.len()));
            }
            Direction::Out => slots.push("NULL".to_string()),
            Direction::ReturnValue => {}
        }
    }

    Rendered {
        setup: Vec::new(),
        sql: format!(
            "CALL {}({})",
            quote_ident(&statement.text, '"'),
            slots.join(", ")
        ),
        args,
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
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

fn build_query<'q>(sql: &'q str, args: &[&'q Value]) -> Query<'q, Postgres, PgArguments> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_param(query, *value))
}

async fn run_raw(conn: &mut PgConnection, sql: &str) -> DbResult<()> {
    (&mut *conn).execute(sql).await?;
    Ok(())
}

impl Driver for PostgresDriver {
    type Conn = PgSession;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn connect(&self, endpoint: &str) -> DbResult<PgSession> {
        let options = PgConnectOptions::from_str(endpoint).map_err(|e| {
            DbError::configuration(format!("Invalid PostgreSQL connection string: {e}"))
        })?;
        Ok(PgSession {
            conn: PgConnection::connect_with(&options).await?,
            outputs: None,
        })
    }

    async fn close(&self, session: PgSession) -> DbResult<()> {
        session.conn.close().await?;
        Ok(())
    }

    async fn begin(&self, session: &mut PgSession, isolation: IsolationLevel) -> DbResult<()> {
        let sql = match isolation.as_sql() {
            Some(level) => format!("BEGIN ISOLATION LEVEL {level}"),
            None => "BEGIN".to_string(),
        };
        run_raw(&mut session.conn, &sql).await
    }

    async fn commit(&self, session: &mut PgSession) -> DbResult<()> {
        run_raw(&mut session.conn, "COMMIT").await
    }

    async fn rollback(&self, session: &mut PgSession) -> DbResult<()> {
        run_raw(&mut session.conn, "ROLLBACK").await
    }

    async fn execute(&self, session: &mut PgSession, statement: &Statement) -> DbResult<u64> {
        session.outputs = None;
        let rendered = render(statement);
        let conn = &mut session.conn;

        if statement.kind == CommandKind::StoredProcedure {
            let row = build_query(&rendered.sql, &rendered.args)
                .fetch_optional(&mut *conn)
                .await?;
            session.outputs = row.map(|row| row.to_values());
            return Ok(0);
        }

        let result = if rendered.args.is_empty() {
            (&mut *conn).execute(rendered.sql.as_str()).await?
        } else {
            build_query(&rendered.sql, &rendered.args)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    fn fetch(&self, conn: RawConnectionGuard<PgSession>, statement: Statement) -> RowStream {
        boxed_rows(try_stream! {
            let mut guard = conn;
            let session = guard.as_mut().ok_or_else(|| detached(DatabaseType::PostgreSQL))?;
            session.outputs = None;
            let is_procedure = statement.kind == CommandKind::StoredProcedure;
            let rendered = render(&statement);

            let mut last = None;
            {
                let conn = &mut session.conn;
                let mut rows = if rendered.args.is_empty() && !is_procedure {
                    (&mut *conn).fetch(rendered.sql.as_str())
                } else {
                    build_query(&rendered.sql, &rendered.args).fetch(&mut *conn)
                };

                let mut columns = None;
                while let Some(row) = rows.try_next().await? {
                    let columns = columns.get_or_insert_with(|| column_names(&row));
                    let row = row.to_row(columns);
                    if is_procedure {
                        last = Some(row.values().to_vec());
                    }
                    yield row;
                }
            }
            session.outputs = last;
        })
    }

    async fn read_outputs(
        &self,
        session: &mut PgSession,
        parameters: &mut [Parameter],
    ) -> DbResult<()> {
        let Some(values) = session.outputs.take() else {
            return Ok(());
        };
        let targets = parameters
            .iter_mut()
            .filter(|p| matches!(p.direction, Direction::Out | Direction::InOut));
        for (param, value) in targets.zip(values) {
            param.value = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_procedure_numbers_inputs() {
        let statement = Statement {
            kind: CommandKind::StoredProcedure,
            text: "billing.close_period".into(),
            parameters: vec![
                Parameter::new("p_period", Some(Value::Int(202401))),
                Parameter::new("p_closed", None).with_direction(Direction::Out),
                Parameter::new("p_note", Some(Value::Text("eom".into())))
                    .with_direction(Direction::InOut),
            ],
        };
        let rendered = render(&statement);
        assert_eq!(
            rendered.sql,
            "CALL \"billing\".\"close_period\"($1, NULL, $2)"
        );
        assert_eq!(
            rendered.args,
            vec![&Value::Int(202401), &Value::Text("eom".into())]
        );
    }

    #[test]
    fn test_render_table_direct() {
        let statement = Statement {
            kind: CommandKind::TableDirect,
            text: "accounts".into(),
            parameters: vec![],
        };
        assert_eq!(render(&statement).sql, "SELECT * FROM \"accounts\"");
    }
}
