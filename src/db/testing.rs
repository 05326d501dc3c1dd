//! Recording driver for unit tests.

use crate::db::driver::{Driver, RawConnectionGuard, RowStream, boxed_rows};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, IsolationLevel, Parameter, Row, Statement, Value};
use async_stream::try_stream;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
pub struct MockStats {
    pub connects: usize,
    pub closes: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub output_reads: usize,
    pub executed: Vec<String>,
    pub connected_endpoints: Vec<String>,
    /// Parameters as the driver received them on the last statement
    pub last_parameters: Vec<Parameter>,
}

#[derive(Debug, Default)]
struct MockState {
    stats: MockStats,
    rows: Vec<Row>,
    affected: u64,
    fail_connect: bool,
    fail_execute: bool,
    next_conn_id: usize,
}

#[derive(Debug)]
pub struct MockConn {
    pub id: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        let driver = Self::new();
        driver.state.lock().unwrap().rows = rows;
        driver
    }

    pub fn set_affected(&self, affected: u64) {
        self.state.lock().unwrap().affected = affected;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    pub fn set_fail_execute(&self, fail: bool) {
        self.state.lock().unwrap().fail_execute = fail;
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().unwrap().stats.clone()
    }

    /// Total I/O calls seen by the driver.
    pub fn io_calls(&self) -> usize {
        let stats = self.stats();
        stats.connects + stats.closes + stats.begins + stats.executed.len()
    }

    fn record(&self, statement: &Statement) -> bool {
        let mut state = self.state.lock().unwrap();
        state.stats.executed.push(statement.text.clone());
        state.stats.last_parameters = statement.parameters.clone();
        state.fail_execute
    }
}

fn mock_failure(what: &str) -> DbError {
    DbError::Provider(sqlx::Error::Protocol(format!("mock {what} failure")))
}

/// Build a single-column row.
pub fn row(column: &str, value: Value) -> Row {
    Row::new(Arc::from(vec![column.to_string()]), vec![value])
}

impl Driver for MockDriver {
    type Conn = MockConn;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self, endpoint: &str) -> DbResult<MockConn> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            return Err(mock_failure("connect"));
        }
        state.stats.connects += 1;
        state.stats.connected_endpoints.push(endpoint.to_string());
        state.next_conn_id += 1;
        Ok(MockConn {
            id: state.next_conn_id,
        })
    }

    async fn close(&self, _conn: MockConn) -> DbResult<()> {
        self.state.lock().unwrap().stats.closes += 1;
        Ok(())
    }

    async fn begin(&self, _conn: &mut MockConn, _isolation: IsolationLevel) -> DbResult<()> {
        self.state.lock().unwrap().stats.begins += 1;
        Ok(())
    }

    async fn commit(&self, _conn: &mut MockConn) -> DbResult<()> {
        self.state.lock().unwrap().stats.commits += 1;
        Ok(())
    }

    async fn rollback(&self, _conn: &mut MockConn) -> DbResult<()> {
        self.state.lock().unwrap().stats.rollbacks += 1;
        Ok(())
    }

    async fn execute(&self, _conn: &mut MockConn, statement: &Statement) -> DbResult<u64> {
        if self.record(statement) {
            return Err(mock_failure("execute"));
        }
        Ok(self.state.lock().unwrap().affected)
    }

    fn fetch(&self, conn: RawConnectionGuard<MockConn>, statement: Statement) -> RowStream {
        let fail = self.record(&statement);
        let rows = self.state.lock().unwrap().rows.clone();
        boxed_rows(try_stream! {
            let _conn = conn;
            if fail {
                Err::<(), DbError>(mock_failure("fetch"))?;
            }
            for row in rows {
                yield row;
            }
        })
    }

    async fn read_outputs(&self, _conn: &mut MockConn, parameters: &mut [Parameter]) -> DbResult<()> {
        self.state.lock().unwrap().stats.output_reads += 1;
        for param in parameters.iter_mut().filter(|p| p.direction.is_output()) {
            param.value = Some(Value::Int(42));
        }
        Ok(())
    }
}
