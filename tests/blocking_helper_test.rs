//! Integration tests for the blocking facade against a SQLite file.

use dbal::config::LayerConfig;
use dbal::db::{BlockingSqlHelper, ReaderBehavior, SqliteDriver};
use dbal::models::{CommandSpec, IsolationLevel, Parameter, Value};
use tempfile::TempDir;

fn setup() -> (TempDir, BlockingSqlHelper<SqliteDriver>) {
    let dir = TempDir::new().unwrap();
    let endpoint = format!("sqlite:{}", dir.path().join("blocking.sqlite").display());
    let helper = BlockingSqlHelper::new(SqliteDriver::new(), LayerConfig::new(vec![endpoint])).unwrap();
    helper
        .execute_non_query(
            None,
            None,
            &CommandSpec::text("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)"),
        )
        .unwrap();
    (dir, helper)
}

fn insert(body: &str) -> CommandSpec {
    CommandSpec::text("INSERT INTO notes (body) VALUES (?)")
        .with_param(Parameter::new("@body", Some(Value::from(body))))
}

fn count(helper: &BlockingSqlHelper<SqliteDriver>) -> Option<Value> {
    helper
        .execute_scalar(None, None, &CommandSpec::text("SELECT COUNT(*) FROM notes"))
        .unwrap()
}

#[test]
fn test_blocking_write_and_read() {
    let (_dir, helper) = setup();
    assert_eq!(helper.execute_non_query(None, None, &insert("one")).unwrap(), 1);
    assert_eq!(helper.execute_non_query(None, None, &insert("two")).unwrap(), 1);

    let mut reader = helper
        .execute_reader(
            None,
            None,
            &CommandSpec::text("SELECT body FROM notes ORDER BY id"),
            ReaderBehavior::default(),
        )
        .unwrap();
    let first = reader.next().unwrap().unwrap();
    assert_eq!(first.get(0), Some(&Value::from("one")));
    let connection = reader.connection().cloned().unwrap();
    reader.close().unwrap();
    assert!(!connection.is_open());

    assert_eq!(count(&helper), Some(Value::Int(2)));
}

#[test]
fn test_blocking_transaction_commit() {
    let (_dir, helper) = setup();
    let tx = helper.begin_transaction(IsolationLevel::Unspecified).unwrap();
    helper
        .execute_non_query(None, tx.transaction(), &insert("kept"))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(count(&helper), Some(Value::Int(1)));
}

#[test]
fn test_blocking_transaction_dropped_rolls_back() {
    let (_dir, helper) = setup();
    {
        let tx = helper.begin_transaction(IsolationLevel::Unspecified).unwrap();
        helper
            .execute_non_query(None, tx.transaction(), &insert("lost"))
            .unwrap();
    }

    assert_eq!(count(&helper), Some(Value::Int(0)));
}
