//! Integration tests for stored procedures and output parameters in MySQL.

use dbal::config::LayerConfig;
use dbal::db::{MySqlDriver, ReaderBehavior, SqlHelper};
use dbal::models::{CommandSpec, Direction, ParamType, Parameter, Value};
use tokio_util::sync::CancellationToken;

/// Test that requires a running MySQL database.
/// Set TEST_MYSQL_URL environment variable to run this test.
#[tokio::test]
async fn test_mysql_procedure_outputs() {
    let mysql_url = match std::env::var("TEST_MYSQL_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_URL not set");
            return;
        }
    };

    let helper = SqlHelper::new(MySqlDriver::new(), LayerConfig::new(vec![mysql_url])).unwrap();
    let cancel = CancellationToken::new();

    helper
        .execute_non_query(
            None,
            None,
            &CommandSpec::text("DROP PROCEDURE IF EXISTS dbal_add"),
            &cancel,
        )
        .await
        .unwrap();
    helper
        .execute_non_query(
            None,
            None,
            &CommandSpec::text(
                "CREATE PROCEDURE dbal_add(IN a INT, OUT total INT, INOUT counter INT) \
                 BEGIN SET total = a + 1; SET counter = counter * 2; SELECT a AS echoed; END",
            ),
            &cancel,
        )
        .await
        .unwrap();

    let spec = CommandSpec::procedure("dbal_add")
        .with_param(Parameter::new("@a", Some(Value::Int(41))))
        .with_param(Parameter::output("@total", ParamType::Integer))
        .with_param(
            Parameter::new("@counter", Some(Value::Int(3)))
                .with_type(ParamType::Integer)
                .with_direction(Direction::InOut),
        );

    let (_, outputs) = helper
        .execute_non_query_with_outputs(None, None, &spec, &cancel)
        .await
        .unwrap();
    assert_eq!(outputs[0].value.as_ref().and_then(Value::as_i64), Some(42));
    assert_eq!(outputs[1].value.as_ref().and_then(Value::as_i64), Some(6));

    // Outputs through a reader are available once the rows are consumed
    let mut handle = helper
        .execute_reader_with_command(None, None, &spec, ReaderBehavior::default(), &cancel)
        .await
        .unwrap();
    let row = handle.next(&cancel).await.unwrap().unwrap();
    assert_eq!(row.get_by_name("echoed").and_then(Value::as_i64), Some(41));
    while handle.next(&cancel).await.unwrap().is_some() {}
    let mut command = handle.finish(&cancel).await.unwrap();
    assert_eq!(command.output_value("@total").and_then(Value::as_i64), Some(42));
    command.clear_parameters();

    helper
        .execute_non_query(
            None,
            None,
            &CommandSpec::text("DROP PROCEDURE dbal_add"),
            &cancel,
        )
        .await
        .unwrap();
}
