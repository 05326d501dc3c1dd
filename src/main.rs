//! dbal - Main entry point.
//!
//! Runs a single command through the database access layer and prints its
//! result: the affected row count, a scalar, or the rows as JSON lines.

use clap::Parser;
use dbal::config::{Config, ExecutionMode};
use dbal::db::{
    Driver, MySqlDriver, PostgresDriver, ReaderBehavior, SqlHelper, SqliteDriver, Transaction,
};
use dbal::error::DbResult;
use dbal::models::{CommandSpec, DatabaseType, Value};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout carries results, logs go to stderr
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run<D: Driver>(driver: D, config: &Config) -> DbResult<()> {
    let helper = SqlHelper::new(driver, config.layer_config())?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling command");
            on_interrupt.cancel();
        }
    });

    let spec = CommandSpec {
        kind: config.kind,
        text: config.command.clone(),
        parameters: config.parameters(),
        timeout_secs: None,
    };

    let scope = match config.isolation {
        Some(isolation) => Some(helper.begin_transaction(isolation, &cancel).await?),
        None => None,
    };
    let transaction = scope.as_ref().map(|scope| scope.transaction());
    let outcome = execute(&helper, config.mode, transaction, &spec, &cancel).await;

    if let Some(scope) = scope {
        match &outcome {
            Ok(()) => scope.commit(&cancel).await?,
            Err(_) => {
                if let Err(e) = scope.rollback(&cancel).await {
                    warn!(error = %e, "Rollback failed");
                }
            }
        }
    }
    outcome
}

async fn execute<D: Driver>(
    helper: &SqlHelper<D>,
    mode: ExecutionMode,
    transaction: Option<&Transaction<D>>,
    spec: &CommandSpec,
    cancel: &CancellationToken,
) -> DbResult<()> {
    match mode {
        ExecutionMode::NonQuery => {
            let (affected, outputs) = helper
                .execute_non_query_with_outputs(None, transaction, spec, cancel)
                .await?;
            let outputs: serde_json::Map<_, _> = outputs
                .iter()
                .map(|p| (p.name.clone(), p.value.as_ref().map_or(json!(null), Value::to_json)))
                .collect();
            println!("{}", json!({ "rows_affected": affected, "outputs": outputs }));
        }
        ExecutionMode::Scalar => {
            let value = helper.execute_scalar(None, transaction, spec, cancel).await?;
            println!("{}", value.map_or(json!(null), |v| v.to_json()));
        }
        ExecutionMode::Query => {
            let mut reader = helper
                .execute_reader(None, transaction, spec, ReaderBehavior::default(), cancel)
                .await?;
            let mut count = 0usize;
            while let Some(row) = reader.next(cancel).await? {
                println!("{}", serde_json::Value::Object(row.to_json_map()));
                count += 1;
            }
            reader.close().await?;
            info!(rows = count, "Query complete");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    if config.masters.is_empty() {
        eprintln!("Error: At least one master endpoint must be configured.");
        eprintln!();
        eprintln!("Usage: dbal --master <URL> [--replica <URL>] [OPTIONS] <COMMAND>");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  dbal -m sqlite:data.db \"SELECT * FROM users\"");
        eprintln!("  dbal -m mysql://app@db1/sales -r mysql://app@db2/sales --role replica \"SELECT 1\"");
        eprintln!("  dbal -m postgres://app@db/sales --mode non-query -k stored-procedure close_period -p 202401");
        std::process::exit(1);
    }

    info!(
        role = %config.role,
        mode = ?config.mode,
        "Starting dbal v{}",
        env!("CARGO_PKG_VERSION")
    );

    let database_type = config.layer_config().validate()?;
    let result = match database_type {
        DatabaseType::MySQL => run(MySqlDriver::new(), &config).await,
        DatabaseType::PostgreSQL => run(PostgresDriver::new(), &config).await,
        DatabaseType::SQLite => run(SqliteDriver::new(), &config).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e.into());
    }

    Ok(())
}
