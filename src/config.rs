//! Configuration handling for the database access layer.
//!
//! [`LayerConfig`] is what the layer is built from: the master and replica
//! endpoint lists, the default role and polling mode, and the default command
//! timeout. The `dbal` binary fills it from CLI arguments and environment
//! variables through [`Config`].

use crate::db::server_pool::{PollingMode, ServerRole};
use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, DatabaseType, IsolationLevel, Parameter, Value, mask_endpoint};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Endpoint lists and defaults the layer is constructed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Writable endpoints. At least one is required.
    pub masters: Vec<String>,
    #[serde(default)]
    pub replicas: Vec<String>,
    /// Role used when a call does not name an endpoint
    #[serde(default)]
    pub role: ServerRole,
    #[serde(default)]
    pub polling: PollingMode,
    /// Default command timeout; `None` or zero disables it
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl LayerConfig {
    pub fn new(masters: Vec<String>) -> Self {
        Self {
            masters,
            ..Self::default()
        }
    }

    pub fn with_replicas(mut self, replicas: Vec<String>) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_role(mut self, role: ServerRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_polling(mut self, polling: PollingMode) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_command_timeout(mut self, timeout_secs: u64) -> Self {
        self.command_timeout_secs = Some(timeout_secs);
        self
    }

    /// Get the default command timeout as a Duration.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Check the endpoint lists and return the backend they all point at.
    ///
    /// Every endpoint must be a non-blank URL of a supported backend, and all
    /// endpoints must share one backend.
    pub fn validate(&self) -> DbResult<DatabaseType> {
        if self.masters.is_empty() {
            return Err(DbError::configuration(
                "at least one master endpoint is required",
            ));
        }
        if self.role == ServerRole::Replica && self.replicas.is_empty() {
            return Err(DbError::configuration(
                "default role is replica but no replica endpoints are configured",
            ));
        }

        let mut backend = None;
        for endpoint in self.masters.iter().chain(&self.replicas) {
            let database_type = Self::endpoint_type(endpoint)?;
            match backend {
                None => backend = Some(database_type),
                Some(existing) if existing != database_type => {
                    return Err(DbError::configuration(format!(
                        "endpoints mix {existing} and {database_type}"
                    )));
                }
                Some(_) => {}
            }
        }

        backend.ok_or_else(|| DbError::configuration("no endpoints configured"))
    }

    fn endpoint_type(endpoint: &str) -> DbResult<DatabaseType> {
        if endpoint.trim().is_empty() {
            return Err(DbError::configuration("endpoint cannot be blank"));
        }
        Url::parse(endpoint).map_err(|e| {
            DbError::configuration(format!(
                "invalid endpoint '{}': {e}",
                mask_endpoint(endpoint)
            ))
        })?;
        DatabaseType::from_connection_string(endpoint).ok_or_else(|| {
            DbError::configuration(format!(
                "unsupported endpoint '{}'",
                mask_endpoint(endpoint)
            ))
        })
    }
}

/// What the binary does with the result of its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExecutionMode {
    /// Print the affected row count and output parameters
    NonQuery,
    /// Print the first column of the first row
    Scalar,
    /// Print every row as JSON
    #[default]
    Query,
}

/// Command-line configuration for the `dbal` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbal",
    about = "Run one command through the database access layer",
    version,
    author
)]
pub struct Config {
    /// Master (writable) endpoints.
    /// Can be specified multiple times or as comma-separated values.
    #[arg(
        short = 'm',
        long = "master",
        value_name = "URL",
        env = "DBAL_MASTER",
        value_delimiter = ','
    )]
    pub masters: Vec<String>,

    /// Replica (read-only) endpoints.
    #[arg(
        short = 'r',
        long = "replica",
        value_name = "URL",
        env = "DBAL_REPLICA",
        value_delimiter = ','
    )]
    pub replicas: Vec<String>,

    /// Endpoint group used for the command
    #[arg(long, value_enum, default_value = "master", env = "DBAL_ROLE")]
    pub role: ServerRole,

    /// Endpoint selection within a group
    #[arg(long, value_enum, default_value = "round-robin", env = "DBAL_POLLING")]
    pub polling: PollingMode,

    /// Command timeout in seconds (0 disables it)
    #[arg(
        long,
        default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS,
        env = "DBAL_COMMAND_TIMEOUT"
    )]
    pub command_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DBAL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBAL_JSON_LOGS")]
    pub json_logs: bool,

    /// How the command text is interpreted
    #[arg(short = 'k', long, value_enum, default_value = "text")]
    pub kind: CommandKind,

    /// What to do with the result
    #[arg(long, value_enum, default_value = "query")]
    pub mode: ExecutionMode,

    /// Run the command inside a transaction with this isolation level and commit it
    #[arg(long, value_enum)]
    pub isolation: Option<IsolationLevel>,

    /// Positional parameter values, in order. JSON literals keep their type.
    #[arg(short = 'p', long = "param", value_name = "VALUE")]
    pub params: Vec<String>,

    /// SQL text, procedure name or table name
    #[arg(value_name = "COMMAND")]
    pub command: String,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            masters: Vec::new(),
            replicas: Vec::new(),
            role: ServerRole::Master,
            polling: PollingMode::RoundRobin,
            command_timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            kind: CommandKind::Text,
            mode: ExecutionMode::Query,
            isolation: None,
            params: Vec::new(),
            command: String::new(),
        }
    }

    /// Build the layer configuration from the endpoint arguments.
    pub fn layer_config(&self) -> LayerConfig {
        LayerConfig {
            masters: self.masters.clone(),
            replicas: self.replicas.clone(),
            role: self.role,
            polling: self.polling,
            command_timeout_secs: Some(self.command_timeout),
        }
    }

    /// Parameters for the command, named `p1`, `p2`, ... in order.
    pub fn parameters(&self) -> Vec<Parameter> {
        self.params
            .iter()
            .enumerate()
            .map(|(idx, literal)| {
                Parameter::new(format!("p{}", idx + 1), Some(Value::from_literal(literal)))
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.role, ServerRole::Master);
        assert_eq!(config.polling, PollingMode::RoundRobin);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert_eq!(config.mode, ExecutionMode::Query);
        assert!(config.masters.is_empty());
    }

    #[test]
    fn test_parse_cli_arguments() {
        let config = Config::try_parse_from([
            "dbal",
            "-m",
            "mysql://a/app,mysql://b/app",
            "--replica",
            "mysql://c/app",
            "--role",
            "any",
            "--polling",
            "fixed",
            "--mode",
            "non-query",
            "-k",
            "stored-procedure",
            "-p",
            "7",
            "-p",
            "hello",
            "sp_touch",
        ])
        .unwrap();

        assert_eq!(config.masters, endpoints(&["mysql://a/app", "mysql://b/app"]));
        assert_eq!(config.replicas, endpoints(&["mysql://c/app"]));
        assert_eq!(config.role, ServerRole::Any);
        assert_eq!(config.polling, PollingMode::Fixed);
        assert_eq!(config.mode, ExecutionMode::NonQuery);
        assert_eq!(config.kind, CommandKind::StoredProcedure);
        assert_eq!(config.command, "sp_touch");

        let params = config.parameters();
        assert_eq!(params[0].name, "p1");
        assert_eq!(params[0].value, Some(Value::Int(7)));
        assert_eq!(params[1].value, Some(Value::Text("hello".into())));
    }

    #[test]
    fn test_layer_config_from_cli() {
        let mut config = Config::default();
        config.masters = endpoints(&["sqlite:a.db"]);
        config.command_timeout = 0;

        let layer = config.layer_config();
        assert_eq!(layer.masters, endpoints(&["sqlite:a.db"]));
        assert_eq!(layer.command_timeout(), None);
    }

    #[test]
    fn test_command_timeout_duration() {
        let layer = LayerConfig::new(endpoints(&["sqlite:a.db"])).with_command_timeout(5);
        assert_eq!(layer.command_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(LayerConfig::default().command_timeout(), None);
    }

    #[test]
    fn test_validate_returns_backend() {
        let layer = LayerConfig::new(endpoints(&["postgres://db1/app"]))
            .with_replicas(endpoints(&["postgresql://db2/app"]));
        assert_eq!(layer.validate().unwrap(), DatabaseType::PostgreSQL);
    }

    #[test]
    fn test_validate_requires_master() {
        let layer = LayerConfig::default().with_replicas(endpoints(&["mysql://r/app"]));
        assert!(matches!(
            layer.validate().unwrap_err(),
            DbError::Configuration { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_blank_endpoint() {
        let layer = LayerConfig::new(endpoints(&["mysql://a/app", "  "]));
        assert!(matches!(
            layer.validate().unwrap_err(),
            DbError::Configuration { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_mixed_backends() {
        let layer = LayerConfig::new(endpoints(&["mysql://a/app"]))
            .with_replicas(endpoints(&["postgres://b/app"]));
        let err = layer.validate().unwrap_err();
        assert!(err.to_string().contains("mix"));
    }

    #[test]
    fn test_validate_rejects_unknown_scheme() {
        let layer = LayerConfig::new(endpoints(&["oracle://a/app"]));
        assert!(layer.validate().is_err());
    }

    #[test]
    fn test_validate_replica_role_needs_replicas() {
        let layer =
            LayerConfig::new(endpoints(&["mysql://a/app"])).with_role(ServerRole::Replica);
        assert!(layer.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let layer: LayerConfig =
            serde_json::from_str(r#"{"masters": ["sqlite:a.db"], "polling": "fixed"}"#).unwrap();
        assert_eq!(layer.polling, PollingMode::Fixed);
        assert_eq!(layer.role, ServerRole::Master);
        assert!(layer.replicas.is_empty());
    }
}
