//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Validation errors are raised before any I/O; driver errors are carried through
//! unchanged in [`DbError::Provider`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Invalid transaction state: {message}")]
    InvalidTransactionState { message: String },

    #[error("Conflicting resources: {message}")]
    ConflictingResources { message: String },

    #[error("Type mismatch for parameter '{parameter}': expected {expected}, found {found}")]
    TypeMismatch {
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Provider error: {0}")]
    Provider(#[from] sqlx::Error),

    #[error("Connection to '{endpoint}' is busy with an open reader")]
    ConnectionBusy { endpoint: String },

    #[error("Connection to '{endpoint}' is closed")]
    ConnectionClosed { endpoint: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },
}

/// Error category, used to look up presentation text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    InvalidTransactionState,
    ConflictingResources,
    TypeMismatch,
    Configuration,
    Provider,
    ConnectionBusy,
    ConnectionClosed,
    Cancelled,
    Timeout,
}

impl ErrorKind {
    /// Display text for this kind of error.
    pub fn display_text(&self) -> &'static str {
        match self {
            Self::Argument => "A required argument is missing or invalid.",
            Self::InvalidTransactionState => {
                "The transaction has already been committed or rolled back."
            }
            Self::ConflictingResources => {
                "The connection does not belong to the supplied transaction."
            }
            Self::TypeMismatch => "A parameter value does not match its declared type.",
            Self::Configuration => "No database endpoint is configured for the requested role.",
            Self::Provider => "The database driver reported an error.",
            Self::ConnectionBusy => "The connection is in use by an open reader.",
            Self::ConnectionClosed => "The connection has been closed.",
            Self::Cancelled => "The operation was cancelled.",
            Self::Timeout => "The operation timed out.",
        }
    }
}

impl DbError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid transaction state error.
    pub fn invalid_transaction_state(message: impl Into<String>) -> Self {
        Self::InvalidTransactionState {
            message: message.into(),
        }
    }

    /// Create a conflicting resources error.
    pub fn conflicting_resources(message: impl Into<String>) -> Self {
        Self::ConflictingResources {
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(
        parameter: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            parameter: parameter.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection_busy(endpoint: impl Into<String>) -> Self {
        Self::ConnectionBusy {
            endpoint: endpoint.into(),
        }
    }

    pub fn connection_closed(endpoint: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            endpoint: endpoint.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::Argument,
            Self::InvalidTransactionState { .. } => ErrorKind::InvalidTransactionState,
            Self::ConflictingResources { .. } => ErrorKind::ConflictingResources,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Provider(_) => ErrorKind::Provider,
            Self::ConnectionBusy { .. } => ErrorKind::ConnectionBusy,
            Self::ConnectionClosed { .. } => ErrorKind::ConnectionClosed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Localizable text for this error.
    pub fn display_text(&self) -> &'static str {
        self.kind().display_text()
    }

    /// SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            Self::Provider(sqlx::Error::Database(db_err)) => db_err.code().map(|c| c.to_string()),
            _ => None,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
