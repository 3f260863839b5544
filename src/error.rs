//! Error types for dbcycle.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Precondition and configuration errors are raised before any handle state is
//! touched; provider failures are wrapped so the original cause stays reachable
//! through `source()`.

use thiserror::Error;

/// Boxed provider error carried by [`DbError::ConnectionFailed`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Already connected to the '{database}' database")]
    AlreadyConnected { database: String },

    #[error("No active connection to disconnect on '{database}'")]
    NotConnected { database: String },

    #[error("Connection failed on '{database}': {message}")]
    ConnectionFailed {
        database: String,
        message: String,
        suggestion: String,
        #[source]
        source: BoxError,
    },

    #[error("Service '{service}' cannot run against '{database}'")]
    NotServable { service: String, database: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    TimedOut { operation: String, elapsed_ms: u64 },

    #[error("Service failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Service '{service}' failed: {message}")]
    Service { service: String, message: String },

    #[error("Worker pool has been shut down")]
    ExecutorShutdown,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn already_connected(database: impl Into<String>) -> Self {
        Self::AlreadyConnected {
            database: database.into(),
        }
    }

    pub fn not_connected(database: impl Into<String>) -> Self {
        Self::NotConnected {
            database: database.into(),
        }
    }

    /// Wrap a provider error raised while opening or closing a connection.
    pub fn connection_failed(
        database: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ConnectionFailed {
            database: database.into(),
            message: message.into(),
            suggestion: suggestion.into(),
            source: source.into(),
        }
    }

    pub fn not_servable(service: impl Into<String>, database: impl Into<String>) -> Self {
        Self::NotServable {
            service: service.into(),
            database: database.into(),
        }
    }

    /// Create a timeout error.
    pub fn timed_out(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::TimedOut {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Wrap the last failure of an exhausted retry loop.
    pub fn retry_exhausted(attempts: u32, last: DbError) -> Self {
        Self::RetryExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a service-defined failure.
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::RetryExhausted { source, .. } => source.suggestion(),
            _ => None,
        }
    }
}

/// Convert sqlx errors raised inside services to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::invalid_configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timed_out("connection pool acquire", 0),
            sqlx::Error::PoolClosed => DbError::database(
                "Connection pool is closed",
                None,
                "Reconnect the database handle before dispatching services",
            ),
            sqlx::Error::Io(io_err) => DbError::database(
                format!("I/O error: {}", io_err),
                None,
                "Check network connectivity and database server status",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the table definition",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
