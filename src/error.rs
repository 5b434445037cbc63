//! Error types for the PostgreSQL gateway.
//!
//! All failures flow through [`DbError`], built with `thiserror`. Each variant
//! carries enough context for a caller to decide whether to retry, rephrase, or
//! give up. Messages returned to callers go through [`DbError::client_message`],
//! which never exposes connection details or server internals.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Connection pool exhausted: no connection available after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection broken: {message}")]
    ConnectionBroken { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Query rejected: {reason}")]
    ValidationRejected { reason: String },

    #[error("Translation failed: {reason}")]
    TranslationFailed { reason: String },

    #[error("Execution error: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn pool_exhausted(waited_ms: u64) -> Self {
        Self::PoolExhausted { waited_ms }
    }

    pub fn connection_broken(message: impl Into<String>) -> Self {
        Self::ConnectionBroken {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a validation rejection carrying the validator's reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ValidationRejected {
            reason: reason.into(),
        }
    }

    pub fn translation_failed(reason: impl Into<String>) -> Self {
        Self::TranslationFailed {
            reason: reason.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
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
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("All connections are busy; retry the request shortly")
            }
            Self::ValidationRejected { .. } => {
                Some("Only a single read-only SELECT or WITH statement is accepted")
            }
            Self::TranslationFailed { .. } => {
                Some("Rephrase the question or write the SQL query directly")
            }
            Self::TableNotFound { .. } => Some("Use list_tables to see available tables"),
            Self::Timeout { .. } => {
                Some("Consider narrowing the query or adding a LIMIT clause")
            }
            _ => None,
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// Validation rejections are never retryable: the same text will be
    /// rejected again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. }
                | Self::ConnectionBroken { .. }
                | Self::Connection { .. }
                | Self::Timeout { .. }
        )
    }

    /// Whether the connection that produced this error must be discarded.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::ConnectionBroken { .. })
    }

    /// Sanitized message suitable for returning to a tool caller.
    pub fn client_message(&self) -> String {
        match self {
            Self::Execution { message, sql_state } => match sql_state {
                Some(code) => format!("Query execution failed: {} (SQLSTATE: {})", message, code),
                None => format!("Query execution failed: {}", message),
            },
            Self::ConnectionBroken { .. } | Self::Connection { .. } => {
                "Database connection error; the request can be retried".to_string()
            }
            Self::Internal { .. } => "Internal server error".to_string(),
            Self::Config { .. } => "Server is misconfigured".to_string(),
            other => other.to_string(),
        }
    }

    /// `client_message()` followed by the suggestion, for tool outputs.
    ///
    /// Connection suggestions name server settings a tool caller cannot
    /// change, so they stay in the logs.
    pub fn caller_message(&self) -> String {
        match self.suggestion() {
            Some(hint) if !matches!(self, Self::Connection { .. }) => {
                format!("{}. {}", self.client_message(), hint)
            }
            _ => self.client_message(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// Database-reported errors keep only the server message and SQLSTATE.
/// Transport-level failures mark the connection as broken.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted(0),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connection_broken(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => {
                DbError::connection_broken(format!("TLS error: {}", tls_err))
            }
            sqlx::Error::Protocol(msg) => {
                DbError::connection_broken(format!("Protocol error: {}", msg))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::connection_broken("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for protocol-level failures.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = suggestion_data(err.suggestion());
        match &err {
            DbError::InvalidInput { .. } | DbError::ValidationRejected { .. } => {
                rmcp::ErrorData::invalid_params(err.client_message(), data)
            }
            DbError::TableNotFound { .. } => {
                rmcp::ErrorData::resource_not_found(err.client_message(), data)
            }
            _ => rmcp::ErrorData::internal_error(err.client_message(), data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::pool_exhausted(200).is_retryable());
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection_broken("reset").is_retryable());
        assert!(!DbError::rejected("non-read-only statement").is_retryable());
        assert!(!DbError::translation_failed("model unavailable").is_retryable());
    }

    #[test]
    fn test_pool_exhausted_has_retry_hint() {
        let err = DbError::pool_exhausted(200);
        assert!(err.suggestion().is_some());
        assert!(err.to_string().contains("200ms"));
    }

    #[test]
    fn test_caller_message_carries_hint() {
        let msg = DbError::pool_exhausted(200).caller_message();
        assert!(msg.contains("200ms"));
        assert!(msg.ends_with("retry the request shortly"));

        let connection = DbError::connection("refused", "Verify POSTGRES_HOST and POSTGRES_PORT");
        assert!(!connection.caller_message().contains("POSTGRES_HOST"));
    }

    #[test]
    fn test_client_message_hides_connection_details() {
        let err = DbError::connection_broken("I/O error: connection reset by 10.0.0.5:5432");
        let msg = err.client_message();
        assert!(!msg.contains("10.0.0.5"));
    }

    #[test]
    fn test_client_message_keeps_sql_state() {
        let err = DbError::execution("relation \"nope\" does not exist", Some("42P01".into()));
        assert!(err.client_message().contains("42P01"));
    }

    #[test]
    fn test_rejection_maps_to_invalid_params() {
        let mcp_err: rmcp::ErrorData = DbError::rejected("stacked statements").into();
        assert_eq!(mcp_err.code.0, -32602);
    }

    #[test]
    fn test_table_not_found_maps_to_resource_not_found() {
        let mcp_err: rmcp::ErrorData = DbError::table_not_found("ghosts").into();
        assert_eq!(mcp_err.code.0, -32002);
    }

    #[test]
    fn test_internal_maps_to_internal_error() {
        let mcp_err: rmcp::ErrorData = DbError::internal("unknown error").into();
        assert_eq!(mcp_err.code.0, -32603);
    }
}
