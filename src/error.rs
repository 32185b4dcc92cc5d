//! Error types for the OpenTransfer API.
//!
//! This module defines the gateway error taxonomy using `thiserror`. Every
//! variant carries enough context for logs, while the HTTP mapping only ever
//! exposes a generic message to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`GatewayError`], used by callers that branch
/// on the kind of failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Configuration,
    ConnectionFailure,
    ExecutionFailure,
    NullResult,
    TypeMismatch,
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Configuration => "configuration",
            Self::ConnectionFailure => "connection_failure",
            Self::ExecutionFailure => "execution_failure",
            Self::NullResult => "null_result",
            Self::TypeMismatch => "type_mismatch",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailure { message: String, suggestion: String },

    #[error("Execution failed: {message}")]
    ExecutionFailure {
        message: String,
        /// e.g., "42883" for undefined function
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Query returned no value: {query}")]
    NullResult { query: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Timeout: {operation} exceeded {limit:?}")]
    Timeout { operation: String, limit: Duration },
}

impl GatewayError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection failure with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution failure with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ExecutionFailure {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn null_result(query: impl Into<String>) -> Self {
        Self::NullResult {
            query: query.into(),
        }
    }

    pub fn type_mismatch(expected: &'static str, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            actual: actual.into(),
        }
    }

    /// Create a timeout error for an operation that ran past `limit`.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            Self::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            Self::NullResult { .. } => ErrorKind::NullResult,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailure { suggestion, .. } => Some(suggestion),
            Self::ExecutionFailure { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. } | Self::Timeout { .. }
        )
    }
}

/// Convert sqlx errors to GatewayError.
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => GatewayError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                GatewayError::execution(
                    db_err.message(),
                    code,
                    "Check that the function or procedure exists and the argument names match",
                )
            }
            sqlx::Error::RowNotFound => GatewayError::null_result("no rows returned"),
            sqlx::Error::PoolTimedOut => GatewayError::connection(
                "Timed out acquiring a connection",
                "Check that the database server accepts new connections",
            ),
            sqlx::Error::PoolClosed => {
                GatewayError::connection("Connection is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => GatewayError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => GatewayError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => GatewayError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => GatewayError::execution(
                format!("Type not found: {}", type_name),
                None,
                "Check the declared parameter kinds",
            ),
            sqlx::Error::ColumnNotFound(col) => GatewayError::execution(
                format!("Column not found: {}", col),
                None,
                "Check the result columns of the invoked function",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => GatewayError::execution(
                format!("Column index {} out of bounds (len: {})", index, len),
                None,
                "Check the result columns of the invoked function",
            ),
            sqlx::Error::ColumnDecode { index, source } => GatewayError::type_mismatch(
                "decodable column",
                format!("column {}: {}", index, source),
            ),
            sqlx::Error::Decode(source) => {
                GatewayError::type_mismatch("decodable value", source.to_string())
            }
            sqlx::Error::WorkerCrashed => {
                GatewayError::connection("Database worker crashed", "Reconnect to the database")
            }
            _ => GatewayError::execution(
                format!("Unknown database error: {}", err),
                None,
                "Inspect the server logs",
            ),
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, GatewayError>;

/// Startup and serving failures.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// JSON body used for every error response: `{"message": "..."}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Build a JSON `{"message"}` response with the given status.
pub fn message_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(MessageBody::new(message))).into_response()
}

/// Convert GatewayError to an HTTP response.
///
/// Database details stay in the logs; clients only see a generic message.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::InvalidArgument => {
                message_response(StatusCode::BAD_REQUEST, "The request could not be processed.")
            }
            ErrorKind::Timeout | ErrorKind::ConnectionFailure => message_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "The data store is temporarily unavailable.",
            ),
            _ => message_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred.",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = GatewayError::execution(
            "function does not exist",
            Some("42883".to_string()),
            "Check the function name",
        );
        assert_eq!(err.suggestion(), Some("Check the function name"));
        assert_eq!(GatewayError::null_result("SELECT 1").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(GatewayError::timeout("query", Duration::from_secs(30)).is_retryable());
        assert!(GatewayError::connection("err", "sugg").is_retryable());
        assert!(!GatewayError::invalid_argument("empty name").is_retryable());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            GatewayError::invalid_argument("x").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            GatewayError::null_result("SELECT 1").kind(),
            ErrorKind::NullResult
        );
        assert_eq!(
            GatewayError::execution("x", None, "y").kind(),
            ErrorKind::ExecutionFailure
        );
        assert_eq!(ErrorKind::NullResult.to_string(), "null_result");
    }

    #[test]
    fn test_timeout_reports_sub_second_limits() {
        let err = GatewayError::timeout("scalar query", Duration::from_millis(250));
        assert_eq!(err.to_string(), "Timeout: scalar query exceeded 250ms");
        let err = GatewayError::timeout("connect", Duration::from_secs(10));
        assert_eq!(err.to_string(), "Timeout: connect exceeded 10s");
    }

    #[test]
    fn test_row_not_found_maps_to_null_result() {
        let err: GatewayError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NullResult);
    }

    #[test]
    fn test_io_error_maps_to_connection_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: GatewayError = sqlx::Error::Io(io).into();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_response_status_mapping() {
        let resp = GatewayError::invalid_argument("x").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = GatewayError::connection("x", "y").into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = GatewayError::execution("x", None, "y").into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
