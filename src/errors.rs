use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Unit, agent or absence does not exist.
    NotFound(String),
    /// The unit's queue is disabled.
    Inactive(String),
    /// The unit has no agents in its queue.
    EmptyQueue(String),
    /// Every agent in the queue is absent or inactive.
    NoEligibleAgent(String),
    /// Malformed payload or rejected input (reorder list, absence interval).
    Validation(String),
    /// The per-unit rotation lock was not acquired in time.
    ConcurrencyTimeout(String),
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// A storage write failed outside the database driver.
    StorageError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

/// Machine-checkable error category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Inactive,
    EmptyQueue,
    NoEligibleAgent,
    Validation,
    ConcurrencyTimeout,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Inactive => "inactive",
            ErrorKind::EmptyQueue => "empty_queue",
            ErrorKind::NoEligibleAgent => "no_eligible_agent",
            ErrorKind::Validation => "validation",
            ErrorKind::ConcurrencyTimeout => "concurrency_timeout",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Inactive
            | ErrorKind::EmptyQueue
            | ErrorKind::NoEligibleAgent
            | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::ConcurrencyTimeout | ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether an integration should retry the same unit shortly rather than route elsewhere.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ConcurrencyTimeout | ErrorKind::Storage)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Error category.
    pub kind: ErrorKind,
    /// True when the same call may succeed if retried shortly.
    pub retryable: bool,
}

impl AppError {
    /// Returns the category of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Inactive(_) => ErrorKind::Inactive,
            AppError::EmptyQueue(_) => ErrorKind::EmptyQueue,
            AppError::NoEligibleAgent(_) => ErrorKind::NoEligibleAgent,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::ConcurrencyTimeout(_) => ErrorKind::ConcurrencyTimeout,
            AppError::DatabaseError(_) | AppError::StorageError(_) => ErrorKind::Storage,
            AppError::InternalError(_) => ErrorKind::Internal,
            AppError::WithContext { source, .. } => source.kind(),
        }
    }

    /// Message safe to show to API callers. Driver errors are not echoed back.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Inactive(msg)
            | AppError::EmptyQueue(msg)
            | AppError::NoEligibleAgent(msg)
            | AppError::Validation(msg)
            | AppError::ConcurrencyTimeout(msg) => msg.clone(),
            AppError::DatabaseError(_) | AppError::StorageError(_) => {
                "Storage temporarily unavailable".to_string()
            }
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::WithContext { source, .. } => source.public_message(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Inactive(msg) => write!(f, "Inactive: {}", msg),
            AppError::EmptyQueue(msg) => write!(f, "Empty queue: {}", msg),
            AppError::NoEligibleAgent(msg) => write!(f, "No eligible agent: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConcurrencyTimeout(msg) => write!(f, "Concurrency timeout: {}", msg),
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error kind to its status code and JSON body, logging storage and
    /// internal failures at error level and lock timeouts at warn level.
    fn into_response(self) -> Response {
        let kind = self.kind();

        match kind {
            ErrorKind::Storage | ErrorKind::Internal => {
                tracing::error!("Request failed: {}", self);
            }
            ErrorKind::ConcurrencyTimeout => {
                tracing::warn!("Request timed out waiting for unit lock: {}", self);
            }
            _ => {
                tracing::debug!("Request rejected: {}", self);
            }
        }

        let body = Json(ErrorBody {
            error: self.public_message(),
            kind,
            retryable: kind.is_retryable(),
        });

        (kind.status(), body).into_response()
    }
}

/// PostgreSQL SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    ///
    /// Lock waits that hit `lock_timeout` surface as `ConcurrencyTimeout`.
    fn from(err: sqlx::Error) -> Self {
        let lock_timeout = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == LOCK_NOT_AVAILABLE);

        if lock_timeout {
            AppError::ConcurrencyTimeout("Timed out waiting for the unit's rotation lock".to_string())
        } else {
            AppError::DatabaseError(err)
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_kind() {
        assert_eq!(
            AppError::NotFound("unit".into()).kind().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::NoEligibleAgent("all absent".into()).kind().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ConcurrencyTimeout("busy".into()).kind().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::StorageError("disk".into()).kind().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn context_keeps_inner_kind() {
        let err: Result<(), AppError> = Err(AppError::EmptyQueue("no agents".into()));
        let err = err.context("rotating unit").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmptyQueue);
        assert_eq!(err.to_string(), "rotating unit: Empty queue: no agents");
    }

    #[test]
    fn database_errors_are_not_echoed() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.public_message(), "Storage temporarily unavailable");
        assert!(err.kind().is_retryable());
    }
}
