//! Error handling for the Delivery Lifecycle Management service
//!
//! Business rule failures map to 4xx responses with a specific code.
//! Storage failures are logged with their context and surface as a generic
//! 500 so callers can tell "fix your input" from "retry later".

use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::DomainError;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// Coarse classification of an [`AppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Forbidden,
    Unauthorized,
    Infrastructure,
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Log a storage failure with its operation and entity, then wrap it
    pub fn infrastructure(operation: &'static str, entity_id: impl Display, err: sqlx::Error) -> Self {
        tracing::error!(
            operation,
            entity_id = %entity_id,
            error = %err,
            "Storage operation failed"
        );
        AppError::DatabaseError(err)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Validation { .. }
            | AppError::ValidationError(_)
            | AppError::InvalidStateTransition(_) => ErrorKind::Validation,
            AppError::Forbidden(_) | AppError::InsufficientPermissions => ErrorKind::Forbidden,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::OrderLocked(_) => AppError::Forbidden(err.to_string()),
            DomainError::InvalidTransition { .. } => AppError::InvalidStateTransition(err.to_string()),
            _ => match err.field() {
                Some(field) => AppError::validation(field, err.to_string()),
                None => AppError::ValidationError(err.to_string()),
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        match first_field_error(&errors, None) {
            Some((field, message)) => AppError::Validation { field, message },
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

/// First failing field, with a dotted path into nested structs and lists
fn first_field_error(
    errors: &validator::ValidationErrors,
    prefix: Option<&str>,
) -> Option<(String, String)> {
    use validator::ValidationErrorsKind;

    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by_key(|(name, _)| **name);

    fields.into_iter().find_map(|(name, kind)| {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        };
        match kind {
            ValidationErrorsKind::Field(errs) => errs.first().map(|e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", path));
                (path.clone(), message)
            }),
            ValidationErrorsKind::Struct(nested) => first_field_error(nested, Some(&path)),
            ValidationErrorsKind::List(entries) => entries.iter().find_map(|(index, nested)| {
                first_field_error(nested, Some(&format!("{}[{}]", path, index)))
            }),
        }
    })
}

/// Whether a storage error is a unique constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Attach operation context to storage results
pub trait StorageResultExt<T> {
    fn storage_context(self, operation: &'static str, entity_id: impl Display) -> AppResult<T>;
}

impl<T> StorageResultExt<T> for Result<T, sqlx::Error> {
    fn storage_context(self, operation: &'static str, entity_id: impl Display) -> AppResult<T> {
        self.map_err(|err| AppError::infrastructure(operation, entity_id, err))
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorDetail {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("UNAUTHORIZED", message.clone()),
            ),
            AppError::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new(
                    "INSUFFICIENT_PERMISSIONS",
                    "You do not have permission to perform this action",
                ),
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message: message.clone(),
                    field: Some(field.clone()),
                },
            ),
            AppError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg.clone()),
            ),
            AppError::InvalidStateTransition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    code: "INVALID_STATE_TRANSITION".to_string(),
                    message: msg.clone(),
                    field: Some("status".to_string()),
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new("FORBIDDEN", msg.clone()),
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred, please retry later"),
            ),
            AppError::Internal(_) | AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", "An internal server error occurred"),
            ),
        };

        if self.kind() == ErrorKind::Infrastructure {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
pub(crate) mod test_support {
    use std::fmt;

    #[derive(Debug)]
    struct UniqueViolation;

    impl fmt::Display for UniqueViolation {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("duplicate key value violates unique constraint")
        }
    }

    impl std::error::Error for UniqueViolation {}

    impl sqlx::error::DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }
    }

    /// Database error as raised by a unique index
    pub(crate) fn unique_violation() -> sqlx::Error {
        sqlx::Error::Database(Box::new(UniqueViolation))
    }
}
