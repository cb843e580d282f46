//! Error handling module for the Fellowship backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::identity::AuthError;
use crate::store::StoreError;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const EMAIL_ALREADY_IN_USE: &str = "EMAIL_ALREADY_IN_USE";
    pub const WEAK_PASSWORD: &str = "WEAK_PASSWORD";
    pub const INVALID_EMAIL: &str = "INVALID_EMAIL";
    pub const NETWORK_UNAVAILABLE: &str = "NETWORK_UNAVAILABLE";
    pub const AUTHORIZATION_DENIED: &str = "AUTHORIZATION_DENIED";
    pub const WRITE_FAILURE: &str = "WRITE_FAILURE";
    pub const SUBSCRIPTION_ERROR: &str = "SUBSCRIPTION_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFLICT: &str = "CONFLICT";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Missing or expired session
    Unauthorized(String),
    /// Identity provider rejected the request
    Auth(AuthError),
    /// An authorization predicate failed before dispatch
    AuthorizationDenied(String),
    /// The store rejected a mutation or was unreachable mid-write
    WriteFailure(String),
    /// A live listener failed
    Subscription(String),
    /// Resource not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Write target already occupied or name already taken
    Conflict(String),
    /// Database error on a read path
    Database(String),
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Auth(err) => match err {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
                AuthError::WeakPassword | AuthError::InvalidEmail => StatusCode::BAD_REQUEST,
                AuthError::NetworkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            AppError::WriteFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Subscription(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::Auth(err) => match err {
                AuthError::InvalidCredentials => codes::INVALID_CREDENTIALS,
                AuthError::EmailAlreadyInUse => codes::EMAIL_ALREADY_IN_USE,
                AuthError::WeakPassword => codes::WEAK_PASSWORD,
                AuthError::InvalidEmail => codes::INVALID_EMAIL,
                AuthError::NetworkUnavailable(_) => codes::NETWORK_UNAVAILABLE,
            },
            AppError::AuthorizationDenied(_) => codes::AUTHORIZATION_DENIED,
            AppError::WriteFailure(_) => codes::WRITE_FAILURE,
            AppError::Subscription(_) => codes::SUBSCRIPTION_ERROR,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Conflict(_) => codes::CONFLICT,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Auth(err) => err.to_string(),
            AppError::Unauthorized(msg)
            | AppError::AuthorizationDenied(msg)
            | AppError::WriteFailure(msg)
            | AppError::Subscription(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::Database(msg)
            | AppError::Internal(msg)
            | AppError::BadRequest(msg) => msg.clone(),
        }
    }

    /// Convert a store error raised while applying a mutation.
    pub fn write(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                AppError::NotFound(format!("{} {} not found", collection.singular(), id))
            }
            StoreError::Occupied { field, .. } => {
                AppError::Conflict(format!("{} is already taken", field))
            }
            StoreError::Duplicate { key, .. } => {
                AppError::Conflict(format!("{} already exists", key))
            }
            other => {
                tracing::error!("Write failure: {}", other);
                AppError::WriteFailure(format!("Write failed: {}", other))
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

/// Store errors on read paths. Mutations go through [`AppError::write`].
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                AppError::NotFound(format!("{} {} not found", collection.singular(), id))
            }
            other => {
                tracing::error!("Database error: {}", other);
                AppError::Database(format!("Database error: {}", other))
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub revision_id: i64,
}

impl ErrorResponse {
    pub fn new(error: &AppError, revision_id: i64) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: None,
            },
            revision_id,
        }
    }
}

/// Wrapper type for errors that carry revision_id context.
pub struct AppErrorWithRevision {
    pub error: AppError,
    pub revision_id: i64,
}

impl From<AppError> for AppErrorWithRevision {
    fn from(error: AppError) -> Self {
        Self {
            error,
            revision_id: 0,
        }
    }
}

impl IntoResponse for AppErrorWithRevision {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.revision_id);
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        AppErrorWithRevision::from(self).into_response()
    }
}
