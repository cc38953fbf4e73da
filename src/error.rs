// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the token cipher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Blob failed authentication or could not be parsed
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Encryption key is missing or has the wrong shape
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised by the credential store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted collection could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite backend failure
    #[error("Store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored refresh token could not be encrypted or decrypted
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed or no channel has been authorized yet
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Request is valid but not allowed for the authorized channel
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested resource does not exist upstream
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error from the video platform API
    #[error("Platform API error: {status} - {message}")]
    PlatformApiError { status: u16, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Credential store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::AuthError(msg) => (StatusCode::UNAUTHORIZED, "auth_error", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::PlatformApiError { status, message } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status_code, "platform_api_error", message)
            }
            ApiError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Store(StoreError::Crypto(err)) => {
                tracing::error!("Stored credentials failed integrity check: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "integrity_error",
                    "Stored credentials could not be decrypted".to_string(),
                )
            }
            ApiError::Store(err) => {
                tracing::error!("Credential store error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    "Credential store unavailable".to_string(),
                )
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
