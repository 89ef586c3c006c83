//! Error types for the feed server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use syncfeed_core::CoreError;
use syncfeed_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the feed server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The collection does not exist or is not change-tracked.
    #[error("change tracking not enabled for {0}")]
    NotEnabled(String),

    /// No published record under this key.
    #[error("no record with key {0:?}")]
    NotFound(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client cannot receive a suspended (chunked) response.
    #[error("feed requires HTTP/1.1 or later")]
    SuspensionUnsupported,

    /// Change-log engine error.
    #[error("change log error: {0}")]
    Core(CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns the HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::NotEnabled(_) | ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) | ServerError::SuspensionUnsupported => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Core(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::NotEnabled(_) => "NOT_ENABLED",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::InvalidRequest(_) => "BAD_REQUEST",
            ServerError::SuspensionUnsupported => "SUSPENSION_UNSUPPORTED",
            ServerError::Core(_) => "STORE_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotEnabled { collection } => ServerError::NotEnabled(collection),
            other => ServerError::Core(other),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::Internal(err.to_string())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error flag.
    pub error: bool,
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: true,
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
