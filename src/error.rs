//! Error types for oauth-gate
//!
//! All errors in the gate are converted to `AppError`,
//! which implements `IntoResponse` so the host router turns them
//! into generic HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Gate-wide error type
///
/// The `Display` output carries internal detail for logs. It never
/// reaches a response body: `into_response` only emits a fixed message
/// per variant.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed required setting (500, fatal at startup)
    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),

    /// Code exchange with the provider failed (500)
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// Session evidence could not be decoded (400)
    ///
    /// The middleware absorbs this and treats the request as unauthenticated.
    #[error("Malformed session: {0}")]
    MalformedSession(String),

    /// A freshly obtained token could not be encoded (500)
    #[error("Session serialization failed: {0}")]
    SerializationFailed(String),

    /// Upstream request failed (502)
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short label used for logs and the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ConfigurationInvalid(_) => "configuration_invalid",
            AppError::ExchangeFailed(_) => "exchange_failed",
            AppError::MalformedSession(_) => "malformed_session",
            AppError::SerializationFailed(_) => "serialization_failed",
            AppError::Upstream(_) => "upstream",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigurationInvalid(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each variant to a status code and a fixed JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AppError::ConfigurationInvalid(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error")
            }
            AppError::ExchangeFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed")
            }
            AppError::MalformedSession(_) => (StatusCode::BAD_REQUEST, "Invalid session"),
            AppError::SerializationFailed(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "Bad gateway"),
        };

        let error_type = self.kind();
        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::warn!(error = %self, error_type, "Request rejected");
        }

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
