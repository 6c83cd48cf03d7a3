//! Error types for AuthHub

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for AuthHub
pub type Result<T> = std::result::Result<T, Error>;

/// AuthHub errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token past its expiry
    #[error("Token expired")]
    TokenExpired,

    /// Token signature or structure invalid
    #[error("Token invalid")]
    TokenInvalidSignature,

    /// Token jti found on the revocation blacklist
    #[error("Token revoked")]
    TokenRevoked,

    /// A token of the wrong kind was presented (user where system is
    /// required, or vice versa)
    #[error("Token type mismatch: expected {expected}, got {actual}")]
    TokenTypeMismatch {
        /// Required subject kind
        expected: String,
        /// Subject kind carried by the token
        actual: String,
    },

    /// SSO anti-CSRF state absent, expired, or already consumed.
    /// The state value itself is never echoed back to the client.
    #[error("SSO state missing or already used")]
    StaleSsoState,

    /// Identity provider unreachable or timed out (retryable by the caller)
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Key-value store unreachable (retryable by the caller)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Request payload failed validation (bad regex, duplicate code, ...)
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error maps to at the API boundary.
    ///
    /// Expired/invalid/revoked/mismatched tokens all map uniformly to 401 so
    /// a probing client learns nothing about why a credential was rejected.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenExpired
            | Self::TokenInvalidSignature
            | Self::TokenRevoked
            | Self::TokenTypeMismatch { .. } => StatusCode::UNAUTHORIZED,
            Self::StaleSsoState | Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) | Self::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe message for the response body. Internal detail (key
    /// material, store addresses, state values) stays in the logs.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::TokenExpired
            | Self::TokenInvalidSignature
            | Self::TokenRevoked
            | Self::TokenTypeMismatch { .. } => "unauthorized",
            Self::StaleSsoState => "invalid login request",
            Self::Invalid(_) => "invalid request",
            Self::UpstreamUnavailable(_) | Self::StoreUnavailable(_) => {
                "service temporarily unavailable"
            }
            Self::NotFound(_) => "not found",
            _ => "internal error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}
