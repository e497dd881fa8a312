//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tessera_auth::AuthError;
use tracing::error;
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

fn auth_error_response(err: &AuthError) -> (StatusCode, ApiError) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = match status {
        StatusCode::SERVICE_UNAVAILABLE => {
            ApiError::new(err.code(), "Service temporarily unavailable, retry later")
        }
        s if s.is_server_error() => {
            error!(code = err.code(), error = %err, "Request failed");
            ApiError::new(err.code(), "Internal server error")
        }
        _ => ApiError::new(err.code(), err.to_string()),
    };

    (status, body)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::Auth(err) => auth_error_response(&err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ApiError::forbidden(msg)),
            AppError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_auth::TokenRejection;
    use tessera_core::StoreError;

    #[test]
    fn test_auth_error_status_mapping() {
        let cases = [
            (AuthError::CodeFormat, StatusCode::BAD_REQUEST, "CODE_FORMAT"),
            (AuthError::CodeUsed, StatusCode::CONFLICT, "CODE_USED"),
            (AuthError::CodeExpired, StatusCode::GONE, "CODE_EXPIRED"),
            (
                AuthError::InvalidToken(TokenRejection::Expired),
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
            ),
            (
                AuthError::Entitlement("down".to_string()),
                StatusCode::BAD_GATEWAY,
                "ENTITLEMENT_FAILED",
            ),
            (
                AuthError::Store(StoreError::Unavailable("refused".to_string())),
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
            ),
        ];

        for (err, status, code) in cases {
            let (actual_status, body) = auth_error_response(&err);
            assert_eq!(actual_status, status, "{err}");
            assert_eq!(body.code, code);
        }
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err = AuthError::CorruptRecord {
            key: "session:abc".to_string(),
        };
        let (status, body) = auth_error_response(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.message.contains("session:abc"));
    }
}
