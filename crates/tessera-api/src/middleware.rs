//! Bearer authentication middleware for protecting routes
//!
//! Validates the access token from the Authorization header, rejects revoked
//! tokens, and adds the authenticated user to request extensions.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tessera_auth::{AuthError, Claims, ClientContext, TokenRejection};
use thiserror::Error;

/// Header clients use to name the device a session belongs to
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Authenticated user information extracted from a validated access token
///
/// Handlers extract it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub is_premium: bool,
    pub session_id: Option<String>,
    /// Full claims, needed to revoke the token on logout
    pub claims: Claims,
}

impl AuthenticatedUser {
    /// Check if user has admin role
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id.clone(),
            email: claims.email.clone(),
            role: claims.role.clone(),
            is_premium: claims.is_premium,
            session_id: claims.session_id.clone(),
            claims,
        }
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum BearerError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(TokenRejection),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Authentication backend unavailable")]
    Unavailable,
}

impl IntoResponse for BearerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            BearerError::MissingAuthHeader => {
                (StatusCode::UNAUTHORIZED, "Missing Authorization header")
            }
            BearerError::InvalidAuthHeader => (
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format",
            ),
            BearerError::InvalidToken(TokenRejection::Revoked) => {
                (StatusCode::UNAUTHORIZED, "Token has been revoked")
            }
            BearerError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            BearerError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "Insufficient permissions")
            }
            BearerError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication backend unavailable",
            ),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Request origin used for sessions, refresh records and audit events
pub fn client_context(headers: &HeaderMap) -> ClientContext {
    ClientContext {
        ip_address: extract_ip_address(headers).unwrap_or_else(|| "unknown".to_string()),
        user_agent: extract_user_agent(headers).unwrap_or_default(),
        device_id: headers
            .get(DEVICE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

/// Authentication middleware that requires a valid, unrevoked bearer token
///
/// # Usage
///
/// ```ignore
/// let protected = Router::new()
///     .route("/auth/logout", post(logout_handler))
///     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, BearerError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(BearerError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| BearerError::InvalidAuthHeader)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(BearerError::InvalidAuthHeader)?;

    let claims = match state.auth.authenticate(token).await {
        Ok(claims) => claims,
        Err(AuthError::InvalidToken(rejection)) => {
            audit_log(&AuditEvent::InvalidToken {
                ip_address: extract_ip_address(request.headers()),
                user_agent: extract_user_agent(request.headers()),
                reason: rejection.to_string(),
            });
            return Err(BearerError::InvalidToken(rejection));
        }
        Err(err) => {
            tracing::error!(error = %err, "Bearer authentication failed");
            return Err(BearerError::Unavailable);
        }
    };

    request
        .extensions_mut()
        .insert(AuthenticatedUser::from(claims));

    Ok(next.run(request).await)
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, BearerError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must run after [`auth_middleware`]. Admins pass every role check.
pub fn require_role(
    required_role: &'static str,
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = request
                .extensions()
                .get::<AuthenticatedUser>()
                .ok_or(BearerError::MissingAuthHeader)?
                .clone();

            if user.role != required_role && !user.is_admin() {
                audit_log(&AuditEvent::AccessDenied {
                    user_id: user.user_id.clone(),
                    resource: request.uri().path().to_string(),
                    required_role: required_role.to_string(),
                    ip_address: extract_ip_address(request.headers()),
                });

                return Err(BearerError::InsufficientPermissions);
            }

            Ok(next.run(request).await)
        })
    }
}
