//! Token lifecycle handlers: refresh, logout and step-up
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use crate::middleware::{client_context, AuthenticatedUser};
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_auth::{AuthError, TokenPair};
use utoipa::ToSchema;

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Access/refresh token pair
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub session_id: String,
    pub session_expires_at: DateTime<Utc>,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
            session_id: pair.session.id,
            session_expires_at: pair.session.expires_at,
        }
    }
}

/// Logout request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// Refresh token to revoke along with the access token
    pub refresh_token: Option<String>,
}

/// Logout response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
    pub refresh_tokens_revoked: usize,
    pub sessions_deleted: usize,
}

/// Pending step-up token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StepUpResponse {
    pub pending_token: String,
    pub expires_in: u64,
}

/// Step-up completion request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepUpCompleteRequest {
    pub pending_token: String,
}

/// Step-up completion response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StepUpCompleteResponse {
    pub user_id: String,
}

/// Refresh access token
///
/// Exchanges a valid refresh token for a new token pair. The presented
/// refresh token is consumed and the session's expiry slides forward.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New tokens issued", body = TokenResponse),
        (status = 401, description = "Invalid or expired refresh token", body = crate::error::ApiError),
        (status = 503, description = "Token store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(&headers);

    match state.auth.refresh(&request.refresh_token, &client).await {
        Ok(pair) => {
            audit_log(&AuditEvent::TokenRefresh {
                user_id: pair.session.user_id.clone(),
                ip_address: Some(client.ip_address),
                user_agent: Some(client.user_agent),
            });
            Ok(Json(TokenResponse::from(pair)))
        }
        Err(err @ AuthError::InvalidRefreshToken) => {
            audit_log(&AuditEvent::RefreshRejected {
                reason: err.code().to_string(),
                ip_address: Some(client.ip_address),
                user_agent: Some(client.user_agent),
            });
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Logout the current session
///
/// Revokes the access token, the optional refresh token, and deletes the
/// session the access token belongs to.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    request: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = request.map(|Json(body)| body).unwrap_or_default();

    let summary = state
        .auth
        .logout(&user.claims, request.refresh_token.as_deref())
        .await?;

    audit_log(&AuditEvent::Logout {
        user_id: user.user_id.clone(),
        ip_address: Some(client_context(&headers).ip_address),
        logout_all_devices: false,
        refresh_tokens_revoked: summary.refresh_tokens,
        sessions_deleted: summary.sessions,
    });

    Ok(Json(LogoutResponse {
        message: "Logged out".to_string(),
        refresh_tokens_revoked: summary.refresh_tokens,
        sessions_deleted: summary.sessions,
    }))
}

/// Logout from every device
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "auth",
    responses(
        (status = 200, description = "All sessions ended", body = LogoutResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let summary = state.auth.logout_everywhere(&user.claims).await?;

    audit_log(&AuditEvent::Logout {
        user_id: user.user_id.clone(),
        ip_address: Some(client_context(&headers).ip_address),
        logout_all_devices: true,
        refresh_tokens_revoked: summary.refresh_tokens,
        sessions_deleted: summary.sessions,
    });

    Ok(Json(LogoutResponse {
        message: "Logged out from all devices".to_string(),
        refresh_tokens_revoked: summary.refresh_tokens,
        sessions_deleted: summary.sessions,
    }))
}

/// Start a step-up challenge for the caller
#[utoipa::path(
    post,
    path = "/api/v1/auth/step-up",
    tag = "auth",
    responses(
        (status = 200, description = "Pending token issued", body = StepUpResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn step_up_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let pending_token = state.auth.begin_step_up(&user.user_id).await?;

    audit_log(&AuditEvent::StepUpStarted {
        user_id: user.user_id.clone(),
        ip_address: Some(client_context(&headers).ip_address),
    });

    Ok(Json(StepUpResponse {
        pending_token,
        expires_in: state.auth.step_up_ttl_secs(),
    }))
}

/// Complete a step-up challenge
///
/// The second factor itself is verified upstream; this only consumes the
/// pending token. Each token can be completed once.
#[utoipa::path(
    post,
    path = "/api/v1/auth/step-up/complete",
    tag = "auth",
    request_body = StepUpCompleteRequest,
    responses(
        (status = 200, description = "Step-up completed", body = StepUpCompleteResponse),
        (status = 401, description = "Invalid or expired pending token", body = crate::error::ApiError),
    )
)]
pub async fn step_up_complete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StepUpCompleteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = Some(client_context(&headers).ip_address);

    match state.auth.complete_step_up(&request.pending_token).await {
        Ok(user_id) => {
            audit_log(&AuditEvent::StepUpCompleted {
                user_id: Some(user_id.clone()),
                success: true,
                ip_address,
            });
            Ok(Json(StepUpCompleteResponse { user_id }))
        }
        Err(err) => {
            audit_log(&AuditEvent::StepUpCompleted {
                user_id: None,
                success: false,
                ip_address,
            });
            Err(err.into())
        }
    }
}
