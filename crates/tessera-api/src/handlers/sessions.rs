//! Session overview handler
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_auth::AuthError;
use utoipa::ToSchema;

/// The caller's sessions
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionsResponse {
    /// Live sessions owned by the caller
    pub active_sessions: usize,
    /// Remaining lifetime of the session behind the presented token
    pub current_session_ttl_secs: Option<u64>,
}

/// Summarize the caller's active sessions
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "Session summary", body = SessionsResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.auth.sessions();
    let active_sessions = sessions.count_active_for_user(&user.user_id).await?;

    let current_session_ttl_secs = match &user.session_id {
        Some(id) => match sessions.get_ttl(id).await {
            Ok(ttl) => Some(ttl.as_secs()),
            Err(AuthError::NotFound) => None,
            Err(err) => return Err(err.into()),
        },
        None => None,
    };

    Ok(Json(SessionsResponse {
        active_sessions,
        current_session_ttl_secs,
    }))
}
