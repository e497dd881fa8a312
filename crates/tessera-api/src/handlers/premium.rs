//! Premium code handlers: redemption and operator minting
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use crate::middleware::{client_context, AuthenticatedUser};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Longest validity an operator may give a minted code
pub const MAX_VALID_DAYS: u32 = 3650;

/// Redemption request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedeemRequest {
    /// Code as typed by the user; case, dashes and spaces are ignored
    pub code: String,
}

/// Redemption response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RedeemResponse {
    pub message: String,
    pub owner: String,
}

/// Mint request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MintCodeRequest {
    /// Days until the code stops verifying
    pub valid_days: u32,
}

/// Mint response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MintCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Redeem a premium code
///
/// # Responses
///
/// * `200 OK` - Entitlement granted
/// * `400 Bad Request` - Malformed code or bad signature
/// * `409 Conflict` - Code already used
/// * `410 Gone` - Code expired
/// * `502 Bad Gateway` - Entitlement could not be recorded; the code stays redeemable
#[utoipa::path(
    post,
    path = "/api/v1/premium/redeem",
    tag = "premium",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Code redeemed", body = RedeemResponse),
        (status = 400, description = "Malformed or forged code", body = crate::error::ApiError),
        (status = 409, description = "Code already used", body = crate::error::ApiError),
        (status = 410, description = "Code expired", body = crate::error::ApiError),
        (status = 502, description = "Entitlement grant failed", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn redeem_code(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(request): Json<RedeemRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = Some(client_context(&headers).ip_address);

    match state
        .auth
        .redeem_code(&request.code, &user.user_id, state.entitlements.as_ref())
        .await
    {
        Ok(receipt) => {
            audit_log(&AuditEvent::CodeRedemption {
                user_id: user.user_id.clone(),
                success: true,
                failure_reason: None,
                ip_address,
            });
            Ok(Json(RedeemResponse {
                message: "Premium code redeemed".to_string(),
                owner: receipt.owner,
            }))
        }
        Err(err) => {
            audit_log(&AuditEvent::CodeRedemption {
                user_id: user.user_id.clone(),
                success: false,
                failure_reason: Some(err.code().to_string()),
                ip_address,
            });
            Err(err.into())
        }
    }
}

/// Mint a premium code (admin only)
#[utoipa::path(
    post,
    path = "/api/v1/admin/premium-codes",
    tag = "premium",
    request_body = MintCodeRequest,
    responses(
        (status = 201, description = "Code minted", body = MintCodeResponse),
        (status = 400, description = "Invalid validity", body = crate::error::ApiError),
        (status = 403, description = "Insufficient permissions"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn mint_code(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<MintCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.valid_days == 0 || request.valid_days > MAX_VALID_DAYS {
        return Err(AppError::BadRequest(format!(
            "valid_days must be between 1 and {MAX_VALID_DAYS}"
        )));
    }

    // Codes carry whole-second expiries
    let expires_at =
        (state.auth.now() + Duration::days(i64::from(request.valid_days))).trunc_subsecs(0);
    let code = state.auth.mint_code(expires_at)?;

    audit_log(&AuditEvent::CodeMinted {
        issued_by: user.user_id.clone(),
        expires_at,
    });

    Ok((StatusCode::CREATED, Json(MintCodeResponse { code, expires_at })))
}
