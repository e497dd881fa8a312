//! Tessera API - HTTP surface for the token subsystem
//!
//! Provides endpoints for refresh, logout, step-up, session overview and
//! premium code redemption on top of [`tessera_auth::AuthService`].

pub mod audit;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(any(test, feature = "test-utils"))]
pub use testing::{create_router_for_testing, TestApp};

use axum::{routing::get, Json, Router};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// OpenAPI document for the public surface
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::logout_all_handler,
        handlers::auth::step_up_handler,
        handlers::auth::step_up_complete_handler,
        handlers::sessions::list_sessions,
        handlers::premium::redeem_code,
        handlers::premium::mint_code,
    ),
    components(schemas(
        error::ApiError,
        handlers::health::HealthResponse,
        handlers::auth::RefreshRequest,
        handlers::auth::TokenResponse,
        handlers::auth::LogoutRequest,
        handlers::auth::LogoutResponse,
        handlers::auth::StepUpResponse,
        handlers::auth::StepUpCompleteRequest,
        handlers::auth::StepUpCompleteResponse,
        handlers::sessions::SessionsResponse,
        handlers::premium::RedeemRequest,
        handlers::premium::RedeemResponse,
        handlers::premium::MintCodeRequest,
        handlers::premium::MintCodeResponse,
    )),
    modifiers(&BearerSecurity),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Token refresh, logout and step-up"),
        (name = "sessions", description = "Session overview"),
        (name = "premium", description = "Premium code redemption and minting"),
    )
)]
pub struct ApiDoc;

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
