//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::handlers::{auth, premium, sessions};
use crate::middleware::{auth_middleware, require_role};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no bearer token required)
    let public_routes = Router::new()
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/step-up/complete", post(auth::step_up_complete_handler));

    // Operator routes (role check runs after authentication)
    let admin_routes = Router::new()
        .route("/admin/premium-codes", post(premium::mint_code))
        .route_layer(middleware::from_fn(require_role("admin")));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/logout-all", post(auth::logout_all_handler))
        .route("/auth/step-up", post(auth::step_up_handler))
        .route("/sessions", get(sessions::list_sessions))
        .route("/premium/redeem", post(premium::redeem_code))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
