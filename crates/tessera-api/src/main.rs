//! Tessera API Server
//!
//! Configuration comes from `TESSERA_CONFIG` (a TOML file, optional) with
//! environment variables taking precedence.
//!
//! Login is not served here. The surrounding backend authenticates the user,
//! registers the profile with its [`tessera_auth::AccountDirectory`] and calls
//! [`tessera_auth::AuthService::start_session`] for the first token pair. This
//! binary wires empty in-memory collaborators, so on its own it only serves
//! `/health` and the OpenAPI document; every bearer route answers 401 until
//! an embedding backend issues tokens.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use std::sync::Arc;
use tessera_api::{create_router, state::AppState};
use tessera_auth::{AuthService, InMemoryAccounts, InMemoryEntitlements};
use tessera_core::{connect_store, AppConfig, Clock, LoggingConfig, SystemClock};
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("TESSERA_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=debug", logging.level).into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    init_tracing(&config.logging);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&config.store, clock.clone())
        .await
        .context("Failed to connect to the token store")?;

    // Profiles and entitlements belong to the surrounding backend
    tracing::warn!(
        "Using empty in-memory account directory and entitlement sink; \
         no session can be started without an embedding backend"
    );
    let accounts = Arc::new(InMemoryAccounts::new());
    let entitlements = Arc::new(InMemoryEntitlements::new());

    // A missing secret is fatal here
    let auth = AuthService::new(&config, store, clock, accounts)
        .context("Failed to initialise token subsystem (are JWT_SECRET and PREMIUM_CODE_SECRET set?)")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, auth, entitlements));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Tessera API Server starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
