//! In-process fixtures for router tests

use crate::create_router;
use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tessera_auth::{
    AuthService, ClientContext, InMemoryAccounts, InMemoryEntitlements, TokenPair, TokenSubject,
};
use tessera_core::{AppConfig, MemoryStore, SystemClock};

pub const TEST_JWT_SECRET: &str = "test-only-jwt-secret-0123456789abcdef";
pub const TEST_CODE_SECRET: &str = "test-only-code-secret";

/// Router plus the collaborators behind it
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub accounts: InMemoryAccounts,
    pub entitlements: InMemoryEntitlements,
}

impl TestApp {
    /// Register an account and open a session for it
    pub async fn login(&self, user_id: &str, role: &str) -> TokenPair {
        let subject = TokenSubject {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            email: format!("{user_id}@example.com"),
            role: role.to_string(),
            is_verified: true,
            ..TokenSubject::default()
        };
        self.accounts.upsert(subject.clone());

        let client = ClientContext {
            ip_address: "127.0.0.1".to_string(),
            user_agent: "tessera-tests".to_string(),
            device_id: None,
        };
        self.state
            .auth
            .start_session(&subject, &client, "login")
            .await
            .expect("in-memory session start")
    }
}

/// Configuration with throwaway secrets and the in-memory store
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.tokens.signing_secret = Some(TEST_JWT_SECRET.to_string());
    config.codes.secret = Some(TEST_CODE_SECRET.to_string());
    config
}

/// Build a router over an in-memory store and in-memory collaborators
pub fn create_router_for_testing() -> TestApp {
    let config = test_config();
    let accounts = InMemoryAccounts::new();
    let entitlements = InMemoryEntitlements::new();

    let auth = AuthService::new(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
        Arc::new(accounts.clone()),
    )
    .expect("test configuration carries both secrets");

    let state = Arc::new(AppState::new(config, auth, Arc::new(entitlements.clone())));

    TestApp {
        router: create_router(state.clone()),
        state,
        accounts,
        entitlements,
    }
}
