//! Step-up bridge between a first-factor login and a second-factor challenge

use crate::crypto::random_token;
use crate::error::{AuthError, AuthResult};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{EphemeralStore, TokenConfig};
use tracing::{debug, warn};

const KEY_PREFIX: &str = "pending:";

/// Single-use, short-lived tokens naming a user awaiting step-up
#[derive(Clone)]
pub struct PendingAuthStore {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl PendingAuthStore {
    pub fn new(store: Arc<dyn EphemeralStore>, config: &TokenConfig) -> AuthResult<Self> {
        if config.pending_ttl_secs == 0 {
            return Err(AuthError::InvalidExpiry);
        }
        Ok(Self {
            store,
            ttl: Duration::from_secs(config.pending_ttl_secs),
        })
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}{token}")
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(&self, user_id: &str) -> AuthResult<String> {
        let token = random_token();
        self.store.set(&Self::key(&token), user_id, self.ttl).await?;
        debug!(user_id = %user_id, ttl_secs = self.ttl.as_secs(), "Pending auth token issued");
        Ok(token)
    }

    /// Consume `token`, returning the user it was issued to
    ///
    /// The record is read and deleted atomically: of any number of concurrent
    /// calls with the same token exactly one succeeds.
    pub async fn validate(&self, token: &str) -> AuthResult<String> {
        match self.store.get_and_delete(&Self::key(token)).await? {
            Some(user_id) => Ok(user_id),
            None => {
                warn!("Rejected unknown or consumed pending auth token");
                Err(AuthError::InvalidOrExpired)
            }
        }
    }
}
