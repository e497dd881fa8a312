//! Access token revocation registry
//!
//! A revoked token's `jti` is stored only for the token's remaining lifetime:
//! once the token expires naturally the validator rejects it anyway, so the
//! entry can be evicted by the store without a sweep.

use crate::error::AuthResult;
use crate::jwt::Claims;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tessera_core::{Clock, EphemeralStore};
use tracing::debug;

const KEY_PREFIX: &str = "blacklist:";
const MARKER: &str = "1";

/// Deny-list of revoked access token IDs
#[derive(Clone)]
pub struct RevocationRegistry {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationRegistry {
    pub fn new(store: Arc<dyn EphemeralStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn key(jti: &str) -> String {
        format!("{KEY_PREFIX}{jti}")
    }

    /// Revoke `jti` until `expires_at`
    ///
    /// Returns `false` without writing anything when the token has already
    /// expired.
    pub async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<bool> {
        let remaining = match (expires_at - self.clock.now()).to_std() {
            Ok(remaining) if remaining.as_millis() > 0 => remaining,
            _ => {
                debug!(jti = %jti, "Skipping revocation of expired token");
                return Ok(false);
            }
        };

        self.store.set(&Self::key(jti), MARKER, remaining).await?;
        debug!(jti = %jti, ttl_secs = remaining.as_secs(), "Token revoked");
        Ok(true)
    }

    /// Revoke the token described by `claims`
    pub async fn revoke_claims(&self, claims: &Claims) -> AuthResult<bool> {
        self.revoke(&claims.jti, claims.expires_at()).await
    }

    /// Whether `jti` is currently revoked
    pub async fn is_revoked(&self, jti: &str) -> AuthResult<bool> {
        Ok(self.store.exists(&Self::key(jti)).await?)
    }
}
