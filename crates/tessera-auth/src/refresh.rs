//! Opaque refresh tokens
//!
//! Refresh tokens are random strings presented only to this server, so they
//! carry no structure. The store key is derived from a SHA-256 of the token;
//! a dump of the store therefore contains no presentable token.

use crate::crypto::{random_token, sha256_hex};
use crate::error::{AuthError, AuthResult};
use crate::record;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{Clock, EphemeralStore, TokenConfig};
use tracing::{debug, info};

const KEY_PREFIX: &str = "refresh:";

/// Metadata stored for each refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub last_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Who a refresh token is issued to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshGrant {
    pub user_id: String,
    pub session_id: String,
    pub device_id: Option<String>,
    pub ip: Option<String>,
}

/// Store of refresh token records
#[derive(Clone)]
pub struct RefreshTokenStore {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    scan_batch: usize,
}

impl RefreshTokenStore {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        clock: Arc<dyn Clock>,
        config: &TokenConfig,
        scan_batch: usize,
    ) -> AuthResult<Self> {
        let lifetime = i64::try_from(config.refresh_ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .ok_or(AuthError::InvalidExpiry)?;

        Ok(Self {
            store,
            clock,
            lifetime,
            scan_batch: scan_batch.max(1),
        })
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}{}", sha256_hex(token.as_bytes()))
    }

    /// Issue a new refresh token for `grant`
    pub async fn issue(&self, grant: &RefreshGrant) -> AuthResult<String> {
        let (token, _) = self.issue_record(grant).await?;
        Ok(token)
    }

    async fn issue_record(&self, grant: &RefreshGrant) -> AuthResult<(String, RefreshTokenRecord)> {
        let now = self.clock.now();
        let record = RefreshTokenRecord {
            user_id: grant.user_id.clone(),
            session_id: grant.session_id.clone(),
            device_id: grant.device_id.clone(),
            last_ip: grant.ip.clone(),
            created_at: now,
            expires_at: now + self.lifetime,
        };

        let token = random_token();
        let key = Self::key(&token);
        let ttl = self.lifetime.to_std().map_err(|_| AuthError::InvalidExpiry)?;
        self.store
            .set(&key, &record::encode(&key, &record)?, ttl)
            .await?;

        debug!(user_id = %record.user_id, session_id = %record.session_id, "Refresh token issued");
        Ok((token, record))
    }

    /// Look up the record of a live refresh token
    pub async fn lookup(&self, token: &str) -> AuthResult<RefreshTokenRecord> {
        let key = Self::key(token);
        let raw = self.store.get(&key).await?.ok_or(AuthError::NotFound)?;
        let record: RefreshTokenRecord = record::decode(&key, &raw)?;

        if self.clock.now() >= record.expires_at {
            self.store.delete(&key).await?;
            return Err(AuthError::NotFound);
        }
        Ok(record)
    }

    /// Exchange `token` for a new one bound to the same user, session and device
    ///
    /// The old record is consumed with an atomic get-and-delete, so of two
    /// concurrent exchanges of the same token only one succeeds.
    pub async fn rotate(
        &self,
        token: &str,
        ip: Option<&str>,
    ) -> AuthResult<(String, RefreshTokenRecord)> {
        let key = Self::key(token);
        let raw = self
            .store
            .get_and_delete(&key)
            .await?
            .ok_or(AuthError::NotFound)?;
        let old: RefreshTokenRecord = record::decode(&key, &raw)?;

        if self.clock.now() >= old.expires_at {
            return Err(AuthError::NotFound);
        }

        let grant = RefreshGrant {
            user_id: old.user_id,
            session_id: old.session_id,
            device_id: old.device_id,
            ip: ip.map(str::to_string).or(old.last_ip),
        };
        self.issue_record(&grant).await
    }

    /// Revoke a single refresh token (idempotent)
    pub async fn revoke(&self, token: &str) -> AuthResult<bool> {
        Ok(self.store.delete(&Self::key(token)).await?)
    }

    /// Revoke every refresh token owned by `user_id`, returning how many were removed
    pub async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<usize> {
        let owned = record::scan_matching::<RefreshTokenRecord, _>(
            self.store.as_ref(),
            KEY_PREFIX,
            self.scan_batch,
            |record| record.user_id == user_id,
        )
        .await?;

        let mut revoked = 0;
        for (key, _) in owned {
            if self.store.delete(&key).await? {
                revoked += 1;
            }
        }

        info!(user_id = %user_id, revoked, "Revoked all refresh tokens for user");
        Ok(revoked)
    }
}
