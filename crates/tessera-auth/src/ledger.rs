//! Redemption ledger
//!
//! Records that a signed code has been consumed. The record is keyed by the
//! code's digest, created with `SET NX` (the single-use enforcement point),
//! and kept until the code's expiry plus a grace window so that late retries
//! of a consumed code still hit `CodeUsed` instead of a stale success.

use crate::code::SignedCodeCodec;
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{CodeConfig, EphemeralStore};
use tracing::{debug, info};

const KEY_PREFIX: &str = "redeemed:";

/// Handle to a reserved redemption, used to finalize or roll back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Ledger key of the redemption record
    pub key: String,
    /// Expiry embedded in the redeemed code
    pub expires_at: DateTime<Utc>,
}

/// TTL policy for redemption records
#[derive(Debug, Clone, Copy)]
pub struct LedgerPolicy {
    /// Time the record outlives the code's expiry
    pub grace: Duration,
    /// Lower bound for the record TTL
    pub min_ttl: Duration,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self::from(&CodeConfig::default())
    }
}

impl From<&CodeConfig> for LedgerPolicy {
    fn from(config: &CodeConfig) -> Self {
        Self {
            grace: Duration::from_secs(config.grace_secs),
            min_ttl: Duration::from_secs(config.min_ledger_ttl_secs.max(1)),
        }
    }
}

impl LedgerPolicy {
    /// `max(time-until-expiry + grace, min_ttl)`
    pub fn record_ttl(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
        remaining.saturating_add(self.grace).max(self.min_ttl)
    }
}

/// Single-use ledger for signed redemption codes
#[derive(Clone)]
pub struct RedemptionLedger {
    codec: SignedCodeCodec,
    store: Arc<dyn EphemeralStore>,
    policy: LedgerPolicy,
}

impl RedemptionLedger {
    pub fn new(codec: SignedCodeCodec, store: Arc<dyn EphemeralStore>, policy: LedgerPolicy) -> Self {
        Self {
            codec,
            store,
            policy,
        }
    }

    /// Ledger key for a code digest
    pub fn key_for(digest: &str) -> String {
        format!("{KEY_PREFIX}{digest}")
    }

    /// Verify `code` and reserve it for `owner`
    ///
    /// Exactly one of any number of concurrent calls for the same code
    /// succeeds; the others fail with [`AuthError::CodeUsed`].
    pub async fn redeem(
        &self,
        code: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Reservation> {
        let verified = self.codec.verify(code, now)?;
        let key = Self::key_for(&verified.digest);
        let ttl = self.policy.record_ttl(verified.expires_at, now);

        if !self.store.set_if_absent(&key, owner, ttl).await? {
            debug!(key = %key, "Redemption rejected: code already used");
            return Err(AuthError::CodeUsed);
        }

        info!(key = %key, ttl_secs = ttl.as_secs(), "Code redeemed");
        Ok(Reservation {
            key,
            expires_at: verified.expires_at,
        })
    }

    /// Replace the recorded owner, keeping the remaining TTL
    ///
    /// A missing record is a successful no-op.
    pub async fn mark_owner(&self, key: &str, owner: &str) -> AuthResult<()> {
        if !self.store.replace_keep_ttl(key, owner).await? {
            debug!(key = %key, "mark_owner on missing redemption record");
        }
        Ok(())
    }

    /// Drop a reservation so the code can be redeemed again
    pub async fn release(&self, key: &str) -> AuthResult<()> {
        if self.store.delete(key).await? {
            info!(key = %key, "Redemption released");
        }
        Ok(())
    }

    /// Current owner of a redemption record
    pub async fn owner_of(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.store.get(key).await?)
    }
}
