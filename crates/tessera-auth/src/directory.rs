//! Collaborators owned by the rest of the backend
//!
//! The token subsystem needs a user profile when it mints a fresh access
//! token on refresh, and somewhere to durably record a granted entitlement
//! after a code is redeemed. Both live outside this crate; the in-memory
//! implementations here back the development server and the tests.

use crate::error::{AuthError, AuthResult};
use crate::jwt::TokenSubject;
use crate::ledger::Reservation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Inbound profile lookup
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Current profile of `user_id`, or `None` when the account is gone
    async fn find_account(&self, user_id: &str) -> AuthResult<Option<TokenSubject>>;
}

/// Proof that an entitlement was durably recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementReceipt {
    /// Identity written back to the redemption record
    pub owner: String,
}

/// Outbound durable grant of a redeemed code's entitlement
#[async_trait]
pub trait EntitlementSink: Send + Sync {
    async fn grant(
        &self,
        user_id: &str,
        reservation: &Reservation,
    ) -> AuthResult<EntitlementReceipt>;
}

/// Account directory held in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccounts {
    accounts: Arc<RwLock<HashMap<String, TokenSubject>>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account, keyed by its `user_id`
    pub fn upsert(&self, subject: TokenSubject) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(subject.user_id.clone(), subject);
        }
    }

    pub fn remove(&self, user_id: &str) -> Option<TokenSubject> {
        self.accounts
            .write()
            .ok()
            .and_then(|mut accounts| accounts.remove(user_id))
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccounts {
    async fn find_account(&self, user_id: &str) -> AuthResult<Option<TokenSubject>> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| AuthError::Store(tessera_core::StoreError::Poisoned))?;
        Ok(accounts.get(user_id).cloned())
    }
}

/// A grant recorded by [`InMemoryEntitlements`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub user_id: String,
    pub ledger_key: String,
    pub premium_until: DateTime<Utc>,
}

/// Entitlement sink held in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntitlements {
    grants: Arc<RwLock<Vec<Grant>>>,
}

impl InMemoryEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants recorded for `user_id`
    pub fn grants_for(&self, user_id: &str) -> Vec<Grant> {
        self.grants
            .read()
            .map(|grants| {
                grants
                    .iter()
                    .filter(|grant| grant.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntitlementSink for InMemoryEntitlements {
    async fn grant(
        &self,
        user_id: &str,
        reservation: &Reservation,
    ) -> AuthResult<EntitlementReceipt> {
        let mut grants = self
            .grants
            .write()
            .map_err(|_| AuthError::Entitlement("grant registry poisoned".to_string()))?;
        grants.push(Grant {
            user_id: user_id.to_string(),
            ledger_key: reservation.key.clone(),
            premium_until: reservation.expires_at,
        });
        Ok(EntitlementReceipt {
            owner: user_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_account_lookup() {
        let accounts = InMemoryAccounts::new();
        accounts.upsert(TokenSubject {
            user_id: "u1".to_string(),
            username: "ada".to_string(),
            role: "user".to_string(),
            ..TokenSubject::default()
        });

        let found = accounts.find_account("u1").await.unwrap().unwrap();
        assert_eq!(found.username, "ada");
        assert!(accounts.find_account("u2").await.unwrap().is_none());

        accounts.remove("u1");
        assert!(accounts.find_account("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entitlement_grants_are_recorded() {
        let sink = InMemoryEntitlements::new();
        let reservation = Reservation {
            key: "redeemed:abc".to_string(),
            expires_at: Utc::now(),
        };

        let receipt = sink.grant("u1", &reservation).await.unwrap();
        assert_eq!(receipt.owner, "u1");
        assert_eq!(sink.grants_for("u1").len(), 1);
        assert!(sink.grants_for("u2").is_empty());
    }
}
