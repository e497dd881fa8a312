//! Server-side session records with sliding expiration

use crate::crypto::random_token;
use crate::error::{AuthError, AuthResult};
use crate::record;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{Clock, EphemeralStore, TokenConfig};
use tracing::{debug, info};

const KEY_PREFIX: &str = "session:";

/// A stored session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub purpose: String,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Parameters for a new session
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: String,
    pub purpose: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_id: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    scan_batch: usize,
}

impl SessionStore {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        clock: Arc<dyn Clock>,
        config: &TokenConfig,
        scan_batch: usize,
    ) -> AuthResult<Self> {
        let ttl = i64::try_from(config.session_ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .ok_or(AuthError::InvalidExpiry)?;

        Ok(Self {
            store,
            clock,
            ttl,
            scan_batch: scan_batch.max(1),
        })
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    fn ttl_std(&self) -> AuthResult<std::time::Duration> {
        self.ttl.to_std().map_err(|_| AuthError::InvalidExpiry)
    }

    pub async fn create(&self, params: NewSession) -> AuthResult<Session> {
        let now = self.clock.now();
        let session = Session {
            id: random_token(),
            user_id: params.user_id,
            purpose: params.purpose,
            ip_address: params.ip_address,
            user_agent: params.user_agent,
            device_id: params.device_id,
            created_at: now,
            expires_at: now + self.ttl,
            last_seen: now,
        };

        let key = Self::key(&session.id);
        self.store
            .set(&key, &record::encode(&key, &session)?, self.ttl_std()?)
            .await?;

        info!(user_id = %session.user_id, purpose = %session.purpose, "Session created");
        Ok(session)
    }

    /// Fetch a session
    ///
    /// A record whose `expires_at` has passed is deleted and reported as
    /// [`AuthError::Expired`].
    pub async fn get(&self, id: &str) -> AuthResult<Session> {
        let key = Self::key(id);
        let raw = self.store.get(&key).await?.ok_or(AuthError::NotFound)?;
        let session: Session = record::decode(&key, &raw)?;

        if self.clock.now() >= session.expires_at {
            self.store.delete(&key).await?;
            debug!(user_id = %session.user_id, "Lazily removed expired session");
            return Err(AuthError::Expired);
        }
        Ok(session)
    }

    /// Slide the session window: `last_seen = now`, `expires_at = now + ttl`
    pub async fn refresh(&self, id: &str) -> AuthResult<Session> {
        let mut session = self.get(id).await?;
        let now = self.clock.now();
        session.last_seen = now;
        session.expires_at = now + self.ttl;

        // Only overwrite a record that still exists so a concurrent delete wins
        let key = Self::key(id);
        if !self
            .store
            .replace_keep_ttl(&key, &record::encode(&key, &session)?)
            .await?
        {
            return Err(AuthError::NotFound);
        }
        if !self.store.expire(&key, self.ttl_std()?).await? {
            return Err(AuthError::NotFound);
        }

        debug!(user_id = %session.user_id, "Session refreshed");
        Ok(session)
    }

    /// Delete a session (idempotent)
    pub async fn delete(&self, id: &str) -> AuthResult<bool> {
        Ok(self.store.delete(&Self::key(id)).await?)
    }

    /// Every live session owned by `user_id`
    pub async fn list_for_user(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        let now = self.clock.now();
        let sessions = record::scan_matching::<Session, _>(
            self.store.as_ref(),
            KEY_PREFIX,
            self.scan_batch,
            |session| session.user_id == user_id && now < session.expires_at,
        )
        .await?;
        Ok(sessions.into_iter().map(|(_, session)| session).collect())
    }

    pub async fn count_active_for_user(&self, user_id: &str) -> AuthResult<usize> {
        Ok(self.list_for_user(user_id).await?.len())
    }

    /// Delete every session owned by `user_id`, returning how many were removed
    pub async fn delete_all_for_user(&self, user_id: &str) -> AuthResult<usize> {
        let owned = record::scan_matching::<Session, _>(
            self.store.as_ref(),
            KEY_PREFIX,
            self.scan_batch,
            |session| session.user_id == user_id,
        )
        .await?;

        let mut deleted = 0;
        for (key, _) in owned {
            if self.store.delete(&key).await? {
                deleted += 1;
            }
        }

        info!(user_id = %user_id, deleted, "Deleted all sessions for user");
        Ok(deleted)
    }

    /// Remaining lifetime of a session
    pub async fn get_ttl(&self, id: &str) -> AuthResult<std::time::Duration> {
        self.store
            .ttl(&Self::key(id))
            .await?
            .ok_or(AuthError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ManualClock, MemoryStore};

    fn setup() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let sessions =
            SessionStore::new(store, clock.clone(), &TokenConfig::default(), 3).unwrap();
        (sessions, clock)
    }

    fn params(user: &str) -> NewSession {
        NewSession {
            user_id: user.to_string(),
            purpose: "login".to_string(),
            ip_address: "203.0.113.7".to_string(),
            user_agent: "test-agent/1.0".to_string(),
            device_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (sessions, clock) = setup();
        let session = sessions.create(params("u1")).await.unwrap();

        assert_eq!(session.id.len(), 43);
        assert_eq!(session.expires_at, clock.now() + Duration::hours(24));

        let fetched = sessions.get(&session.id).await.unwrap();
        assert_eq!(fetched, session);
        assert_eq!(
            sessions.get_ttl(&session.id).await.unwrap(),
            std::time::Duration::from_secs(24 * 3600)
        );
    }

    #[tokio::test]
    async fn test_get_missing_session() {
        let (sessions, _) = setup();
        assert!(matches!(
            sessions.get("missing").await,
            Err(AuthError::NotFound)
        ));
        assert!(matches!(
            sessions.get_ttl("missing").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_sliding_refresh_extends_lifetime() {
        let (sessions, clock) = setup();
        let session = sessions.create(params("u1")).await.unwrap();

        clock.advance(Duration::hours(23));
        let refreshed = sessions.refresh(&session.id).await.unwrap();
        assert_eq!(refreshed.last_seen, clock.now());
        assert_eq!(refreshed.expires_at, clock.now() + Duration::hours(24));
        assert_eq!(refreshed.created_at, session.created_at);

        // Past the original deadline but within the slid window
        clock.advance(Duration::hours(2));
        assert!(sessions.get(&session.id).await.is_ok());
        assert_eq!(
            sessions.get_ttl(&session.id).await.unwrap(),
            std::time::Duration::from_secs(22 * 3600)
        );
    }

    #[tokio::test]
    async fn test_expired_session_is_not_returned() {
        let (sessions, clock) = setup();
        let session = sessions.create(params("u1")).await.unwrap();

        clock.advance(Duration::hours(24));
        let err = sessions.get(&session.id).await.unwrap_err();
        assert!(err.is_missing_or_expired());
        assert!(sessions.refresh(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_record_outliving_its_deadline_reports_expired() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let sessions =
            SessionStore::new(store.clone(), clock.clone(), &TokenConfig::default(), 3).unwrap();
        let session = sessions.create(params("u1")).await.unwrap();

        // The store keeps the record past the session's own deadline
        let key = SessionStore::key(&session.id);
        assert!(store
            .expire(&key, std::time::Duration::from_secs(48 * 3600))
            .await
            .unwrap());
        clock.advance(Duration::hours(25));

        assert!(matches!(
            sessions.get(&session.id).await,
            Err(AuthError::Expired)
        ));
        assert!(!store.exists(&key).await.unwrap());
        assert!(matches!(
            sessions.get(&session.id).await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_per_user_enumeration_and_bulk_delete() {
        let (sessions, _) = setup();
        for _ in 0..4 {
            sessions.create(params("alice")).await.unwrap();
        }
        let bob = sessions.create(params("bob")).await.unwrap();

        assert_eq!(sessions.count_active_for_user("alice").await.unwrap(), 4);
        assert_eq!(sessions.list_for_user("bob").await.unwrap(), vec![bob.clone()]);

        assert_eq!(sessions.delete_all_for_user("alice").await.unwrap(), 4);
        assert_eq!(sessions.count_active_for_user("alice").await.unwrap(), 0);
        assert!(sessions.get(&bob.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (sessions, _) = setup();
        let session = sessions.create(params("u1")).await.unwrap();
        assert!(sessions.delete(&session.id).await.unwrap());
        assert!(!sessions.delete(&session.id).await.unwrap());
        assert!(matches!(
            sessions.get(&session.id).await,
            Err(AuthError::NotFound)
        ));
    }
}
