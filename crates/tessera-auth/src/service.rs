//! Authentication service layer
//!
//! Composes the token stores into the flows the request layer calls:
//! starting a session, exchanging a refresh token, authenticating a bearer
//! token, logout, step-up, and premium code redemption.

use crate::blacklist::RevocationRegistry;
use crate::code::SignedCodeCodec;
use crate::directory::{AccountDirectory, EntitlementReceipt, EntitlementSink};
use crate::error::{AuthError, AuthResult, TokenRejection};
use crate::jwt::{Claims, TokenIssuer, TokenSubject, TokenValidator};
use crate::ledger::{LedgerPolicy, RedemptionLedger};
use crate::pending::PendingAuthStore;
use crate::refresh::{RefreshGrant, RefreshTokenStore};
use crate::session::{NewSession, Session, SessionStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tessera_core::{AppConfig, Clock, EphemeralStore};
use tracing::{info, warn};

/// Owner recorded on a redemption while its entitlement grant is in flight
const PENDING_OWNER_PREFIX: &str = "pending:";

/// Where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: String,
    pub user_agent: String,
    pub device_id: Option<String>,
}

/// Access token, refresh token and the session they belong to
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub session: Session,
}

/// Refresh tokens and sessions removed by a logout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogoutSummary {
    pub refresh_tokens: usize,
    pub sessions: usize,
}

/// Token subsystem facade
#[derive(Clone)]
pub struct AuthService {
    issuer: TokenIssuer,
    validator: TokenValidator,
    revocations: RevocationRegistry,
    refresh_tokens: RefreshTokenStore,
    sessions: SessionStore,
    pending: PendingAuthStore,
    codec: SignedCodeCodec,
    ledger: RedemptionLedger,
    directory: Arc<dyn AccountDirectory>,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// Build every component from configuration
    ///
    /// Fails with [`AuthError::SecretKeyMissing`] when either the token
    /// signing secret or the code secret is absent.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn EphemeralStore>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn AccountDirectory>,
    ) -> AuthResult<Self> {
        let tokens = &config.tokens;
        let batch = config.store.scan_batch;
        let codec = SignedCodeCodec::from_config(&config.codes)?;

        Ok(Self {
            issuer: TokenIssuer::new(tokens, clock.clone())?,
            validator: TokenValidator::new(tokens, clock.clone())?,
            revocations: RevocationRegistry::new(store.clone(), clock.clone()),
            refresh_tokens: RefreshTokenStore::new(store.clone(), clock.clone(), tokens, batch)?,
            sessions: SessionStore::new(store.clone(), clock.clone(), tokens, batch)?,
            pending: PendingAuthStore::new(store.clone(), tokens)?,
            ledger: RedemptionLedger::new(
                codec.clone(),
                store,
                LedgerPolicy::from(&config.codes),
            ),
            codec,
            directory,
            clock,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    pub fn revocations(&self) -> &RevocationRegistry {
        &self.revocations
    }

    pub fn ledger(&self) -> &RedemptionLedger {
        &self.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Open a session for an authenticated user
    ///
    /// # Arguments
    ///
    /// * `subject` - Profile the access token is minted for
    /// * `client` - Origin of the login request
    /// * `purpose` - Free-form session purpose (e.g. `"login"`)
    ///
    /// # Returns
    ///
    /// * `Ok(TokenPair)` - Access token, refresh token and the new session
    /// * `Err(AuthError)` - If any step fails; a session created before the
    ///   failure is deleted
    pub async fn start_session(
        &self,
        subject: &TokenSubject,
        client: &ClientContext,
        purpose: &str,
    ) -> AuthResult<TokenPair> {
        let session = self
            .sessions
            .create(NewSession {
                user_id: subject.user_id.clone(),
                purpose: purpose.to_string(),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                device_id: client.device_id.clone(),
            })
            .await?;

        match self.mint_pair(subject, client, &session).await {
            Ok(pair) => {
                info!(user_id = %subject.user_id, "Session started");
                Ok(pair)
            }
            Err(err) => {
                if let Err(cleanup) = self.sessions.delete(&session.id).await {
                    warn!(error = %cleanup, "Failed to remove session after aborted login");
                }
                Err(err)
            }
        }
    }

    async fn mint_pair(
        &self,
        subject: &TokenSubject,
        client: &ClientContext,
        session: &Session,
    ) -> AuthResult<TokenPair> {
        let access = self.issuer.issue(&bind_session(subject, client, session))?;
        let refresh_token = self
            .refresh_tokens
            .issue(&RefreshGrant {
                user_id: subject.user_id.clone(),
                session_id: session.id.clone(),
                device_id: client.device_id.clone(),
                ip: Some(client.ip_address.clone()),
            })
            .await?;

        Ok(TokenPair {
            expires_in: access.expires_in(),
            access_token: access.token,
            refresh_token,
            token_type: "Bearer".to_string(),
            session: session.clone(),
        })
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// The presented token is consumed. Any reason the exchange cannot go
    /// ahead (unknown token, deleted account, expired session) surfaces as
    /// [`AuthError::InvalidRefreshToken`].
    pub async fn refresh(&self, refresh_token: &str, client: &ClientContext) -> AuthResult<TokenPair> {
        let (new_token, record) = match self
            .refresh_tokens
            .rotate(refresh_token, Some(&client.ip_address))
            .await
        {
            Ok(rotated) => rotated,
            Err(AuthError::NotFound) => {
                warn!("Rejected unknown or consumed refresh token");
                return Err(AuthError::InvalidRefreshToken);
            }
            Err(err) => return Err(err),
        };

        let Some(mut subject) = self.directory.find_account(&record.user_id).await? else {
            warn!(user_id = %record.user_id, "Refresh for unknown account");
            self.refresh_tokens.revoke(&new_token).await?;
            self.sessions.delete(&record.session_id).await?;
            return Err(AuthError::InvalidRefreshToken);
        };

        let session = match self.sessions.refresh(&record.session_id).await {
            Ok(session) => session,
            Err(err) if err.is_missing_or_expired() => {
                self.refresh_tokens.revoke(&new_token).await?;
                return Err(AuthError::InvalidRefreshToken);
            }
            Err(err) => return Err(err),
        };

        subject.device_id = record.device_id.clone();
        let access = self.issuer.issue(&bind_session(&subject, client, &session))?;

        info!(user_id = %record.user_id, "Token pair refreshed");
        Ok(TokenPair {
            expires_in: access.expires_in(),
            access_token: access.token,
            refresh_token: new_token,
            token_type: "Bearer".to_string(),
            session,
        })
    }

    /// Validate a bearer token and check it has not been revoked
    pub async fn authenticate(&self, bearer: &str) -> AuthResult<Claims> {
        let claims = self.validator.validate(bearer)?;
        if self.revocations.is_revoked(&claims.jti).await? {
            return Err(AuthError::InvalidToken(TokenRejection::Revoked));
        }
        Ok(claims)
    }

    /// Log out the session behind `claims`
    ///
    /// A refresh token that belongs to another user is left alone.
    pub async fn logout(
        &self,
        claims: &Claims,
        refresh_token: Option<&str>,
    ) -> AuthResult<LogoutSummary> {
        self.revocations.revoke_claims(claims).await?;
        let mut summary = LogoutSummary::default();

        if let Some(token) = refresh_token {
            match self.refresh_tokens.lookup(token).await {
                Ok(record) if record.user_id == claims.user_id => {
                    if self.refresh_tokens.revoke(token).await? {
                        summary.refresh_tokens = 1;
                    }
                }
                Ok(_) => warn!(user_id = %claims.user_id, "Logout presented a foreign refresh token"),
                Err(AuthError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }

        if let Some(session_id) = &claims.session_id {
            if self.sessions.delete(session_id).await? {
                summary.sessions = 1;
            }
        }

        info!(user_id = %claims.user_id, "User logged out");
        Ok(summary)
    }

    /// Revoke the caller's token plus every refresh token and session they own
    pub async fn logout_everywhere(&self, claims: &Claims) -> AuthResult<LogoutSummary> {
        self.revocations.revoke_claims(claims).await?;
        let summary = LogoutSummary {
            refresh_tokens: self.refresh_tokens.revoke_all_for_user(&claims.user_id).await?,
            sessions: self.sessions.delete_all_for_user(&claims.user_id).await?,
        };

        info!(
            user_id = %claims.user_id,
            refresh_tokens = summary.refresh_tokens,
            sessions = summary.sessions,
            "User logged out everywhere"
        );
        Ok(summary)
    }

    /// Issue a pending token for a user who passed the first factor
    pub async fn begin_step_up(&self, user_id: &str) -> AuthResult<String> {
        self.pending.issue(user_id).await
    }

    /// Consume a pending token after the caller verified the second factor
    pub async fn complete_step_up(&self, pending_token: &str) -> AuthResult<String> {
        self.pending.validate(pending_token).await
    }

    /// Seconds a pending step-up token stays valid
    pub fn step_up_ttl_secs(&self) -> u64 {
        self.pending.ttl().as_secs()
    }

    /// Mint a premium code valid until `expiry`
    pub fn mint_code(&self, expiry: DateTime<Utc>) -> AuthResult<String> {
        self.codec.build(expiry)
    }

    /// Redeem a premium code for `user_id`
    ///
    /// The code is reserved first, then the entitlement is granted. A failed
    /// grant releases the reservation so the code can be retried; a
    /// successful one records the receipt's owner on the ledger.
    pub async fn redeem_code(
        &self,
        code: &str,
        user_id: &str,
        sink: &dyn EntitlementSink,
    ) -> AuthResult<EntitlementReceipt> {
        let owner = format!("{PENDING_OWNER_PREFIX}{user_id}");
        let reservation = self.ledger.redeem(code, &owner, self.clock.now()).await?;

        match sink.grant(user_id, &reservation).await {
            Ok(receipt) => {
                self.ledger.mark_owner(&reservation.key, &receipt.owner).await?;
                info!(user_id = %user_id, "Premium code redeemed");
                Ok(receipt)
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Entitlement grant failed, releasing code");
                if let Err(release) = self.ledger.release(&reservation.key).await {
                    warn!(error = %release, "Failed to release redemption");
                }
                Err(err)
            }
        }
    }
}

fn bind_session(subject: &TokenSubject, client: &ClientContext, session: &Session) -> TokenSubject {
    TokenSubject {
        session_id: Some(session.id.clone()),
        device_id: client.device_id.clone().or_else(|| subject.device_id.clone()),
        last_ip: Some(client.ip_address.clone()),
        ..subject.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryAccounts, InMemoryEntitlements};
    use crate::ledger::Reservation;
    use async_trait::async_trait;
    use chrono::Duration;
    use tessera_core::{ManualClock, MemoryStore};

    struct FailingSink;

    #[async_trait]
    impl EntitlementSink for FailingSink {
        async fn grant(&self, _: &str, _: &Reservation) -> AuthResult<EntitlementReceipt> {
            Err(AuthError::Entitlement("billing offline".to_string()))
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.tokens.signing_secret = Some("service-test-signing-secret-0123456789".to_string());
        config.codes.secret = Some("service-test-code-secret".to_string());
        config
    }

    fn subject(user_id: &str) -> TokenSubject {
        TokenSubject {
            user_id: user_id.to_string(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            role: "user".to_string(),
            ..TokenSubject::default()
        }
    }

    fn client() -> ClientContext {
        ClientContext {
            ip_address: "203.0.113.10".to_string(),
            user_agent: "tests".to_string(),
            device_id: Some("laptop".to_string()),
        }
    }

    fn setup() -> (AuthService, Arc<ManualClock>, InMemoryAccounts) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let accounts = InMemoryAccounts::new();
        accounts.upsert(subject("u1"));
        let service =
            AuthService::new(&config(), store, clock.clone(), Arc::new(accounts.clone())).unwrap();
        (service, clock, accounts)
    }

    #[test]
    fn test_new_requires_secrets() {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(tessera_core::SystemClock);
        let accounts = Arc::new(InMemoryAccounts::new());

        let mut missing_code = config();
        missing_code.codes.secret = None;
        assert!(matches!(
            AuthService::new(&missing_code, store.clone(), clock.clone(), accounts.clone()),
            Err(AuthError::SecretKeyMissing)
        ));

        let mut missing_jwt = config();
        missing_jwt.tokens.signing_secret = None;
        assert!(matches!(
            AuthService::new(&missing_jwt, store, clock, accounts),
            Err(AuthError::SecretKeyMissing)
        ));
    }

    #[tokio::test]
    async fn test_start_session_binds_tokens_to_session() {
        let (service, _, _) = setup();
        let pair = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);

        let claims = service.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(claims.session_id.as_deref(), Some(pair.session.id.as_str()));
        assert_eq!(claims.device_id.as_deref(), Some("laptop"));

        let record = service.refresh_tokens().lookup(&pair.refresh_token).await.unwrap();
        assert_eq!(record.session_id, pair.session.id);
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_slides_session() {
        let (service, clock, _) = setup();
        let pair = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();

        clock.advance(Duration::hours(20));
        let next = service.refresh(&pair.refresh_token, &client()).await.unwrap();
        assert_ne!(next.refresh_token, pair.refresh_token);
        assert_eq!(next.session.id, pair.session.id);
        assert_eq!(next.session.expires_at, clock.now() + Duration::hours(24));

        assert!(matches!(
            service.refresh(&pair.refresh_token, &client()).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_for_deleted_account_drops_session() {
        let (service, _, accounts) = setup();
        let pair = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();

        accounts.remove("u1");
        assert!(matches!(
            service.refresh(&pair.refresh_token, &client()).await,
            Err(AuthError::InvalidRefreshToken)
        ));
        assert!(service.sessions().get(&pair.session.id).await.is_err());
        assert_eq!(service.sessions().count_active_for_user("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_after_session_expiry_is_rejected() {
        let mut config = config();
        config.tokens.session_ttl_secs = 60;
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let accounts = InMemoryAccounts::new();
        accounts.upsert(subject("u1"));
        let service = AuthService::new(&config, store, clock.clone(), Arc::new(accounts)).unwrap();

        let pair = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();
        clock.advance(Duration::seconds(61));

        assert!(matches!(
            service.refresh(&pair.refresh_token, &client()).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_everything_for_that_session() {
        let (service, _, _) = setup();
        let pair = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();
        let claims = service.authenticate(&pair.access_token).await.unwrap();

        let summary = service.logout(&claims, Some(&pair.refresh_token)).await.unwrap();
        assert_eq!(
            summary,
            LogoutSummary {
                refresh_tokens: 1,
                sessions: 1
            }
        );

        assert!(matches!(
            service.authenticate(&pair.access_token).await,
            Err(AuthError::InvalidToken(TokenRejection::Revoked))
        ));
        assert!(service.refresh_tokens().lookup(&pair.refresh_token).await.is_err());
        assert!(service.sessions().get(&pair.session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_logout_ignores_foreign_refresh_token() {
        let (service, _, accounts) = setup();
        accounts.upsert(subject("u2"));
        let mine = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();
        let theirs = service
            .start_session(&subject("u2"), &client(), "login")
            .await
            .unwrap();

        let claims = service.authenticate(&mine.access_token).await.unwrap();
        let summary = service.logout(&claims, Some(&theirs.refresh_token)).await.unwrap();
        assert_eq!(summary.refresh_tokens, 0);
        assert!(service.refresh_tokens().lookup(&theirs.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_everywhere_counts_removed_state() {
        let (service, _, _) = setup();
        let first = service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();
        service
            .start_session(&subject("u1"), &client(), "login")
            .await
            .unwrap();

        let claims = service.authenticate(&first.access_token).await.unwrap();
        let summary = service.logout_everywhere(&claims).await.unwrap();
        assert_eq!(
            summary,
            LogoutSummary {
                refresh_tokens: 2,
                sessions: 2
            }
        );
        assert!(service.authenticate(&first.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_step_up_round_trip() {
        let (service, _, _) = setup();
        let token = service.begin_step_up("u1").await.unwrap();
        assert_eq!(service.complete_step_up(&token).await.unwrap(), "u1");
        assert!(matches!(
            service.complete_step_up(&token).await,
            Err(AuthError::InvalidOrExpired)
        ));
        assert_eq!(service.step_up_ttl_secs(), 300);
    }

    #[tokio::test]
    async fn test_redeem_code_finalizes_owner() {
        let (service, clock, _) = setup();
        let sink = InMemoryEntitlements::new();
        let code = service.mint_code(clock.now() + Duration::days(30)).unwrap();

        let receipt = service.redeem_code(&code, "u1", &sink).await.unwrap();
        assert_eq!(receipt.owner, "u1");

        let key = RedemptionLedger::key_for(&crate::code::digest(&code));
        assert_eq!(service.ledger().owner_of(&key).await.unwrap().as_deref(), Some("u1"));
        assert_eq!(sink.grants_for("u1").len(), 1);

        assert!(matches!(
            service.redeem_code(&code, "u1", &sink).await,
            Err(AuthError::CodeUsed)
        ));
    }

    #[tokio::test]
    async fn test_failed_grant_releases_code() {
        let (service, clock, _) = setup();
        let code = service.mint_code(clock.now() + Duration::days(30)).unwrap();

        assert!(matches!(
            service.redeem_code(&code, "u1", &FailingSink).await,
            Err(AuthError::Entitlement(_))
        ));

        let sink = InMemoryEntitlements::new();
        assert!(service.redeem_code(&code, "u1", &sink).await.is_ok());
    }
}
