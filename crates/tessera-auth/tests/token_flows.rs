//! End-to-end flows over the in-memory store
//!
//! Run with: cargo test -p tessera-auth --test token_flows

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;
use tessera_auth::code::normalize;
use tessera_auth::{
    AuthError, LedgerPolicy, PendingAuthStore, RedemptionLedger, RefreshGrant, RefreshTokenStore,
    RevocationRegistry, SignedCodeCodec, TokenIssuer, TokenSubject, TokenValidator,
};
use tessera_core::{Clock, ManualClock, MemoryStore, TokenConfig};

const CODE_SECRET: &str = "integration-code-secret";
const JWT_SECRET: &str = "integration-jwt-secret-0123456789abcdef";

fn codec() -> SignedCodeCodec {
    SignedCodeCodec::new(Some(CODE_SECRET)).unwrap()
}

fn token_config() -> TokenConfig {
    TokenConfig {
        signing_secret: Some(JWT_SECRET.to_string()),
        ..TokenConfig::default()
    }
}

fn fixture() -> (Arc<ManualClock>, Arc<MemoryStore>) {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (clock, store)
}

// ============================================================================
// Redemption codes
// ============================================================================

#[tokio::test]
async fn test_code_redeem_release_redeem() {
    let (clock, store) = fixture();
    let ledger = RedemptionLedger::new(codec(), store, LedgerPolicy::default());
    let expiry = clock.now() + Duration::days(30);

    let code = codec().build(expiry).unwrap();
    let verified = codec().verify(&code, clock.now()).unwrap();
    assert_eq!(verified.expires_at, expiry);

    let first = ledger.redeem(&code, "user-42", clock.now()).await.unwrap();
    assert_eq!(
        ledger.owner_of(&first.key).await.unwrap().as_deref(),
        Some("user-42")
    );

    assert!(matches!(
        ledger.redeem(&code, "user-99", clock.now()).await,
        Err(AuthError::CodeUsed)
    ));

    ledger.release(&first.key).await.unwrap();
    let third = ledger.redeem(&code, "user-99", clock.now()).await.unwrap();
    assert_eq!(third.key, first.key);
    assert_eq!(
        ledger.owner_of(&third.key).await.unwrap().as_deref(),
        Some("user-99")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemption_has_one_winner() {
    let (clock, store) = fixture();
    let ledger = RedemptionLedger::new(codec(), store, LedgerPolicy::default());
    let code = codec().build(clock.now() + Duration::days(1)).unwrap();
    let now = clock.now();

    let attempts = (0..32).map(|i| {
        let ledger = ledger.clone();
        let code = code.clone();
        tokio::spawn(async move { ledger.redeem(&code, &format!("user-{i}"), now).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let used = results
        .iter()
        .filter(|r| matches!(r, Err(AuthError::CodeUsed)))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(used, 31);
}

#[tokio::test]
async fn test_redemption_record_outlives_code() {
    let (clock, store) = fixture();
    let ledger = RedemptionLedger::new(codec(), store.clone(), LedgerPolicy::default());
    let code = codec().build(clock.now() + Duration::hours(2)).unwrap();
    let reservation = ledger.redeem(&code, "user-1", clock.now()).await.unwrap();

    // Past the code's expiry, the record still blocks replays
    clock.advance(Duration::days(3));
    assert!(matches!(
        ledger.redeem(&code, "user-2", clock.now()).await,
        Err(AuthError::CodeExpired)
    ));
    assert!(ledger.owner_of(&reservation.key).await.unwrap().is_some());
}

// ============================================================================
// Access tokens and revocation
// ============================================================================

#[tokio::test]
async fn test_access_token_revocation_lapses_with_token() {
    let (clock, store) = fixture();
    let issuer = TokenIssuer::new(&token_config(), clock.clone()).unwrap();
    let validator = TokenValidator::new(&token_config(), clock.clone()).unwrap();
    let registry = RevocationRegistry::new(store, clock.clone());

    let subject = TokenSubject {
        user_id: "user-7".to_string(),
        username: "grace".to_string(),
        email: "grace@example.com".to_string(),
        role: "user".to_string(),
        ..TokenSubject::default()
    };
    let issued = issuer.issue(&subject).unwrap();
    assert_eq!(issued.expires_in(), 3600);

    let claims = validator.validate(&issued.token).unwrap();
    assert_eq!(claims, issued.claims);
    assert_eq!(claims.user_id, "user-7");

    assert!(registry.revoke_claims(&claims).await.unwrap());
    assert!(registry.is_revoked(&claims.jti).await.unwrap());

    clock.advance(Duration::hours(1));
    assert!(!registry.is_revoked(&claims.jti).await.unwrap());
    assert!(validator.validate(&issued.token).is_err());
}

// ============================================================================
// Refresh tokens and step-up tokens
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_one_winner() {
    let (clock, store) = fixture();
    let tokens = RefreshTokenStore::new(store, clock, &token_config(), 100).unwrap();
    let token = tokens
        .issue(&RefreshGrant {
            user_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            ..RefreshGrant::default()
        })
        .await
        .unwrap();

    let attempts = (0..16).map(|_| {
        let tokens = tokens.clone();
        let token = token.clone();
        tokio::spawn(async move { tokens.rotate(&token, None).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AuthError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pending_validation_has_one_winner() {
    let (_, store) = fixture();
    let pending = PendingAuthStore::new(store, &token_config()).unwrap();
    let token = pending.issue("user-5").await.unwrap();

    let attempts = (0..16).map(|_| {
        let pending = pending.clone();
        let token = token.clone();
        tokio::spawn(async move { pending.validate(&token).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners, vec!["user-5"]);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AuthError::InvalidOrExpired)));
}

// ============================================================================
// Codec properties
// ============================================================================

fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

proptest! {
    #[test]
    fn prop_build_verify_round_trip(offset in 1i64..(3650 * 86_400)) {
        let now = base_time();
        let expiry = now + Duration::seconds(offset);
        let code = codec().build(expiry).unwrap();

        let verified = codec().verify(&code, now).unwrap();
        prop_assert_eq!(verified.expires_at, expiry);

        // Case and separators do not change the identity
        let relaxed = code.to_lowercase().replace('-', " ");
        prop_assert_eq!(codec().verify(&relaxed, now).unwrap().digest, verified.digest);

        prop_assert!(matches!(
            codec().verify(&code, expiry),
            Err(AuthError::CodeExpired)
        ));
    }

    #[test]
    fn prop_single_bit_flip_is_signature_failure(bit in 0usize..160) {
        let now = base_time();
        let code = codec().build(now + Duration::days(1)).unwrap();

        let mut raw = BASE32_NOPAD.decode(normalize(&code).as_bytes()).unwrap();
        raw[bit / 8] ^= 1 << (bit % 8);
        let tampered = BASE32_NOPAD.encode(&raw);

        prop_assert!(matches!(
            codec().verify(&tampered, now),
            Err(AuthError::CodeSignature)
        ));
    }
}
