//! JWT token generation and validation
//!
//! Access tokens are HMAC-signed JWTs carrying the user's identity and a
//! random `jti`. The `jti` exists only so a token can be blacklisted (see
//! [`RevocationRegistry`](crate::blacklist::RevocationRegistry)); the
//! validator itself never consults the store.

use crate::error::{AuthError, AuthResult, TokenRejection};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{Clock, SigningAlgorithm, TokenConfig};
use uuid::Uuid;

/// Minimum signing secret length in bytes (256 bits)
pub const MIN_SIGNING_SECRET_BYTES: usize = 32;

/// JWT Claims structure containing user information
///
/// These claims are embedded in the access token and extracted during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// JWT ID - unique token identifier for blacklisting
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: i64,
    /// Not valid before (Unix epoch)
    pub nbf: i64,
    /// Expiration timestamp (Unix epoch)
    pub exp: i64,
    /// User ID (duplicated from `sub` for clients that read it directly)
    pub user_id: String,
    /// Session this token belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Device the session was opened from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Last IP the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ip: Option<String>,
    /// User's login name
    pub username: String,
    /// User's email address
    pub email: String,
    /// User's role
    pub role: String,
    /// Whether the user holds a premium entitlement
    pub is_premium: bool,
    /// Whether the user's email is verified
    pub is_verified: bool,
}

impl Claims {
    /// Expiration as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Identity and context an access token is minted for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSubject {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_premium: bool,
    pub is_verified: bool,
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub last_ip: Option<String>,
}

/// A freshly signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

impl IssuedToken {
    /// Seconds until expiry, measured from issuance
    pub fn expires_in(&self) -> u64 {
        u64::try_from(self.claims.exp - self.claims.iat).unwrap_or(0)
    }
}

fn algorithm(alg: SigningAlgorithm) -> Algorithm {
    match alg {
        SigningAlgorithm::HS256 => Algorithm::HS256,
        SigningAlgorithm::HS384 => Algorithm::HS384,
        SigningAlgorithm::HS512 => Algorithm::HS512,
    }
}

fn signing_secret(config: &TokenConfig) -> AuthResult<&[u8]> {
    config
        .signing_secret
        .as_deref()
        .map(str::as_bytes)
        .filter(|secret| secret.len() >= MIN_SIGNING_SECRET_BYTES)
        .ok_or(AuthError::SecretKeyMissing)
}

/// Mints signed access tokens
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
    algorithm: Algorithm,
    issuer: String,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Fails with [`AuthError::SecretKeyMissing`] without a 256-bit secret
    pub fn new(config: &TokenConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let secret = signing_secret(config)?;
        let lifetime = i64::try_from(config.access_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or(AuthError::InvalidExpiry)?;

        Ok(Self {
            key: EncodingKey::from_secret(secret),
            algorithm: algorithm(config.algorithm),
            issuer: config.issuer.clone(),
            lifetime,
            clock,
        })
    }

    /// Configured access token lifetime
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Generate a JWT access token for `subject`
    pub fn issue(&self, subject: &TokenSubject) -> AuthResult<IssuedToken> {
        let now = self.clock.now().timestamp();

        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.user_id.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now + self.lifetime.num_seconds(),
            user_id: subject.user_id.clone(),
            session_id: subject.session_id.clone(),
            device_id: subject.device_id.clone(),
            last_ip: subject.last_ip.clone(),
            username: subject.username.clone(),
            email: subject.email.clone(),
            role: subject.role.clone(),
            is_premium: subject.is_premium,
            is_verified: subject.is_verified,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }
}

/// Verifies access tokens (signature, algorithm, issuer, time window)
#[derive(Clone)]
pub struct TokenValidator {
    key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    leeway: i64,
    clock: Arc<dyn Clock>,
}

impl TokenValidator {
    pub fn new(config: &TokenConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let secret = signing_secret(config)?;
        Ok(Self {
            key: DecodingKey::from_secret(secret),
            algorithm: algorithm(config.algorithm),
            issuer: config.issuer.clone(),
            leeway: i64::try_from(config.leeway_secs).unwrap_or(i64::MAX),
            clock,
        })
    }

    /// Validate a JWT access token and extract claims
    ///
    /// Tokens whose header names any algorithm other than the configured one
    /// are rejected before the signature is looked at. Revocation is not
    /// checked here.
    pub fn validate(&self, token: &str) -> AuthResult<Claims> {
        let header =
            decode_header(token).map_err(|_| AuthError::InvalidToken(TokenRejection::Malformed))?;
        if header.alg != self.algorithm {
            return Err(AuthError::InvalidToken(TokenRejection::Algorithm));
        }

        // exp/nbf are checked against the injected clock below
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<Claims>(token, &self.key, &validation)
            .map_err(|e| {
                AuthError::InvalidToken(match e.kind() {
                    ErrorKind::InvalidSignature | ErrorKind::InvalidIssuer => {
                        TokenRejection::Signature
                    }
                    ErrorKind::InvalidAlgorithm => TokenRejection::Algorithm,
                    _ => TokenRejection::Malformed,
                })
            })?
            .claims;

        let now = self.clock.now().timestamp();
        if now >= claims.exp.saturating_add(self.leeway) {
            return Err(AuthError::InvalidToken(TokenRejection::Expired));
        }
        if claims.nbf > now.saturating_add(self.leeway) {
            return Err(AuthError::InvalidToken(TokenRejection::NotYetValid));
        }
        if claims.sub != claims.user_id {
            return Err(AuthError::InvalidToken(TokenRejection::Malformed));
        }

        Ok(claims)
    }
}
