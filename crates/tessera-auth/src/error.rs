//! Error taxonomy for the token subsystem
//!
//! Every fallible operation returns an [`AuthError`] variant so callers can
//! match exhaustively on the failure kind. Variants never carry the raw code
//! or token that was presented.

use tessera_core::StoreError;
use thiserror::Error;

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Why an access token was rejected (diagnostic only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a well-formed JWT, or claims missing/invalid
    Malformed,
    /// Header algorithm differs from the configured HMAC algorithm
    Algorithm,
    /// Signature or issuer did not verify
    Signature,
    /// `exp` has passed
    Expired,
    /// `nbf` lies in the future
    NotYetValid,
    /// The token's `jti` is on the revocation list
    Revoked,
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::Algorithm => "unexpected algorithm",
            TokenRejection::Signature => "bad signature",
            TokenRejection::Expired => "expired",
            TokenRejection::NotYetValid => "not yet valid",
            TokenRejection::Revoked => "revoked",
        };
        f.write_str(reason)
    }
}

/// Token subsystem errors
#[derive(Debug, Error)]
pub enum AuthError {
    // Configuration
    #[error("secret key missing or too short")]
    SecretKeyMissing,

    #[error("expiry outside the representable range")]
    InvalidExpiry,

    // Signed redemption codes
    #[error("malformed code")]
    CodeFormat,

    #[error("code signature mismatch")]
    CodeSignature,

    #[error("code expired")]
    CodeExpired,

    #[error("code already used")]
    CodeUsed,

    // Bearer tokens, sessions, step-up
    #[error("invalid token: {0}")]
    InvalidToken(TokenRejection),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("not found")]
    NotFound,

    #[error("expired")]
    Expired,

    #[error("invalid or expired pending authentication")]
    InvalidOrExpired,

    // Collaborators and infrastructure
    #[error("entitlement grant failed: {0}")]
    Entitlement(String),

    #[error("corrupt record under {key}")]
    CorruptRecord { key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// HTTP status code callers should surface
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            AuthError::CodeFormat | AuthError::CodeSignature | AuthError::InvalidExpiry => 400,

            // 401 Unauthorized (re-authenticate)
            AuthError::InvalidToken(_)
            | AuthError::InvalidRefreshToken
            | AuthError::NotFound
            | AuthError::Expired
            | AuthError::InvalidOrExpired => 401,

            // 409 Conflict
            AuthError::CodeUsed => 409,

            // 410 Gone
            AuthError::CodeExpired => 410,

            // 502 Bad Gateway
            AuthError::Entitlement(_) => 502,

            // 503 Service Unavailable
            AuthError::Store(err) if err.is_retryable() => 503,

            // 500 Internal Server Error
            AuthError::SecretKeyMissing
            | AuthError::Signing(_)
            | AuthError::CorruptRecord { .. }
            | AuthError::Store(_) => 500,
        }
    }

    /// Stable error code (client-facing)
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::SecretKeyMissing => "SECRET_KEY_MISSING",
            AuthError::InvalidExpiry => "INVALID_EXPIRY",
            AuthError::CodeFormat => "CODE_FORMAT",
            AuthError::CodeSignature => "CODE_SIGNATURE",
            AuthError::CodeExpired => "CODE_EXPIRED",
            AuthError::CodeUsed => "CODE_USED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::Signing(_) => "SIGNING_FAILED",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::NotFound => "NOT_FOUND",
            AuthError::Expired => "EXPIRED",
            AuthError::InvalidOrExpired => "INVALID_OR_EXPIRED",
            AuthError::Entitlement(_) => "ENTITLEMENT_FAILED",
            AuthError::CorruptRecord { .. } => "CORRUPT_RECORD",
            AuthError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Whether retrying with backoff can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Store(err) if err.is_retryable())
    }

    /// Session/refresh lookups fail with either kind; both mean "re-authenticate"
    pub fn is_missing_or_expired(&self) -> bool {
        matches!(self, AuthError::NotFound | AuthError::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::SecretKeyMissing.status_code(), 500);
        assert_eq!(AuthError::CodeFormat.status_code(), 400);
        assert_eq!(AuthError::CodeSignature.status_code(), 400);
        assert_eq!(AuthError::CodeExpired.status_code(), 410);
        assert_eq!(AuthError::CodeUsed.status_code(), 409);
        assert_eq!(
            AuthError::InvalidToken(TokenRejection::Revoked).status_code(),
            401
        );
        assert_eq!(AuthError::InvalidOrExpired.status_code(), 401);
        // Missing and expired records both mean re-authenticate
        assert_eq!(AuthError::NotFound.status_code(), 401);
        assert_eq!(AuthError::Expired.status_code(), 401);
        assert_eq!(
            AuthError::Store(StoreError::Timeout(Duration::from_millis(5))).status_code(),
            503
        );
        assert_eq!(AuthError::Store(StoreError::Poisoned).status_code(), 500);
    }

    #[test]
    fn test_retryable_only_for_store_outages() {
        assert!(AuthError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!AuthError::CodeUsed.is_retryable());
        assert!(!AuthError::SecretKeyMissing.is_retryable());
    }

    #[test]
    fn test_messages_do_not_echo_input() {
        let message = AuthError::InvalidToken(TokenRejection::Signature).to_string();
        assert_eq!(message, "invalid token: bad signature");
        assert!(AuthError::NotFound.is_missing_or_expired());
        assert!(AuthError::Expired.is_missing_or_expired());
        assert!(!AuthError::CodeExpired.is_missing_or_expired());
    }
}
