//! Signed redemption codes
//!
//! A code is 20 raw bytes rendered as base-32 text:
//!
//! ```text
//! +---------+----------------+-----------+----------------------------+
//! | version | expiry (u32 BE)| nonce (5) | tag = HMAC-SHA256[..10]     |
//! +---------+----------------+-----------+----------------------------+
//!   1 byte     4 bytes          5 bytes    10 bytes over the first 10
//! ```
//!
//! The code is self-verifying: signature and expiry are checked without any
//! store lookup, so only genuine unexpired codes ever reach the ledger.
//! Knowledge of the code is the credential, so the ledger only ever sees
//! [`VerifiedCode::digest`].

use crate::crypto::sha256_hex;
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, TimeZone, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tessera_core::CodeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Current code layout version
pub const CODE_VERSION: u8 = 1;

/// Minimum operator secret length (after trimming)
pub const MIN_SECRET_LEN: usize = 16;

const NONCE_LEN: usize = 5;
const TAG_LEN: usize = 10;
const PAYLOAD_LEN: usize = 1 + 4 + NONCE_LEN;
const RAW_LEN: usize = PAYLOAD_LEN + TAG_LEN;
const GROUP_LEN: usize = 4;

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCode {
    /// Expiry embedded in the code
    pub expires_at: DateTime<Utc>,
    /// SHA-256 hex of the normalized text; the code's redemption identity
    pub digest: String,
}

/// Builds and verifies signed redemption codes
///
/// Holds only the derived MAC key and is safe to share between tasks.
#[derive(Clone)]
pub struct SignedCodeCodec {
    key: [u8; 32],
}

impl std::fmt::Debug for SignedCodeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCodeCodec")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SignedCodeCodec {
    /// Derive the MAC key from an operator secret
    ///
    /// Fails with [`AuthError::SecretKeyMissing`] when the secret is absent
    /// or shorter than [`MIN_SECRET_LEN`] characters.
    pub fn new(secret: Option<&str>) -> AuthResult<Self> {
        let secret = secret
            .map(str::trim)
            .filter(|s| s.chars().count() >= MIN_SECRET_LEN)
            .ok_or(AuthError::SecretKeyMissing)?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        Ok(Self { key })
    }

    pub fn from_config(config: &CodeConfig) -> AuthResult<Self> {
        Self::new(config.secret.as_deref())
    }

    /// Build a new code that stops verifying at `expiry`
    ///
    /// Expiry has second resolution and must fit in 32 bits (up to 2106).
    pub fn build(&self, expiry: DateTime<Utc>) -> AuthResult<String> {
        let expiry_secs =
            u32::try_from(expiry.timestamp()).map_err(|_| AuthError::InvalidExpiry)?;

        let mut raw = [0u8; RAW_LEN];
        raw[0] = CODE_VERSION;
        raw[1..5].copy_from_slice(&expiry_secs.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut raw[5..PAYLOAD_LEN]);

        let tag = self.tag(&raw[..PAYLOAD_LEN])?;
        raw[PAYLOAD_LEN..].copy_from_slice(&tag);

        Ok(group(&BASE32_NOPAD.encode(&raw)))
    }

    /// Verify a code presented by a user
    ///
    /// The signature is checked before the version byte so that any tampering
    /// with a length-correct code is reported as [`AuthError::CodeSignature`].
    pub fn verify(&self, code: &str, now: DateTime<Utc>) -> AuthResult<VerifiedCode> {
        let normalized = normalize(code);
        let raw = BASE32_NOPAD
            .decode(normalized.as_bytes())
            .map_err(|_| AuthError::CodeFormat)?;
        if raw.len() != RAW_LEN {
            return Err(AuthError::CodeFormat);
        }

        let (payload, tag) = raw.split_at(PAYLOAD_LEN);
        let expected = self.tag(payload)?;
        if !bool::from(expected[..].ct_eq(tag)) {
            return Err(AuthError::CodeSignature);
        }

        if payload[0] != CODE_VERSION {
            return Err(AuthError::CodeFormat);
        }

        let expiry_secs = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        let expires_at = Utc
            .timestamp_opt(i64::from(expiry_secs), 0)
            .single()
            .ok_or(AuthError::CodeFormat)?;
        if now >= expires_at {
            return Err(AuthError::CodeExpired);
        }

        Ok(VerifiedCode {
            expires_at,
            digest: digest_normalized(&normalized),
        })
    }

    fn tag(&self, payload: &[u8]) -> AuthResult<[u8; TAG_LEN]> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| AuthError::SecretKeyMissing)?;
        mac.update(payload);
        let full = mac.finalize().into_bytes();

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&full[..TAG_LEN]);
        Ok(tag)
    }
}

/// Canonical form of a code: uppercase, separators and whitespace removed
pub fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Redemption identity of a code as typed by the user
pub fn digest(code: &str) -> String {
    digest_normalized(&normalize(code))
}

fn digest_normalized(normalized: &str) -> String {
    sha256_hex(normalized.as_bytes())
}

/// Split encoded text into dash-separated groups for readability
fn group(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(GROUP_LEN)
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect::<Vec<_>>()
        .join("-")
}
