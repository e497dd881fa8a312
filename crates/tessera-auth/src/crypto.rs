//! Randomness and hashing helpers shared by the token stores

use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of random bytes in opaque tokens (256 bits)
pub const OPAQUE_TOKEN_BYTES: usize = 32;

/// Generate a cryptographically secure opaque token (base64url, no padding)
pub fn random_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; OPAQUE_TOKEN_BYTES] = rng.gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

/// Hex-encoded SHA-256 of `input`
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}
