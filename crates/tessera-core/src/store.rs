//! Shared ephemeral key-value store
//!
//! The token subsystem keeps every piece of mutable state here. Callers rely on
//! three primitives for correctness:
//! - `set_if_absent` for single-use reservations
//! - `get_and_delete` for single-use consumption
//! - per-key TTL for expiry without a background sweeper
//!
//! Two implementations are provided: [`MemoryStore`](crate::memory::MemoryStore)
//! for tests and single-process development, and `RedisStore` (feature `redis`)
//! for deployments.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid TTL for key {key}: TTL must be at least one millisecond")]
    InvalidTtl { key: String },

    #[error("Store state poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether a caller may retry the operation with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opaque position in a prefix scan
///
/// The representation is owned by the store implementation: a numeric
/// cursor for Redis, the last returned key for the in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCursor(String);

impl ScanCursor {
    /// Cursor positioned at the beginning of the key space
    pub fn start() -> Self {
        Self::default()
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }
}

/// One batch of keys returned by a prefix scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Keys in this batch (may be empty even when more pages follow)
    pub keys: Vec<String>,
    /// Cursor for the next batch, `None` once the scan is complete
    pub next: Option<ScanCursor>,
}

/// Key-value store with per-key TTL and atomic single-use primitives
///
/// All operations may suspend on network I/O and are cancelled by dropping
/// the returned future.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Read the value of `key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete `key`, returning whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Whether `key` exists and has not expired
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically create `key` only if it does not exist
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Overwrite the value of an existing key, keeping its remaining TTL
    ///
    /// Returns `false` (and writes nothing) when the key does not exist.
    async fn replace_keep_ttl(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Atomically read and delete `key`
    async fn get_and_delete(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remaining lifetime of `key`, `None` if absent or without expiry
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Reset the TTL of `key`, returning whether the key exists
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Return one batch of keys starting with `prefix`
    ///
    /// `count` is a hint for the batch size. Iteration is non-blocking and
    /// may return keys that are deleted concurrently.
    async fn scan_prefix(
        &self,
        prefix: &str,
        cursor: &ScanCursor,
        count: usize,
    ) -> StoreResult<ScanPage>;
}

pub(crate) fn ensure_ttl(key: &str, ttl: Duration) -> StoreResult<()> {
    if ttl.as_millis() == 0 {
        return Err(StoreError::InvalidTtl {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(StoreError::Unavailable("down".to_string()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_millis(10)).is_retryable());
        assert!(!StoreError::Poisoned.is_retryable());
        assert!(!StoreError::InvalidTtl {
            key: "k".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(ensure_ttl("k", Duration::ZERO).is_err());
        assert!(ensure_ttl("k", Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_scan_cursor_start() {
        assert!(ScanCursor::start().is_start());
        assert!(!ScanCursor::new("42").is_start());
    }
}
