//! In-process implementation of [`EphemeralStore`]
//!
//! Entries live in a `BTreeMap` behind a short, non-async mutex, which gives
//! every operation the same per-key atomicity the Redis commands provide.
//! Expiry is evaluated against the injected [`Clock`]. Expired entries are
//! evicted on access, and every [`SWEEP_INTERVAL`] writes a full sweep drops
//! the ones nobody touches again, so the map stays bounded by live keys.
//! Tests move time forward and observe TTL eviction without sleeping.

use crate::clock::{Clock, SystemClock};
use crate::store::{ensure_ttl, EphemeralStore, ScanCursor, ScanPage, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Writes between full sweeps of expired entries
pub const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Thread-safe in-memory ephemeral store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
    writes: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            writes: Arc::new(AtomicUsize::new(0)),
            clock,
        }
    }

    /// Number of live entries (expired entries are purged first)
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.retain(|_, entry| entry.is_live(now));
                entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, Entry>>> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }

    fn deadline(&self, key: &str, ttl: Duration) -> StoreResult<DateTime<Utc>> {
        ensure_ttl(key, ttl)?;
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .ok_or_else(|| StoreError::InvalidTtl {
                key: key.to_string(),
            })
    }

    /// Insert an entry, sweeping expired ones every [`SWEEP_INTERVAL`] writes
    fn insert(
        &self,
        entries: &mut BTreeMap<String, Entry>,
        key: &str,
        entry: Entry,
        now: DateTime<Utc>,
    ) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            tracing::debug!(evicted = before - entries.len(), "Swept expired entries");
        }
        entries.insert(key.to_string(), entry);
    }

    /// Entries held in the map, expired or not
    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Look up a live entry, evicting it if it has expired
    fn live<'a>(
        entries: &'a mut BTreeMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let expires_at = self.deadline(key, ttl)?;
        let now = self.clock.now();
        let mut entries = self.lock()?;
        self.insert(
            &mut entries,
            key,
            Entry {
                value: value.to_string(),
                expires_at,
            },
            now,
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(entries
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now).is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let expires_at = self.deadline(key, ttl)?;
        let now = self.clock.now();
        let mut entries = self.lock()?;
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        self.insert(
            &mut entries,
            key,
            Entry {
                value: value.to_string(),
                expires_at,
            },
            now,
        );
        Ok(true)
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.value = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_and_delete(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now)
            .and_then(|entry| (entry.expires_at - now).to_std().ok()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let expires_at = self.deadline(key, ttl)?;
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        cursor: &ScanCursor,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let now = self.clock.now();
        let count = count.max(1);
        let entries = self.lock()?;

        let lower = if cursor.is_start() {
            Bound::Included(prefix.to_string())
        } else {
            Bound::Excluded(cursor.as_str().to_string())
        };

        let mut matching = entries
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone());

        let keys: Vec<String> = matching.by_ref().take(count).collect();
        let next = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(ScanCursor::new(last.clone())),
            _ => None,
        };

        Ok(ScanPage { keys, next })
    }
}
