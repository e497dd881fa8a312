//! Redis implementation of [`EphemeralStore`]
//!
//! Requires Redis 6.2 or newer (`GETDEL`, `SET ... KEEPTTL`). Every command
//! is bounded by the configured operation timeout so a stalled connection
//! surfaces as [`StoreError::Timeout`] instead of hanging the request.

use crate::config::StoreConfig;
use crate::store::{ensure_ttl, EphemeralStore, ScanCursor, ScanPage, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Redis-backed ephemeral store sharing one multiplexed connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect using the store section of the application config
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let op_timeout = Duration::from_millis(config.op_timeout_ms);
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(op_timeout))??;

        debug!(url = %redact_url(&config.redis_url), "Connected to Redis");
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
            .map_err(StoreError::from)
    }

    async fn run<T: FromRedisValue>(&self, cmd: Cmd) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        self.bounded(async move { cmd.query_async(&mut conn).await })
            .await
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Strip credentials from a connection URL before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        ensure_ttl(key, ttl)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
        let _: () = self.run(cmd).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.run(cmd).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let count: u64 = self.run(cmd).await?;
        Ok(count > 0)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        ensure_ttl(key, ttl)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));
        let reply: Option<String> = self.run(cmd).await?;
        Ok(reply.is_some())
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("XX").arg("KEEPTTL");
        let reply: Option<String> = self.run(cmd).await?;
        Ok(reply.is_some())
    }

    async fn get_and_delete(&self, key: &str) -> StoreResult<Option<String>> {
        let mut cmd = redis::cmd("GETDEL");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        // -2: missing key, -1: no expiry
        let millis: i64 = self.run(cmd).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        ensure_ttl(key, ttl)?;
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl_millis(ttl));
        let applied: u64 = self.run(cmd).await?;
        Ok(applied == 1)
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        cursor: &ScanCursor,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let position: u64 = if cursor.is_start() {
            0
        } else {
            cursor.as_str().parse().map_err(|_| {
                StoreError::Unavailable(format!("invalid scan cursor: {}", cursor.as_str()))
            })?
        };

        let mut cmd = redis::cmd("SCAN");
        cmd.arg(position)
            .arg("MATCH")
            .arg(format!("{}*", escape_glob(prefix)))
            .arg("COUNT")
            .arg(count.max(1));
        let (next, keys): (u64, Vec<String>) = self.run(cmd).await?;

        Ok(ScanPage {
            keys,
            next: (next != 0).then(|| ScanCursor::new(next.to_string())),
        })
    }
}

/// Escape Redis glob metacharacters so the prefix matches literally
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
