//! Tessera Core - configuration, time and shared-store abstractions
//!
//! This crate defines the infrastructure seams used by the token subsystem:
//! - Configuration management (`AppConfig`)
//! - A `Clock` trait so expiry can be tested deterministically
//! - The `EphemeralStore` trait (TTL + atomic single-use primitives)
//! - An in-memory store and a Redis store implementing it

pub mod clock;
pub mod config;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, CodeConfig, ConfigError, LoggingConfig, ServerConfig, SigningAlgorithm,
    StoreBackend, StoreConfig, TokenConfig,
};
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use store::{EphemeralStore, ScanCursor, ScanPage, StoreError, StoreResult};

use std::sync::Arc;

/// Build the store selected by configuration
///
/// Selecting the Redis backend without the `redis` feature is a
/// configuration error.
pub async fn connect_store(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn EphemeralStore>, StoreBuildError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; state is not shared between processes");
            Ok(Arc::new(MemoryStore::with_clock(clock)))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(config).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(StoreBuildError::Config(ConfigError::InvalidValue {
            key: "STORE_BACKEND".to_string(),
            value: "redis (feature disabled)".to_string(),
        })),
    }
}

/// Errors raised while building the configured store
#[derive(Debug, thiserror::Error)]
pub enum StoreBuildError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_store() {
        let config = StoreConfig::default();
        let store = connect_store(&config, Arc::new(SystemClock)).await.unwrap();
        store
            .set("probe", "1", std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.exists("probe").await.unwrap());
    }
}
