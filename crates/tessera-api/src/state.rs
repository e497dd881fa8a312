//! Application state management
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use std::time::Instant;
use tessera_auth::{AuthService, EntitlementSink};
use tessera_core::AppConfig;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Token subsystem
    pub auth: AuthService,
    /// Where redeemed premium codes are granted
    pub entitlements: Arc<dyn EntitlementSink>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        auth: AuthService,
        entitlements: Arc<dyn EntitlementSink>,
    ) -> Self {
        Self {
            config,
            auth,
            entitlements,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
