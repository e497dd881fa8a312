//! Tessera Configuration Management
//!
//! Handles configuration from environment variables and config files with
//! sensible defaults for development. Secrets have no defaults: a missing
//! signing or code secret is reported when the components are built.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Shared ephemeral store
    pub store: StoreConfig,

    /// Access/refresh/session/pending token settings
    pub tokens: TokenConfig,

    /// Signed redemption code settings
    pub codes: CodeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError { path, message },
            other => other,
        })
    }

    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Some(secs) = parse_env("REQUEST_TIMEOUT_SECS")? {
            self.server.request_timeout_secs = secs;
        }

        // Store
        if let Ok(backend) = std::env::var("STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Some(ms) = parse_env("STORE_OP_TIMEOUT_MS")? {
            self.store.op_timeout_ms = ms;
        }
        if let Some(batch) = parse_env("STORE_SCAN_BATCH")? {
            self.store.scan_batch = batch;
        }

        // Tokens (always take secrets from env when present)
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.tokens.signing_secret = Some(secret);
        }
        if let Ok(alg) = std::env::var("JWT_ALGORITHM") {
            self.tokens.algorithm = alg.parse()?;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            self.tokens.issuer = issuer;
        }
        if let Some(secs) = parse_env("JWT_ACCESS_EXPIRATION_SECS")? {
            self.tokens.access_ttl_secs = secs;
        }
        if let Some(secs) = parse_env("JWT_REFRESH_EXPIRATION_SECS")? {
            self.tokens.refresh_ttl_secs = secs;
        }
        if let Some(secs) = parse_env("SESSION_TTL_SECS")? {
            self.tokens.session_ttl_secs = secs;
        }
        if let Some(secs) = parse_env("PENDING_AUTH_TTL_SECS")? {
            self.tokens.pending_ttl_secs = secs;
        }
        if let Some(secs) = parse_env("JWT_LEEWAY_SECS")? {
            self.tokens.leeway_secs = secs;
        }

        // Redemption codes
        if let Ok(secret) = std::env::var("PREMIUM_CODE_SECRET") {
            self.codes.secret = Some(secret);
        }
        if let Some(secs) = parse_env("PREMIUM_CODE_GRACE_SECS")? {
            self.codes.grace_secs = secs;
        }
        if let Some(secs) = parse_env("PREMIUM_CODE_MIN_TTL_SECS")? {
            self.codes.min_ledger_ttl_secs = secs;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

/// Shared store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which store implementation to use
    pub backend: StoreBackend,

    /// Redis connection URL
    pub redis_url: String,

    /// Upper bound for a single store command in milliseconds
    pub op_timeout_ms: u64,

    /// Batch size hint for prefix scans
    pub scan_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            op_timeout_ms: 2_000,
            scan_batch: 200,
        }
    }
}

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigError::InvalidValue {
                key: "STORE_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Token lifetimes and signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Secret key for HMAC signing of access tokens (at least 256 bits)
    #[serde(skip_serializing)]
    pub signing_secret: Option<String>,

    /// HMAC algorithm used for access tokens
    pub algorithm: SigningAlgorithm,

    /// Token issuer identifier
    pub issuer: String,

    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,

    /// Session lifetime (sliding) in seconds
    pub session_ttl_secs: u64,

    /// Pending step-up token lifetime in seconds
    pub pending_ttl_secs: u64,

    /// Allowed clock skew when checking exp/nbf
    pub leeway_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            algorithm: SigningAlgorithm::HS256,
            issuer: "tessera".to_string(),
            access_ttl_secs: 3600,             // 1 hour
            refresh_ttl_secs: 7 * 24 * 3600,   // 7 days
            session_ttl_secs: 24 * 3600,       // 1 day
            pending_ttl_secs: 300,             // 5 minutes
            leeway_secs: 0,
        }
    }
}

/// HMAC-family JWT algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    HS256,
    HS384,
    HS512,
}

impl std::str::FromStr for SigningAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            _ => Err(ConfigError::InvalidValue {
                key: "JWT_ALGORITHM".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Signed redemption code settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    /// Operator secret the MAC key is derived from
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    /// How long a redemption record outlives the code's own expiry
    pub grace_secs: u64,

    /// Floor for the redemption record TTL
    pub min_ledger_ttl_secs: u64,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            secret: None,
            grace_secs: 30 * 24 * 3600, // 30 days
            min_ledger_ttl_secs: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.tokens.access_ttl_secs, 3600);
        assert_eq!(config.tokens.pending_ttl_secs, 300);
        assert_eq!(config.codes.grace_secs, 30 * 24 * 3600);
        assert!(config.tokens.signing_secret.is_none());
    }

    #[test]
    fn test_enum_parse() {
        assert_eq!(
            "redis".parse::<StoreBackend>().unwrap(),
            StoreBackend::Redis
        );
        assert_eq!(
            "hs512".parse::<SigningAlgorithm>().unwrap(),
            SigningAlgorithm::HS512
        );
        assert!("rs256".parse::<SigningAlgorithm>().is_err());
        assert!("etcd".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [store]
            backend = "redis"
            scan_batch = 50

            [tokens]
            signing_secret = "0123456789abcdef0123456789abcdef"
            algorithm = "HS384"

            [codes]
            grace_secs = 86400
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.scan_batch, 50);
        assert_eq!(config.store.op_timeout_ms, 2_000);
        assert_eq!(config.tokens.algorithm, SigningAlgorithm::HS384);
        assert!(config.tokens.signing_secret.is_some());
        assert_eq!(config.codes.grace_secs, 86400);
        assert_eq!(config.codes.min_ledger_ttl_secs, 3600);
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml_str("[store]\nbackend = 3").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = AppConfig::default();
        config.tokens.signing_secret = Some("super-secret".to_string());
        config.codes.secret = Some("another-secret".to_string());

        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("another-secret"));
    }
}
