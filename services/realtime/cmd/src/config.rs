//! Configuration handling for the realtime client.
//!
//! Settings come from an optional YAML file, then environment variables,
//! then command-line flags (applied by `main`). Durations are written the
//! `humantime` way, e.g. `3s` or `250ms`.

use anyhow::{Context, Result};
use realtime_connection::{ConnectionConfig, ReconnectPolicy};
use realtime_storage::StorageMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Realtime client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Application origin; API and socket endpoints derive from it
    pub origin: String,
    /// Where tokens are kept between runs
    pub credentials: CredentialsConfig,
    /// Upper bound for one account endpoint request
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,
    /// Link behavior
    pub connection: LinkConfig,
}

/// Credential storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// Process memory only
    Memory,
    /// JSON file on disk
    File,
    /// Redis server
    Redis,
}

/// Credential storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Backend to use
    pub backend: CredentialBackend,
    /// File backend location
    pub path: PathBuf,
    /// Redis backend URL
    pub redis_url: String,
    /// Redis key prefix
    pub namespace: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            backend: CredentialBackend::File,
            path: PathBuf::from(".spark-realtime/credentials.json"),
            redis_url: "redis://127.0.0.1/".to_string(),
            namespace: "spark-realtime".to_string(),
        }
    }
}

/// Link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Delay before the first reconnect attempt
    #[serde(with = "humantime_duration")]
    pub reconnect_delay: Duration,
    /// Growth factor between attempts (1.0 keeps the delay fixed)
    pub reconnect_multiplier: f64,
    /// Upper bound for the grown delay
    #[serde(with = "humantime_duration")]
    pub max_reconnect_delay: Duration,
    /// Random spread as a fraction of the delay
    pub reconnect_jitter: f64,
    /// Stop reconnecting after this many attempts; unset retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// How long a typing indicator stays visible
    #[serde(with = "humantime_duration")]
    pub typing_expiry: Duration,
    /// How long to wait for a closing link
    #[serde(with = "humantime_duration")]
    pub close_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            reconnect_delay: policy.delay,
            reconnect_multiplier: policy.multiplier,
            max_reconnect_delay: policy.max_delay,
            reconnect_jitter: policy.jitter,
            max_reconnect_attempts: policy.max_attempts,
            typing_expiry: realtime_connection::DEFAULT_TYPING_EXPIRY,
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            credentials: CredentialsConfig::default(),
            request_timeout: realtime_auth::DEFAULT_REQUEST_TIMEOUT,
            connection: LinkConfig::default(),
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

impl ClientConfig {
    /// Load configuration from an optional file plus environment variables
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path),
            None => Self::default(),
        };

        config.apply_environment_overrides();

        info!(
            "Final client configuration: origin={}, credentials={:?}, reconnect_delay={}",
            config.origin,
            config.credentials.backend,
            humantime::format_duration(config.connection.reconnect_delay)
        );
        Ok(config)
    }

    /// Read a YAML file, falling back to defaults when it is missing or invalid
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `REALTIME_*` overrides read through `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup("REALTIME_ORIGIN") {
            info!("Origin overridden by environment: {}", origin);
            self.origin = origin;
        }

        if let Some(path) = lookup("REALTIME_CREDENTIALS_PATH") {
            info!("Credentials path overridden by environment: {}", path);
            self.credentials.backend = CredentialBackend::File;
            self.credentials.path = PathBuf::from(path);
        }

        if let Some(delay) = lookup("REALTIME_RECONNECT_DELAY") {
            match humantime::parse_duration(&delay) {
                Ok(delay) => {
                    self.connection.reconnect_delay = delay;
                    info!("Reconnect delay overridden by environment: {:?}", delay);
                }
                Err(e) => warn!("Ignoring REALTIME_RECONNECT_DELAY={}: {}", delay, e),
            }
        }

        if let Some(attempts) = lookup("REALTIME_MAX_RECONNECT_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(0) => {
                    self.connection.max_reconnect_attempts = None;
                    info!("Reconnect attempts unbounded by environment");
                }
                Ok(max) => {
                    self.connection.max_reconnect_attempts = Some(max);
                    info!("Max reconnect attempts overridden by environment: {}", max);
                }
                Err(e) => warn!("Ignoring REALTIME_MAX_RECONNECT_ATTEMPTS={}: {}", attempts, e),
            }
        }
    }

    /// Parsed application origin
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("invalid origin {:?}", self.origin))
    }

    /// Credential store selection
    pub fn storage_mode(&self) -> StorageMode {
        match self.credentials.backend {
            CredentialBackend::Memory => StorageMode::InMemory,
            CredentialBackend::File => StorageMode::File {
                path: self.credentials.path.clone(),
            },
            CredentialBackend::Redis => StorageMode::Redis {
                url: self.credentials.redis_url.clone(),
                namespace: self.credentials.namespace.clone(),
            },
        }
    }

    /// Connection driver settings for the configured origin
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut config = ConnectionConfig::from_origin(&self.origin_url()?)
            .context("origin has no WebSocket equivalent")?;

        let link = &self.connection;
        if !link.reconnect_multiplier.is_finite() || link.reconnect_multiplier < 0.0 {
            anyhow::bail!("reconnect_multiplier must be a non-negative number");
        }
        if !link.reconnect_jitter.is_finite() || !(0.0..=1.0).contains(&link.reconnect_jitter) {
            anyhow::bail!("reconnect_jitter must be between 0.0 and 1.0");
        }
        config.reconnect = ReconnectPolicy {
            delay: link.reconnect_delay,
            multiplier: link.reconnect_multiplier,
            max_delay: link.max_reconnect_delay,
            jitter: link.reconnect_jitter,
            max_attempts: link.max_reconnect_attempts,
        };
        config.typing_expiry = link.typing_expiry;
        config.close_timeout = link.close_timeout;
        Ok(config)
    }
}
