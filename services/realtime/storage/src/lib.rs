//! Persistent credential storage for the realtime client.
//!
//! This crate provides the key/value store that keeps the access and refresh
//! tokens across process restarts, with pluggable backends (in-memory,
//! JSON file, Redis).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Key under which the access token is persisted
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key under which the refresh token is persisted
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque string key/value store for credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage backend configuration
#[derive(Clone, Debug, Default)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// JSON document on local disk
    File {
        /// Path of the credentials file
        path: PathBuf,
    },
    /// Redis as primary storage
    Redis {
        /// Redis connection URL
        url: String,
        /// Prefix prepended to every key
        namespace: String,
    },
}

// Re-export backend implementations
pub use backend::file::FileCredentialStore;
pub use backend::mem::MemoryCredentialStore;

#[cfg(feature = "redis-backend")]
pub use backend::redis::RedisCredentialStore;

/// Open a credential store from configuration
pub async fn open(mode: StorageMode) -> Result<Arc<dyn CredentialStore>, StorageError> {
    match mode {
        StorageMode::InMemory => Ok(Arc::new(MemoryCredentialStore::new())),
        StorageMode::File { path } => Ok(Arc::new(FileCredentialStore::open(path).await?)),
        #[cfg(feature = "redis-backend")]
        StorageMode::Redis { url, namespace } => {
            Ok(Arc::new(RedisCredentialStore::connect(&url, namespace).await?))
        }
        #[cfg(not(feature = "redis-backend"))]
        StorageMode::Redis { .. } => Err(StorageError::Invalid(
            "Redis backend not compiled in (enable the redis-backend feature)".to_string(),
        )),
    }
}
