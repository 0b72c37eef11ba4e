//! Redis storage backend for clients sharing credentials across hosts

use crate::{CredentialStore, StorageError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

/// Credential store backed by Redis string keys
#[derive(Clone)]
pub struct RedisCredentialStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisCredentialStore {
    /// Connect to Redis; keys are stored as `<namespace>:<key>`
    pub async fn connect(url: &str, namespace: String) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(|e| StorageError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        info!("Connected credential store to Redis (namespace: {})", namespace);
        Ok(Self { conn, namespace })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        debug!("Redis credential set key={}", key);
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(key), value)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        debug!("Redis credential remove key={}", key);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}
