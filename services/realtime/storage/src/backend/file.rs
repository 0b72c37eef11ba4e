//! File-based storage backend keeping credentials in a single JSON document

use crate::{CredentialStore, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Credential store persisted as a JSON object on disk
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Cached document; every mutation rewrites the whole file
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading any existing document
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => {
                    info!("Loaded {} credential entries from {:?}", entries.len(), path);
                    entries
                }
                Err(e) => {
                    warn!("Credential file {:?} is corrupt ({}), starting empty", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(entries)?;

        // Write-then-rename so a crash never leaves a truncated document
        let tmp = self.path.with_extension("tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Persisted {} credential entries to {:?}", entries.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        {
            let store = FileCredentialStore::open(&path).await.unwrap();
            store.set("access_token", "T1").await.unwrap();
            store.set("refresh_token", "R1").await.unwrap();
        }

        let store = FileCredentialStore::open(&path).await.unwrap();
        assert_eq!(store.get("access_token").await.unwrap().as_deref(), Some("T1"));
        assert_eq!(store.get("refresh_token").await.unwrap().as_deref(), Some("R1"));

        store.remove("access_token").await.unwrap();
        let reopened = FileCredentialStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("access_token").await.unwrap(), None);
        assert_eq!(reopened.get("refresh_token").await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileCredentialStore::open(&path).await.unwrap();
        assert_eq!(store.get("access_token").await.unwrap(), None);

        store.set("access_token", "T2").await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("T2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_credential_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.set("access_token", "T1").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.set("access_token", "T1").await.unwrap();

        // A directory where the temp file goes makes every write fail
        std::fs::create_dir(path.with_extension("tmp")).unwrap();

        assert!(store.set("access_token", "T2").await.is_err());
        assert_eq!(store.get("access_token").await.unwrap().as_deref(), Some("T1"));

        assert!(store.remove("access_token").await.is_err());
        assert_eq!(store.get("access_token").await.unwrap().as_deref(), Some("T1"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("T1"));
    }

    #[tokio::test]
    async fn test_remove_missing_key_does_not_create_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.remove("access_token").await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.path(), path.as_path());
    }
}
