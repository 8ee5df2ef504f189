use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

const KEYRING_SERVICE: &str = "com.crm.mobile";
pub const KEYRING_ITEM_LIMIT: usize = 2048;
const PROBE_KEY: &str = "access_token";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secure storage error")]
    Keyring(#[from] keyring::Error),
    #[error("storage file error")]
    Io(#[from] std::io::Error),
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("storage task failed")]
    Join(#[from] tokio::task::JoinError),
    #[error("value for {key} is {len} bytes, over the {limit} byte item limit")]
    TooLarge { key: String, len: usize, limit: usize },
}

/// A flat string key/value store. Deleting an absent key is not an error.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Largest value a single slot accepts, in bytes. `None` means unbounded.
    fn item_limit(&self) -> Option<usize> {
        None
    }
}

/// OS secure storage (Keychain, Secret Service, Credential Manager).
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(service: &str, key: &str) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(service, key)
    }

    /// Blocking probe; run it off the async executor.
    pub fn is_available(&self) -> bool {
        let Ok(entry) = Self::entry(&self.service, PROBE_KEY) else {
            return false;
        };

        match entry.get_password() {
            Ok(_) => true,
            Err(keyring::Error::NoEntry) => true,
            Err(keyring::Error::BadEncoding(_)) => true,
            Err(keyring::Error::Ambiguous(_)) => true,
            Err(keyring::Error::NoStorageAccess(_)) => false,
            Err(keyring::Error::PlatformFailure(_)) => false,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SecretBackend for KeyringBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<String>, StoreError> {
            match Self::entry(&service, &key)?.get_password() {
                Ok(value) => Ok(Some(value)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if value.len() > KEYRING_ITEM_LIMIT {
            return Err(StoreError::TooLarge {
                key: key.to_string(),
                len: value.len(),
                limit: KEYRING_ITEM_LIMIT,
            });
        }
        let service = self.service.clone();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            Self::entry(&service, &key)?.set_password(&value)?;
            Ok(())
        })
        .await?
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            match Self::entry(&service, &key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    fn item_limit(&self) -> Option<usize> {
        Some(KEYRING_ITEM_LIMIT)
    }
}

/// Unencrypted key/value store, used where no secure storage exists.
///
/// Backed by a JSON file when opened with a path, otherwise memory only.
#[derive(Debug, Default)]
pub struct PlainBackend {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl PlainBackend {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(data) if data.trim().is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for PlainBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_backend_round_trips_in_memory() {
        let backend = PlainBackend::in_memory();
        assert_eq!(backend.get("k").await.unwrap(), None);
        backend.set("k", "v").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.item_limit(), None);
    }

    #[tokio::test]
    async fn plain_backend_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let backend = PlainBackend::open(&path).await.unwrap();
        backend.set("access_token", "abc").await.unwrap();
        backend.set("user_data", r#"{"id":1}"#).await.unwrap();
        backend.delete("access_token").await.unwrap();

        let reopened = PlainBackend::open(&path).await.unwrap();
        assert_eq!(reopened.get("access_token").await.unwrap(), None);
        assert_eq!(
            reopened.get("user_data").await.unwrap().as_deref(),
            Some(r#"{"id":1}"#)
        );
        assert_eq!(reopened.keys().await, vec!["user_data".to_string()]);
    }

    #[tokio::test]
    async fn plain_backend_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            PlainBackend::open(&path).await,
            Err(StoreError::Json(_))
        ));
    }
}
