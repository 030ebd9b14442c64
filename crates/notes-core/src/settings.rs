//! Key/value settings storage.
//!
//! Values are JSON so each consumer owns its own shape. The daemon backs this
//! with a JSON file; tests use [`InMemorySettings`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

/// Well-known keys.
pub mod keys {
    pub const VAULT_PATH: &str = "vaultPath";
    pub const SYNC_INTERVAL_SECS: &str = "syncIntervalSecs";
    pub const REMOTE_FOLDER: &str = "remoteFolder";
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    /// Content hash of the last successful upload, per note id
    pub const SYNC_HASHES: &str = "syncHashes";
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid settings value for {key}: {message}")]
    Invalid { key: String, message: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read a typed value. A value of the wrong shape is an error, not `None`.
pub async fn get_typed<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: SettingsStore + ?Sized,
{
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| SettingsError::Invalid {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

pub async fn set_typed<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: SettingsStore + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|e| SettingsError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.set(key, value).await
}

/// Settings held in memory, for tests and one-shot commands.
#[derive(Default)]
pub struct InMemorySettings {
    values: RwLock<BTreeMap<String, Value>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[async_trait]
impl<T: SettingsStore + ?Sized> SettingsStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store = InMemorySettings::new();
        set_typed(&store, keys::SYNC_INTERVAL_SECS, &300u64).await.unwrap();

        let interval: Option<u64> = get_typed(&store, keys::SYNC_INTERVAL_SECS).await.unwrap();
        assert_eq!(interval, Some(300));

        store.remove(keys::SYNC_INTERVAL_SECS).await.unwrap();
        let interval: Option<u64> = get_typed(&store, keys::SYNC_INTERVAL_SECS).await.unwrap();
        assert_eq!(interval, None);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_an_error() {
        let store = InMemorySettings::new();
        store
            .set(keys::SYNC_INTERVAL_SECS, Value::String("soon".into()))
            .await
            .unwrap();

        let result: Result<Option<u64>> = get_typed(&store, keys::SYNC_INTERVAL_SECS).await;
        assert!(matches!(result, Err(SettingsError::Invalid { .. })));
    }
}
