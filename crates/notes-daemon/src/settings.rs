//! Settings persisted as a JSON object file.
//!
//! The default location is `<config dir>/notes-daemon/settings.json`. Every
//! `set` rewrites the file atomically.

use async_trait::async_trait;
use notes_core::settings::{Result, SettingsError, SettingsStore};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

/// Settings file used when `--settings` is not given.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("notes-daemon").join("settings.json"))
}

/// Settings backed by a JSON file.
pub struct JsonSettings {
    path: PathBuf,
    /// In-memory copy of the file
    values: Mutex<Map<String, Value>>,
}

impl JsonSettings {
    /// Open the settings file. A missing or unreadable file starts empty.
    pub async fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let contents = serde_json::to_string_pretty(values).map_err(|e| SettingsError::Invalid {
            key: String::new(),
            message: e.to_string(),
        })?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents)
            .await
            .map_err(|e| SettingsError::Io(e.to_string()))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| SettingsError::Io(e.to_string()))
    }
}

#[async_trait]
impl SettingsStore for JsonSettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value);
        self.save(&values).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        if values.remove(key).is_some() {
            self.save(&values).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notes_core::settings::{get_typed, keys, set_typed};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/settings.json");

        {
            let settings = JsonSettings::open(path.clone()).await;
            set_typed(&settings, keys::SYNC_INTERVAL_SECS, &120u64)
                .await
                .unwrap();
            set_typed(&settings, keys::REMOTE_FOLDER, "/Notes").await.unwrap();
        }

        let settings = JsonSettings::open(path.clone()).await;
        let interval: Option<u64> = get_typed(&settings, keys::SYNC_INTERVAL_SECS).await.unwrap();
        assert_eq!(interval, Some(120));
        assert!(!dir.path().join("conf/settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        let settings = JsonSettings::open(path).await;
        assert!(settings.get(keys::VAULT_PATH).await.unwrap().is_none());
    }
}
