//! Per-note record of the last successful transfer.
//!
//! Persisted through the settings store. Losing it is harmless: the next pass
//! re-uploads unchanged notes once and re-learns the hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::content_hash::ContentHash;
use crate::settings::{self, keys, SettingsStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Hash of the canonical note at the last upload or download
    pub hash: ContentHash,
    /// Remote modification time of the object we transferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct HashCache {
    records: BTreeMap<String, TransferRecord>,
}

impl HashCache {
    /// Load from the settings store. Unreadable state starts empty.
    pub async fn load<S: SettingsStore + ?Sized>(store: &S) -> Self {
        match settings::get_typed(store, keys::SYNC_HASHES).await {
            Ok(records) => Self {
                records: records.unwrap_or_default(),
            },
            Err(e) => {
                warn!("Discarding sync hash cache: {}", e);
                Self::default()
            }
        }
    }

    pub async fn save<S: SettingsStore + ?Sized>(&self, store: &S) {
        if let Err(e) = settings::set_typed(store, keys::SYNC_HASHES, &self.records).await {
            warn!("Failed to save sync hash cache: {}", e);
        }
    }

    pub fn get(&self, id: &str) -> Option<&TransferRecord> {
        self.records.get(id)
    }

    /// Whether `hash` is what we last transferred for `id`.
    pub fn matches(&self, id: &str, hash: &ContentHash) -> bool {
        self.records.get(id).is_some_and(|r| &r.hash == hash)
    }

    /// Whether the remote object is the one we last transferred.
    pub fn seen_remote(&self, id: &str, modified: DateTime<Utc>) -> bool {
        self.records
            .get(id)
            .is_some_and(|r| r.remote_modified == Some(modified))
    }

    pub fn record(&mut self, id: &str, hash: ContentHash, remote_modified: Option<DateTime<Utc>>) {
        self.records.insert(
            id.to_string(),
            TransferRecord {
                hash,
                remote_modified,
            },
        );
    }

    pub fn forget(&mut self, id: &str) {
        self.records.remove(id);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
