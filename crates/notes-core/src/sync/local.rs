//! The engine's view of the local vault.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conflict::ConflictInfo;
use crate::fs::FileSystem;
use crate::note::Note;
use crate::vault::SharedVault;

/// Local notes as seen at the start of a pass.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub notes: Vec<Note>,
    /// Ids deleted locally that may still exist remotely
    pub tombstones: Vec<String>,
}

/// Local side of a sync pass.
///
/// Each call is short; implementations must not hold locks between calls so
/// local edits proceed while the pass waits on the network.
#[async_trait]
pub trait LocalNotes: Send + Sync {
    async fn snapshot(&self) -> LocalSnapshot;

    /// Replace or create a note from downloaded bytes.
    async fn import_remote(&self, id: &str, raw: &str) -> Option<Note>;

    /// Drop a note that no longer exists remotely.
    async fn remove_deleted_remotely(&self, id: &str) -> bool;

    /// Hand a downloaded conflicted copy to the conflict area.
    async fn import_remote_conflict(&self, name: &str, raw: &[u8]) -> Option<ConflictInfo>;

    async fn record_last_sync(&self, at: DateTime<Utc>);
}

#[async_trait]
impl<F: FileSystem + 'static> LocalNotes for SharedVault<F> {
    async fn snapshot(&self) -> LocalSnapshot {
        let vault = self.lock().await;
        LocalSnapshot {
            notes: vault.notes().cloned().collect(),
            tombstones: vault.tombstones().to_vec(),
        }
    }

    async fn import_remote(&self, id: &str, raw: &str) -> Option<Note> {
        self.lock().await.import_remote(id, raw).await
    }

    async fn remove_deleted_remotely(&self, id: &str) -> bool {
        self.lock().await.remove_deleted_remotely(id).await
    }

    async fn import_remote_conflict(&self, name: &str, raw: &[u8]) -> Option<ConflictInfo> {
        self.lock().await.import_remote_conflict(name, raw).await
    }

    async fn record_last_sync(&self, at: DateTime<Utc>) {
        self.lock().await.record_last_sync(at).await
    }
}
