//! Reconciliation of the local vault against a remote file store.

mod config;
mod engine;
mod hash_cache;
mod local;
mod report;

pub use config::{SyncConfig, DEFAULT_REMOTE_FOLDER};
pub use engine::SyncEngine;
pub use hash_cache::{HashCache, TransferRecord};
pub use local::{LocalNotes, LocalSnapshot};
pub use report::{BulkUploadReport, SyncOutcome, SyncReport};
