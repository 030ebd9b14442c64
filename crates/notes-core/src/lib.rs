//! notes-core: local-first notes vault with remote file-store sync.
//!
//! This crate provides the core functionality for:
//! - Parsing/serializing note files with a metadata block
//! - The denormalized note index and its recovery path
//! - Detecting and settling conflicted copies left by file-sync clients
//! - The vault: note CRUD, file-watch handling and change events
//! - Reconciling the vault against a remote folder
//! - FileSystem, RemoteStore, CredentialProvider and SettingsStore abstractions

pub mod codec;
pub mod conflict;
pub mod content_hash;
pub mod credentials;
pub mod events;
pub mod fs;
pub mod index;
pub mod note;
pub mod paths;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod vault;

pub use conflict::ConflictInfo;
pub use content_hash::ContentHash;
pub use credentials::{CredentialError, CredentialProvider, StaticCredentials};
pub use events::{EventBus, Subscription, VaultEvent};
pub use fs::{FileEntry, FileEvent, FileEventKind, FileStat, FileSystem, FsError, InMemoryFs, WatchGuard};
pub use index::{IndexEntry, VaultIndex};
pub use note::{Note, NotePatch, Reminder};
pub use remote::{InMemoryRemote, RemoteEntry, RemoteError, RemoteStore};
pub use settings::{InMemorySettings, SettingsError, SettingsStore};
pub use sync::{BulkUploadReport, LocalNotes, SyncConfig, SyncEngine, SyncOutcome, SyncReport};
pub use vault::{run_watch_loop, LocalVault, SharedVault, VaultError, VaultState};
