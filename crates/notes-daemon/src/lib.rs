//! notes-daemon library: the native side of the notes vault.
//!
//! This is a thin library layer over the daemon components, allowing
//! integration tests to access internal types.

pub mod auth;
pub mod config;
pub mod http_remote;
pub mod native_fs;
pub mod runtime;
pub mod settings;
pub mod watcher;

// Re-export key types for convenience
pub use auth::RefreshTokenCredentials;
pub use config::{Args, Command, Settings};
pub use http_remote::HttpRemote;
pub use native_fs::NativeFs;
pub use settings::JsonSettings;
pub use watcher::FileWatcher;
