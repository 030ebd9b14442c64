//! Command line and persisted settings.
//!
//! A value given on the command line (or its environment variable) wins over
//! the settings file, which wins over the built-in default.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notes_core::settings::{get_typed, keys, set_typed, SettingsStore};
use notes_core::sync::DEFAULT_REMOTE_FOLDER;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::http_remote::{DEFAULT_API_URL, DEFAULT_CONTENT_URL};

/// Vault location used when none is configured.
pub const DEFAULT_VAULT_PATH: &str = "~/Notes";

/// Seconds between scheduled sync passes.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

#[derive(Parser, Debug)]
#[command(name = "notes-daemon")]
#[command(about = "Notes vault daemon with remote sync")]
pub struct Args {
    /// Path to the vault directory
    #[arg(short, long, env = "NOTES_VAULT_PATH", global = true)]
    pub vault: Option<String>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Seconds between scheduled sync passes
    #[arg(long, global = true)]
    pub sync_interval: Option<u64>,

    /// Remote folder holding the notes
    #[arg(long, global = true)]
    pub remote_folder: Option<String>,

    /// Base URL of the remote RPC API
    #[arg(long, default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Base URL of the remote content API
    #[arg(long, default_value = DEFAULT_CONTENT_URL, global = true)]
    pub content_url: String,

    /// Remote access token
    #[arg(long, env = "NOTES_REMOTE_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// App key used to refresh the access token
    #[arg(long, env = "NOTES_APP_KEY", global = true)]
    pub app_key: Option<String>,

    /// Do not watch the notes directory for external changes
    #[arg(long, global = true)]
    pub no_watch: bool,

    /// Do not sync with the remote
    #[arg(long, global = true)]
    pub no_sync: bool,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch the vault and sync on changes and on a timer (default)
    Run,
    /// Run a single sync pass
    Sync,
    /// Upload every changed note, overwriting remote copies
    PushAll,
    /// Rebuild the index from the note files
    RebuildIndex,
    /// List notes in display order
    List,
    /// List unresolved conflicted copies
    Conflicts,
    /// Settle a conflicted copy
    Resolve {
        /// Id of the note the copy belongs to
        note_id: String,
        /// Replace the note with the conflicted copy instead of discarding it
        #[arg(long)]
        keep_copy: bool,
    },
}

/// Effective daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub vault_path: PathBuf,
    pub sync_interval: Duration,
    pub remote_folder: String,
    pub api_url: String,
    pub content_url: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub app_key: Option<String>,
    pub watch: bool,
    pub sync: bool,
}

impl Settings {
    /// Merge the command line with the settings store, then write the vault
    /// path and sync interval back.
    pub async fn resolve<S: SettingsStore + ?Sized>(args: &Args, store: &S) -> Result<Self> {
        let vault = match &args.vault {
            Some(vault) => vault.clone(),
            None => stored::<String, _>(store, keys::VAULT_PATH)
                .await
                .unwrap_or_else(|| DEFAULT_VAULT_PATH.to_string()),
        };
        let interval_secs = match args.sync_interval {
            Some(secs) => secs,
            None => stored(store, keys::SYNC_INTERVAL_SECS)
                .await
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        };
        let remote_folder = match &args.remote_folder {
            Some(folder) => folder.clone(),
            None => stored(store, keys::REMOTE_FOLDER)
                .await
                .unwrap_or_else(|| DEFAULT_REMOTE_FOLDER.to_string()),
        };
        let access_token = match &args.token {
            Some(token) => Some(token.clone()),
            None => stored(store, keys::ACCESS_TOKEN).await,
        };
        let refresh_token = stored::<String, _>(store, keys::REFRESH_TOKEN).await;

        set_typed(store, keys::VAULT_PATH, &vault)
            .await
            .context("Failed to store vault path")?;
        set_typed(store, keys::SYNC_INTERVAL_SECS, &interval_secs)
            .await
            .context("Failed to store sync interval")?;

        Ok(Self {
            vault_path: expand_tilde(&vault),
            sync_interval: Duration::from_secs(interval_secs.max(1)),
            remote_folder,
            api_url: args.api_url.clone(),
            content_url: args.content_url.clone(),
            access_token: access_token.filter(|t| !t.is_empty()),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            app_key: args.app_key.clone(),
            watch: !args.no_watch,
            sync: !args.no_sync,
        })
    }
}

/// Read a stored value, treating a malformed one as absent.
async fn stored<T, S>(store: &S, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
    S: SettingsStore + ?Sized,
{
    match get_typed(store, key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring stored setting: {}", e);
            None
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
