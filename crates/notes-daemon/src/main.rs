//! notes-daemon: headless notes vault with remote sync.
//!
//! Watches the vault for external edits and reconciles it with a remote
//! folder on a timer and after every change.

use anyhow::{Context, Result};
use clap::Parser;
use notes_core::settings::SettingsStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notes_daemon::config::{Args, Command, Settings};
use notes_daemon::runtime;
use notes_daemon::settings::{default_settings_path, JsonSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,notes_daemon=debug,notes_core=debug"
    } else {
        "info,notes_daemon=info,notes_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings_path = match args.settings.clone() {
        Some(path) => path,
        None => default_settings_path().context("No config directory for the settings file")?,
    };
    info!("Settings file: {:?}", settings_path);
    let store = Arc::new(JsonSettings::open(settings_path).await);
    let settings = Settings::resolve(&args, store.as_ref()).await?;

    let command = args.command.clone().unwrap_or(Command::Run);
    let store: Arc<dyn SettingsStore> = store;
    runtime::execute(command, settings, store).await
}
