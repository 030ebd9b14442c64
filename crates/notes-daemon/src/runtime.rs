//! Wires the vault, watcher and sync engine together, and runs the one-shot
//! commands.

use anyhow::{bail, Context, Result};
use notes_core::codec;
use notes_core::credentials::{CredentialProvider, StaticCredentials};
use notes_core::settings::SettingsStore;
use notes_core::sync::{SyncConfig, SyncEngine, SyncOutcome};
use notes_core::vault::{run_watch_loop, LocalVault, SharedVault};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::RefreshTokenCredentials;
use crate::config::{Command, Settings};
use crate::http_remote::HttpRemote;
use crate::native_fs::NativeFs;
use crate::watcher::{FileWatcher, DEFAULT_DEBOUNCE};

/// Quiet period after a vault change before a sync pass starts
pub const SYNC_SETTLE: Duration = Duration::from_secs(2);

pub type DaemonEngine =
    SyncEngine<HttpRemote, Arc<dyn CredentialProvider>, Arc<dyn SettingsStore>>;

/// Open and load the vault at the configured path.
pub async fn open_vault(settings: &Settings) -> Result<SharedVault<NativeFs>> {
    info!("Vault path: {:?}", settings.vault_path);
    let mut vault = LocalVault::new(NativeFs::new(settings.vault_path.clone()));
    vault
        .initialize()
        .await
        .with_context(|| format!("Failed to open vault at {:?}", settings.vault_path))?;
    info!("Vault loaded with {} note(s)", vault.note_count());
    Ok(vault.into_shared())
}

/// Pick the credential source: a refresh token when an app key is known,
/// otherwise the access token as given.
pub fn credentials(settings: &Settings, store: Arc<dyn SettingsStore>) -> Arc<dyn CredentialProvider> {
    match (&settings.refresh_token, &settings.app_key) {
        (Some(refresh_token), Some(app_key)) => Arc::new(RefreshTokenCredentials::new(
            &settings.api_url,
            app_key.clone(),
            refresh_token.clone(),
            settings.access_token.clone(),
            store,
        )),
        _ => Arc::new(StaticCredentials::new(
            settings.access_token.clone().unwrap_or_default(),
        )),
    }
}

pub fn build_engine(settings: &Settings, store: Arc<dyn SettingsStore>) -> Result<DaemonEngine> {
    let remote = HttpRemote::new(&settings.api_url, &settings.content_url)?;
    let credentials = credentials(settings, Arc::clone(&store));
    let config = SyncConfig::default().with_folder(settings.remote_folder.clone());
    Ok(SyncEngine::new(remote, credentials, store, config))
}

/// Run a command to completion.
pub async fn execute(command: Command, settings: Settings, store: Arc<dyn SettingsStore>) -> Result<()> {
    match command {
        Command::Run => run(settings, store).await,
        Command::Sync => {
            let vault = open_vault(&settings).await?;
            let engine = build_engine(&settings, store)?;
            let outcome = engine.sync(&vault).await;
            println!("{}", outcome.status());
            if let Some(report) = outcome.report() {
                for error in &report.errors {
                    println!("  {}", error);
                }
            }
            if let SyncOutcome::NotAuthenticated(_) = outcome {
                bail!("Remote rejected the credential");
            }
            Ok(())
        }
        Command::PushAll => {
            let vault = open_vault(&settings).await?;
            let engine = build_engine(&settings, store)?;
            let report = engine.upload_all(&vault).await;
            println!(
                "{} uploaded, {} unchanged, {} error(s)",
                report.uploaded,
                report.skipped,
                report.errors.len()
            );
            for error in &report.errors {
                println!("  {}", error);
            }
            Ok(())
        }
        Command::RebuildIndex => {
            let vault = open_vault(&settings).await?;
            let count = vault.lock().await.rebuild_index_from_disk().await?;
            println!("Rebuilt index with {} note(s)", count);
            Ok(())
        }
        Command::List => {
            let vault = open_vault(&settings).await?;
            let vault = vault.lock().await;
            for note in vault.sorted_notes() {
                let pin = if note.pinned { "*" } else { " " };
                println!(
                    "{} {}  {}  {}",
                    pin,
                    note.id,
                    note.updated.format("%Y-%m-%d %H:%M"),
                    codec::display_title(note)
                );
            }
            Ok(())
        }
        Command::Conflicts => {
            let vault = open_vault(&settings).await?;
            let conflicts = vault.lock().await.conflicts().await;
            if conflicts.is_empty() {
                println!("No conflicts");
            }
            for conflict in conflicts {
                println!(
                    "{}  {}  detected {}",
                    conflict.note_id,
                    conflict.conflict_path,
                    conflict.detected_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Command::Resolve { note_id, keep_copy } => {
            let vault = open_vault(&settings).await?;
            let mut vault = vault.lock().await;
            let conflicts = vault.conflicts().await;
            let Some(conflict) = conflicts.iter().find(|c| c.note_id == note_id) else {
                bail!("No conflict recorded for note {}", note_id);
            };
            if !vault.resolve_conflict(conflict, keep_copy).await {
                bail!("Failed to resolve conflict for note {}", note_id);
            }
            println!(
                "Resolved {} ({})",
                note_id,
                if keep_copy { "kept conflicted copy" } else { "kept note" }
            );
            Ok(())
        }
    }
}

/// Watch the vault and sync until Ctrl+C.
pub async fn run(settings: Settings, store: Arc<dyn SettingsStore>) -> Result<()> {
    let vault = open_vault(&settings).await?;

    let watch_task = if settings.watch {
        let (watcher, events) = FileWatcher::new(&settings.vault_path, DEFAULT_DEBOUNCE)?;
        info!("Watching {:?}", watcher.notes_path());
        vault.lock().await.attach_watcher(Box::new(watcher));
        Some(tokio::spawn(run_watch_loop(Arc::clone(&vault), events)))
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut subscription = None;
    let sync_task = if settings.sync {
        let engine = build_engine(&settings, Arc::clone(&store))?;
        let (trigger_tx, triggers) = mpsc::unbounded_channel();
        subscription = Some(vault.lock().await.subscribe(move |event| {
            debug!("Vault event: {}", event.name());
            let _ = trigger_tx.send(());
        }));
        info!("Syncing every {}s", settings.sync_interval.as_secs());
        Some(tokio::spawn(sync_loop(
            engine,
            Arc::clone(&vault),
            triggers,
            settings.sync_interval,
            shutdown_rx,
        )))
    } else {
        info!("Remote sync disabled");
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(task) = sync_task {
        // A pass in flight runs to completion
        if let Err(e) = task.await {
            warn!("Sync task failed: {}", e);
        }
    }
    drop(subscription);
    vault.lock().await.destroy();
    if let Some(task) = watch_task {
        let _ = task.await;
    }

    info!("Shutting down");
    Ok(())
}

/// Run a pass on every tick, and shortly after vault changes. Changes that
/// arrive during a pass queue another one.
async fn sync_loop(
    engine: DaemonEngine,
    vault: SharedVault<NativeFs>,
    mut triggers: mpsc::UnboundedReceiver<()>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            received = triggers.recv() => {
                if received.is_none() {
                    break;
                }
                tokio::time::sleep(SYNC_SETTLE).await;
                while triggers.try_recv().is_ok() {}
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let outcome = engine.sync(&vault).await;
        match &outcome {
            SyncOutcome::NotAuthenticated(_) => warn!("{}", outcome.status()),
            _ => info!("{}", outcome.status()),
        }
    }
    debug!("Sync loop stopped");
}
