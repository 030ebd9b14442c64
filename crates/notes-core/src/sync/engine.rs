//! SyncEngine: reconciles the local vault with a remote folder.
//!
//! A pass works as follows:
//!
//! 1. Ensure the remote folder exists. A folder created by this pass has no
//!    history, so nothing local is treated as deleted remotely.
//! 2. List the folder. Note files and conflicted copies are told apart by name.
//! 3. Delete remotely every locally tombstoned note. Tombstoned notes are never
//!    downloaded.
//! 4. Download notes unknown locally, and notes whose remote copy is newer than
//!    the local `updated` by more than the tolerance window.
//! 5. Download conflicted copies into the local conflicts area, then delete
//!    them remotely.
//! 6. A local note missing remotely and older than the grace window was
//!    deleted on another device and is removed locally; a younger one is new.
//! 7. Upload notes whose content hash differs from the last transfer and that
//!    are missing remotely or newer than the remote copy.
//! 8. Stamp the last sync time.
//!
//! Every decision is re-derived from current state, so a pass can be re-run
//! at any point.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::future::Future;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::SyncConfig;
use super::hash_cache::HashCache;
use super::local::LocalNotes;
use super::report::{BulkUploadReport, SyncOutcome, SyncReport};
use crate::codec;
use crate::conflict;
use crate::content_hash::ContentHash;
use crate::credentials::{CredentialError, CredentialProvider};
use crate::note::Note;
use crate::remote::{RemoteEntry, RemoteError, RemoteStore};
use crate::settings::SettingsStore;

#[derive(Debug, Error)]
pub(crate) enum SyncError {
    #[error("Credential unavailable: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Credential rejected after refresh")]
    Rejected,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    fn is_auth(&self) -> bool {
        matches!(self, SyncError::Credentials(_) | SyncError::Rejected)
    }
}

/// Log a failed remote operation and keep going, unless it is an auth failure.
fn record_failure(
    errors: &mut Vec<String>,
    what: impl Display,
    err: SyncError,
) -> Result<(), SyncError> {
    if err.is_auth() {
        return Err(err);
    }
    warn!("{} failed: {}", what, err);
    errors.push(format!("{}: {}", what, err));
    Ok(())
}

/// Remote access for one pass: the current bearer and a single refresh.
struct Session<'a, R: ?Sized, C: ?Sized> {
    remote: &'a R,
    credentials: &'a C,
    token: String,
    refreshed: bool,
}

impl<'a, R, C> Session<'a, R, C>
where
    R: RemoteStore + ?Sized,
    C: CredentialProvider + ?Sized,
{
    async fn open(remote: &'a R, credentials: &'a C) -> Result<Self, SyncError> {
        let token = credentials.bearer().await?;
        Ok(Self {
            remote,
            credentials,
            token,
            refreshed: false,
        })
    }

    /// Run a remote operation, refreshing the credential once per pass if the
    /// remote rejects it.
    async fn call<T, Op, Fut>(&mut self, op: Op) -> Result<T, SyncError>
    where
        Op: Fn(&'a R, String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match op(self.remote, self.token.clone()).await {
            Err(RemoteError::Unauthorized) => {}
            other => return other.map_err(SyncError::from),
        }
        if self.refreshed {
            return Err(SyncError::Rejected);
        }

        self.refreshed = true;
        info!("Remote rejected the credential, refreshing");
        self.token = self.credentials.refresh().await?;

        match op(self.remote, self.token.clone()).await {
            Err(RemoteError::Unauthorized) => Err(SyncError::Rejected),
            other => other.map_err(SyncError::from),
        }
    }
}

/// Remote listing split into notes and conflicted copies.
struct RemoteListing {
    notes: BTreeMap<String, RemoteEntry>,
    conflicts: Vec<RemoteEntry>,
}

/// Runs sync passes between a local vault and a remote folder.
pub struct SyncEngine<R, C, S> {
    remote: R,
    credentials: C,
    settings: S,
    config: SyncConfig,
    /// Held for the duration of a pass
    running: Mutex<()>,
}

impl<R, C, S> SyncEngine<R, C, S>
where
    R: RemoteStore,
    C: CredentialProvider,
    S: SettingsStore,
{
    pub fn new(remote: R, credentials: C, settings: S, config: SyncConfig) -> Self {
        Self {
            remote,
            credentials,
            settings,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run one pass. Returns `Skipped` if a pass is already running.
    pub async fn sync<L: LocalNotes + ?Sized>(&self, local: &L) -> SyncOutcome {
        let Ok(_pass) = self.running.try_lock() else {
            debug!("Sync pass already running, skipping");
            return SyncOutcome::Skipped;
        };

        let mut report = SyncReport::default();
        let mut hashes = HashCache::load(&self.settings).await;
        let result = self.run_pass(local, &mut hashes, &mut report).await;
        hashes.save(&self.settings).await;

        match result {
            Ok(()) => {
                info!("Sync pass finished: {}", report.status());
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                warn!("Sync pass aborted: {}", e);
                SyncOutcome::NotAuthenticated(report)
            }
        }
    }

    /// Upload every note whose content differs from the last transfer,
    /// overwriting remote copies.
    pub async fn upload_all<L: LocalNotes + ?Sized>(&self, local: &L) -> BulkUploadReport {
        let mut report = BulkUploadReport::default();
        let Ok(_pass) = self.running.try_lock() else {
            report.errors.push("Sync already in progress".to_string());
            return report;
        };

        let mut hashes = HashCache::load(&self.settings).await;
        if let Err(e) = self.upload_everything(local, &mut hashes, &mut report).await {
            warn!("Bulk upload aborted: {}", e);
            report.errors.push(e.to_string());
        }
        hashes.save(&self.settings).await;

        info!(
            "Bulk upload finished: {} uploaded, {} unchanged, {} error(s)",
            report.uploaded,
            report.skipped,
            report.errors.len()
        );
        report
    }

    async fn run_pass<L: LocalNotes + ?Sized>(
        &self,
        local: &L,
        hashes: &mut HashCache,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut session = Session::open(&self.remote, &self.credentials).await?;

        let fresh = match self.ensure_folder(&mut session).await {
            Ok(created) => created,
            Err(e) => {
                record_failure(&mut report.errors, "Create remote folder", e)?;
                false
            }
        };

        let Some(mut listing) = self.list_remote(&mut session, report).await? else {
            // Without a listing nothing can be reconciled safely
            return Ok(());
        };

        let snapshot = local.snapshot().await;
        let tombstones: BTreeSet<String> = snapshot.tombstones.into_iter().collect();
        let mut notes: BTreeMap<String, Note> = snapshot
            .notes
            .into_iter()
            .map(|note| (note.id.clone(), note))
            .collect();

        self.push_deletions(&mut session, &tombstones, &mut listing.notes, hashes, report)
            .await?;
        let pulled = self
            .pull_changes(&mut session, local, &listing.notes, &mut notes, hashes, report)
            .await?;
        self.collect_conflicts(&mut session, local, listing.conflicts, report)
            .await?;
        self.reconcile_deletions(local, fresh, &listing.notes, &mut notes, hashes, report)
            .await;
        self.push_changes(&mut session, &listing.notes, &notes, &pulled, hashes, report)
            .await?;

        local.record_last_sync(Utc::now()).await;
        Ok(())
    }

    /// Create the remote folder. Returns whether it was created just now.
    async fn ensure_folder(&self, session: &mut Session<'_, R, C>) -> Result<bool, SyncError> {
        let folder = self.config.folder.as_str();
        match session
            .call(move |remote, token| async move { remote.create_folder(&token, folder).await })
            .await
        {
            Ok(()) => {
                info!("Created remote folder {}", folder);
                Ok(true)
            }
            Err(SyncError::Remote(RemoteError::AlreadyExists(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_remote(
        &self,
        session: &mut Session<'_, R, C>,
        report: &mut SyncReport,
    ) -> Result<Option<RemoteListing>, SyncError> {
        let folder = self.config.folder.as_str();
        let entries = match session
            .call(move |remote, token| async move { remote.list_folder(&token, folder).await })
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                record_failure(&mut report.errors, "List remote folder", e)?;
                return Ok(None);
            }
        };

        let mut listing = RemoteListing {
            notes: BTreeMap::new(),
            conflicts: Vec::new(),
        };
        for entry in entries {
            if conflict::is_conflict_marker(&entry.name) {
                if conflict::extract_original_id(&entry.name).is_some() {
                    listing.conflicts.push(entry);
                } else {
                    debug!("Ignoring conflicted copy of a foreign file {}", entry.name);
                }
            } else if let Some(id) = self.config.id_for(&entry.name) {
                listing.notes.insert(id, entry);
            } else {
                debug!("Ignoring remote file {}", entry.name);
            }
        }
        debug!(
            "Remote has {} note(s) and {} conflicted cop(ies)",
            listing.notes.len(),
            listing.conflicts.len()
        );
        Ok(Some(listing))
    }

    async fn push_deletions(
        &self,
        session: &mut Session<'_, R, C>,
        tombstones: &BTreeSet<String>,
        remote_notes: &mut BTreeMap<String, RemoteEntry>,
        hashes: &mut HashCache,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for id in tombstones {
            hashes.forget(id);
            let Some(entry) = remote_notes.remove(id) else {
                continue;
            };
            let path = entry.path.as_str();
            match session
                .call(move |remote, token| async move { remote.delete(&token, path).await })
                .await
            {
                Ok(()) | Err(SyncError::Remote(RemoteError::NotFound(_))) => {
                    debug!("Deleted {} remotely", id);
                    report.deleted_remote += 1;
                }
                Err(e) => record_failure(&mut report.errors, format!("Delete {}", id), e)?,
            }
        }
        Ok(())
    }

    /// Download new and newer remote notes. Returns the ids now in step with
    /// the remote.
    async fn pull_changes<L: LocalNotes + ?Sized>(
        &self,
        session: &mut Session<'_, R, C>,
        local: &L,
        remote_notes: &BTreeMap<String, RemoteEntry>,
        notes: &mut BTreeMap<String, Note>,
        hashes: &mut HashCache,
        report: &mut SyncReport,
    ) -> Result<BTreeSet<String>, SyncError> {
        let mut pulled = BTreeSet::new();

        for (id, entry) in remote_notes {
            let wanted = match notes.get(id) {
                None => true,
                Some(note) => {
                    entry.modified > note.updated + self.config.tolerance
                        && !hashes.seen_remote(id, entry.modified)
                }
            };
            if !wanted {
                continue;
            }

            let path = entry.path.as_str();
            let bytes = match session
                .call(move |remote, token| async move { remote.download(&token, path).await })
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    record_failure(&mut report.errors, format!("Download {}", id), e)?;
                    continue;
                }
            };
            let raw = String::from_utf8_lossy(&bytes);

            if let Some(existing) = notes.get(id) {
                if codec::parse(&raw, Some(id)).is_some_and(|remote_note| remote_note == *existing) {
                    debug!("Remote copy of {} matches the local note", id);
                    hashes.record(id, ContentHash::of_note(existing), Some(entry.modified));
                    report.skipped += 1;
                    pulled.insert(id.clone());
                    continue;
                }
            }

            match local.import_remote(id, &raw).await {
                Some(note) => {
                    debug!("Downloaded {}", id);
                    hashes.record(id, ContentHash::of_note(&note), Some(entry.modified));
                    report.downloaded += 1;
                    notes.insert(id.clone(), note);
                    pulled.insert(id.clone());
                }
                None => report
                    .errors
                    .push(format!("Download {}: not a note file", id)),
            }
        }
        Ok(pulled)
    }

    async fn collect_conflicts<L: LocalNotes + ?Sized>(
        &self,
        session: &mut Session<'_, R, C>,
        local: &L,
        conflicts: Vec<RemoteEntry>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for entry in conflicts {
            let path = entry.path.as_str();
            let bytes = match session
                .call(move |remote, token| async move { remote.download(&token, path).await })
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    record_failure(&mut report.errors, format!("Download {}", entry.name), e)?;
                    continue;
                }
            };

            let Some(info) = local.import_remote_conflict(&entry.name, &bytes).await else {
                report
                    .errors
                    .push(format!("Import conflicted copy {}", entry.name));
                continue;
            };
            report.conflicts.push(info);

            match session
                .call(move |remote, token| async move { remote.delete(&token, path).await })
                .await
            {
                Ok(()) | Err(SyncError::Remote(RemoteError::NotFound(_))) => {}
                Err(e) => record_failure(&mut report.errors, format!("Delete {}", entry.name), e)?,
            }
        }
        Ok(())
    }

    /// Remove local notes that disappeared remotely. Notes younger than the
    /// grace window stay and are uploaded.
    async fn reconcile_deletions<L: LocalNotes + ?Sized>(
        &self,
        local: &L,
        fresh_folder: bool,
        remote_notes: &BTreeMap<String, RemoteEntry>,
        notes: &mut BTreeMap<String, Note>,
        hashes: &mut HashCache,
        report: &mut SyncReport,
    ) {
        if fresh_folder {
            return;
        }
        let now = Utc::now();
        let gone: Vec<String> = notes
            .values()
            .filter(|note| !remote_notes.contains_key(&note.id))
            .filter(|note| now - note.created > self.config.grace)
            .map(|note| note.id.clone())
            .collect();

        for id in gone {
            if hashes.get(&id).is_none() {
                info!("Removing {}: absent remotely and never uploaded from this vault", id);
            }
            if local.remove_deleted_remotely(&id).await {
                debug!("{} was deleted remotely", id);
                report.deleted_local += 1;
            }
            hashes.forget(&id);
            notes.remove(&id);
        }
    }

    async fn push_changes(
        &self,
        session: &mut Session<'_, R, C>,
        remote_notes: &BTreeMap<String, RemoteEntry>,
        notes: &BTreeMap<String, Note>,
        pulled: &BTreeSet<String>,
        hashes: &mut HashCache,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for (id, note) in notes {
            if pulled.contains(id) {
                continue;
            }
            let hash = ContentHash::of_note(note);
            if hashes.matches(id, &hash) {
                report.skipped += 1;
                continue;
            }

            let newer = match remote_notes.get(id) {
                // Survivors of deletion reconciliation are new
                None => true,
                // Remote untouched since our last transfer, so the local edit wins
                Some(entry) if hashes.seen_remote(id, entry.modified) => true,
                Some(entry) => note.updated > entry.modified + self.config.tolerance,
            };
            if !newer {
                report.skipped += 1;
                continue;
            }

            match self.upload(session, note).await {
                Ok(entry) => {
                    debug!("Uploaded {}", id);
                    hashes.record(id, hash, Some(entry.modified));
                    report.uploaded += 1;
                }
                Err(e) => record_failure(&mut report.errors, format!("Upload {}", id), e)?,
            }
        }
        Ok(())
    }

    async fn upload_everything<L: LocalNotes + ?Sized>(
        &self,
        local: &L,
        hashes: &mut HashCache,
        report: &mut BulkUploadReport,
    ) -> Result<(), SyncError> {
        let mut session = Session::open(&self.remote, &self.credentials).await?;
        if let Err(e) = self.ensure_folder(&mut session).await {
            record_failure(&mut report.errors, "Create remote folder", e)?;
        }

        for note in local.snapshot().await.notes {
            let hash = ContentHash::of_note(&note);
            if hashes.matches(&note.id, &hash) {
                report.skipped += 1;
                continue;
            }
            match self.upload(&mut session, &note).await {
                Ok(entry) => {
                    hashes.record(&note.id, hash, Some(entry.modified));
                    report.uploaded += 1;
                }
                Err(e) => record_failure(&mut report.errors, format!("Upload {}", note.id), e)?,
            }
        }
        Ok(())
    }

    async fn upload(
        &self,
        session: &mut Session<'_, R, C>,
        note: &Note,
    ) -> Result<RemoteEntry, SyncError> {
        let body = codec::canonical(note);
        let body = body.as_bytes();
        let path = self.config.note_path(&note.id);
        let path = path.as_str();
        session
            .call(move |remote, token| async move { remote.upload(&token, path, body, true).await })
            .await
    }
}
