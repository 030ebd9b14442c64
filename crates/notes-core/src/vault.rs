//! Vault: owns the note files, the in-memory note cache and the index.
//!
//! Every mutation goes through the vault: it writes the note file, updates the
//! cache and the index, then emits a [`VaultEvent`] to subscribers. The vault
//! is the only writer of note files, the index file and the conflicts area.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::codec;
use crate::conflict::{self, ConflictInfo};
use crate::events::{EventBus, Subscription, VaultEvent};
use crate::fs::{FileEvent, FileEventKind, FileSystem, FsError, WatchGuard};
use crate::index::{self, VaultIndex};
use crate::note::{now_millis, Note, NotePatch};
use crate::paths;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Vault not initialized")]
    NotInitialized,

    #[error("Vault has been destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// A vault shared between API callers, the watch loop and the sync engine.
pub type SharedVault<F> = Arc<Mutex<LocalVault<F>>>;

/// Lifecycle of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// Manages the notes of one vault directory
pub struct LocalVault<F: FileSystem> {
    fs: F,
    state: VaultState,
    notes: HashMap<String, Note>,
    index: VaultIndex,
    events: Arc<EventBus>,
    /// Keeps the platform watcher alive while the vault is open. The mutex
    /// only makes the vault `Sync`; the guard is never accessed.
    watcher: Option<std::sync::Mutex<Box<dyn WatchGuard>>>,
}

impl<F: FileSystem> LocalVault<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            state: VaultState::Uninitialized,
            notes: HashMap::new(),
            index: VaultIndex::default(),
            events: Arc::new(EventBus::new()),
            watcher: None,
        }
    }

    /// Wrap in the shared handle used by the watch loop and the sync engine.
    pub fn into_shared(self) -> SharedVault<F> {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> VaultState {
        self.state
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Subscribe to vault events.
    ///
    /// Callbacks run synchronously while the vault is locked; they must not
    /// call back into the vault.
    pub fn subscribe(
        &self,
        callback: impl Fn(&VaultEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Load the vault from disk.
    ///
    /// Creates the directory layout, loads the index and every note file, moves
    /// conflicted copies aside, and reconciles the index with the notes found.
    /// Calling it again once ready is a no-op.
    pub async fn initialize(&mut self) -> Result<()> {
        match self.state {
            VaultState::Ready => return Ok(()),
            VaultState::Destroyed => return Err(VaultError::Destroyed),
            VaultState::Uninitialized | VaultState::Initializing => {}
        }

        self.state = VaultState::Initializing;
        match self.load_from_disk().await {
            Ok(()) => {
                self.state = VaultState::Ready;
                info!("Vault ready with {} note(s)", self.notes.len());
                Ok(())
            }
            Err(e) => {
                self.state = VaultState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn load_from_disk(&mut self) -> Result<()> {
        self.fs.mkdir(paths::NOTES_DIR).await?;
        self.fs.mkdir(paths::CONFLICTS_DIR).await?;

        self.index = index::load(&self.fs).await;
        self.notes = self.read_all_notes().await?;

        for name in conflict::scan_for_conflicts(&self.fs).await {
            if let Some(info) = conflict::handle(&self.fs, &name).await {
                self.events.emit(VaultEvent::ConflictDetected { info });
            }
        }

        // Drop entries whose file vanished while we were away (not a local
        // delete, so no tombstone), then make sure every note has an entry.
        let stale: Vec<String> = self
            .index
            .notes
            .keys()
            .filter(|id| !self.notes.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            debug!("Dropping index entry without file: {}", id);
            index::remove(&mut self.index, &id, false);
        }

        let mut loaded: Vec<&Note> = self.notes.values().collect();
        loaded.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        for note in loaded {
            index::upsert(&mut self.index, note);
        }

        index::save(&self.fs, &self.index).await?;
        Ok(())
    }

    /// Read every note file in the notes directory.
    async fn read_all_notes(&self) -> Result<HashMap<String, Note>> {
        let mut notes = HashMap::new();
        for entry in self.fs.list(paths::NOTES_DIR).await? {
            if entry.is_dir || conflict::is_conflict_marker(&entry.name) {
                continue;
            }
            let Some(id) = paths::id_from_file_name(&entry.name) else {
                continue;
            };
            if let Some(note) = self.read_note_file(id).await {
                notes.insert(note.id.clone(), note);
            }
        }
        Ok(notes)
    }

    /// Parse `notes/<id>.md`. Malformed or unreadable files are logged and skipped.
    async fn read_note_file(&self, id: &str) -> Option<Note> {
        let path = paths::note_path(id);
        let bytes = match self.fs.read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {}: {}", path, e);
                return None;
            }
        };
        let raw = String::from_utf8_lossy(&bytes);
        let Some(mut note) = codec::parse(&raw, Some(id)) else {
            warn!("Skipping unparsable note file {}", path);
            return None;
        };
        if note.id != id {
            warn!(
                "Note file {} claims id {}, using the file name",
                path, note.id
            );
            note.id = id.to_string();
        }
        Some(note)
    }

    /// Keep a platform watcher alive for as long as the vault is open.
    pub fn attach_watcher(&mut self, guard: Box<dyn WatchGuard>) {
        self.watcher = Some(std::sync::Mutex::new(guard));
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop watching and drop every subscriber. Files are left untouched.
    pub fn destroy(&mut self) {
        self.watcher = None;
        self.events.clear();
        self.state = VaultState::Destroyed;
        info!("Vault destroyed");
    }

    fn ensure_ready(&self, operation: &str) -> bool {
        if self.state == VaultState::Ready {
            true
        } else {
            warn!("{} ignored: vault is {:?}", operation, self.state);
            false
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Notes in display order (pinned first, then index order).
    pub fn sorted_notes(&self) -> Vec<&Note> {
        index::sorted_view(&self.index)
            .into_iter()
            .filter_map(|(id, _)| self.notes.get(id))
            .collect()
    }

    pub fn index(&self) -> &VaultIndex {
        &self.index
    }

    /// Ids deleted locally, in deletion order.
    pub fn tombstones(&self) -> &[String] {
        &self.index.deleted_notes
    }

    /// Every tag used by any note.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.index.tags
    }

    pub async fn conflicts(&self) -> Vec<ConflictInfo> {
        conflict::list(&self.fs).await
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create a note from `patch` over the defaults.
    pub async fn create_note(&mut self, patch: NotePatch) -> Option<Note> {
        if !self.ensure_ready("create_note") {
            return None;
        }

        let mut note = Note::new(uuid::Uuid::new_v4().to_string(), now_millis());
        note.apply(patch);

        if let Err(e) = self.write_note(&note).await {
            warn!("Failed to create note {}: {}", note.id, e);
            return None;
        }
        self.store(note.clone()).await;
        debug!("Created note {}", note.id);
        self.events.emit(VaultEvent::NoteCreated { note: note.clone() });
        Some(note)
    }

    /// Merge `patch` into an existing note. `None` if the id is unknown.
    pub async fn update_note(&mut self, id: &str, patch: NotePatch) -> Option<Note> {
        if !self.ensure_ready("update_note") {
            return None;
        }
        let Some(existing) = self.notes.get(id) else {
            warn!("update_note: unknown note {}", id);
            return None;
        };

        let mut note = existing.clone();
        note.apply(patch);
        note.touch(now_millis());

        if let Err(e) = self.write_note(&note).await {
            warn!("Failed to update note {}: {}", id, e);
            return None;
        }
        self.store(note.clone()).await;
        self.events.emit(VaultEvent::NoteUpdated { note: note.clone() });
        Some(note)
    }

    /// Delete a note and record a tombstone for remote propagation.
    pub async fn delete_note(&mut self, id: &str) -> bool {
        if !self.ensure_ready("delete_note") {
            return false;
        }
        if !self.notes.contains_key(id) {
            warn!("delete_note: unknown note {}", id);
            return false;
        }
        self.remove(id, true).await
    }

    /// Flip the checkbox on `line_index` of the note body.
    ///
    /// A line that is out of range or not a checkbox leaves the note unchanged.
    pub async fn toggle_checkbox(&mut self, id: &str, line_index: usize) -> Option<Note> {
        let note = self.notes.get(id)?;
        match codec::toggle_checkbox(&note.content, line_index) {
            Some(content) => {
                self.update_note(id, NotePatch::default().content(content))
                    .await
            }
            None => {
                debug!("toggle_checkbox: line {} of {} is not a checkbox", line_index, id);
                Some(note.clone())
            }
        }
    }

    pub async fn toggle_pinned(&mut self, id: &str) -> Option<Note> {
        let pinned = self.notes.get(id)?.pinned;
        self.update_note(id, NotePatch::default().pinned(!pinned))
            .await
    }

    /// Apply an explicit display order.
    pub async fn reorder_notes(&mut self, ids: &[String]) -> bool {
        if !self.ensure_ready("reorder_notes") {
            return false;
        }
        index::reorder(&mut self.index, ids);
        self.persist_index().await
    }

    /// Settle a recorded conflict, then reload the live note if it changed.
    pub async fn resolve_conflict(&mut self, conflict: &ConflictInfo, keep_conflict: bool) -> bool {
        if let Err(e) = conflict::resolve(&self.fs, conflict, keep_conflict).await {
            warn!("Failed to resolve conflict {}: {}", conflict.conflict_path, e);
            return false;
        }
        if keep_conflict {
            if let Some(note) = self.read_note_file(&conflict.note_id).await {
                let existed = self.notes.contains_key(&note.id);
                self.store(note.clone()).await;
                self.events.emit(if existed {
                    VaultEvent::NoteUpdated { note }
                } else {
                    VaultEvent::NoteCreated { note }
                });
            }
        }
        true
    }

    /// Merge candidate for a conflict: live note plus the conflict copy.
    pub async fn merge_candidate(&self, conflict: &ConflictInfo) -> Option<Note> {
        let original = self.notes.get(&conflict.note_id)?;
        let bytes = self.fs.read(&conflict.conflict_path).await.ok()?;
        let copy = codec::parse(&String::from_utf8_lossy(&bytes), Some(&conflict.note_id))?;
        Some(conflict::merge(original, &copy))
    }

    /// Re-read every note file and derive a fresh index from them.
    ///
    /// Tombstones and the last sync time carry over; they cannot be derived
    /// from the notes.
    pub async fn rebuild_index_from_disk(&mut self) -> Result<usize> {
        if self.state == VaultState::Destroyed {
            return Err(VaultError::Destroyed);
        }
        self.notes = self.read_all_notes().await?;

        let notes: Vec<Note> = self.notes.values().cloned().collect();
        let mut rebuilt = index::rebuild(&notes);
        rebuilt.deleted_notes = std::mem::take(&mut self.index.deleted_notes);
        rebuilt.last_sync = self.index.last_sync;
        self.index = rebuilt;

        index::save(&self.fs, &self.index).await?;
        info!("Rebuilt index from {} note file(s)", notes.len());
        Ok(notes.len())
    }

    // ------------------------------------------------------------------
    // Watch events
    // ------------------------------------------------------------------

    /// Apply a change observed in the notes directory.
    ///
    /// Writes made by the vault itself parse back to the cached note and are
    /// absorbed without an event.
    pub async fn handle_file_event(&mut self, event: FileEvent) {
        if self.state != VaultState::Ready {
            return;
        }
        let name = event.name.as_str();
        if name.starts_with('.') || name.ends_with(".tmp") {
            return;
        }

        if conflict::is_conflict_marker(name) {
            if event.kind == FileEventKind::Modified
                && self.fs.exists(&paths::notes_entry(name)).await.unwrap_or(false)
            {
                if let Some(info) = conflict::handle(&self.fs, name).await {
                    self.events.emit(VaultEvent::ConflictDetected { info });
                }
            }
            return;
        }

        let Some(id) = paths::id_from_file_name(name).map(str::to_string) else {
            return;
        };

        let exists = self
            .fs
            .exists(&paths::note_path(&id))
            .await
            .unwrap_or(false);

        if event.kind == FileEventKind::Deleted || !exists {
            if self.notes.contains_key(&id) {
                debug!("Note file removed externally: {}", id);
                self.remove(&id, true).await;
            }
            return;
        }

        let Some(note) = self.read_note_file(&id).await else {
            return;
        };

        match self.notes.get(&id) {
            Some(cached) if *cached == note => {
                debug!("No change for {} (own write)", id);
            }
            Some(_) => {
                self.store(note.clone()).await;
                self.events.emit(VaultEvent::NoteUpdated { note });
            }
            None => {
                if self.index.is_tombstoned(&id) {
                    warn!("Note {} reappeared after local deletion", id);
                }
                self.store(note.clone()).await;
                self.events.emit(VaultEvent::NoteCreated { note });
            }
        }
    }

    // ------------------------------------------------------------------
    // Remote-facing operations (used by the sync engine)
    // ------------------------------------------------------------------

    /// Replace a note file with bytes fetched from the remote store.
    ///
    /// The bytes are written verbatim so the remote `updated` stamp survives.
    pub async fn import_remote(&mut self, id: &str, raw: &str) -> Option<Note> {
        if !self.ensure_ready("import_remote") {
            return None;
        }
        let Some(mut note) = codec::parse(raw, Some(id)) else {
            warn!("Remote copy of {} is not a note file", id);
            return None;
        };
        note.id = id.to_string();

        if let Err(e) = self.fs.write(&paths::note_path(id), raw.as_bytes()).await {
            warn!("Failed to write downloaded note {}: {}", id, e);
            return None;
        }

        let existed = self.notes.contains_key(id);
        self.store(note.clone()).await;
        self.events.emit(if existed {
            VaultEvent::NoteUpdated { note: note.clone() }
        } else {
            VaultEvent::NoteCreated { note: note.clone() }
        });
        Some(note)
    }

    /// Drop a note that was deleted on the remote side (no tombstone).
    pub async fn remove_deleted_remotely(&mut self, id: &str) -> bool {
        if !self.ensure_ready("remove_deleted_remotely") || !self.notes.contains_key(id) {
            return false;
        }
        self.remove(id, false).await
    }

    /// Place a remote conflicted copy into the conflicts area.
    pub async fn import_remote_conflict(&mut self, name: &str, raw: &[u8]) -> Option<ConflictInfo> {
        if !self.ensure_ready("import_remote_conflict") {
            return None;
        }
        if conflict::extract_original_id(name).is_none() {
            warn!("Not importing {}: not a conflicted copy of a note", name);
            return None;
        }
        if let Err(e) = self.fs.write(&paths::notes_entry(name), raw).await {
            warn!("Failed to write remote conflict copy {}: {}", name, e);
            return None;
        }
        let info = conflict::handle(&self.fs, name).await?;
        self.events.emit(VaultEvent::ConflictDetected { info: info.clone() });
        Some(info)
    }

    pub async fn record_last_sync(&mut self, at: DateTime<Utc>) {
        self.index.last_sync = Some(at);
        self.persist_index().await;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn write_note(&self, note: &Note) -> std::result::Result<(), FsError> {
        self.fs
            .write(&paths::note_path(&note.id), codec::canonical(note).as_bytes())
            .await
    }

    async fn store(&mut self, note: Note) {
        index::upsert(&mut self.index, &note);
        self.notes.insert(note.id.clone(), note);
        self.persist_index().await;
    }

    async fn remove(&mut self, id: &str, track_deletion: bool) -> bool {
        match self.fs.delete(&paths::note_path(id)).await {
            Ok(()) | Err(FsError::NotFound(_)) => {}
            Err(e) => {
                warn!("Failed to delete note file {}: {}", id, e);
                return false;
            }
        }
        self.notes.remove(id);
        index::remove(&mut self.index, id, track_deletion);
        self.persist_index().await;
        self.events.emit(VaultEvent::NoteDeleted { id: id.to_string() });
        true
    }

    async fn persist_index(&self) -> bool {
        match index::save(&self.fs, &self.index).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save index: {}", e);
                false
            }
        }
    }
}

/// Apply watcher events to the vault until the channel closes.
///
/// The channel closes when the watcher guard is dropped, which
/// [`LocalVault::destroy`] does.
pub async fn run_watch_loop<F: FileSystem>(
    vault: SharedVault<F>,
    mut events: mpsc::UnboundedReceiver<FileEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut vault = vault.lock().await;
        if vault.state() == VaultState::Destroyed {
            break;
        }
        vault.handle_file_event(event).await;
    }
    debug!("Watch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    async fn ready_vault() -> LocalVault<Arc<InMemoryFs>> {
        let fs = Arc::new(InMemoryFs::new());
        let mut vault = LocalVault::new(fs);
        vault.initialize().await.unwrap();
        vault
    }

    fn record(vault: &LocalVault<Arc<InMemoryFs>>) -> (Subscription, Log) {
        let log: Log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = vault.subscribe(move |event| {
            let detail = match event {
                VaultEvent::NoteCreated { note } | VaultEvent::NoteUpdated { note } => {
                    note.id.clone()
                }
                VaultEvent::NoteDeleted { id } => id.clone(),
                VaultEvent::ConflictDetected { info } => info.note_id.clone(),
            };
            sink.lock().unwrap().push(format!("{}:{}", event.name(), detail));
        });
        (sub, log)
    }

    fn modified(name: &str) -> FileEvent {
        FileEvent {
            name: name.into(),
            kind: FileEventKind::Modified,
        }
    }

    fn note_file(id: &str, body: &str) -> String {
        format!("---\nid: {}\ntitle: {}\n---\n\n{}", id, id, body)
    }

    #[tokio::test]
    async fn test_initialize_loads_notes_and_sweeps_conflicts() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("notes/id1.md", note_file("id1", "one").as_bytes())
            .await
            .unwrap();
        fs.write("notes/broken.md", b"no metadata here").await.unwrap();
        fs.write(
            "notes/id1 (Bob's conflicted copy 2024-01-01).md",
            note_file("id1", "other").as_bytes(),
        )
        .await
        .unwrap();

        let mut vault = LocalVault::new(Arc::clone(&fs));
        let (_sub, log) = record(&vault);
        vault.initialize().await.unwrap();

        assert_eq!(vault.state(), VaultState::Ready);
        assert_eq!(vault.note_count(), 1);
        assert_eq!(vault.get_note("id1").unwrap().content, "one");
        assert!(vault.index().notes.contains_key("id1"));
        assert_eq!(vault.conflicts().await.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["conflict-detected:id1".to_string()]);
        assert!(fs.exists("notes/.index.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let mut vault = ready_vault().await;
        vault.create_note(NotePatch::default()).await.unwrap();
        vault.initialize().await.unwrap();
        assert_eq!(vault.note_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_fails_on_unwritable_vault() {
        let fs = InMemoryFs::new();
        fs.deny_mkdir("notes");
        let mut vault = LocalVault::new(fs);

        assert!(vault.initialize().await.is_err());
        assert_ne!(vault.state(), VaultState::Ready);
        assert!(vault.create_note(NotePatch::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_drops_stale_index_entries() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write(
            "notes/.index.json",
            br#"{"version":2,"notes":{"ghost":{"order":0}},"deletedNotes":[]}"#,
        )
        .await
        .unwrap();

        let mut vault = LocalVault::new(Arc::clone(&fs));
        vault.initialize().await.unwrap();

        assert!(vault.index().notes.is_empty());
        assert!(vault.tombstones().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_keeps_files_and_drops_listeners() {
        let mut vault = ready_vault().await;
        let (_sub, _log) = record(&vault);
        let note = vault.create_note(NotePatch::default()).await.unwrap();

        vault.destroy();

        assert_eq!(vault.events().subscriber_count(), 0);
        assert!(vault.fs().exists(&paths::note_path(&note.id)).await.unwrap());
        assert!(matches!(vault.initialize().await, Err(VaultError::Destroyed)));
    }

    #[tokio::test]
    async fn test_create_writes_file_index_and_event() {
        let mut vault = ready_vault().await;
        let (_sub, log) = record(&vault);

        let note = vault
            .create_note(
                NotePatch::default()
                    .title("Todo")
                    .content("hello")
                    .color("green")
                    .tags(["home"]),
            )
            .await
            .unwrap();

        assert_eq!(note.color, "#B5E8A3");
        assert!(vault.tags().contains("home"));
        let raw = vault.fs().read(&paths::note_path(&note.id)).await.unwrap();
        let on_disk = codec::parse(&String::from_utf8_lossy(&raw), None).unwrap();
        assert_eq!(on_disk, note);
        assert_eq!(vault.index().notes[&note.id].title, "Todo");
        assert_eq!(*log.lock().unwrap(), vec![format!("note-created:{}", note.id)]);
    }

    #[tokio::test]
    async fn test_update_merges_and_advances_updated() {
        let mut vault = ready_vault().await;
        let created = vault
            .create_note(NotePatch::default().title("A").content("x"))
            .await
            .unwrap();
        let (_sub, log) = record(&vault);

        let updated = vault
            .update_note(&created.id, NotePatch::default().content("y"))
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created, created.created);
        assert_eq!(updated.title, "A");
        assert_eq!(updated.content, "y");
        assert!(updated.updated > created.updated);
        assert_eq!(*log.lock().unwrap(), vec![format!("note-updated:{}", created.id)]);
    }

    #[tokio::test]
    async fn test_update_unknown_note_returns_none() {
        let mut vault = ready_vault().await;
        assert!(vault.update_note("nope", NotePatch::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_tracks_tombstone() {
        let mut vault = ready_vault().await;
        let note = vault.create_note(NotePatch::default()).await.unwrap();
        let (_sub, log) = record(&vault);

        assert!(vault.delete_note(&note.id).await);

        assert!(vault.get_note(&note.id).is_none());
        assert!(!vault.index().notes.contains_key(&note.id));
        assert_eq!(vault.tombstones(), &[note.id.clone()]);
        assert!(!vault.fs().exists(&paths::note_path(&note.id)).await.unwrap());
        assert_eq!(*log.lock().unwrap(), vec![format!("note-deleted:{}", note.id)]);
        assert!(!vault.delete_note(&note.id).await);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_file() {
        let mut vault = ready_vault().await;
        let note = vault.create_note(NotePatch::default()).await.unwrap();
        vault.fs().delete(&paths::note_path(&note.id)).await.unwrap();

        assert!(vault.delete_note(&note.id).await);
        assert!(vault.get_note(&note.id).is_none());
    }

    #[tokio::test]
    async fn test_toggle_checkbox() {
        let mut vault = ready_vault().await;
        let note = vault
            .create_note(NotePatch::default().content("list\n- [ ] milk"))
            .await
            .unwrap();

        let toggled = vault.toggle_checkbox(&note.id, 1).await.unwrap();
        assert_eq!(toggled.content, "list\n- [x] milk");

        let unchanged = vault.toggle_checkbox(&note.id, 9).await.unwrap();
        assert_eq!(unchanged, toggled);
    }

    #[tokio::test]
    async fn test_toggle_pinned_moves_note_first() {
        let mut vault = ready_vault().await;
        let a = vault.create_note(NotePatch::default().title("a")).await.unwrap();
        let b = vault.create_note(NotePatch::default().title("b")).await.unwrap();
        assert_eq!(vault.index().notes[&a.id].order, 0);
        assert_eq!(vault.index().notes[&b.id].order, 1);

        vault.toggle_pinned(&b.id).await.unwrap();

        let order: Vec<&str> = vault.sorted_notes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec![b.id.as_str(), a.id.as_str()]);
    }

    #[tokio::test]
    async fn test_rebuild_index_from_disk_repairs_drift() {
        let mut vault = ready_vault().await;
        let a = vault.create_note(NotePatch::default()).await.unwrap();
        let b = vault.create_note(NotePatch::default().pinned(true)).await.unwrap();
        let c = vault.create_note(NotePatch::default()).await.unwrap();
        vault.delete_note(&c.id).await;

        // Written behind the vault's back
        vault
            .fs()
            .write("notes/extra.md", note_file("extra", "x").as_bytes())
            .await
            .unwrap();

        let count = vault.rebuild_index_from_disk().await.unwrap();

        assert_eq!(count, 3);
        let order: Vec<&str> = vault.sorted_notes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order[0], b.id);
        assert!(order.contains(&a.id.as_str()));
        assert!(order.contains(&"extra"));
        assert_eq!(vault.tombstones(), &[c.id.clone()]);
    }

    #[tokio::test]
    async fn test_own_writes_are_absorbed() {
        let mut vault = ready_vault().await;
        let note = vault.create_note(NotePatch::default().content("hi")).await.unwrap();
        let (_sub, log) = record(&vault);

        vault.handle_file_event(modified(&format!("{}.md", note.id))).await;
        vault.handle_file_event(modified(".index.json")).await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unusual_titles_do_not_echo() {
        let mut vault = ready_vault().await;
        let (_sub, log) = record(&vault);

        for title in ["", " padded ", "line\nbreak"] {
            let note = vault
                .create_note(NotePatch::default().title(title))
                .await
                .unwrap();
            vault.handle_file_event(modified(&format!("{}.md", note.id))).await;
            assert_eq!(vault.get_note(&note.id), Some(&note));
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|entry| entry.starts_with("note-created:")));
    }

    #[tokio::test]
    async fn test_external_changes_are_classified() {
        let mut vault = ready_vault().await;
        let (_sub, log) = record(&vault);

        vault
            .fs()
            .write("notes/ext.md", note_file("ext", "v1").as_bytes())
            .await
            .unwrap();
        vault.handle_file_event(modified("ext.md")).await;

        vault
            .fs()
            .write("notes/ext.md", note_file("ext", "v2").as_bytes())
            .await
            .unwrap();
        vault.handle_file_event(modified("ext.md")).await;

        vault.fs().delete("notes/ext.md").await.unwrap();
        vault
            .handle_file_event(FileEvent {
                name: "ext.md".into(),
                kind: FileEventKind::Deleted,
            })
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "note-created:ext".to_string(),
                "note-updated:ext".to_string(),
                "note-deleted:ext".to_string(),
            ]
        );
        assert_eq!(vault.tombstones(), &["ext".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_block_others() {
        let mut vault = ready_vault().await;
        let (_sub, log) = record(&vault);

        vault.fs().write("notes/bad.md", b"garbage").await.unwrap();
        vault
            .fs()
            .write("notes/good.md", note_file("good", "ok").as_bytes())
            .await
            .unwrap();

        vault.handle_file_event(modified("bad.md")).await;
        vault.handle_file_event(modified("good.md")).await;

        assert_eq!(*log.lock().unwrap(), vec!["note-created:good".to_string()]);
        assert!(vault.get_note("bad").is_none());
    }

    #[tokio::test]
    async fn test_conflict_file_event() {
        let mut vault = ready_vault().await;
        let (_sub, log) = record(&vault);
        let name = "id1 (conflicted copy 2024-01-01).md";

        vault
            .fs()
            .write(&paths::notes_entry(name), b"copy")
            .await
            .unwrap();
        vault.handle_file_event(modified(name)).await;

        assert_eq!(*log.lock().unwrap(), vec!["conflict-detected:id1".to_string()]);
        assert!(vault.get_note("id1").is_none());
    }

    #[tokio::test]
    async fn test_resolve_conflict_keeping_copy_reloads_note() {
        let mut vault = ready_vault().await;
        let note = vault.create_note(NotePatch::default().content("mine")).await.unwrap();
        let name = format!("{} (Bob's conflicted copy 2024-01-01).md", note.id);
        let mut theirs = note.clone();
        theirs.content = "theirs".into();
        vault
            .fs()
            .write(&paths::notes_entry(&name), codec::canonical(&theirs).as_bytes())
            .await
            .unwrap();
        vault.handle_file_event(modified(&name)).await;

        let conflict = vault.conflicts().await.pop().unwrap();
        let candidate = vault.merge_candidate(&conflict).await.unwrap();
        assert!(candidate.content.contains("mine") && candidate.content.contains("theirs"));

        assert!(vault.resolve_conflict(&conflict, true).await);
        assert_eq!(vault.get_note(&note.id).unwrap().content, "theirs");
        assert!(vault.conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_remote_and_remote_delete() {
        let mut vault = ready_vault().await;
        let (_sub, log) = record(&vault);
        let raw = "---\nid: r1\ntitle: Remote\nupdated: 2024-01-01T00:00:00.000Z\n---\n\nfrom afar";

        let note = vault.import_remote("r1", raw).await.unwrap();
        assert_eq!(note.content, "from afar");
        assert_eq!(note.updated.timestamp_millis(), 1_704_067_200_000);
        assert_eq!(vault.fs().read("notes/r1.md").await.unwrap(), raw.as_bytes());

        assert!(vault.remove_deleted_remotely("r1").await);
        assert!(vault.tombstones().is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["note-created:r1".to_string(), "note-deleted:r1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remote_conflict_needs_a_note_id() {
        let mut vault = ready_vault().await;
        let name = "Recipe ideas (Bob's conflicted copy 2024-01-01).md";

        assert!(vault.import_remote_conflict(name, b"x").await.is_none());
        assert!(!vault.fs().exists(&paths::notes_entry(name)).await.unwrap());

        let info = vault
            .import_remote_conflict("r1 (Bob's conflicted copy 2024-01-01).md", b"x")
            .await
            .unwrap();
        assert_eq!(info.note_id, "r1");
    }

    #[tokio::test]
    async fn test_watch_loop_stops_when_channel_closes() {
        let vault = ready_vault().await.into_shared();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_watch_loop(Arc::clone(&vault), rx));

        vault
            .lock()
            .await
            .fs()
            .write("notes/w.md", note_file("w", "x").as_bytes())
            .await
            .unwrap();
        tx.send(modified("w.md")).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(vault.lock().await.get_note("w").is_some());
    }
}
