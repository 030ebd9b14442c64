//! File watcher with debouncing for the notes directory.
//!
//! Uses notify-debouncer-mini: a file is reported once it has stopped changing
//! for the debounce period.

use anyhow::Result;
use notes_core::fs::{FileEvent, FileEventKind, WatchGuard};
use notes_core::paths;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Default quiet period before a changed file is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Keeps the platform watcher alive. Dropping it closes the event channel.
pub struct FileWatcher {
    notes_path: PathBuf,
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl WatchGuard for FileWatcher {}

/// Track last seen mtime to filter spurious repeat events
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

impl FileWatcher {
    /// Watch `<vault>/notes`. Events arrive on the returned receiver.
    pub fn new(
        vault_path: &Path,
        debounce: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FileEvent>)> {
        let notes_path = vault_path.join(paths::NOTES_DIR);
        std::fs::create_dir_all(&notes_path)?;
        // FSEvents on macOS needs the real path (/private/var/...)
        let notes_path = notes_path.canonicalize().unwrap_or(notes_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let notes_path_clone = notes_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) =
                            Self::process_event(&event, &notes_path_clone, &mtime_cache)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&notes_path, RecursiveMode::NonRecursive)?;

        Ok((
            Self {
                notes_path,
                _debouncer: debouncer,
            },
            event_rx,
        ))
    }

    /// Turn a debounced event into a note file event, or drop it.
    fn process_event(
        event: &DebouncedEvent,
        notes_path: &Path,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let name = path.strip_prefix(notes_path).ok()?.to_str()?;

        // Hidden files cover the index and its temp files
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return None;
        }
        if !name.ends_with(&format!(".{}", paths::NOTE_EXTENSION)) {
            return None;
        }

        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        let kind = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => {
                if cache.get(name) == Some(&mtime) {
                    // Mtime unchanged - spurious event, skip it
                    return None;
                }
                cache.insert(name.to_string(), mtime);
                FileEventKind::Modified
            }
            Err(_) if !path.exists() => {
                cache.remove(name);
                FileEventKind::Deleted
            }
            Err(_) => FileEventKind::Modified,
        };

        debug!("File event: {:?} - {}", kind, name);
        Some(FileEvent {
            name: name.to_string(),
            kind,
        })
    }

    pub fn notes_path(&self) -> &Path {
        &self.notes_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_mini::DebouncedEventKind;
    use tempfile::TempDir;

    fn debounced(path: PathBuf) -> DebouncedEvent {
        DebouncedEvent {
            path,
            kind: DebouncedEventKind::Any,
        }
    }

    #[test]
    fn test_process_event_filters_and_classifies() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().to_path_buf();
        let cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        std::fs::write(notes.join("a.md"), "x").unwrap();
        std::fs::write(notes.join(".index.json"), "{}").unwrap();
        std::fs::write(notes.join("a.1f2e.tmp"), "x").unwrap();

        let event = FileWatcher::process_event(&debounced(notes.join("a.md")), &notes, &cache);
        assert_eq!(
            event,
            Some(FileEvent {
                name: "a.md".into(),
                kind: FileEventKind::Modified
            })
        );

        // Same mtime again is a spurious repeat
        assert!(FileWatcher::process_event(&debounced(notes.join("a.md")), &notes, &cache).is_none());
        assert!(FileWatcher::process_event(&debounced(notes.join(".index.json")), &notes, &cache).is_none());
        assert!(FileWatcher::process_event(&debounced(notes.join("a.1f2e.tmp")), &notes, &cache).is_none());

        std::fs::remove_file(notes.join("a.md")).unwrap();
        let event = FileWatcher::process_event(&debounced(notes.join("a.md")), &notes, &cache);
        assert_eq!(event.map(|e| e.kind), Some(FileEventKind::Deleted));
    }
}
