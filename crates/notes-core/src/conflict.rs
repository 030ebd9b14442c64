//! Detection and handling of "conflicted copy" files.
//!
//! File-sync clients that see two writers edit the same object keep both and
//! rename one, e.g. `3f0c (Bob's conflicted copy 2024-01-01).md`. Those copies
//! are moved out of the notes directory into the conflicts area and recorded
//! until someone resolves them.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::fs::{FileSystem, FsError};
use crate::note::{Note, Reminder};
use crate::paths;

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<stem>.+?) \((?:[^()]+?['’]s )?(?i:conflicted copy) \d{4}-\d{2}-\d{2}(?: \(\d+\))?\)\.[A-Za-z0-9]+$",
    )
    .expect("valid conflict marker regex")
});

static ID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid id regex"));

/// A divergent copy moved out of the live note set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub note_id: String,
    /// Vault-relative path of the relocated copy
    pub conflict_path: String,
    pub detected_at: DateTime<Utc>,
    /// Modification time (ms) of the live note file when detected
    pub original_mod_time: Option<u64>,
    /// Modification time (ms) of the conflict copy
    pub conflict_mod_time: Option<u64>,
}

/// Whether `filename` follows the conflicted-copy naming convention.
pub fn is_conflict_marker(filename: &str) -> bool {
    MARKER.is_match(filename)
}

/// Note id of the note a conflicted copy diverged from.
///
/// Returns `None` if the name is not a marker or the remaining stem does not
/// look like one of our ids.
pub fn extract_original_id(filename: &str) -> Option<String> {
    let caps = MARKER.captures(filename)?;
    let stem = caps.name("stem")?.as_str();
    ID_SHAPE.is_match(stem).then(|| stem.to_string())
}

/// Whether `id` has the identifier shape used for note file names.
pub fn is_valid_id(id: &str) -> bool {
    ID_SHAPE.is_match(id)
}

/// Conflict-marked file names currently in the notes directory.
pub async fn scan_for_conflicts<F: FileSystem + ?Sized>(fs: &F) -> Vec<String> {
    let entries = match fs.list(paths::NOTES_DIR).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Conflict scan could not list notes: {}", e);
            return Vec::new();
        }
    };
    let mut found: Vec<String> = entries
        .into_iter()
        .filter(|entry| !entry.is_dir && is_conflict_marker(&entry.name))
        .map(|entry| entry.name)
        .collect();
    found.sort();
    found
}

/// Move a conflicted copy into the conflicts area and record it.
///
/// Returns `None` (after logging) when the name does not carry one of our ids
/// or the file cannot be moved.
pub async fn handle<F: FileSystem + ?Sized>(fs: &F, filename: &str) -> Option<ConflictInfo> {
    let Some(note_id) = extract_original_id(filename) else {
        warn!("Ignoring conflict-shaped file with foreign name: {}", filename);
        return None;
    };

    let source = paths::notes_entry(filename);
    let target = paths::conflict_entry(filename);

    let conflict_mod_time = fs.stat(&source).await.ok().map(|s| s.mtime_millis);
    let original_mod_time = fs
        .stat(&paths::note_path(&note_id))
        .await
        .ok()
        .map(|s| s.mtime_millis);

    if let Err(e) = fs.rename(&source, &target).await {
        warn!("Failed to move conflict copy {}: {}", filename, e);
        return None;
    }

    let info = ConflictInfo {
        note_id,
        conflict_path: target,
        detected_at: Utc::now(),
        original_mod_time,
        conflict_mod_time,
    };

    let mut records = list(fs).await;
    records.retain(|r| r.conflict_path != info.conflict_path);
    records.push(info.clone());
    if let Err(e) = save_records(fs, &records).await {
        warn!("Failed to record conflict {}: {}", info.conflict_path, e);
    }

    info!("Conflict detected for note {}: {}", info.note_id, filename);
    Some(info)
}

/// Settle a conflict.
///
/// With `keep_conflict_version` the conflict copy's bytes replace the live note
/// file. The copy and its record are removed either way.
pub async fn resolve<F: FileSystem + ?Sized>(
    fs: &F,
    conflict: &ConflictInfo,
    keep_conflict_version: bool,
) -> Result<(), FsError> {
    if keep_conflict_version {
        let bytes = fs.read(&conflict.conflict_path).await?;
        fs.write(&paths::note_path(&conflict.note_id), &bytes).await?;
    }

    match fs.delete(&conflict.conflict_path).await {
        Ok(()) | Err(FsError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let mut records = list(fs).await;
    records.retain(|r| r.conflict_path != conflict.conflict_path);
    save_records(fs, &records).await?;

    debug!(
        "Resolved conflict {} (kept conflict version: {})",
        conflict.conflict_path, keep_conflict_version
    );
    Ok(())
}

/// Candidate combining both versions. Not saved; the caller decides.
///
/// Bodies are concatenated under a banner, tags and reminders are unioned
/// (reminders deduplicated by trigger time), and title and color come from
/// whichever version was updated last.
pub fn merge(original: &Note, conflict: &Note) -> Note {
    let newer = if conflict.updated > original.updated {
        conflict
    } else {
        original
    };

    let mut merged = original.clone();
    merged.title = newer.title.clone();
    merged.color = newer.color.clone();
    merged.pinned = original.pinned || conflict.pinned;
    merged.encrypted = original.encrypted || conflict.encrypted;
    merged.updated = original.updated.max(conflict.updated);
    merged.content = format!(
        "{}\n\n----- conflicted copy ({}) -----\n\n{}",
        original.content,
        conflict.updated.format("%Y-%m-%d %H:%M:%S UTC"),
        conflict.content
    );
    merged.tags.extend(conflict.tags.iter().cloned());

    let mut by_time: BTreeMap<DateTime<Utc>, Reminder> = BTreeMap::new();
    for reminder in original.reminders.iter().chain(&conflict.reminders) {
        by_time
            .entry(reminder.time)
            .or_insert_with(|| reminder.clone());
    }
    merged.reminders = by_time.into_values().collect();
    merged
}

/// Recorded conflicts.
pub async fn list<F: FileSystem + ?Sized>(fs: &F) -> Vec<ConflictInfo> {
    let path = paths::conflicts_record_path();
    match fs.read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("Conflict records {} unreadable: {}", path, e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

async fn save_records<F: FileSystem + ?Sized>(
    fs: &F,
    records: &[ConflictInfo],
) -> Result<(), FsError> {
    let path = paths::conflicts_record_path();
    let temp = format!("{}.tmp", path);
    let bytes = serde_json::to_vec_pretty(records).map_err(|e| FsError::Io(e.to_string()))?;
    fs.write(&temp, &bytes).await?;
    fs.rename(&temp, &path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::note::now_millis;
    use chrono::Duration;

    const MARKED: &str = "id1 (Bob's conflicted copy 2024-01-01).md";

    #[test]
    fn test_marker_recognition() {
        assert!(is_conflict_marker(MARKED));
        assert!(is_conflict_marker("id1 (conflicted copy 2024-01-01).md"));
        assert!(is_conflict_marker("id1 (Ann Lee's Conflicted Copy 2023-12-31 (2)).md"));
        assert!(!is_conflict_marker("id1.md"));
        assert!(!is_conflict_marker("id1 (copy).md"));
        assert!(!is_conflict_marker("id1 (Bob's conflicted copy).md"));
    }

    #[test]
    fn test_extract_original_id() {
        assert_eq!(extract_original_id(MARKED).as_deref(), Some("id1"));
        assert_eq!(
            extract_original_id("Meeting notes (Bob's conflicted copy 2024-01-01).md"),
            None
        );
        assert_eq!(extract_original_id("id1.md"), None);
    }

    #[tokio::test]
    async fn test_scan_and_handle_scenario() {
        let fs = InMemoryFs::new();
        fs.write("notes/id1.md", b"---\nid: id1\n---\n\nmine").await.unwrap();
        fs.write(&format!("notes/{}", MARKED), b"---\nid: id1\n---\n\ntheirs")
            .await
            .unwrap();
        fs.set_mtime("notes/id1.md", 1_000);
        fs.set_mtime(&format!("notes/{}", MARKED), 2_000);

        assert_eq!(scan_for_conflicts(&fs).await, vec![MARKED.to_string()]);

        let info = handle(&fs, MARKED).await.unwrap();
        assert_eq!(info.note_id, "id1");
        assert_eq!(info.conflict_path, format!("conflicts/{}", MARKED));
        assert_eq!(info.original_mod_time, Some(1_000));
        assert_eq!(info.conflict_mod_time, Some(2_000));

        assert!(!fs.exists(&format!("notes/{}", MARKED)).await.unwrap());
        assert!(fs.exists(&info.conflict_path).await.unwrap());
        assert_eq!(list(&fs).await, vec![info]);
    }

    #[tokio::test]
    async fn test_handle_ignores_foreign_names() {
        let fs = InMemoryFs::new();
        let name = "Recipe ideas (Bob's conflicted copy 2024-01-01).md";
        fs.write(&format!("notes/{}", name), b"x").await.unwrap();

        assert!(handle(&fs, name).await.is_none());
        assert!(fs.exists(&format!("notes/{}", name)).await.unwrap());
        assert!(list(&fs).await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_keep_conflict_version() {
        let fs = InMemoryFs::new();
        fs.write("notes/id1.md", b"mine").await.unwrap();
        fs.write(&format!("notes/{}", MARKED), b"theirs").await.unwrap();
        let info = handle(&fs, MARKED).await.unwrap();

        resolve(&fs, &info, true).await.unwrap();

        assert_eq!(fs.read("notes/id1.md").await.unwrap(), b"theirs");
        assert!(!fs.exists(&info.conflict_path).await.unwrap());
        assert!(list(&fs).await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_discard_conflict_version() {
        let fs = InMemoryFs::new();
        fs.write("notes/id1.md", b"mine").await.unwrap();
        fs.write(&format!("notes/{}", MARKED), b"theirs").await.unwrap();
        let info = handle(&fs, MARKED).await.unwrap();

        resolve(&fs, &info, false).await.unwrap();

        assert_eq!(fs.read("notes/id1.md").await.unwrap(), b"mine");
        assert!(!fs.exists(&info.conflict_path).await.unwrap());
    }

    #[test]
    fn test_merge_unions_without_resolving() {
        let base = now_millis();
        let mut original = Note::new("id1", base);
        original.content = "mine".into();
        original.tags.insert("a".into());
        original.reminders.push(Reminder {
            id: "r1".into(),
            time: base + Duration::hours(1),
            message: None,
            acknowledged: false,
        });

        let mut conflict = original.clone();
        conflict.content = "theirs".into();
        conflict.title = "Newer title".into();
        conflict.updated = base + Duration::minutes(5);
        conflict.tags.insert("b".into());
        conflict.reminders.push(Reminder {
            id: "r2".into(),
            time: base + Duration::hours(2),
            message: Some("later".into()),
            acknowledged: false,
        });

        let merged = merge(&original, &conflict);

        assert_eq!(merged.id, "id1");
        assert!(merged.content.starts_with("mine"));
        assert!(merged.content.contains("conflicted copy"));
        assert!(merged.content.ends_with("theirs"));
        assert_eq!(merged.title, "Newer title");
        assert_eq!(merged.tags.len(), 2);
        assert_eq!(merged.reminders.len(), 2);
        assert_eq!(merged.reminders[0].id, "r1");
    }
}
