//! Denormalized index of note metadata.
//!
//! The index lets callers list and sort notes without parsing every note body.
//! It is a cache: [`rebuild`] derives it from the note set at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::codec;
use crate::fs::{FileSystem, FsError};
use crate::note::Note;
use crate::paths;

/// Current on-disk index format.
pub const INDEX_VERSION: u32 = 2;

/// Per-note projection used for listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexEntry {
    pub order: i64,
    pub pinned: bool,
    pub color: String,
    pub title: String,
    pub updated: DateTime<Utc>,
}

impl IndexEntry {
    fn project(note: &Note, order: i64) -> Self {
        Self {
            order,
            pinned: note.pinned,
            color: note.color.clone(),
            title: note.title.clone(),
            updated: note.updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultIndex {
    /// Missing in very old documents, which reads as 0 and forces a restamp
    #[serde(default)]
    pub version: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub notes: BTreeMap<String, IndexEntry>,
    /// Tombstones, in deletion order. Append-only.
    pub deleted_notes: Vec<String>,
    pub tags: BTreeSet<String>,
}

impl Default for VaultIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            last_sync: None,
            notes: BTreeMap::new(),
            deleted_notes: Vec::new(),
            tags: BTreeSet::new(),
        }
    }
}

impl VaultIndex {
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.deleted_notes.iter().any(|d| d == id)
    }
}

/// Load the index, falling back to an empty one.
///
/// Unknown future fields are ignored and missing fields take defaults. An
/// unreadable document is logged and replaced by an empty index so the vault
/// can rebuild it from the note files.
pub async fn load<F: FileSystem + ?Sized>(fs: &F) -> VaultIndex {
    let path = paths::index_path();
    let bytes = match fs.read(&path).await {
        Ok(bytes) => bytes,
        Err(FsError::NotFound(_)) => return VaultIndex::default(),
        Err(e) => {
            warn!("Failed to read index {}: {}", path, e);
            return VaultIndex::default();
        }
    };

    let mut index: VaultIndex = match serde_json::from_slice(&bytes) {
        Ok(index) => index,
        Err(e) => {
            warn!("Index {} is corrupt, starting empty: {}", path, e);
            return VaultIndex::default();
        }
    };

    if index.version != INDEX_VERSION {
        info!(
            "Index version {} differs from {}, merging defaults",
            index.version, INDEX_VERSION
        );
        index.version = INDEX_VERSION;
    }
    index
}

/// Write the index atomically: temp file, then rename over the target.
pub async fn save<F: FileSystem + ?Sized>(fs: &F, index: &VaultIndex) -> Result<(), FsError> {
    let path = paths::index_path();
    let temp = format!("{}.tmp", path);
    let bytes = serde_json::to_vec_pretty(index).map_err(|e| FsError::Io(e.to_string()))?;
    fs.write(&temp, &bytes).await?;
    fs.rename(&temp, &path).await
}

/// Insert or refresh a note's entry.
///
/// New notes are appended after the current maximum order; existing notes
/// keep their position.
pub fn upsert(index: &mut VaultIndex, note: &Note) {
    let order = match index.notes.get(&note.id) {
        Some(existing) => existing.order,
        None => next_order(index),
    };
    index
        .notes
        .insert(note.id.clone(), IndexEntry::project(note, order));
    index.tags.extend(note.tags.iter().cloned());
}

/// Assign orders following `ids`. Unknown ids are ignored; notes not listed
/// are placed after the listed ones, keeping their relative order.
pub fn reorder(index: &mut VaultIndex, ids: &[String]) {
    let listed: Vec<&String> = ids.iter().filter(|id| index.notes.contains_key(*id)).collect();
    let rest: Vec<String> = sorted_view(index)
        .into_iter()
        .map(|(id, _)| id.to_string())
        .filter(|id| !listed.contains(&id))
        .collect();

    let ordered: Vec<String> = listed.into_iter().cloned().chain(rest).collect();
    for (position, id) in ordered.iter().enumerate() {
        if let Some(entry) = index.notes.get_mut(id) {
            entry.order = position as i64;
        }
    }
}

/// Remove a note's entry, optionally recording a tombstone.
pub fn remove(index: &mut VaultIndex, id: &str, track_deletion: bool) {
    index.notes.remove(id);
    if track_deletion && !index.is_tombstoned(id) {
        index.deleted_notes.push(id.to_string());
    }
}

/// Entries in display order: pinned first, then by `order`.
pub fn sorted_view(index: &VaultIndex) -> Vec<(&str, &IndexEntry)> {
    let mut entries: Vec<(&str, &IndexEntry)> = index
        .notes
        .iter()
        .map(|(id, entry)| (id.as_str(), entry))
        .collect();
    entries.sort_by(|(a_id, a), (b_id, b)| {
        b.pinned
            .cmp(&a.pinned)
            .then(a.order.cmp(&b.order))
            .then(a_id.cmp(b_id))
    });
    entries
}

/// Derive a fresh index from the authoritative note set.
///
/// Pinned notes get a negative order range so they sort first; each group is
/// ordered by most recently updated. Orders are then normalized to `0..n`
/// matching the sorted position. Tombstones and `last_sync` are not derivable
/// from notes and start empty.
pub fn rebuild(notes: &[Note]) -> VaultIndex {
    let mut pinned: Vec<&Note> = notes.iter().filter(|n| n.pinned).collect();
    let mut unpinned: Vec<&Note> = notes.iter().filter(|n| !n.pinned).collect();
    let recent_first = |a: &&Note, b: &&Note| b.updated.cmp(&a.updated).then(a.id.cmp(&b.id));
    pinned.sort_by(recent_first);
    unpinned.sort_by(recent_first);

    let mut index = VaultIndex::default();
    let pinned_count = pinned.len() as i64;
    for (i, note) in pinned.iter().enumerate() {
        index
            .notes
            .insert(note.id.clone(), IndexEntry::project(note, i as i64 - pinned_count));
    }
    for (i, note) in unpinned.iter().enumerate() {
        index
            .notes
            .insert(note.id.clone(), IndexEntry::project(note, i as i64));
    }

    let dense: Vec<String> = sorted_view(&index)
        .into_iter()
        .map(|(id, _)| id.to_string())
        .collect();
    for (position, id) in dense.iter().enumerate() {
        if let Some(entry) = index.notes.get_mut(id) {
            entry.order = position as i64;
        }
    }

    index.tags = codec::collect_tags(notes.iter());
    index
}

fn next_order(index: &VaultIndex) -> i64 {
    index
        .notes
        .values()
        .map(|entry| entry.order)
        .max()
        .map_or(0, |max| max + 1)
}
