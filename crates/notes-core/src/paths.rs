//! Vault directory layout. All paths are relative to the vault root.

/// Directory holding one file per note
pub const NOTES_DIR: &str = "notes";
/// Extension of note files, locally and remotely
pub const NOTE_EXTENSION: &str = "md";
/// Index document inside the notes directory
pub const INDEX_FILE_NAME: &str = ".index.json";
/// Sibling directory holding relocated conflict copies
pub const CONFLICTS_DIR: &str = "conflicts";
/// Conflict record document inside the conflicts directory
pub const CONFLICTS_FILE_NAME: &str = "conflicts.json";

pub fn note_path(id: &str) -> String {
    format!("{}/{}.{}", NOTES_DIR, id, NOTE_EXTENSION)
}

pub fn notes_entry(name: &str) -> String {
    format!("{}/{}", NOTES_DIR, name)
}

pub fn index_path() -> String {
    notes_entry(INDEX_FILE_NAME)
}

pub fn conflict_entry(name: &str) -> String {
    format!("{}/{}", CONFLICTS_DIR, name)
}

pub fn conflicts_record_path() -> String {
    conflict_entry(CONFLICTS_FILE_NAME)
}

/// Note id for a plain note file name (`<id>.md`), `None` for anything else.
pub fn id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(NOTE_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem)
}
