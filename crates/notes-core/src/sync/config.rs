//! Tunables for a sync pass.

use chrono::Duration;

use crate::paths::NOTE_EXTENSION;

/// Remote folder used when none is configured.
pub const DEFAULT_REMOTE_FOLDER: &str = "/Notes";

/// Where notes live remotely and how timestamps are compared.
///
/// Two edits on different devices that land within `tolerance` of each other
/// are resolved arbitrarily: whichever side the comparison favors wins.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote folder holding one file per note
    pub folder: String,
    /// Extension of remote note files
    pub extension: String,
    /// Minimum timestamp gap before one side counts as newer
    pub tolerance: Duration,
    /// Minimum age before a note missing remotely counts as deleted there
    pub grace: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folder: DEFAULT_REMOTE_FOLDER.to_string(),
            extension: NOTE_EXTENSION.to_string(),
            tolerance: Duration::seconds(2),
            grace: Duration::seconds(30),
        }
    }
}

impl SyncConfig {
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Remote path of a note.
    pub fn note_path(&self, id: &str) -> String {
        crate::remote::join(&self.folder, &format!("{}.{}", id, self.extension))
    }

    /// Note id of a remote file name, `None` for anything else.
    pub fn id_for(&self, name: &str) -> Option<String> {
        let stem = name.strip_suffix(&self.extension)?.strip_suffix('.')?;
        crate::conflict::is_valid_id(stem).then(|| stem.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_names() {
        let config = SyncConfig::default();
        assert_eq!(config.note_path("abc"), "/Notes/abc.md");
        assert_eq!(config.id_for("abc.md"), Some("abc".to_string()));
        assert_eq!(config.id_for("abc.txt"), None);
        assert_eq!(config.id_for("a b.md"), None);
    }
}
