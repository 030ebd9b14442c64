//! Note data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Title used when a note file carries none.
pub const DEFAULT_TITLE: &str = "Untitled";

/// A single reminder attached to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub acknowledged: bool,
}

/// The unit of storage: one note, one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub color: String,
    pub pinned: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub reminders: Vec<Reminder>,
    pub encrypted: bool,
}

impl Note {
    /// A fresh note with default fields and the given id.
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            content: String::new(),
            color: palette::DEFAULT_COLOR.to_string(),
            pinned: false,
            created: now,
            updated: now,
            tags: BTreeSet::new(),
            reminders: Vec::new(),
            encrypted: false,
        }
    }

    /// Apply a partial update. `id` and `created` are not patchable.
    pub fn apply(&mut self, patch: NotePatch) {
        if let Some(title) = patch.title {
            self.title = normalize_title(&title);
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(color) = patch.color {
            self.color = palette::resolve_color(&color);
        }
        if let Some(pinned) = patch.pinned {
            self.pinned = pinned;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(reminders) = patch.reminders {
            self.reminders = reminders;
        }
        if let Some(encrypted) = patch.encrypted {
            self.encrypted = encrypted;
        }
    }

    /// Advance `updated` to `now`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated = next_stamp(self.updated, now);
    }
}

/// Titles are stored on one line; a blank one becomes [`DEFAULT_TITLE`].
pub fn normalize_title(title: &str) -> String {
    if title.trim().is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title.replace("\r\n", " ").replace(['\r', '\n'], " ")
    }
}

/// Returns a timestamp strictly after `previous` and no earlier than `now`.
pub fn next_stamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    if now > floor { now } else { floor }
}

/// Current time truncated to millisecond precision (the on-disk resolution).
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Partial note fields for create and update operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub color: Option<String>,
    pub pinned: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    pub reminders: Option<Vec<Reminder>>,
    pub encrypted: Option<bool>,
}

impl NotePatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// Fixed color palette. Notes may also carry arbitrary color values.
pub mod palette {
    pub const DEFAULT_COLOR: &str = "#FFE066";

    pub const COLORS: &[(&str, &str)] = &[
        ("yellow", "#FFE066"),
        ("pink", "#FFB3C7"),
        ("green", "#B5E8A3"),
        ("blue", "#A8D8FF"),
        ("purple", "#D4B8FF"),
        ("orange", "#FFC98B"),
        ("gray", "#E0E0E0"),
    ];

    /// Map a palette name to its hex value; other values pass through.
    pub fn resolve_color(value: &str) -> String {
        let trimmed = value.trim();
        COLORS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
            .map(|(_, hex)| hex.to_string())
            .unwrap_or_else(|| trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_titles_are_single_line() {
        let mut note = Note::new("n1", now_millis());
        note.apply(NotePatch::default().title("two\r\nlines\nhere"));
        assert_eq!(note.title, "two lines here");
        note.apply(NotePatch::default().title("   "));
        assert_eq!(note.title, DEFAULT_TITLE);
        note.apply(NotePatch::default().title(" padded "));
        assert_eq!(note.title, " padded ");
    }

    #[test]
    fn test_patch_cannot_touch_identity() {
        let now = now_millis();
        let mut note = Note::new("n1", now);
        note.apply(NotePatch::default().title("Groceries").pinned(true));

        assert_eq!(note.id, "n1");
        assert_eq!(note.created, now);
        assert_eq!(note.title, "Groceries");
        assert!(note.pinned);
    }

    #[test]
    fn test_touch_never_goes_backwards() {
        let now = now_millis();
        let mut note = Note::new("n1", now);
        note.touch(now - Duration::seconds(10));
        assert!(note.updated > now);
    }

    #[test]
    fn test_palette_names_resolve() {
        assert_eq!(palette::resolve_color("Blue"), "#A8D8FF");
        assert_eq!(palette::resolve_color("#123456"), "#123456");
    }
}
