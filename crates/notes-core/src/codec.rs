//! Note file parsing and serialization.
//!
//! A note file is a metadata block of `key: value` lines between two `---`
//! separator lines, followed by a blank line and the free-text body:
//!
//! ```text
//! ---
//! id: 3f0c…
//! title: Groceries
//! created: 2024-01-01T09:30:00.000Z
//! updated: 2024-01-02T10:00:00.000Z
//! pinned: false
//! color: #FFE066
//! tags: ["home", "errands"]
//! ---
//!
//! - [ ] milk
//! ```
//!
//! Parsing is lenient: any missing or malformed field falls back to a default.
//! Only a blob without a metadata block is rejected.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::note::{now_millis, palette, Note, Reminder, DEFAULT_TITLE};

const SEPARATOR: &str = "---";

static CHECKBOX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*[-*+]\s+\[)([ xX])(\].*)$").expect("valid checkbox regex"));

/// Parse a raw note file.
///
/// `file_id` is the identifier derived from the file name; it is used when the
/// metadata block carries no `id`.
pub fn parse(raw: &str, file_id: Option<&str>) -> Option<Note> {
    let (meta, body) = split_blocks(raw)?;
    let now = now_millis();

    let mut id = None;
    let mut note = Note::new(String::new(), now);

    for line in meta.lines() {
        let Some((key, raw_value)) = line.split_once(':') else {
            continue;
        };
        let value = raw_value.trim();
        match key.trim() {
            "id" if !value.is_empty() => id = Some(value.to_string()),
            // Verbatim after the separator space, so titles round-trip
            "title" => note.title = raw_value.strip_prefix(' ').unwrap_or(raw_value).to_string(),
            "created" => note.created = parse_timestamp(value).unwrap_or(now),
            "updated" => note.updated = parse_timestamp(value).unwrap_or(now),
            "pinned" => note.pinned = parse_bool(value),
            "encrypted" => note.encrypted = parse_bool(value),
            "color" if !value.is_empty() => note.color = value.to_string(),
            "tags" => note.tags = parse_string_list(value).into_iter().collect(),
            "reminders" => {
                note.reminders = serde_json::from_str::<Vec<Reminder>>(value).unwrap_or_default()
            }
            _ => {}
        }
    }

    note.id = id
        .or_else(|| file_id.map(str::to_string))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    note.content = body.to_string();
    Some(note)
}

/// Serialize a note, stamping `updated` with the current time.
pub fn serialize(note: &Note) -> String {
    serialize_stamped(note).0
}

/// Serialize a note and return the `updated` stamp written to the file.
pub fn serialize_stamped(note: &Note) -> (String, DateTime<Utc>) {
    let stamp = now_millis();
    (serialize_at(note, stamp), stamp)
}

/// Deterministic serialization with an explicit `updated` value.
pub fn serialize_at(note: &Note, updated: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(note.content.len() + 256);
    out.push_str(SEPARATOR);
    out.push('\n');
    let _ = writeln!(out, "id: {}", single_line(&note.id));
    let _ = writeln!(out, "title: {}", single_line(&note.title));
    let _ = writeln!(out, "created: {}", format_timestamp(note.created));
    let _ = writeln!(out, "updated: {}", format_timestamp(updated));
    let _ = writeln!(out, "pinned: {}", note.pinned);
    let _ = writeln!(out, "color: {}", single_line(&note.color));
    let _ = writeln!(out, "tags: {}", format_string_list(note.tags.iter()));
    if note.encrypted {
        out.push_str("encrypted: true\n");
    }
    if !note.reminders.is_empty() {
        let reminders = serde_json::to_string(&note.reminders).unwrap_or_else(|_| "[]".into());
        let _ = writeln!(out, "reminders: {}", reminders);
    }
    out.push_str(SEPARATOR);
    out.push_str("\n\n");
    out.push_str(&note.content);
    out
}

/// The byte-stable form of a note: serialized with its own `updated` value.
///
/// Used for content hashing and as the upload body, so equal hashes mean
/// byte-identical remote objects.
pub fn canonical(note: &Note) -> String {
    serialize_at(note, note.updated)
}

/// Flip the checkbox marker on `line_index` of `content`.
///
/// Returns `None` when the line does not exist or is not a checkbox item.
pub fn toggle_checkbox(content: &str, line_index: usize) -> Option<String> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let line = lines.get_mut(line_index)?;
    let caps = CHECKBOX.captures(line)?;
    let marker = if &caps[2] == " " { "x" } else { " " };
    *line = format!("{}{}{}", &caps[1], marker, &caps[3]);
    Some(lines.join("\n"))
}

/// Split a raw file into (metadata, body). `None` if there is no metadata block.
fn split_blocks(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let rest = raw
        .strip_prefix("---\r\n")
        .or_else(|| raw.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == SEPARATOR {
            let meta = &rest[..offset];
            let mut body = &rest[offset + line.len()..];
            // One blank line separates the block from the body
            body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return Some((meta, body));
        }
        offset += line.len();
    }
    None
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn parse_bool(value: &str) -> bool {
    value == "true"
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim_matches('"');
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn format_string_list<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let quoted: Vec<String> = items
        .map(|item| serde_json::to_string(item).unwrap_or_else(|_| "\"\"".into()))
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Parse `["a", "b"]`, tolerating single quotes and bare words.
fn parse_string_list(value: &str) -> Vec<String> {
    if let Ok(items) = serde_json::from_str::<Vec<String>>(value) {
        return items;
    }
    let inner = value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|item| item.trim().trim_matches(['"', '\'']).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Unique tags across `notes`.
pub fn collect_tags<'a>(notes: impl Iterator<Item = &'a Note>) -> BTreeSet<String> {
    notes.flat_map(|note| note.tags.iter().cloned()).collect()
}

/// Default title for callers that need to display an untitled note.
pub fn display_title(note: &Note) -> &str {
    if note.title.trim().is_empty() {
        DEFAULT_TITLE
    } else {
        &note.title
    }
}
