//! Open-document registry and incremental text deltas.
//!
//! Documents are keyed by a normalized path spelling so `src\main.ino`,
//! `src/main.ino`, and a re-cased drive letter all resolve to one entry.
//! Versions start at 0 on open and increase by exactly 1 per content update
//! that actually changes the text.

use std::collections::HashMap;

use crate::types::{Position, Range};

/// All sketch sources, C/C++ sources and headers, and anything else the
/// editor opens are routed to the single C/C++ language server.
pub(crate) const LANGUAGE_ID: &str = "cpp";

#[derive(Debug)]
pub(crate) struct OpenDocument {
    pub uri: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Default)]
pub(crate) struct DocumentRegistry {
    docs: HashMap<String, OpenDocument>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.docs.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&OpenDocument> {
        self.docs.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut OpenDocument> {
        self.docs.get_mut(key)
    }

    pub fn insert(&mut self, key: String, doc: OpenDocument) {
        self.docs.insert(key, doc);
    }

    pub fn remove(&mut self, key: &str) -> Option<OpenDocument> {
        self.docs.remove(key)
    }

    /// Drain every entry, in no particular order. Used on disconnect to send
    /// the corresponding close notifications.
    pub fn drain(&mut self) -> Vec<OpenDocument> {
        self.docs.drain().map(|(_, doc)| doc).collect()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }
}

/// Normalize a path spelling into the registry key.
///
/// Backslashes fold to forward slashes; a leading drive letter is lowercased.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_uppercase() {
        let drive = (bytes[0].to_ascii_lowercase() as char).to_string();
        normalized.replace_range(0..1, &drive);
    }
    normalized
}

/// Document uri for a (possibly project-relative) normalized path.
pub(crate) fn path_to_uri(normalized: &str) -> String {
    format!("file://{normalized}")
}

/// Minimal replacement turning one text into another: a single range in the
/// old text plus the text to put there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TextDelta {
    pub range: Range,
    pub text: String,
}

/// Compute the minimal single-range delta between two texts.
///
/// Advances a start cursor while characters match at the front, retreats an
/// end cursor while they match at the back, bounded so the cursors never
/// cross. Returns `None` when the texts are equal.
pub(crate) fn compute_delta(old: &str, new: &str) -> Option<TextDelta> {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let max_prefix = old_chars.len().min(new_chars.len());
    let mut prefix = 0;
    while prefix < max_prefix && old_chars[prefix] == new_chars[prefix] {
        prefix += 1;
    }

    if prefix == old_chars.len() && prefix == new_chars.len() {
        return None;
    }

    let max_suffix = max_prefix - prefix;
    let mut suffix = 0;
    while suffix < max_suffix
        && old_chars[old_chars.len() - 1 - suffix] == new_chars[new_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let range = Range {
        start: position_at(&old_chars, prefix),
        end: position_at(&old_chars, old_chars.len() - suffix),
    };
    let text = new_chars[prefix..new_chars.len() - suffix]
        .iter()
        .collect();

    Some(TextDelta { range, text })
}

/// Zero-based line/character position of a character offset.
fn position_at(chars: &[char], offset: usize) -> Position {
    let mut line = 0u32;
    let mut character = 0u32;
    for &c in &chars[..offset] {
        if c == '\n' {
            line += 1;
            character = 0;
        } else {
            character += 1;
        }
    }
    Position { line, character }
}
