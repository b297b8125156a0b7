//! Per-uri diagnostics store.
//!
//! Each publish from the server fully replaces the prior set for that uri;
//! an empty set removes the entry.

use std::collections::HashMap;

use crate::types::Diagnostic;

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, uri: String, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
        self.data.get(uri).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[cfg(test)]
    pub fn uri_count(&self) -> usize {
        self.data.len()
    }
}
