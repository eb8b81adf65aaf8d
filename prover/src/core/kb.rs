//! Run-scoped knowledge base with last-writer-wins overwrite semantics.
//!
//! Entries are kept in first-seen order. Overwriting an id replaces the entry
//! in place, so the rendered appendix never reorders facts that were refined.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::limits::{KB_MAX_FIELD_CHARS, KB_PROMPT_MAX_CONTENT_CHARS};
use crate::core::text::{clip, normalize_block};
use crate::core::types::{KbEntry, KbKind};

/// How a single entry write was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KbWriteOutcome {
    Inserted,
    Overwrote,
    /// Entry had an empty id after trimming and was dropped.
    Rejected,
}

/// Per-entry record of a `write` call, in write order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KbWriteRecord {
    pub id: String,
    pub kind: KbKind,
    pub outcome: KbWriteOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KbEntry>,
    index: HashMap<String, usize>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&KbEntry> {
        self.index.get(id.trim()).map(|&slot| &self.entries[slot])
    }

    /// Apply entries in order. An existing id is overwritten in its original slot.
    pub fn write(&mut self, entries: impl IntoIterator<Item = KbEntry>) -> Vec<KbWriteRecord> {
        entries
            .into_iter()
            .map(|entry| self.insert(entry))
            .collect()
    }

    fn insert(&mut self, entry: KbEntry) -> KbWriteRecord {
        let entry = normalize_entry(entry);
        let mut record = KbWriteRecord {
            id: entry.id.clone(),
            kind: entry.kind,
            outcome: KbWriteOutcome::Inserted,
        };
        if entry.id.is_empty() {
            record.outcome = KbWriteOutcome::Rejected;
            return record;
        }
        match self.index.get(&entry.id) {
            Some(&slot) => {
                self.entries[slot] = entry;
                record.outcome = KbWriteOutcome::Overwrote;
            }
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        record
    }

    /// Immutable copy of the current contents.
    pub fn read_snapshot(&self) -> KbSnapshot {
        KbSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Bullet list of all entries in first-seen order; empty when the KB is empty.
    pub fn render_appendix(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("- **{} ({})**: {}", entry.id, entry.kind, entry.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Value copy of the KB taken when a node becomes active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KbSnapshot {
    entries: Vec<KbEntry>,
}

impl KbSnapshot {
    pub fn entries(&self) -> &[KbEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&KbEntry> {
        self.entries.iter().find(|entry| entry.id == id.trim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compact prompt rendering: one header line per entry plus clipped content.
    pub fn render_prompt(&self) -> String {
        if self.entries.is_empty() {
            return "None.".to_string();
        }
        let mut lines = Vec::with_capacity(self.entries.len() * 2);
        for entry in &self.entries {
            lines.push(format!("- [{}] {}: {}", entry.kind, entry.id, entry.title));
            let content = clip(&entry.content.replace('\n', " "), KB_PROMPT_MAX_CONTENT_CHARS);
            if !content.is_empty() && content != entry.title.trim() {
                lines.push(format!("  {content}"));
            }
        }
        lines.join("\n")
    }
}

fn normalize_entry(entry: KbEntry) -> KbEntry {
    KbEntry {
        id: entry.id.trim().to_string(),
        kind: entry.kind,
        title: entry.title.trim().to_string(),
        content: normalize_block(&entry.content, KB_MAX_FIELD_CHARS),
        tags: entry
            .tags
            .iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        sources: entry
            .sources
            .iter()
            .map(|source| source.trim().to_string())
            .collect(),
    }
}
