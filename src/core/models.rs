//! Core data models for translation

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// One audio file's source name and its (possibly empty) translation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub original: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub translation: String,
}

/// A `null` field reads as an empty string
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl MappingEntry {
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            translation: String::new(),
        }
    }

    /// Entry still waiting for a translation
    pub fn is_pending(&self) -> bool {
        self.translation.is_empty() && !self.original.is_empty()
    }
}

/// id -> entry, as stored in mapping.json
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping {
    entries: BTreeMap<String, MappingEntry>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: MappingEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&MappingEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingEntry)> {
        self.entries.iter()
    }

    /// Number of entries that already carry a translation
    pub fn translated_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.translation.trim().is_empty())
            .count()
    }

    /// Merge translated names into the mapping.
    ///
    /// Only ids already present are updated; everything else is reported
    /// back as unmatched so the caller can log it.
    pub fn apply_translations(&mut self, translations: &serde_json::Map<String, serde_json::Value>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (id, value) in translations {
            let Some(text) = value.as_str() else {
                warn!("Translation for {} is not a string: {}", id, value);
                report.invalid.push(id.clone());
                continue;
            };

            match self.entries.get_mut(id) {
                Some(entry) => {
                    debug!("Updated translation: {} -> {}", id, text);
                    entry.translation = text.to_string();
                    report.updated += 1;
                }
                None => {
                    warn!("Entry {} does not exist in mapping", id);
                    report.unmatched.push(id.clone());
                }
            }
        }

        report
    }
}

impl FromIterator<(String, MappingEntry)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, MappingEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Outcome of merging one result object into the mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub updated: usize,
    pub unmatched: Vec<String>,
    pub invalid: Vec<String>,
}

impl ReconcileReport {
    pub fn absorb(&mut self, other: ReconcileReport) {
        self.updated += other.updated;
        self.unmatched.extend(other.unmatched);
        self.invalid.extend(other.invalid);
    }
}

/// One entry scheduled for translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    #[serde(rename = "text")]
    pub original: String,
}

/// Entries translated together so they share terminology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn new(items: Vec<BatchItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.id.as_str())
    }

    /// Short label for progress output: the first underscore segment
    pub fn label(&self) -> &str {
        self.items
            .first()
            .map(|i| i.original.split('_').next().unwrap_or(""))
            .unwrap_or("")
    }
}

/// Row of group.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub ids: Vec<String>,
    pub originals: Vec<String>,
}

impl From<&Batch> for GroupRecord {
    fn from(batch: &Batch) -> Self {
        Self {
            ids: batch.items.iter().map(|i| i.id.clone()).collect(),
            originals: batch.items.iter().map(|i| i.original.clone()).collect(),
        }
    }
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat completion message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Advisory token cost of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenEstimate {
    pub input_tokens: usize,
    pub estimated_output_tokens: usize,
    pub total: usize,
}

impl std::ops::AddAssign for TokenEstimate {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.estimated_output_tokens += rhs.estimated_output_tokens;
        self.total += rhs.total;
    }
}
