//! Reference-library metadata store backing recommendations.
//!
//! The [`ReferenceLibrary`] trait abstracts the topic-indexed metadata
//! lookup so deployments can plug in an institutional catalog; the bundled
//! implementation is an in-memory table loaded from a JSON file.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::SourceKind;

/// One reference-library entry (metadata only; no full text here).
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryEntry {
    pub title: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Publication date used for recency ranking.
    pub published: NaiveDate,
}

/// Topic-indexed reference-library metadata store.
///
/// Failures here must never fail an analysis; the recommendation generator
/// degrades to an empty list.
#[async_trait]
pub trait ReferenceLibrary: Send + Sync {
    /// All entries sharing at least one of the given topics.
    async fn by_topics(&self, topics: &[String]) -> Result<Vec<LibraryEntry>>;
}

/// In-memory library backed by a JSON metadata file.
pub struct InMemoryLibrary {
    entries: Vec<LibraryEntry>,
}

impl InMemoryLibrary {
    pub fn new(entries: Vec<LibraryEntry>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<LibraryEntry> = serde_json::from_str(&content)?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReferenceLibrary for InMemoryLibrary {
    async fn by_topics(&self, topics: &[String]) -> Result<Vec<LibraryEntry>> {
        let matches = self
            .entries
            .iter()
            .filter(|e| {
                e.topics
                    .iter()
                    .any(|t| topics.iter().any(|q| q.eq_ignore_ascii_case(t)))
            })
            .cloned()
            .collect();
        Ok(matches)
    }
}
