//! Corpus index: fingerprinted reference text behind an atomic snapshot.
//!
//! The corpus is written by an out-of-band ingestion process and read-only
//! here. Each load builds an immutable [`CorpusSnapshot`]; installing a new
//! snapshot swaps a pointer, so an in-flight match always sees one
//! consistent snapshot end-to-end while any number of concurrent readers
//! proceed without writer interference.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};
use crate::ingest;
use crate::models::SourceKind;

/// A reference source as defined in the corpus file.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusSourceDef {
    pub source_id: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub topics: Vec<String>,
    pub text: String,
}

/// One fingerprinted corpus entry inside a snapshot.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub source_id: String,
    pub kind: SourceKind,
    pub topics: Vec<String>,
    pub fingerprints: HashSet<u64>,
    pub shingle_count: usize,
}

/// Immutable, fully-built index over a set of corpus entries.
pub struct CorpusSnapshot {
    entries: Vec<CorpusEntry>,
    inverted: HashMap<u64, Vec<usize>>,
}

impl CorpusSnapshot {
    /// Build a snapshot from source definitions, shingling each source with
    /// the same tokenizer and shingle length the similarity engine uses.
    pub fn build(mut defs: Vec<CorpusSourceDef>, cfg: &AnalysisConfig) -> Self {
        // Entry order is part of the deterministic output contract.
        defs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        defs.dedup_by(|a, b| a.source_id == b.source_id);

        let mut entries = Vec::with_capacity(defs.len());
        let mut inverted: HashMap<u64, Vec<usize>> = HashMap::new();

        for def in defs {
            let text = ingest::normalize(&def.text);
            let prints = shingle_fingerprints(&text.tokens, cfg.shingle_len);
            let shingle_count = prints.len();
            let fingerprints: HashSet<u64> = prints.into_iter().collect();

            let idx = entries.len();
            for fp in &fingerprints {
                inverted.entry(*fp).or_default().push(idx);
            }
            entries.push(CorpusEntry {
                source_id: def.source_id,
                kind: def.kind,
                topics: def.topics,
                fingerprints,
                shingle_count,
            });
        }

        Self { entries, inverted }
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> &CorpusEntry {
        &self.entries[idx]
    }

    pub fn get(&self, source_id: &str) -> Option<&CorpusEntry> {
        self.entries.iter().find(|e| e.source_id == source_id)
    }

    /// Entry indices holding the given fingerprint.
    pub fn candidates(&self, fingerprint: u64) -> &[usize] {
        self.inverted
            .get(&fingerprint)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared handle to the current corpus snapshot.
///
/// Until a snapshot is installed the index is unavailable and every match
/// fails with [`EngineError::IndexUnavailable`] — no silent degradation to a
/// smaller search scope.
pub struct CorpusIndex {
    current: RwLock<Option<Arc<CorpusSnapshot>>>,
}

impl CorpusIndex {
    pub fn empty() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    pub fn with_snapshot(snapshot: CorpusSnapshot) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Atomically replace the snapshot read by new jobs. In-flight matches
    /// keep their `Arc` to the previous snapshot.
    pub fn install(&self, snapshot: CorpusSnapshot) {
        let mut guard = self.current.write().unwrap();
        *guard = Some(Arc::new(snapshot));
    }

    /// Clone the current snapshot pointer for one end-to-end match.
    pub fn snapshot(&self) -> Result<Arc<CorpusSnapshot>> {
        let guard = self.current.read().unwrap();
        guard.clone().ok_or(EngineError::IndexUnavailable)
    }

    pub fn is_available(&self) -> bool {
        self.current.read().unwrap().is_some()
    }
}

/// Load corpus source definitions from a JSON file.
pub fn load_corpus_file(path: &Path) -> Result<Vec<CorpusSourceDef>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Internal(format!("failed to read corpus file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        EngineError::Internal(format!(
            "failed to parse corpus file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Fingerprint of one shingle: first 8 bytes of the SHA-256 over the
/// case-folded tokens, separated by a byte that cannot appear inside a
/// token.
pub fn fingerprint_shingle(tokens: &[String]) -> u64 {
    let mut hasher = Sha256::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(token.to_lowercase().as_bytes());
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Fingerprints for every overlapping shingle of `len` tokens, in document
/// order. Empty when the text is shorter than one shingle.
pub fn shingle_fingerprints(tokens: &[String], len: usize) -> Vec<u64> {
    if tokens.len() < len {
        return Vec::new();
    }
    (0..=tokens.len() - len)
        .map(|i| fingerprint_shingle(&tokens[i..i + len]))
        .collect()
}
