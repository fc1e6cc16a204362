//! In-memory [`Store`] implementation.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. This is the
//! production store for the in-process engine; durable backends plug in
//! behind the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{AnalysisResult, Document};

use super::Store;

type RevisionKey = (Uuid, u32);

/// In-memory document and result store.
pub struct InMemoryStore {
    documents: RwLock<HashMap<RevisionKey, Document>>,
    results: RwLock<HashMap<RevisionKey, AnalysisResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_document(&self, doc: Document) -> Result<()> {
        let key = (doc.submission_id, doc.revision);
        let mut docs = self.documents.write().unwrap();
        if docs.contains_key(&key) {
            return Err(EngineError::Internal(format!(
                "document revision {} already stored for submission {}",
                doc.revision, doc.submission_id
            )));
        }
        docs.insert(key, doc);
        Ok(())
    }

    async fn get_document(&self, submission_id: Uuid, revision: u32) -> Result<Option<Document>> {
        let docs = self.documents.read().unwrap();
        Ok(docs.get(&(submission_id, revision)).cloned())
    }

    async fn put_result(&self, result: AnalysisResult) -> Result<()> {
        let key = (result.submission_id, result.revision);
        let mut results = self.results.write().unwrap();
        if results.contains_key(&key) {
            return Err(EngineError::Internal(format!(
                "analysis result for revision {} of submission {} already stored",
                result.revision, result.submission_id
            )));
        }
        results.insert(key, result);
        Ok(())
    }

    async fn get_result(
        &self,
        submission_id: Uuid,
        revision: u32,
    ) -> Result<Option<AnalysisResult>> {
        let results = self.results.read().unwrap();
        Ok(results.get(&(submission_id, revision)).cloned())
    }

    async fn list_results(&self, submission_id: Uuid) -> Result<Vec<AnalysisResult>> {
        let results = self.results.read().unwrap();
        let mut out: Vec<AnalysisResult> = results
            .iter()
            .filter(|((sid, _), _)| *sid == submission_id)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by_key(|r| r.revision);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentFormat, NormalizedText};
    use chrono::Utc;

    fn doc(submission_id: Uuid, revision: u32) -> Document {
        Document {
            id: Uuid::new_v4(),
            submission_id,
            revision,
            format: DocumentFormat::Text,
            content: b"essay text".to_vec(),
            text: NormalizedText {
                text: "essay text".to_string(),
                tokens: vec!["essay".to_string(), "text".to_string()],
            },
            ingested_at: Utc::now(),
        }
    }

    fn result(submission_id: Uuid, revision: u32, overall: f64) -> AnalysisResult {
        AnalysisResult {
            submission_id,
            document_id: Uuid::new_v4(),
            revision,
            overall,
            flagged: overall > 15.0,
            spans: Vec::new(),
            recommendations: Vec::new(),
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn documents_are_write_once_per_revision() {
        let store = InMemoryStore::new();
        let sid = Uuid::new_v4();
        store.put_document(doc(sid, 1)).await.unwrap();
        assert!(store.put_document(doc(sid, 1)).await.is_err());
        store.put_document(doc(sid, 2)).await.unwrap();
        assert!(store.get_document(sid, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn results_are_append_only() {
        let store = InMemoryStore::new();
        let sid = Uuid::new_v4();
        store.put_result(result(sid, 1, 22.0)).await.unwrap();
        assert!(
            store.put_result(result(sid, 1, 5.0)).await.is_err(),
            "a prior revision's result must never be overwritten"
        );

        store.put_result(result(sid, 2, 5.0)).await.unwrap();
        let first = store.get_result(sid, 1).await.unwrap().unwrap();
        assert!((first.overall - 22.0).abs() < 1e-9);

        let all = store.list_results(sid).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].revision, 1);
        assert_eq!(all[1].revision, 2);
    }
}
