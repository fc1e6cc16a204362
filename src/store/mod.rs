//! Storage abstraction for documents and analysis results.
//!
//! The [`Store`] trait defines the persistence seam for the analysis
//! pipeline, enabling pluggable backends. Results are append-only: a
//! revision's result is written once and never overwritten, so the full
//! history stays available for audit.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AnalysisResult, Document};

/// Abstract store for document revisions and their analysis results, keyed
/// by `(submission_id, revision)`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store a document revision. Writing a revision that already exists is
    /// an internal error — documents are immutable.
    async fn put_document(&self, doc: Document) -> Result<()>;

    /// Retrieve a document revision.
    async fn get_document(&self, submission_id: Uuid, revision: u32) -> Result<Option<Document>>;

    /// Append a revision's analysis result. Overwriting an existing
    /// revision's result is rejected.
    async fn put_result(&self, result: AnalysisResult) -> Result<()>;

    /// Retrieve one revision's result.
    async fn get_result(
        &self,
        submission_id: Uuid,
        revision: u32,
    ) -> Result<Option<AnalysisResult>>;

    /// All results for a submission, ordered by revision ascending.
    async fn list_results(&self, submission_id: Uuid) -> Result<Vec<AnalysisResult>>;
}
