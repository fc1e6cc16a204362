//! Core data models for the integrity engine.
//!
//! These types represent the documents, match spans, analysis results, and
//! submissions that flow through the analysis pipeline and the submission
//! lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Declared upload format. Anything outside this allow-list is rejected
/// before a job is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    /// Parse a declared format string (extension or MIME type).
    pub fn parse(declared: &str) -> Result<Self, EngineError> {
        match declared.trim().to_ascii_lowercase().as_str() {
            "pdf" | "application/pdf" => Ok(DocumentFormat::Pdf),
            "docx" | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(DocumentFormat::Docx)
            }
            "txt" | "text" | "text/plain" => Ok(DocumentFormat::Text),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentFormat::Pdf => write!(f, "pdf"),
            DocumentFormat::Docx => write!(f, "docx"),
            DocumentFormat::Text => write!(f, "text"),
        }
    }
}

/// Whitespace-normalized, case-preserved text with its word-level token
/// stream. The same token boundaries feed the similarity engine, so
/// `tokens.len()` is the document length used by the scorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub tokens: Vec<String>,
}

impl NormalizedText {
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

/// An immutable document revision owned by a submission. Written once, after
/// successful extraction; a resubmission creates a new revision and never
/// mutates a prior one.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub revision: u32,
    pub format: DocumentFormat,
    pub content: Vec<u8>,
    pub text: NormalizedText,
    pub ingested_at: DateTime<Utc>,
}

/// Source classification for corpus and library entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Journal,
    Article,
    Preprint,
    PriorSubmission,
}

/// Presentational severity tier for a match span. Spans below the moderate
/// bound are retained in the result but carry no badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Moderate,
}

/// A contiguous run of document text attributed to one corpus source.
///
/// Offsets are token indices into the normalized token stream, `end`
/// exclusive. `ratio` is the fraction of the span's tokens covered by
/// matching shingles, not a fraction of the whole document.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
    pub source_id: String,
    pub ratio: f64,
    pub severity: Option<Severity>,
}

impl MatchSpan {
    pub fn token_len(&self) -> usize {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &MatchSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A suggested legitimate reading resource, deduplicated by title within one
/// result.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub title: String,
    pub kind: SourceKind,
    pub relevance: f64,
}

/// The immutable outcome of analyzing one document revision. A new revision
/// produces a new result; prior results are retained for audit.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub submission_id: Uuid,
    pub document_id: Uuid,
    pub revision: u32,
    /// Overall originality score in [0, 100].
    pub overall: f64,
    pub flagged: bool,
    /// Non-overlapping spans ordered by descending local ratio.
    pub spans: Vec<MatchSpan>,
    pub recommendations: Vec<Recommendation>,
    pub computed_at: DateTime<Utc>,
}

/// Submission lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Draft,
    Analyzing,
    Clear,
    Flagged,
    Submitted,
    Graded,
    AnalysisFailed,
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmissionState::Draft => "draft",
            SubmissionState::Analyzing => "analyzing",
            SubmissionState::Clear => "clear",
            SubmissionState::Flagged => "flagged",
            SubmissionState::Submitted => "submitted",
            SubmissionState::Graded => "graded",
            SubmissionState::AnalysisFailed => "analysis_failed",
        };
        write!(f, "{}", s)
    }
}

/// Actor role. Only lecturers may grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Lecturer,
}

/// Authenticated principal passed into every state-machine transition call.
/// Authentication itself happens upstream; this engine only enforces role
/// guards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

/// One entry in a submission's transition history log.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: SubmissionState,
    pub to: SubmissionState,
    pub event: String,
    pub actor: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Compact view of the latest analysis outcome kept on the submission row.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub revision: u32,
    pub overall: f64,
    pub flagged: bool,
    pub span_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl ResultSummary {
    pub fn of(result: &AnalysisResult) -> Self {
        Self {
            revision: result.revision,
            overall: result.overall,
            flagged: result.flagged,
            span_count: result.spans.len(),
            computed_at: result.computed_at,
        }
    }
}

/// A student submission. Mutated only through state-machine transitions;
/// the grade field is write-once.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student: String,
    pub assignment_id: Uuid,
    pub title: String,
    pub current_revision: u32,
    pub state: SubmissionState,
    pub latest_result: Option<ResultSummary>,
    pub grade: Option<u8>,
    pub graded_by: Option<Uuid>,
    pub graded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub history: Vec<TransitionRecord>,
}
