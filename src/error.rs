//! Error types for the integrity engine.

use serde::Serialize;
use thiserror::Error;

/// Common result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy shared across the analysis pipeline and the submission
/// state machine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Declared format is not in the allow-list (PDF, DOCX, plain text).
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Text extraction failed (corrupt container, unreadable encoding).
    /// Terminal for the attempted revision.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// No corpus snapshot is installed; the whole match fails, the job is
    /// retryable once the corpus store is reachable again.
    #[error("corpus index unavailable")]
    IndexUnavailable,

    /// Analysis exceeded the configured job timeout.
    #[error("analysis timed out")]
    AnalysisTimeout,

    /// Job was canceled before matching started.
    #[error("analysis canceled")]
    Canceled,

    /// No transition row matches the (state, event) pair. The submission is
    /// left unchanged.
    #[error("invalid state transition: {event} from {from}")]
    InvalidStateTransition { from: String, event: String },

    /// Grade is write-once; the submission already carries one.
    #[error("submission already graded")]
    AlreadyGraded,

    /// Role check failed on a guarded action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid caller input or request parameter.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable failure kind recorded on a failed analysis job, so
/// callers can decide whether a retry affordance applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    UnsupportedFormat,
    ExtractionError,
    IndexUnavailable,
    AnalysisTimeout,
    Canceled,
    Internal,
}

impl JobErrorKind {
    /// All failed jobs except internal faults can be re-run by resubmitting
    /// the same revision.
    pub fn retryable(&self) -> bool {
        !matches!(self, JobErrorKind::Internal)
    }
}

impl From<&EngineError> for JobErrorKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::UnsupportedFormat(_) => JobErrorKind::UnsupportedFormat,
            EngineError::Extraction(_) => JobErrorKind::ExtractionError,
            EngineError::IndexUnavailable => JobErrorKind::IndexUnavailable,
            EngineError::AnalysisTimeout => JobErrorKind::AnalysisTimeout,
            EngineError::Canceled => JobErrorKind::Canceled,
            _ => JobErrorKind::Internal,
        }
    }
}
