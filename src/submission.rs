//! Submission lifecycle state machine and registry.
//!
//! A submission moves Draft → Analyzing → Clear/Flagged/AnalysisFailed →
//! Submitted → Graded through the transition table in [`next_state`]. Any
//! (state, event) pair without a matching row is rejected with
//! `InvalidStateTransition` and leaves the submission untouched.
//!
//! Grading is single-writer: the `Submitted → Graded` transition is a
//! compare-and-set inside the submission cell's write lock, so two
//! concurrent grade attempts produce exactly one success. The grade field is
//! write-once.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    Principal, ResultSummary, Role, Submission, SubmissionState, TransitionRecord,
};

/// Lifecycle events consumed by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionEvent {
    Upload,
    AnalysisDone { flagged: bool },
    AnalysisError,
    Retry,
    Submit,
    Resubmit,
    SubmitAnyway,
    Grade,
}

impl SubmissionEvent {
    fn name(&self) -> &'static str {
        match self {
            SubmissionEvent::Upload => "upload",
            SubmissionEvent::AnalysisDone { .. } => "analysis_done",
            SubmissionEvent::AnalysisError => "analysis_error",
            SubmissionEvent::Retry => "retry",
            SubmissionEvent::Submit => "submit",
            SubmissionEvent::Resubmit => "resubmit",
            SubmissionEvent::SubmitAnyway => "submit_anyway",
            SubmissionEvent::Grade => "grade",
        }
    }
}

/// Pure transition table. Returns the target state or
/// `InvalidStateTransition` without side effects.
pub fn next_state(from: SubmissionState, event: SubmissionEvent) -> Result<SubmissionState> {
    use SubmissionEvent as E;
    use SubmissionState as S;

    match (from, event) {
        (S::Draft, E::Upload) => Ok(S::Analyzing),
        (S::Analyzing, E::AnalysisDone { flagged: false }) => Ok(S::Clear),
        (S::Analyzing, E::AnalysisDone { flagged: true }) => Ok(S::Flagged),
        (S::Analyzing, E::AnalysisError) => Ok(S::AnalysisFailed),
        (S::AnalysisFailed, E::Retry) => Ok(S::Analyzing),
        (S::Clear, E::Submit) => Ok(S::Submitted),
        (S::Flagged, E::Resubmit) => Ok(S::Draft),
        (S::Flagged, E::SubmitAnyway) => Ok(S::Submitted),
        (S::Submitted, E::Grade) => Ok(S::Graded),
        // A second grade attempt on Graded is a conflict, not a plain
        // guard failure.
        (S::Graded, E::Grade) => Err(EngineError::AlreadyGraded),
        (state, event) => Err(EngineError::InvalidStateTransition {
            from: state.to_string(),
            event: event.name().to_string(),
        }),
    }
}

struct SubmissionCell {
    inner: RwLock<Submission>,
}

/// Fields supplied when a submission is first created.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student: String,
    pub assignment_id: Uuid,
    pub title: String,
}

/// Registry of live submissions, keyed by id.
pub struct SubmissionRegistry {
    cells: DashMap<Uuid, Arc<SubmissionCell>>,
}

impl SubmissionRegistry {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Create a submission in `Draft`. Rejects duplicate ids.
    pub fn create(&self, new: NewSubmission) -> Result<Submission> {
        let submission = Submission {
            id: new.id,
            student_id: new.student_id,
            student: new.student,
            assignment_id: new.assignment_id,
            title: new.title,
            current_revision: 0,
            state: SubmissionState::Draft,
            latest_result: None,
            grade: None,
            graded_by: None,
            graded_at: None,
            created_at: Utc::now(),
            history: Vec::new(),
        };
        match self.cells.entry(new.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::InvalidInput(format!(
                "submission {} already exists",
                new.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(SubmissionCell {
                    inner: RwLock::new(submission.clone()),
                }));
                Ok(submission)
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Submission> {
        self.cells
            .get(&id)
            .map(|cell| cell.inner.read().unwrap().clone())
    }

    /// All submissions, optionally filtered by a student/title substring,
    /// newest first.
    pub fn list(&self, search: Option<&str>) -> Vec<Submission> {
        let needle = search.map(|s| s.to_lowercase());
        let mut out: Vec<Submission> = self
            .cells
            .iter()
            .map(|cell| cell.inner.read().unwrap().clone())
            .filter(|sub| match &needle {
                Some(n) => {
                    sub.student.to_lowercase().contains(n) || sub.title.to_lowercase().contains(n)
                }
                None => true,
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Draft → Analyzing for a new document revision. Returns the revision
    /// number the upload claims.
    pub fn begin_upload(&self, id: Uuid, actor: Option<Uuid>) -> Result<u32> {
        self.with_cell(id, |sub| {
            apply(sub, SubmissionEvent::Upload, actor)?;
            sub.current_revision += 1;
            Ok(sub.current_revision)
        })
    }

    /// Analyzing → Clear/Flagged once a revision's analysis completes.
    ///
    /// Outcomes for a stale revision (a newer upload superseded the job) are
    /// dropped without a transition.
    pub fn record_outcome(&self, id: Uuid, summary: ResultSummary) -> Result<SubmissionState> {
        self.with_cell(id, |sub| {
            if summary.revision != sub.current_revision {
                warn!(
                    submission = %id,
                    revision = summary.revision,
                    current = sub.current_revision,
                    "dropping stale analysis outcome"
                );
                return Ok(sub.state);
            }
            let flagged = summary.flagged;
            apply(sub, SubmissionEvent::AnalysisDone { flagged }, None)?;
            sub.latest_result = Some(summary);
            Ok(sub.state)
        })
    }

    /// Analyzing → AnalysisFailed. Stale failures are dropped like stale
    /// outcomes.
    pub fn record_failure(&self, id: Uuid, revision: u32) -> Result<SubmissionState> {
        self.with_cell(id, |sub| {
            if revision != sub.current_revision {
                warn!(
                    submission = %id,
                    revision,
                    current = sub.current_revision,
                    "dropping stale analysis failure"
                );
                return Ok(sub.state);
            }
            apply(sub, SubmissionEvent::AnalysisError, None)?;
            Ok(sub.state)
        })
    }

    /// AnalysisFailed → Analyzing for an explicit re-run of the same
    /// revision.
    pub fn begin_retry(&self, id: Uuid, actor: Option<Uuid>) -> Result<u32> {
        self.with_cell(id, |sub| {
            apply(sub, SubmissionEvent::Retry, actor)?;
            Ok(sub.current_revision)
        })
    }

    /// Clear → Submitted.
    pub fn submit(&self, id: Uuid, principal: Principal) -> Result<SubmissionState> {
        self.with_cell(id, |sub| {
            apply(sub, SubmissionEvent::Submit, Some(principal.user_id))?;
            Ok(sub.state)
        })
    }

    /// Flagged → Submitted, overriding the flag.
    pub fn submit_anyway(&self, id: Uuid, principal: Principal) -> Result<SubmissionState> {
        self.with_cell(id, |sub| {
            apply(sub, SubmissionEvent::SubmitAnyway, Some(principal.user_id))?;
            Ok(sub.state)
        })
    }

    /// Flagged → Draft; the caller must follow up with the accompanying
    /// upload, which claims the next revision.
    pub fn begin_resubmit(&self, id: Uuid, principal: Principal) -> Result<SubmissionState> {
        self.with_cell(id, |sub| {
            apply(sub, SubmissionEvent::Resubmit, Some(principal.user_id))?;
            Ok(sub.state)
        })
    }

    /// Submitted → Graded. Role-guarded, write-once; the check-and-set runs
    /// under the cell's write lock so concurrent attempts serialize.
    pub fn grade(&self, id: Uuid, principal: Principal, grade: u8) -> Result<Submission> {
        if principal.role != Role::Lecturer {
            return Err(EngineError::Unauthorized(
                "grading requires the lecturer role".to_string(),
            ));
        }
        if grade > 100 {
            return Err(EngineError::InvalidInput(format!(
                "grade must be in 0–100, got {}",
                grade
            )));
        }
        self.with_cell(id, |sub| {
            if sub.grade.is_some() {
                return Err(EngineError::AlreadyGraded);
            }
            apply(sub, SubmissionEvent::Grade, Some(principal.user_id))?;
            sub.grade = Some(grade);
            sub.graded_by = Some(principal.user_id);
            sub.graded_at = Some(Utc::now());
            Ok(sub.clone())
        })
    }

    fn with_cell<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Submission) -> Result<T>,
    ) -> Result<T> {
        let cell = self
            .cells
            .get(&id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| EngineError::NotFound(format!("submission {}", id)))?;
        let mut sub = cell.inner.write().unwrap();
        f(&mut sub)
    }
}

impl Default for SubmissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one event under the caller's write lock, appending to the history
/// log. Guard failures leave the submission unchanged.
fn apply(sub: &mut Submission, event: SubmissionEvent, actor: Option<Uuid>) -> Result<()> {
    let from = sub.state;
    let to = next_state(from, event)?;
    sub.state = to;
    sub.history.push(TransitionRecord {
        from,
        to,
        event: event.name().to_string(),
        actor,
        at: Utc::now(),
    });
    debug!(submission = %sub.id, %from, %to, event = event.name(), "transition");
    Ok(())
}
