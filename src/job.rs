//! Analysis job runner.
//!
//! One job per document revision, running ingestion → matching → scoring →
//! recommendation as a single tokio task. The arena is keyed by
//! `(submission_id, revision)` with claim-or-join semantics: concurrent
//! submissions for the same revision atomically observe the same in-progress
//! job instead of racing two matches. Only a failed job can be replaced, by
//! resubmitting the revision explicitly.
//!
//! Jobs carry a wall-clock timeout and support cancellation strictly before
//! the matching stage; once matching starts the job runs to completion or
//! timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AnalysisConfig, RecommendationConfig};
use crate::corpus::CorpusIndex;
use crate::error::{EngineError, JobErrorKind, Result};
use crate::ingest;
use crate::library::ReferenceLibrary;
use crate::models::{AnalysisResult, Document, DocumentFormat, ResultSummary};
use crate::recommend;
use crate::score;
use crate::similarity;
use crate::store::Store;
use crate::submission::SubmissionRegistry;

/// Pipeline stage of an analysis job, observable by any number of pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Queued,
    Extracting,
    Matching,
    Scoring,
    Done,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Everything a job needs to run one revision's analysis. Bytes are retained
/// so a failed revision can be re-run without re-uploading.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub submission_id: Uuid,
    pub document_id: Uuid,
    pub revision: u32,
    pub format: DocumentFormat,
    pub content: Vec<u8>,
    pub cited: Vec<String>,
}

struct JobState {
    stage: JobStage,
    progress: u8,
    result: Option<Arc<AnalysisResult>>,
    error: Option<JobError>,
}

struct JobEntry {
    handle: Uuid,
    request: AnalysisRequest,
    state: RwLock<JobState>,
    cancel: AtomicBool,
}

impl JobEntry {
    fn new(request: AnalysisRequest) -> Self {
        Self {
            handle: Uuid::new_v4(),
            request,
            state: RwLock::new(JobState {
                stage: JobStage::Queued,
                progress: 0,
                result: None,
                error: None,
            }),
            cancel: AtomicBool::new(false),
        }
    }

    fn is_failed(&self) -> bool {
        self.state.read().unwrap().stage == JobStage::Failed
    }

    fn set_stage(&self, stage: JobStage, progress: u8) {
        let mut state = self.state.write().unwrap();
        state.stage = stage;
        state.progress = progress;
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }

    fn complete(&self, result: Arc<AnalysisResult>) {
        let mut state = self.state.write().unwrap();
        state.stage = JobStage::Done;
        state.progress = 100;
        state.result = Some(result);
    }

    fn fail(&self, kind: JobErrorKind, message: String) {
        let mut state = self.state.write().unwrap();
        state.stage = JobStage::Failed;
        state.progress = 100;
        state.error = Some(JobError {
            kind,
            message,
            retryable: kind.retryable(),
        });
    }

    fn view(&self) -> JobView {
        let state = self.state.read().unwrap();
        JobView {
            handle: self.handle,
            submission_id: self.request.submission_id,
            revision: self.request.revision,
            status: state.stage,
            progress: state.progress,
            result: state.result.as_ref().map(|r| r.as_ref().clone()),
            error: state.error.clone(),
        }
    }
}

/// Poll response for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub handle: Uuid,
    pub submission_id: Uuid,
    pub revision: u32,
    pub status: JobStage,
    pub progress: u8,
    pub result: Option<AnalysisResult>,
    pub error: Option<JobError>,
}

/// Shared collaborators for every pipeline run.
pub struct PipelineContext {
    pub analysis: AnalysisConfig,
    pub recommendation: RecommendationConfig,
    pub timeout: Duration,
    pub corpus: Arc<CorpusIndex>,
    pub library: Arc<dyn ReferenceLibrary>,
    pub store: Arc<dyn Store>,
    pub submissions: Arc<SubmissionRegistry>,
}

/// The job arena: claim-or-join per revision, handle-indexed polling.
pub struct JobRunner {
    ctx: Arc<PipelineContext>,
    by_key: DashMap<(Uuid, u32), Arc<JobEntry>>,
    by_handle: DashMap<Uuid, Arc<JobEntry>>,
}

impl JobRunner {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            by_key: DashMap::new(),
            by_handle: DashMap::new(),
        }
    }

    /// Submit a revision for analysis. Idempotent enqueue: if the revision
    /// already has a non-failed job, its handle is returned instead of
    /// double-running the analysis. A failed job is replaced and re-run.
    pub fn submit(&self, request: AnalysisRequest) -> Uuid {
        let key = (request.submission_id, request.revision);
        match self.by_key.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_failed() {
                    let entry = self.start(request);
                    occupied.insert(Arc::clone(&entry));
                    entry.handle
                } else {
                    occupied.get().handle
                }
            }
            Entry::Vacant(vacant) => {
                let entry = self.start(request);
                vacant.insert(Arc::clone(&entry));
                entry.handle
            }
        }
    }

    /// Re-run a failed revision with its retained request bytes.
    pub fn resubmit(&self, submission_id: Uuid, revision: u32) -> Result<Uuid> {
        let request = {
            let entry = self.by_key.get(&(submission_id, revision)).ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no job for revision {} of submission {}",
                    revision, submission_id
                ))
            })?;
            if !entry.is_failed() {
                return Ok(entry.handle);
            }
            entry.request.clone()
        };
        Ok(self.submit(request))
    }

    /// The retained request of a failed job, for an explicit retry.
    pub fn failed_request(&self, submission_id: Uuid, revision: u32) -> Result<AnalysisRequest> {
        let entry = self.by_key.get(&(submission_id, revision)).ok_or_else(|| {
            EngineError::NotFound(format!(
                "no job for revision {} of submission {}",
                revision, submission_id
            ))
        })?;
        if !entry.is_failed() {
            return Err(EngineError::InvalidInput(
                "job is not in a failed state".to_string(),
            ));
        }
        Ok(entry.request.clone())
    }

    /// Current status of a job.
    pub fn poll(&self, handle: Uuid) -> Result<JobView> {
        self.by_handle
            .get(&handle)
            .map(|entry| entry.view())
            .ok_or_else(|| EngineError::NotFound(format!("job {}", handle)))
    }

    /// Request cancellation. Honored only while the job has not entered the
    /// matching stage.
    pub fn cancel(&self, handle: Uuid) -> Result<()> {
        let entry = self
            .by_handle
            .get(&handle)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| EngineError::NotFound(format!("job {}", handle)))?;
        let state = entry.state.read().unwrap();
        match state.stage {
            JobStage::Queued | JobStage::Extracting => {
                entry.cancel.store(true, Ordering::Relaxed);
                Ok(())
            }
            JobStage::Matching | JobStage::Scoring => Err(EngineError::InvalidInput(
                "matching already started; the job runs to completion".to_string(),
            )),
            JobStage::Done | JobStage::Failed => Err(EngineError::InvalidInput(
                "job already finished".to_string(),
            )),
        }
    }

    fn start(&self, request: AnalysisRequest) -> Arc<JobEntry> {
        let entry = Arc::new(JobEntry::new(request));
        self.by_handle.insert(entry.handle, Arc::clone(&entry));
        info!(
            job = %entry.handle,
            submission = %entry.request.submission_id,
            revision = entry.request.revision,
            "analysis job queued"
        );
        tokio::spawn(run_job(Arc::clone(&self.ctx), Arc::clone(&entry)));
        entry
    }
}

async fn run_job(ctx: Arc<PipelineContext>, entry: Arc<JobEntry>) {
    let outcome = match tokio::time::timeout(ctx.timeout, execute(&ctx, &entry)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::AnalysisTimeout),
    };

    let submission_id = entry.request.submission_id;
    let revision = entry.request.revision;

    match outcome {
        Ok(result) => {
            let result = Arc::new(result);
            if let Err(e) = ctx.store.put_result(result.as_ref().clone()).await {
                warn!(job = %entry.handle, error = %e, "failed to persist analysis result");
                if let Err(e) = ctx.submissions.record_failure(submission_id, revision) {
                    warn!(job = %entry.handle, error = %e, "submission rejected analysis failure");
                }
                entry.fail(JobErrorKind::Internal, e.to_string());
                return;
            }
            if let Err(e) = ctx
                .submissions
                .record_outcome(submission_id, ResultSummary::of(&result))
            {
                warn!(job = %entry.handle, error = %e, "submission rejected analysis outcome");
            }
            info!(
                job = %entry.handle,
                submission = %submission_id,
                revision,
                overall = result.overall,
                flagged = result.flagged,
                "analysis complete"
            );
            entry.complete(result);
        }
        Err(err) => {
            let kind = JobErrorKind::from(&err);
            if let Err(e) = ctx.submissions.record_failure(submission_id, revision) {
                warn!(job = %entry.handle, error = %e, "submission rejected analysis failure");
            }
            warn!(job = %entry.handle, submission = %submission_id, revision, error = %err, "analysis failed");
            entry.fail(kind, err.to_string());
        }
    }
}

/// The staged pipeline for one revision. Errors abort this job only; prior
/// revisions' stored results are never touched.
async fn execute(ctx: &PipelineContext, entry: &JobEntry) -> Result<AnalysisResult> {
    let request = &entry.request;

    entry.check_cancel()?;
    entry.set_stage(JobStage::Extracting, 15);
    let text = ingest::ingest(&request.content, request.format)?;

    // A retried revision already has its document stored.
    if ctx
        .store
        .get_document(request.submission_id, request.revision)
        .await?
        .is_none()
    {
        ctx.store
            .put_document(Document {
                id: request.document_id,
                submission_id: request.submission_id,
                revision: request.revision,
                format: request.format,
                content: request.content.clone(),
                text: text.clone(),
                ingested_at: Utc::now(),
            })
            .await?;
    }

    // Last cancellation point: once matching starts the job is committed.
    entry.check_cancel()?;
    entry.set_stage(JobStage::Matching, 45);
    let snapshot = ctx.corpus.snapshot()?;
    let raw_spans = similarity::match_text(&text, &snapshot, &ctx.analysis);

    entry.set_stage(JobStage::Scoring, 80);
    let scored = score::score(&raw_spans, text.token_count(), &ctx.analysis);
    let recommendations = recommend::recommend(
        &scored.spans,
        &snapshot,
        ctx.library.as_ref(),
        &request.cited,
        &ctx.recommendation,
    )
    .await;

    Ok(AnalysisResult {
        submission_id: request.submission_id,
        document_id: request.document_id,
        revision: request.revision,
        overall: scored.overall,
        flagged: scored.flagged,
        spans: scored.spans,
        recommendations,
        computed_at: Utc::now(),
    })
}
