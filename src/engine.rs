//! Engine facade: wires the corpus index, reference library, stores, job
//! runner, and submission registry behind the operations the HTTP API and
//! CLI consume.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::corpus::{self, CorpusIndex, CorpusSnapshot};
use crate::error::{EngineError, Result};
use crate::ingest;
use crate::job::{AnalysisRequest, JobRunner, JobStage, JobView, PipelineContext};
use crate::library::{InMemoryLibrary, ReferenceLibrary};
use crate::models::{
    AnalysisResult, DocumentFormat, Principal, Submission, SubmissionState,
};
use crate::progress::AnalysisProgressReporter;
use crate::recommend;
use crate::score;
use crate::similarity;
use crate::store::memory::InMemoryStore;
use crate::store::Store;
use crate::submission::{NewSubmission, SubmissionRegistry};

/// A document upload: either the first revision of a new submission or the
/// accompanying upload of a resubmission.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Existing submission to upload into; a new one is created when absent.
    pub submission_id: Option<Uuid>,
    pub principal: Principal,
    pub student: Option<String>,
    pub assignment_id: Option<Uuid>,
    pub title: Option<String>,
    /// Declared format string; validated against the allow-list before any
    /// job is created.
    pub format: String,
    pub content: Vec<u8>,
    /// Titles the student already cites, excluded from recommendations.
    pub cited: Vec<String>,
}

/// What the caller gets back from an accepted upload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadReceipt {
    pub submission_id: Uuid,
    pub document_id: Uuid,
    pub revision: u32,
    pub job_handle: Uuid,
}

/// Lifecycle decisions a caller can issue on a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Submit,
    SubmitAnyway,
    Resubmit,
}

/// Outcome of a decision; `upload` is present for resubmissions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DecisionOutcome {
    pub state: SubmissionState,
    pub upload: Option<UploadReceipt>,
}

/// The assembled integrity engine.
pub struct Engine {
    config: Config,
    ctx: Arc<PipelineContext>,
    jobs: JobRunner,
}

impl Engine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: Config,
        corpus: CorpusIndex,
        library: Arc<dyn ReferenceLibrary>,
        store: Arc<dyn Store>,
    ) -> Self {
        let ctx = Arc::new(PipelineContext {
            analysis: config.analysis.clone(),
            recommendation: config.recommendation.clone(),
            timeout: Duration::from_secs(config.jobs.timeout_secs),
            corpus: Arc::new(corpus),
            library,
            store,
            submissions: Arc::new(SubmissionRegistry::new()),
        });
        Self {
            config,
            jobs: JobRunner::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Assemble an engine from configuration, loading the corpus and library
    /// files when configured. Without a corpus file the index starts with an
    /// empty snapshot (available, matches nothing).
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let corpus = match &config.corpus {
            Some(file) => {
                let defs = corpus::load_corpus_file(&file.path)?;
                let snapshot = CorpusSnapshot::build(defs, &config.analysis);
                info!(entries = snapshot.len(), path = %file.path.display(), "corpus loaded");
                CorpusIndex::with_snapshot(snapshot)
            }
            None => CorpusIndex::with_snapshot(CorpusSnapshot::build(
                Vec::new(),
                &config.analysis,
            )),
        };

        let library: Arc<dyn ReferenceLibrary> = match &config.library {
            Some(file) => {
                let lib = InMemoryLibrary::from_file(&file.path)?;
                info!(entries = lib.len(), path = %file.path.display(), "reference library loaded");
                Arc::new(lib)
            }
            None => Arc::new(InMemoryLibrary::empty()),
        };

        Ok(Self::new(
            config,
            corpus,
            library,
            Arc::new(InMemoryStore::new()),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Upload a document revision. The allow-list check is synchronous —
    /// an unsupported format creates no submission state and no job —
    /// while extraction and everything after runs asynchronously in the
    /// returned job.
    pub fn upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        let format = DocumentFormat::parse(&request.format)?;

        let submission_id = request.submission_id.unwrap_or_else(Uuid::new_v4);
        if self.ctx.submissions.get(submission_id).is_none() {
            self.ctx.submissions.create(NewSubmission {
                id: submission_id,
                student_id: request.principal.user_id,
                student: request
                    .student
                    .unwrap_or_else(|| "Unknown Student".to_string()),
                assignment_id: request.assignment_id.unwrap_or_else(Uuid::new_v4),
                title: request
                    .title
                    .unwrap_or_else(|| "Untitled Submission".to_string()),
            })?;
        }

        let revision = self
            .ctx
            .submissions
            .begin_upload(submission_id, Some(request.principal.user_id))?;
        let document_id = Uuid::new_v4();
        let job_handle = self.jobs.submit(AnalysisRequest {
            submission_id,
            document_id,
            revision,
            format,
            content: request.content,
            cited: request.cited,
        });

        Ok(UploadReceipt {
            submission_id,
            document_id,
            revision,
            job_handle,
        })
    }

    /// Current status/progress/result of an analysis job.
    pub fn poll_job(&self, handle: Uuid) -> Result<JobView> {
        self.jobs.poll(handle)
    }

    /// Cancel a job; honored only before matching starts.
    pub fn cancel_job(&self, handle: Uuid) -> Result<()> {
        self.jobs.cancel(handle)
    }

    pub fn submission(&self, id: Uuid) -> Result<Submission> {
        self.ctx
            .submissions
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("submission {}", id)))
    }

    pub fn submissions(&self, search: Option<&str>) -> Vec<Submission> {
        self.ctx.submissions.list(search)
    }

    /// Full per-revision result history for audit.
    pub async fn results(&self, submission_id: Uuid) -> Result<Vec<AnalysisResult>> {
        self.ctx.store.list_results(submission_id).await
    }

    /// Apply a lifecycle decision. `resubmission` must carry the new upload
    /// for `Resubmit` and is ignored otherwise.
    pub fn decide(
        &self,
        id: Uuid,
        action: DecisionAction,
        principal: Principal,
        resubmission: Option<UploadRequest>,
    ) -> Result<DecisionOutcome> {
        match action {
            DecisionAction::Submit => {
                let state = self.ctx.submissions.submit(id, principal)?;
                Ok(DecisionOutcome {
                    state,
                    upload: None,
                })
            }
            DecisionAction::SubmitAnyway => {
                let state = self.ctx.submissions.submit_anyway(id, principal)?;
                Ok(DecisionOutcome {
                    state,
                    upload: None,
                })
            }
            DecisionAction::Resubmit => {
                let mut upload = resubmission.ok_or_else(|| {
                    EngineError::InvalidInput(
                        "resubmit requires an accompanying document upload".to_string(),
                    )
                })?;
                // Validate the new upload before touching submission state,
                // so a bad format leaves the submission Flagged.
                DocumentFormat::parse(&upload.format)?;
                self.ctx.submissions.begin_resubmit(id, principal)?;
                upload.submission_id = Some(id);
                upload.principal = principal;
                let receipt = self.upload(upload)?;
                Ok(DecisionOutcome {
                    state: SubmissionState::Analyzing,
                    upload: Some(receipt),
                })
            }
        }
    }

    /// Grade a submitted submission. Lecturer-only, write-once.
    pub fn grade(&self, id: Uuid, principal: Principal, grade: u8) -> Result<Submission> {
        self.ctx.submissions.grade(id, principal, grade)
    }

    /// Re-run the failed analysis of the current revision.
    pub fn retry(&self, id: Uuid, principal: Principal) -> Result<UploadReceipt> {
        let submission = self.submission(id)?;
        let revision = submission.current_revision;
        // Confirm a failed job exists before transitioning, so the
        // submission never ends up Analyzing with nothing running.
        let request = self.jobs.failed_request(id, revision)?;
        self.ctx
            .submissions
            .begin_retry(id, Some(principal.user_id))?;
        let job_handle = self.jobs.submit(request.clone());
        Ok(UploadReceipt {
            submission_id: id,
            document_id: request.document_id,
            revision,
            job_handle,
        })
    }

    /// Re-read the configured corpus file and atomically swap the snapshot
    /// read by new jobs. In-flight matches keep their snapshot.
    pub fn reload_corpus(&self) -> Result<usize> {
        let file = self.config.corpus.as_ref().ok_or_else(|| {
            EngineError::InvalidInput("no corpus file configured".to_string())
        })?;
        let defs = corpus::load_corpus_file(&file.path)?;
        let snapshot = CorpusSnapshot::build(defs, &self.config.analysis);
        let entries = snapshot.len();
        self.ctx.corpus.install(snapshot);
        info!(entries, "corpus snapshot swapped");
        Ok(entries)
    }

    /// One-shot, in-process analysis for the CLI: no submission state, no
    /// job arena, same pipeline.
    pub async fn analyze_once(
        &self,
        content: &[u8],
        declared_format: &str,
        cited: &[String],
        reporter: &dyn AnalysisProgressReporter,
    ) -> Result<AnalysisResult> {
        let format = DocumentFormat::parse(declared_format)?;

        reporter.report(JobStage::Extracting, 15);
        let text = ingest::ingest(content, format)?;

        reporter.report(JobStage::Matching, 45);
        let snapshot = self.ctx.corpus.snapshot()?;
        let raw_spans = similarity::match_text(&text, &snapshot, &self.ctx.analysis);

        reporter.report(JobStage::Scoring, 80);
        let scored = score::score(&raw_spans, text.token_count(), &self.ctx.analysis);
        let recommendations = recommend::recommend(
            &scored.spans,
            &snapshot,
            self.ctx.library.as_ref(),
            cited,
            &self.ctx.recommendation,
        )
        .await;
        reporter.report(JobStage::Done, 100);

        Ok(AnalysisResult {
            submission_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            revision: 1,
            overall: scored.overall,
            flagged: scored.flagged,
            spans: scored.spans,
            recommendations,
            computed_at: Utc::now(),
        })
    }
}
