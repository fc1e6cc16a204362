//! End-to-end tests for the integrity engine.
//!
//! These tests drive the assembled engine through the same operations the
//! HTTP API exposes: upload, job polling, lifecycle decisions, grading, and
//! retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use integrity_harness::config::{AnalysisConfig, Config, CorpusFileConfig};
use integrity_harness::corpus::{CorpusIndex, CorpusSnapshot, CorpusSourceDef};
use integrity_harness::engine::{DecisionAction, Engine, UploadRequest};
use integrity_harness::error::{EngineError, JobErrorKind};
use integrity_harness::job::{JobStage, JobView};
use integrity_harness::library::{InMemoryLibrary, LibraryEntry};
use integrity_harness::models::{
    AnalysisResult, Document, Principal, Role, SourceKind, SubmissionState,
};
use integrity_harness::store::memory::InMemoryStore;
use integrity_harness::store::Store;

// ─── Helpers ────────────────────────────────────────────────────────

fn filler(n: usize, prefix: &str) -> String {
    (0..n)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}

fn source(id: &str, topics: &[&str], text: &str) -> CorpusSourceDef {
    CorpusSourceDef {
        source_id: id.to_string(),
        kind: SourceKind::Web,
        topics: topics.iter().map(|t| t.to_string()).collect(),
        text: text.to_string(),
    }
}

fn corpus_index(defs: Vec<CorpusSourceDef>) -> CorpusIndex {
    CorpusIndex::with_snapshot(CorpusSnapshot::build(defs, &AnalysisConfig::default()))
}

fn engine_with(defs: Vec<CorpusSourceDef>) -> Engine {
    Engine::new(
        Config::minimal(),
        corpus_index(defs),
        Arc::new(InMemoryLibrary::empty()),
        Arc::new(InMemoryStore::new()),
    )
}

fn student() -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        role: Role::Student,
    }
}

fn lecturer() -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        role: Role::Lecturer,
    }
}

fn upload_request(principal: Principal, body: &str) -> UploadRequest {
    UploadRequest {
        submission_id: None,
        principal,
        student: Some("Alex Thompson".to_string()),
        assignment_id: None,
        title: Some("AI Ethics in Modern Education".to_string()),
        format: "txt".to_string(),
        content: body.as_bytes().to_vec(),
        cited: Vec::new(),
    }
}

async fn wait_terminal(engine: &Engine, handle: Uuid) -> JobView {
    for _ in 0..1000 {
        let view = engine.poll_job(handle).unwrap();
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} did not reach a terminal state", handle);
}

// ─── Spec scenarios ─────────────────────────────────────────────────

#[tokio::test]
async fn flagged_at_22_percent_coverage() {
    let copied = filler(22, "copied");
    let engine = engine_with(vec![source("Wikipedia - Machine Learning", &[], &copied)]);

    let body = format!("{} {} {}", filler(39, "pre"), copied, filler(39, "post"));
    let receipt = engine.upload(upload_request(student(), &body)).unwrap();
    let view = wait_terminal(&engine, receipt.job_handle).await;

    assert_eq!(view.status, JobStage::Done);
    let result = view.result.unwrap();
    assert!((result.overall - 22.0).abs() < 1e-9);
    assert!(result.flagged);

    let submission = engine.submission(receipt.submission_id).unwrap();
    assert_eq!(submission.state, SubmissionState::Flagged);
}

#[tokio::test]
async fn clear_below_threshold() {
    // 8 copied tokens in a 100-token document, threshold 15.
    let copied = filler(8, "copied");
    let engine = engine_with(vec![source("src", &[], &copied)]);

    let body = format!("{} {} {}", filler(46, "pre"), copied, filler(46, "post"));
    let receipt = engine.upload(upload_request(student(), &body)).unwrap();
    let view = wait_terminal(&engine, receipt.job_handle).await;

    let result = view.result.unwrap();
    assert!((result.overall - 8.0).abs() < 1e-9);
    assert!(!result.flagged);
    assert_eq!(
        engine.submission(receipt.submission_id).unwrap().state,
        SubmissionState::Clear
    );
}

#[tokio::test]
async fn submit_anyway_then_grade_exactly_once() {
    let copied = filler(30, "copied");
    let engine = engine_with(vec![source("src", &[], &copied)]);

    let body = format!("{} {}", copied, filler(70, "own"));
    let author = student();
    let receipt = engine.upload(upload_request(author, &body)).unwrap();
    wait_terminal(&engine, receipt.job_handle).await;
    let id = receipt.submission_id;
    assert_eq!(engine.submission(id).unwrap().state, SubmissionState::Flagged);

    // Submit anyway: no new revision.
    let outcome = engine
        .decide(id, DecisionAction::SubmitAnyway, author, None)
        .unwrap();
    assert_eq!(outcome.state, SubmissionState::Submitted);
    assert_eq!(engine.submission(id).unwrap().current_revision, 1);

    // Grade 85 succeeds, the second grade is a conflict.
    let graded = engine.grade(id, lecturer(), 85).unwrap();
    assert_eq!(graded.state, SubmissionState::Graded);
    assert_eq!(graded.grade, Some(85));
    assert!(matches!(
        engine.grade(id, lecturer(), 90),
        Err(EngineError::AlreadyGraded)
    ));
    assert_eq!(engine.submission(id).unwrap().grade, Some(85));
}

#[tokio::test]
async fn unsupported_format_creates_nothing() {
    let engine = engine_with(vec![]);
    let mut request = upload_request(student(), "some text");
    request.format = "exe".to_string();

    let err = engine.upload(request).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    assert!(engine.submissions(None).is_empty(), "no submission row");
}

#[tokio::test]
async fn concurrent_uploads_of_one_revision_share_a_job() {
    use integrity_harness::job::{AnalysisRequest, JobRunner, PipelineContext};
    use integrity_harness::models::DocumentFormat;
    use integrity_harness::submission::{NewSubmission, SubmissionRegistry};

    let cfg = Config::minimal();
    let submissions = Arc::new(SubmissionRegistry::new());
    let ctx = Arc::new(PipelineContext {
        analysis: cfg.analysis.clone(),
        recommendation: cfg.recommendation.clone(),
        timeout: Duration::from_secs(5),
        corpus: Arc::new(corpus_index(vec![source("src", &[], &filler(30, "r"))])),
        library: Arc::new(InMemoryLibrary::empty()),
        store: Arc::new(InMemoryStore::new()),
        submissions: Arc::clone(&submissions),
    });
    let runner = Arc::new(JobRunner::new(ctx));

    let id = Uuid::new_v4();
    submissions
        .create(NewSubmission {
            id,
            student_id: Uuid::new_v4(),
            student: "Maria Garcia".to_string(),
            assignment_id: Uuid::new_v4(),
            title: "Machine Learning Applications".to_string(),
        })
        .unwrap();
    let revision = submissions.begin_upload(id, None).unwrap();

    let request = AnalysisRequest {
        submission_id: id,
        document_id: Uuid::new_v4(),
        revision,
        format: DocumentFormat::Text,
        content: filler(50, "doc").into_bytes(),
        cited: Vec::new(),
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let runner = Arc::clone(&runner);
        let request = request.clone();
        tasks.push(tokio::spawn(async move { runner.submit(request) }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    let distinct: std::collections::HashSet<Uuid> = handles.into_iter().collect();
    assert_eq!(distinct.len(), 1, "same revision must share one job");
}

// ─── Lifecycle behaviors ────────────────────────────────────────────

#[tokio::test]
async fn resubmission_produces_an_independent_result() {
    let copied = filler(30, "copied");
    let engine = engine_with(vec![source("src", &[], &copied)]);

    let author = student();
    let flagged_body = format!("{} {}", copied, filler(70, "own"));
    let receipt = engine.upload(upload_request(author, &flagged_body)).unwrap();
    wait_terminal(&engine, receipt.job_handle).await;
    let id = receipt.submission_id;
    let first = engine
        .poll_job(receipt.job_handle)
        .unwrap()
        .result
        .unwrap();
    assert!(first.flagged);

    // Resubmit with clean text.
    let outcome = engine
        .decide(
            id,
            DecisionAction::Resubmit,
            author,
            Some(UploadRequest {
                submission_id: Some(id),
                principal: author,
                student: None,
                assignment_id: None,
                title: None,
                format: "txt".to_string(),
                content: filler(100, "fresh").into_bytes(),
                cited: Vec::new(),
            }),
        )
        .unwrap();
    let second_receipt = outcome.upload.unwrap();
    assert_eq!(second_receipt.revision, 2);
    let view = wait_terminal(&engine, second_receipt.job_handle).await;
    assert!(!view.result.unwrap().flagged);

    // Both revisions' results are retained and the first is untouched.
    let history = engine.results(id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].revision, 1);
    assert!(history[0].flagged);
    assert_eq!(history[1].revision, 2);
    assert!(!history[1].flagged);

    assert_eq!(engine.submission(id).unwrap().state, SubmissionState::Clear);
}

#[tokio::test]
async fn clear_submission_submits_plainly() {
    let engine = engine_with(vec![source("src", &[], &filler(20, "ref"))]);
    let author = student();
    let receipt = engine
        .upload(upload_request(author, &filler(100, "own")))
        .unwrap();
    wait_terminal(&engine, receipt.job_handle).await;

    let outcome = engine
        .decide(receipt.submission_id, DecisionAction::Submit, author, None)
        .unwrap();
    assert_eq!(outcome.state, SubmissionState::Submitted);
}

#[tokio::test]
async fn invalid_decisions_are_rejected_without_state_change() {
    let engine = engine_with(vec![source("src", &[], &filler(20, "ref"))]);
    let author = student();
    let receipt = engine
        .upload(upload_request(author, &filler(100, "own")))
        .unwrap();
    wait_terminal(&engine, receipt.job_handle).await;
    let id = receipt.submission_id;

    // Clear → submit_anyway has no transition row.
    let err = engine
        .decide(id, DecisionAction::SubmitAnyway, author, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    assert_eq!(engine.submission(id).unwrap().state, SubmissionState::Clear);
}

#[tokio::test]
async fn grading_requires_lecturer() {
    let engine = engine_with(vec![source("src", &[], &filler(20, "ref"))]);
    let author = student();
    let receipt = engine
        .upload(upload_request(author, &filler(100, "own")))
        .unwrap();
    wait_terminal(&engine, receipt.job_handle).await;
    let id = receipt.submission_id;
    engine
        .decide(id, DecisionAction::Submit, author, None)
        .unwrap();

    assert!(matches!(
        engine.grade(id, author, 80),
        Err(EngineError::Unauthorized(_))
    ));
    assert_eq!(
        engine.submission(id).unwrap().state,
        SubmissionState::Submitted
    );
}

#[tokio::test]
async fn retry_reruns_a_failed_revision() {
    let engine = engine_with(vec![source("src", &[], &filler(20, "ref"))]);
    let author = student();
    // A DOCX that is not a zip fails extraction inside the job.
    let receipt = engine
        .upload(UploadRequest {
            submission_id: None,
            principal: author,
            student: None,
            assignment_id: None,
            title: None,
            format: "docx".to_string(),
            content: b"not a zip archive".to_vec(),
            cited: Vec::new(),
        })
        .unwrap();
    let view = wait_terminal(&engine, receipt.job_handle).await;
    assert_eq!(view.status, JobStage::Failed);
    assert_eq!(view.error.unwrap().kind, JobErrorKind::ExtractionError);
    let id = receipt.submission_id;
    assert_eq!(
        engine.submission(id).unwrap().state,
        SubmissionState::AnalysisFailed
    );

    // Retry re-runs the same revision (same retained bytes) as a new job.
    let retry = engine.retry(id, author).unwrap();
    assert_eq!(retry.revision, 1);
    assert_ne!(retry.job_handle, receipt.job_handle);
    let view = wait_terminal(&engine, retry.job_handle).await;
    assert_eq!(view.status, JobStage::Failed);
    assert_eq!(
        engine.submission(id).unwrap().state,
        SubmissionState::AnalysisFailed
    );
}

#[tokio::test]
async fn transition_history_covers_the_full_lifecycle() {
    let copied = filler(30, "copied");
    let engine = engine_with(vec![source("src", &[], &copied)]);
    let author = student();
    let receipt = engine
        .upload(upload_request(author, &format!("{} {}", copied, filler(70, "own"))))
        .unwrap();
    wait_terminal(&engine, receipt.job_handle).await;
    let id = receipt.submission_id;

    engine
        .decide(id, DecisionAction::SubmitAnyway, author, None)
        .unwrap();
    engine.grade(id, lecturer(), 85).unwrap();

    let events: Vec<String> = engine
        .submission(id)
        .unwrap()
        .history
        .iter()
        .map(|t| t.event.clone())
        .collect();
    assert_eq!(
        events,
        vec!["upload", "analysis_done", "submit_anyway", "grade"]
    );
}

// ─── Cancellation ───────────────────────────────────────────────────

/// Store whose document writes wait on a semaphore, pinning jobs in the
/// extraction stage until released.
struct GatedStore {
    inner: InMemoryStore,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Store for GatedStore {
    async fn put_document(&self, doc: Document) -> integrity_harness::error::Result<()> {
        let _permit = self.gate.acquire().await.map_err(|_| {
            EngineError::Internal("gate closed".to_string())
        })?;
        self.inner.put_document(doc).await
    }

    async fn get_document(
        &self,
        submission_id: Uuid,
        revision: u32,
    ) -> integrity_harness::error::Result<Option<Document>> {
        self.inner.get_document(submission_id, revision).await
    }

    async fn put_result(&self, result: AnalysisResult) -> integrity_harness::error::Result<()> {
        self.inner.put_result(result).await
    }

    async fn get_result(
        &self,
        submission_id: Uuid,
        revision: u32,
    ) -> integrity_harness::error::Result<Option<AnalysisResult>> {
        self.inner.get_result(submission_id, revision).await
    }

    async fn list_results(
        &self,
        submission_id: Uuid,
    ) -> integrity_harness::error::Result<Vec<AnalysisResult>> {
        self.inner.list_results(submission_id).await
    }
}

#[tokio::test]
async fn cancellation_is_honored_before_matching_only() {
    let gate = Arc::new(Semaphore::new(0));
    let engine = Engine::new(
        Config::minimal(),
        corpus_index(vec![source("src", &[], &filler(20, "ref"))]),
        Arc::new(InMemoryLibrary::empty()),
        Arc::new(GatedStore {
            inner: InMemoryStore::new(),
            gate: Arc::clone(&gate),
        }),
    );

    let receipt = engine
        .upload(upload_request(student(), &filler(60, "own")))
        .unwrap();

    // Wait until the job is pinned in extraction.
    for _ in 0..1000 {
        if engine.poll_job(receipt.job_handle).unwrap().status == JobStage::Extracting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(
        engine.poll_job(receipt.job_handle).unwrap().status,
        JobStage::Extracting
    );

    engine.cancel_job(receipt.job_handle).unwrap();
    gate.add_permits(10);

    let view = wait_terminal(&engine, receipt.job_handle).await;
    assert_eq!(view.status, JobStage::Failed);
    assert_eq!(view.error.unwrap().kind, JobErrorKind::Canceled);
    assert_eq!(
        engine.submission(receipt.submission_id).unwrap().state,
        SubmissionState::AnalysisFailed
    );

    // Terminal jobs reject further cancellation.
    assert!(engine.cancel_job(receipt.job_handle).is_err());
}

// ─── Recommendations ────────────────────────────────────────────────

#[tokio::test]
async fn flagged_result_carries_ranked_recommendations() {
    use chrono::NaiveDate;

    let copied = filler(30, "copied");
    let library = InMemoryLibrary::new(vec![
        LibraryEntry {
            title: "Journal of Machine Learning Research - Vol 27".to_string(),
            kind: SourceKind::Journal,
            topics: vec!["machine-learning".to_string()],
            published: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
        },
        LibraryEntry {
            title: "Already Cited Paper".to_string(),
            kind: SourceKind::Article,
            topics: vec!["machine-learning".to_string()],
            published: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
        },
        LibraryEntry {
            title: "Unrelated Botany Quarterly".to_string(),
            kind: SourceKind::Journal,
            topics: vec!["botany".to_string()],
            published: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        },
    ]);
    let engine = Engine::new(
        Config::minimal(),
        corpus_index(vec![source(
            "Wikipedia - Machine Learning",
            &["machine-learning"],
            &copied,
        )]),
        Arc::new(library),
        Arc::new(InMemoryStore::new()),
    );

    let mut request = upload_request(student(), &format!("{} {}", copied, filler(70, "own")));
    request.cited = vec!["Already Cited Paper".to_string()];
    let receipt = engine.upload(request).unwrap();
    let view = wait_terminal(&engine, receipt.job_handle).await;

    let result = view.result.unwrap();
    assert!(result.flagged);
    let titles: Vec<&str> = result
        .recommendations
        .iter()
        .map(|r| r.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Journal of Machine Learning Research - Vol 27"]);
}

// ─── Determinism ────────────────────────────────────────────────────

#[tokio::test]
async fn analysis_is_deterministic_for_a_fixed_snapshot() {
    let copied = filler(25, "copied");
    let engine = engine_with(vec![
        source("alpha", &[], &copied),
        source("beta", &[], &filler(25, "beta")),
    ]);

    let body = format!("{} {} {}", filler(30, "pre"), copied, filler(30, "post"));
    let reporter = integrity_harness::progress::NoProgress;

    let first = engine
        .analyze_once(body.as_bytes(), "txt", &[], &reporter)
        .await
        .unwrap();
    for _ in 0..3 {
        let again = engine
            .analyze_once(body.as_bytes(), "txt", &[], &reporter)
            .await
            .unwrap();
        assert_eq!(first.spans.len(), again.spans.len());
        assert!((first.overall - again.overall).abs() < f64::EPSILON);
        for (a, b) in first.spans.iter().zip(again.spans.iter()) {
            assert_eq!(a.start, b.start);
            assert_eq!(a.end, b.end);
            assert_eq!(a.source_id, b.source_id);
            assert!((a.ratio - b.ratio).abs() < f64::EPSILON);
        }
    }
}

// ─── Corpus reload ──────────────────────────────────────────────────

#[tokio::test]
async fn corpus_reload_swaps_the_snapshot() {
    let dir = tempfile::TempDir::new().unwrap();
    let corpus_path = dir.path().join("corpus.json");
    std::fs::write(
        &corpus_path,
        serde_json::json!([
            { "source_id": "one", "kind": "web", "topics": [], "text": "a b c d e f" }
        ])
        .to_string(),
    )
    .unwrap();

    let mut cfg = Config::minimal();
    cfg.corpus = Some(CorpusFileConfig {
        path: corpus_path.clone(),
    });
    let engine = Engine::from_config(cfg).unwrap();

    std::fs::write(
        &corpus_path,
        serde_json::json!([
            { "source_id": "one", "kind": "web", "topics": [], "text": "a b c d e f" },
            { "source_id": "two", "kind": "journal", "topics": [], "text": "g h i j k l" }
        ])
        .to_string(),
    )
    .unwrap();

    assert_eq!(engine.reload_corpus().unwrap(), 2);
}
