//! End-to-end pipeline tests: real PDFs through detection, splitting, the
//! analysis gateway, idempotency, and the job lifecycle, with in-memory
//! collaborators standing in for the model, store, queue, and notifier.

use async_trait::async_trait;
use formgate::{
    AnalysisError, AnalyzeInput, Analyzer, AnalyzerResponse, BoundaryMethod, DocumentFilter,
    DocumentStore, FieldValue, IngestError, JobEvent, JobManager, JobStatus, MemoryDocumentStore,
    Notifier, NoopWorkQueue, ProcessingConfig, RecognizedForm, SourceDocument, StoreError,
    StoredDocument, WorkQueue,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── PDF fixtures ─────────────────────────────────────────────────────────

/// Build a minimal valid PDF with one text line per page.
fn build_pdf(page_texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in page_texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 750.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode page content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialise fixture PDF");
    bytes
}

fn five_page_batch() -> Vec<u8> {
    build_pdf(&["one", "two", "three", "four", "five"])
}

// ── Collaborator doubles ─────────────────────────────────────────────────

/// Succeeds on every call except those whose 1-based call index appears in
/// `fail_calls` (hard 422) or `throttle_calls` (429).
struct TestAnalyzer {
    calls: AtomicUsize,
    fail_calls: Vec<usize>,
    throttle_calls: Vec<usize>,
}

impl TestAnalyzer {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: vec![],
            throttle_calls: vec![],
        })
    }

    fn failing_call(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: vec![n],
            throttle_calls: vec![],
        })
    }

    fn throttling_call(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: vec![],
            throttle_calls: vec![n],
        })
    }

    fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: (1..=100).collect(),
            throttle_calls: vec![],
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for TestAnalyzer {
    async fn analyze(
        &self,
        _input: AnalyzeInput<'_>,
        _model_id: &str,
    ) -> Result<AnalyzerResponse, AnalysisError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_calls.contains(&call) {
            return Err(AnalysisError::Failed {
                status_code: 422,
                message: "unprocessable content".into(),
            });
        }
        if self.throttle_calls.contains(&call) {
            return Err(AnalysisError::RateLimited {
                retry_after_secs: None,
            });
        }
        Ok(AnalyzerResponse {
            recognized_forms: vec![RecognizedForm {
                doc_type: Some("claim_form".into()),
                confidence: Some(0.9),
                fields: BTreeMap::from([(
                    "claimant".to_string(),
                    FieldValue::String("J. Doe".into()),
                )]),
                field_confidence: BTreeMap::from([("claimant".to_string(), 0.85)]),
                page_numbers: vec![1],
            }],
            pages_analyzed: 1,
        })
    }
}

/// Records every delivered event.
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &JobEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Records every pushed job id.
#[derive(Default)]
struct RecordingQueue {
    pushed: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn push(&self, job_id: &str) -> Result<(), IngestError> {
        self.pushed.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

struct Harness {
    manager: JobManager,
    analyzer: Arc<TestAnalyzer>,
    store: Arc<MemoryDocumentStore>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(analyzer: Arc<TestAnalyzer>, config: ProcessingConfig) -> Harness {
    let store = Arc::new(MemoryDocumentStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = JobManager::new(
        analyzer.clone(),
        store.clone(),
        notifier.clone(),
        Arc::new(NoopWorkQueue),
        config,
    );
    Harness {
        manager,
        analyzer,
        store,
        notifier,
    }
}

fn config() -> ProcessingConfig {
    ProcessingConfig::builder()
        .pages_per_form(2)
        .initial_backoff_ms(500)
        .build()
        .unwrap()
}

// ── Splitting through the public API ─────────────────────────────────────

#[test]
fn five_pages_at_two_per_form_yields_three_chunks() {
    let doc = SourceDocument::from_bytes("batch.pdf", five_page_batch()).unwrap();
    let opts = formgate::DetectOptions::from(&config());
    let (boundaries, chunks) = doc.detect_and_split(&opts).unwrap();

    let ranges: Vec<(usize, usize)> = boundaries
        .iter()
        .map(|b| (b.start_page, b.end_page))
        .collect();
    assert_eq!(ranges, vec![(1, 2), (3, 4), (5, 5)]);
    assert_eq!(chunks.len(), 3);

    // Each chunk is itself a valid PDF of the declared size.
    for chunk in &chunks {
        let reparsed = SourceDocument::from_bytes("chunk", chunk.bytes.clone()).unwrap();
        assert_eq!(reparsed.page_count(), chunk.page_count());
    }
}

#[test]
fn page_number_signals_override_the_fixed_fallback() {
    let bytes = build_pdf(&[
        "Claim Form Page 1 of 3",
        "Claim Form Page 2 of 3",
        "Claim Form Page 3 of 3",
        "Receipt Page 1 of 1",
    ]);
    let doc = SourceDocument::from_bytes("batch.pdf", bytes).unwrap();
    let (boundaries, _) = doc
        .detect_and_split(&formgate::DetectOptions::from(&config()))
        .unwrap();
    assert_eq!(boundaries.len(), 2);
    assert!(boundaries.iter().all(|b| b.method == BoundaryMethod::PageNumber));
    assert_eq!(boundaries[0].end_page, 3);
}

// ── Full job runs ────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_batch_completes_with_per_chunk_records() {
    let h = harness(TestAnalyzer::ok(), config());
    let job = h.manager.create("batch.pdf").await.unwrap();
    let job = h
        .manager
        .process(&job.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 3);
    assert_eq!(job.progress.total, 3);
    assert_eq!(job.progress.percent, 100.0);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(h.analyzer.call_count(), 3);

    // One record per chunk, tagged with its position.
    for form in 1..=3usize {
        let record = h
            .store
            .get(&format!("{}:form{form}", job.job_id), "batch.pdf")
            .await
            .unwrap()
            .expect("chunk record persisted");
        assert_eq!(record.form_number, Some(form));
        assert_eq!(record.total_forms, Some(3));
        assert!(record.idempotency_key.is_some());
    }

    // Merged result keys fields by form number.
    let merged = job.result.expect("merged result");
    assert!(merged.fields.contains_key("form1_claimant"));
    assert!(merged.fields.contains_key("form3_claimant"));
    assert_eq!(merged.pages_analyzed, 3);

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status(), JobStatus::Completed);
    assert_eq!(events[0].job_id(), job.job_id);
}

#[tokio::test(start_paused = true)]
async fn throttled_chunk_is_retried_once_and_job_completes() {
    let h = harness(TestAnalyzer::throttling_call(2), config());
    let job = h.manager.create("batch.pdf").await.unwrap();
    let job = h
        .manager
        .process(&job.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    // 3 chunks + exactly one retry for the throttled call.
    assert_eq!(h.analyzer.call_count(), 4);
}

#[tokio::test]
async fn resubmission_reuses_results_without_analyzer_calls() {
    let h = harness(TestAnalyzer::ok(), config());
    let bytes = five_page_batch();

    let first = h.manager.create("batch.pdf").await.unwrap();
    let first = h
        .manager
        .process(&first.job_id, "batch.pdf", bytes.clone())
        .await
        .unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(h.analyzer.call_count(), 3);

    // Same bytes, same source, same settings: every chunk is a duplicate.
    let second = h.manager.create("batch.pdf").await.unwrap();
    let second = h
        .manager
        .process(&second.job_id, "batch.pdf", bytes)
        .await
        .unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(h.analyzer.call_count(), 3, "no fresh analyzer calls");
    assert!(second.result.is_some());
}

#[tokio::test]
async fn changed_content_defeats_deduplication() {
    let h = harness(TestAnalyzer::ok(), config());

    let first = h.manager.create("batch.pdf").await.unwrap();
    h.manager
        .process(&first.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();
    let after_first = h.analyzer.call_count();

    // A rescanned batch with different content must be re-analysed.
    let other = build_pdf(&["alpha", "beta", "gamma", "delta", "epsilon"]);
    let second = h.manager.create("batch.pdf").await.unwrap();
    h.manager
        .process(&second.job_id, "batch.pdf", other)
        .await
        .unwrap();
    assert_eq!(h.analyzer.call_count(), after_first + 3);
}

#[tokio::test]
async fn one_failed_chunk_yields_partial() {
    let h = harness(TestAnalyzer::failing_call(2), config());
    let job = h.manager.create("batch.pdf").await.unwrap();
    let job = h
        .manager
        .process(&job.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Partial);
    assert_eq!(job.progress.processed, 2);
    assert_eq!(job.progress.total, 3);
    assert!(job.error.as_deref().unwrap().contains("422"));
    // Partial still carries the successful chunks' merged result.
    assert!(job.result.is_some());

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status(), JobStatus::Partial);
}

#[tokio::test]
async fn all_chunks_failing_yields_failed_with_retry_counted() {
    let h = harness(TestAnalyzer::always_failing(), config());
    let job = h.manager.create("batch.pdf").await.unwrap();
    let job = h
        .manager
        .process(&job.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
    assert!(job.result.is_none());

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], JobEvent::JobFailed { .. }));
}

/// Delegates to an in-memory store but refuses to write chunk-result
/// records. Job-header writes go through so the lifecycle stays observable.
struct ChunkRejectingStore {
    inner: MemoryDocumentStore,
}

#[async_trait]
impl DocumentStore for ChunkRejectingStore {
    async fn upsert(&self, doc: StoredDocument) -> Result<(), StoreError> {
        if doc.form_number.is_some() {
            return Err(StoreError::transient("upsert", "chunk write refused"));
        }
        self.inner.upsert(doc).await
    }

    async fn get(&self, id: &str, partition_key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.get(id, partition_key).await
    }

    async fn query(
        &self,
        filter: DocumentFilter,
        partition_key: Option<&str>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(filter, partition_key).await
    }
}

#[tokio::test]
async fn unpersisted_chunk_results_count_as_failures() {
    let analyzer = TestAnalyzer::ok();
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = JobManager::new(
        analyzer.clone(),
        Arc::new(ChunkRejectingStore {
            inner: MemoryDocumentStore::new(),
        }),
        notifier.clone(),
        Arc::new(NoopWorkQueue),
        config(),
    );

    let job = manager.create("batch.pdf").await.unwrap();
    let job = manager
        .process(&job.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();

    // Every analysis succeeded, but none of the results were written:
    // a result the store never got is a result the system does not have.
    assert_eq!(analyzer.call_count(), 3);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress.processed, 0);
    assert!(job.error.as_deref().unwrap().contains("chunk write refused"));

    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], JobEvent::JobFailed { .. }));
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_job() {
    let config = ProcessingConfig::builder()
        .pages_per_form(2)
        .max_job_retries(0)
        .build()
        .unwrap();
    let h = harness(TestAnalyzer::always_failing(), config);
    let job = h.manager.create("batch.pdf").await.unwrap();
    let job = h
        .manager
        .process(&job.job_id, "batch.pdf", five_page_batch())
        .await
        .unwrap();

    // retry_count 1 > max_retries 0: straight to the dead-letter state.
    assert_eq!(job.status, JobStatus::DeadLetter);
    assert!(job.status.is_terminal());

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert!(
        matches!(
            events[0],
            JobEvent::JobDeadLettered { retry_count: 1, .. }
        ),
        "dead-lettering must be its own event kind, got {:?}",
        events[0]
    );
}

#[tokio::test]
async fn malformed_input_fails_the_job_and_returns_the_error() {
    let h = harness(TestAnalyzer::ok(), config());
    let job = h.manager.create("batch.pdf").await.unwrap();
    let err = h
        .manager
        .process(&job.job_id, "batch.pdf", b"not a pdf".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Split(_)));

    let job = h.manager.get(&job.job_id, "batch.pdf").await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    assert_eq!(h.analyzer.call_count(), 0);
}

#[test]
fn chunks_written_to_disk_reload_as_standalone_pdfs() {
    let doc = SourceDocument::from_bytes("batch.pdf", five_page_batch()).unwrap();
    let (_, chunks) = doc
        .detect_and_split(&formgate::DetectOptions::from(&config()))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    for (i, chunk) in chunks.iter().enumerate() {
        let path = dir.path().join(format!("form{}.pdf", i + 1));
        std::fs::write(&path, &chunk.bytes).unwrap();

        let reloaded = std::fs::read(&path).unwrap();
        let reparsed = SourceDocument::from_bytes("form", reloaded).unwrap();
        assert_eq!(reparsed.page_count(), chunk.page_count());
    }
}

// ── Lifecycle edges ──────────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_hands_the_job_to_the_queue_once() {
    let store = Arc::new(MemoryDocumentStore::new());
    let queue = Arc::new(RecordingQueue::default());
    let manager = JobManager::new(
        TestAnalyzer::ok(),
        store,
        Arc::new(RecordingNotifier::default()),
        queue.clone(),
        config(),
    );

    let job = manager.create("batch.pdf").await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let job = manager.enqueue(&job.job_id, "batch.pdf").await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(*queue.pushed.lock().unwrap(), vec![job.job_id.clone()]);

    // Queued → Queued is not a legal move.
    let err = manager.enqueue(&job.job_id, "batch.pdf").await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidTransition { .. }));
}

#[tokio::test]
async fn unknown_job_and_wrong_partition_are_not_found() {
    let h = harness(TestAnalyzer::ok(), config());
    let err = h.manager.get("nope", "batch.pdf").await.unwrap_err();
    assert!(matches!(err, IngestError::JobNotFound { .. }));

    let job = h.manager.create("batch.pdf").await.unwrap();
    let err = h.manager.get(&job.job_id, "other.pdf").await.unwrap_err();
    assert!(matches!(err, IngestError::JobNotFound { .. }));
}
