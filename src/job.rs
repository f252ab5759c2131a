//! Job orchestration: the composition root and the lifecycle state machine.
//!
//! [`JobManager`] owns one instance of each pipeline component and threads
//! them through a document's processing:
//!
//! ```text
//! create ──▶ enqueue ──▶ process
//!                          │  detect + split
//!                          │  per chunk: dedup check ▸ analyze ▸ persist
//!                          │  progress updates as chunks complete
//!                          └─ final status + terminal notification
//! ```
//!
//! Components are constructed once and passed in explicitly — no process
//! globals, no reset-for-testing hooks; tests build a fresh manager with
//! fresh collaborators instead.
//!
//! Chunks fan out concurrently and complete in any order. Per-chunk records
//! are tagged `(form_number, total_forms)` so a whole document is
//! reassembled by enumerating form numbers, never by arrival order. A
//! single chunk's failure never aborts the job; it shifts the final status
//! toward `Partial` or `Failed`.

use crate::analyzer::{AnalyzeInput, Analyzer};
use crate::config::ProcessingConfig;
use crate::error::{ChunkFailure, IngestError};
use crate::model::{
    AnalysisResult, ChunkOutcome, FormChunk, JobProgress, JobStatus, ProcessingJob,
};
use crate::notify::{JobEvent, Notifier, WorkQueue};
use crate::pipeline::boundary::DetectOptions;
use crate::pipeline::gateway::AnalysisGateway;
use crate::pipeline::idempotency::{content_hash, generate_key, IdempotencyEngine};
use crate::pipeline::split::SourceDocument;
use crate::store::{BlobStore, DocumentStore, StoredDocument};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrates one document's processing end to end.
pub struct JobManager {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    queue: Arc<dyn WorkQueue>,
    gateway: AnalysisGateway,
    idempotency: IdempotencyEngine,
    config: ProcessingConfig,
}

impl JobManager {
    /// Composition root: wire the collaborators together once.
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        queue: Arc<dyn WorkQueue>,
        config: ProcessingConfig,
    ) -> Self {
        let gateway = AnalysisGateway::new(analyzer, &config);
        let idempotency = IdempotencyEngine::new(Arc::clone(&store));
        Self {
            store,
            notifier,
            queue,
            gateway,
            idempotency,
            config,
        }
    }

    // ── Lifecycle operations ─────────────────────────────────────────

    /// Allocate a job id and persist the Pending record.
    pub async fn create(&self, source_id: &str) -> Result<ProcessingJob, IngestError> {
        let job = ProcessingJob {
            job_id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            model_id: self.config.model_id.clone(),
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            retry_count: 0,
            max_retries: self.config.max_job_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        self.persist(&job).await?;
        info!(job_id = %job.job_id, source_id, "job created");
        Ok(job)
    }

    /// Fetch a job record.
    pub async fn get(&self, job_id: &str, source_id: &str) -> Result<ProcessingJob, IngestError> {
        let doc = self.store.get(job_id, source_id).await?;
        doc.and_then(|d| d.job).ok_or_else(|| IngestError::JobNotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Transition Pending → Queued and hand the job to the work queue.
    pub async fn enqueue(&self, job_id: &str, source_id: &str) -> Result<ProcessingJob, IngestError> {
        let mut job = self.get(job_id, source_id).await?;
        transition(&mut job, JobStatus::Queued)?;
        self.persist(&job).await?;
        self.queue.push(&job.job_id).await?;
        debug!(job_id, "job queued");
        Ok(job)
    }

    /// Process a document whose bytes live in a blob store.
    pub async fn process_from_blob(
        &self,
        job_id: &str,
        source_id: &str,
        blob_url: &str,
        blobs: &dyn BlobStore,
    ) -> Result<ProcessingJob, IngestError> {
        let bytes = blobs.fetch(blob_url).await?;
        self.process(job_id, source_id, bytes).await
    }

    /// Run the full pipeline for one document.
    ///
    /// Returns the final job record — including `Partial` and `Failed`
    /// outcomes, which are results, not errors. `Err` is reserved for
    /// faults that prevent the job from being driven at all: unknown job,
    /// malformed PDF, or a store failure on the job record itself.
    pub async fn process(
        &self,
        job_id: &str,
        source_id: &str,
        bytes: Vec<u8>,
    ) -> Result<ProcessingJob, IngestError> {
        let mut job = self.get(job_id, source_id).await?;
        transition(&mut job, JobStatus::Processing)?;
        job.started_at = Some(Utc::now());
        self.persist(&job).await?;
        info!(job_id, source_id, "processing started");

        // ── Split into chunks ────────────────────────────────────────
        let document = match SourceDocument::from_bytes(source_id, bytes) {
            Ok(doc) => doc,
            Err(e) => {
                self.fail_with(&mut job, e.to_string()).await?;
                return Err(e.into());
            }
        };
        let opts = DetectOptions::from(&self.config);
        let (boundaries, chunks) = match document.detect_and_split(&opts) {
            Ok(split) => split,
            Err(e) => {
                self.fail_with(&mut job, e.to_string()).await?;
                return Err(e.into());
            }
        };
        let total = chunks.len();
        info!(
            job_id,
            forms = total,
            pages = document.page_count(),
            method = ?boundaries.first().map(|b| b.method),
            "document split"
        );

        job.progress = JobProgress::new(0, total);
        self.persist(&job).await?;

        // ── Fan chunks out; collect as they complete ─────────────────
        let mut pending = stream::iter(chunks.into_iter().enumerate().map(|(idx, chunk)| {
            self.process_chunk(job_id, source_id, idx + 1, total, chunk)
        }))
        .buffer_unordered(self.config.analysis_concurrency);

        let mut outcomes: Vec<ChunkOutcome> = Vec::with_capacity(total);
        let mut processed = 0usize;
        while let Some(outcome) = pending.next().await {
            if outcome.succeeded() {
                processed += 1;
            }
            debug!(
                job_id,
                form = outcome.form_number,
                ok = outcome.succeeded(),
                deduplicated = outcome.deduplicated,
                "chunk attempted"
            );
            outcomes.push(outcome);
            job.progress = JobProgress::new(processed, total);
            self.persist(&job).await?;
        }
        drop(pending);

        // ── Final status ─────────────────────────────────────────────
        job.result = merge_outcomes(&self.config.model_id, &mut outcomes);
        let first_failure = outcomes
            .iter()
            .find_map(|o| o.result.as_ref().err())
            .map(ChunkFailure::to_string);

        if processed == total {
            transition(&mut job, JobStatus::Completed)?;
            job.completed_at = Some(Utc::now());
            self.persist(&job).await?;
            self.notifier
                .notify(&JobEvent::JobCompleted {
                    job_id: job.job_id.clone(),
                    source_id: job.source_id.clone(),
                    progress: job.progress,
                })
                .await;
        } else if processed > 0 {
            transition(&mut job, JobStatus::Partial)?;
            job.completed_at = Some(Utc::now());
            job.error = first_failure;
            self.persist(&job).await?;
            self.notifier
                .notify(&JobEvent::JobPartial {
                    job_id: job.job_id.clone(),
                    source_id: job.source_id.clone(),
                    progress: job.progress,
                })
                .await;
        } else {
            let reason = first_failure.unwrap_or_else(|| "no chunks processed".to_string());
            self.fail_with(&mut job, reason).await?;
        }

        info!(
            job_id,
            status = job.status.as_str(),
            processed,
            total,
            "processing finished"
        );
        Ok(job)
    }

    /// Mark a job failed with `reason`, dead-lettering it once its retry
    /// ceiling is exceeded.
    pub async fn fail(
        &self,
        job_id: &str,
        source_id: &str,
        reason: impl Into<String>,
    ) -> Result<ProcessingJob, IngestError> {
        let mut job = self.get(job_id, source_id).await?;
        self.fail_with(&mut job, reason.into()).await?;
        Ok(job)
    }

    // ── Internals ────────────────────────────────────────────────────

    /// One chunk: dedup check, analyze, persist. Never returns `Err` —
    /// every failure mode becomes data in the outcome.
    async fn process_chunk(
        &self,
        job_id: &str,
        source_id: &str,
        form_number: usize,
        total_forms: usize,
        chunk: FormChunk,
    ) -> ChunkOutcome {
        let key = generate_key(
            source_id,
            &self.config.model_id,
            self.config.pages_per_form,
            &self.config.processing_version,
            Some(&content_hash(&chunk.bytes)),
        );

        if let Some(prior) = self.idempotency.check_duplicate(&key, source_id).await {
            if let Some(result) = prior.result {
                return ChunkOutcome {
                    form_number,
                    boundary: chunk.boundary,
                    result: Ok(result),
                    deduplicated: true,
                };
            }
        }

        let result = match self
            .gateway
            .analyze(AnalyzeInput::Bytes(&chunk.bytes), &self.config.model_id)
            .await
        {
            Ok(result) => {
                let record = StoredDocument::chunk_record(
                    format!("{job_id}:form{form_number}"),
                    source_id,
                    key,
                    form_number,
                    total_forms,
                    result.clone(),
                );
                match self.store.upsert(record).await {
                    Ok(()) => Ok(result),
                    Err(e) => {
                        warn!(job_id, form_number, error = %e, "chunk result lost to store failure");
                        Err(ChunkFailure::Persist(e))
                    }
                }
            }
            Err(e) => {
                warn!(job_id, form_number, error = %e, "chunk analysis failed");
                Err(ChunkFailure::Analysis(e))
            }
        };

        ChunkOutcome {
            form_number,
            boundary: chunk.boundary,
            result,
            deduplicated: false,
        }
    }

    async fn fail_with(&self, job: &mut ProcessingJob, reason: String) -> Result<(), IngestError> {
        transition(job, JobStatus::Failed)?;
        job.retry_count += 1;
        job.completed_at = Some(Utc::now());
        job.error = Some(reason.clone());

        if job.retry_count > job.max_retries {
            transition(job, JobStatus::DeadLetter)?;
            self.persist(job).await?;
            warn!(job_id = %job.job_id, retry_count = job.retry_count, "job dead-lettered");
            self.notifier
                .notify(&JobEvent::JobDeadLettered {
                    job_id: job.job_id.clone(),
                    source_id: job.source_id.clone(),
                    retry_count: job.retry_count,
                    reason,
                })
                .await;
        } else {
            self.persist(job).await?;
            self.notifier
                .notify(&JobEvent::JobFailed {
                    job_id: job.job_id.clone(),
                    source_id: job.source_id.clone(),
                    reason,
                })
                .await;
        }
        Ok(())
    }

    async fn persist(&self, job: &ProcessingJob) -> Result<(), IngestError> {
        self.store.upsert(StoredDocument::job_record(job)).await?;
        Ok(())
    }
}

/// Apply a status change, enforcing the forward-only state machine.
fn transition(job: &mut ProcessingJob, to: JobStatus) -> Result<(), IngestError> {
    if !job.status.can_transition(to) {
        return Err(IngestError::InvalidTransition {
            from: job.status.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    job.status = to;
    Ok(())
}

/// Merge per-chunk results into one whole-document view.
///
/// Chunks are enumerated by form number (sorted here — arrival order is
/// meaningless). A single-chunk job keeps its fields as-is; with several
/// chunks each contributes under a `form<N>_` prefix. The aggregate
/// confidence is the mean of the chunk aggregates that exist.
fn merge_outcomes(model_id: &str, outcomes: &mut [ChunkOutcome]) -> Option<AnalysisResult> {
    outcomes.sort_by_key(|o| o.form_number);
    let successes: Vec<(usize, &AnalysisResult)> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok().map(|r| (o.form_number, r)))
        .collect();
    if successes.is_empty() {
        return None;
    }
    if successes.len() == 1 && outcomes.len() == 1 {
        return Some(successes[0].1.clone());
    }

    let mut fields = BTreeMap::new();
    let mut field_confidence = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut confidences = Vec::new();
    let mut pages_analyzed = 0;
    let mut recognized_count = 0;

    for (form_number, result) in &successes {
        for (name, value) in &result.fields {
            fields.insert(format!("form{form_number}_{name}"), value.clone());
        }
        for (name, conf) in &result.field_confidence {
            field_confidence.insert(format!("form{form_number}_{name}"), *conf);
        }
        if let Some(c) = result.aggregate_confidence {
            confidences.push(c);
        }
        if let Some(ref w) = result.warning {
            warnings.push(format!("form {form_number}: {w}"));
        }
        pages_analyzed += result.pages_analyzed;
        recognized_count += result.recognized_count;
    }

    Some(AnalysisResult {
        model_id: model_id.to_string(),
        doc_type: None,
        aggregate_confidence: if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        },
        fields,
        field_confidence,
        pages_analyzed,
        recognized_count,
        warning: if warnings.is_empty() {
            None
        } else {
            Some(warnings.join("; "))
        },
    })
}
