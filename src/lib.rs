//! # formgate
//!
//! Ingest multi-form PDF batches: split them into individual forms, fan the
//! forms out to a field-extraction model under a concurrency ceiling, and
//! track each document through an explicit job lifecycle.
//!
//! ## Why this crate?
//!
//! Scanned form batches arrive as one PDF containing many logical documents.
//! Feeding the whole batch to an analysis model mixes fields from unrelated
//! forms, and naive fan-out trips the model's rate limits. This crate cuts
//! the batch at detected form boundaries, analyses each form behind a
//! shared admission gate with throttle-aware retry, deduplicates repeat
//! submissions by content fingerprint, and records progress so a crashed or
//! partial run is visible and resumable.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF batch
//!  │
//!  ├─ 1. Detect   form boundaries: page-number signals → header match → fixed
//!  ├─ 2. Split    one standalone PDF chunk per boundary (lopdf)
//!  ├─ 3. Dedup    SHA-256 idempotency key; completed duplicates reuse results
//!  ├─ 4. Analyze  bounded-concurrency gateway with 429 backoff-retry
//!  ├─ 5. Persist  per-chunk records + job header in the document store
//!  └─ 6. Notify   terminal event: completed / partial / failed / dead-letter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formgate::{
//!     JobManager, MemoryDocumentStore, NoopNotifier, NoopWorkQueue, ProcessingConfig,
//! };
//! use std::sync::Arc;
//!
//! # fn analyzer() -> Arc<dyn formgate::Analyzer> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProcessingConfig::builder()
//!         .model_id("prebuilt-invoice")
//!         .pages_per_form(2)
//!         .build()?;
//!     let manager = JobManager::new(
//!         analyzer(),
//!         Arc::new(MemoryDocumentStore::new()),
//!         Arc::new(NoopNotifier),
//!         Arc::new(NoopWorkQueue),
//!         config,
//!     );
//!
//!     let bytes = std::fs::read("batch.pdf")?;
//!     let job = manager.create("batch.pdf").await?;
//!     let job = manager.process(&job.job_id, "batch.pdf", bytes).await?;
//!     println!("{}: {}/{} forms", job.status.as_str(),
//!         job.progress.processed, job.progress.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formgate` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! formgate = { version = "0.3", default-features = false }
//! ```
//!
//! ## Collaborators
//!
//! The analysis model, document store, blob store, notifier, and work queue
//! are traits ([`Analyzer`], [`DocumentStore`], [`BlobStore`], [`Notifier`],
//! [`WorkQueue`]); deployments supply implementations for their backends.
//! In-memory reference implementations back the tests and the CLI.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyzer;
pub mod config;
pub mod error;
pub mod job;
pub mod limiter;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyzer::{AnalyzeInput, Analyzer, AnalyzerResponse, RecognizedForm};
pub use config::{ProcessingConfig, ProcessingConfigBuilder};
pub use error::{AnalysisError, ChunkFailure, IngestError, SplitError, StoreError};
pub use job::JobManager;
pub use limiter::{Admission, BucketPolicy, RateLimiter};
pub use model::{
    AnalysisResult, BoundaryMethod, ChunkOutcome, FieldValue, FormBoundary, FormChunk,
    JobProgress, JobStatus, ProcessingJob,
};
pub use notify::{JobEvent, Notifier, NoopNotifier, NoopWorkQueue, WorkQueue};
pub use pipeline::boundary::{detect_boundaries, DetectOptions};
pub use pipeline::gateway::AnalysisGateway;
pub use pipeline::idempotency::{content_hash, generate_key, IdempotencyEngine};
pub use pipeline::split::SourceDocument;
pub use store::{
    BlobStore, DocumentFilter, DocumentStore, MemoryBlobStore, MemoryDocumentStore,
    StoredDocument,
};
