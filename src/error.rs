//! Error types for the formgate library.
//!
//! Two distinct layers reflect two distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the job cannot proceed at all (malformed
//!   PDF, unknown job id, the work-queue handoff failed). Returned as
//!   `Err(IngestError)` from the top-level [`crate::job::JobManager`] calls.
//!
//! * Per-chunk failures — **Non-fatal**: one chunk's analysis or persistence
//!   failed but the other chunks are fine. These are recorded as data inside
//!   [`crate::model::ChunkOutcome`] and roll up into a `Partial` or `Failed`
//!   job status rather than aborting the whole document.
//!
//! The collaborator-facing sub-taxonomies ([`SplitError`], [`AnalysisError`],
//! [`StoreError`]) are separate enums so callers can match on exactly the
//! failure class they care about — in particular `RateLimitExceeded` must
//! stay distinguishable from a hard analyzer error, because an HTTP layer
//! above maps the former to 429 and the latter to 5xx.
//!
//! Display strings are the user-visible boundary text: they carry a
//! sanitized reason, never an internal dump.

use thiserror::Error;

/// Failures while cutting a document into page-range chunks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SplitError {
    /// The requested range reaches outside the document.
    #[error("Page range {start}-{end} is out of bounds (document has {total} pages)")]
    PageOutOfRange {
        start: usize,
        end: usize,
        total: usize,
    },

    /// `start > end` — the boundary itself is nonsense.
    #[error("Invalid page range: start {start} > end {end}")]
    InvalidRange { start: usize, end: usize },

    /// The input bytes could not be parsed as a PDF at all.
    #[error("Malformed PDF: {0}")]
    Malformed(String),

    /// Re-serialising the extracted pages failed.
    #[error("Failed to write chunk for pages {start}-{end}: {detail}")]
    WriteFailed {
        start: usize,
        end: usize,
        detail: String,
    },
}

/// Failures from the analysis collaborator and the gateway around it.
///
/// `RateLimited` is what the collaborator raises on a single throttled call;
/// `RateLimitExceeded` is what the gateway returns once its retry budget for
/// throttling is spent. Everything else is `Failed` and is never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// The collaborator returned a 429-equivalent response for one call.
    #[error("Analyzer is throttling (429)")]
    RateLimited {
        /// Server-specified delay, when the collaborator provided one.
        retry_after_secs: Option<u64>,
    },

    /// Every retry attempt was answered with throttling.
    ///
    /// Maps to 429 at the HTTP boundary, not 500 — the job is retryable
    /// later, the analyzer is just over capacity right now.
    #[error("Analyzer rate limit still exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// A hard, non-retryable collaborator error.
    #[error("Analysis failed with status {status_code}: {message}")]
    Failed { status_code: u16, message: String },
}

impl AnalysisError {
    /// True when the error is worth another attempt (throttling only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::RateLimited { .. })
    }
}

/// Failures from the document-store collaborator.
///
/// A transient connectivity failure and a caller bug (missing partition key)
/// are different things: the former is retried or tolerated fail-open, the
/// latter should fail loudly in development.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store call itself failed (connectivity, timeout, 5xx).
    #[error("Document store {operation} failed: {reason}")]
    Transient { operation: String, reason: String },

    /// The caller omitted the partition key — a programmer error.
    #[error("Document store {operation} called without a partition key")]
    MissingPartitionKey { operation: String },
}

impl StoreError {
    /// Shorthand for the common transient case.
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Why one chunk failed while the rest of the job carried on.
///
/// A store failure while persisting a successfully analysed chunk counts as
/// a chunk failure too — a result that was never written is a result the
/// system does not have.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkFailure {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Persisting the chunk result failed: {0}")]
    Persist(#[from] StoreError),
}

/// All fatal errors returned by the formgate library.
///
/// Per-chunk failures are recorded in [`crate::model::ChunkOutcome`] and are
/// deliberately absent here.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Splitting the document failed before any chunk could be produced.
    #[error(transparent)]
    Split(#[from] SplitError),

    /// An analysis failure escalated to the job level.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// A store failure on the job record itself (not a chunk record).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No job with this id exists.
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// A status transition that the state machine forbids.
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The work-queue collaborator rejected the handoff.
    #[error("Work queue handoff failed: {reason}")]
    QueueError { reason: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_exceeded_is_distinct_from_failed() {
        let throttled = AnalysisError::RateLimitExceeded { attempts: 5 };
        let hard = AnalysisError::Failed {
            status_code: 500,
            message: "boom".into(),
        };
        assert!(!throttled.is_retryable());
        assert!(!hard.is_retryable());
        assert_ne!(throttled, hard);
        assert!(throttled.to_string().contains("5 attempts"));
    }

    #[test]
    fn rate_limited_is_retryable() {
        let e = AnalysisError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn split_error_display() {
        let e = SplitError::PageOutOfRange {
            start: 4,
            end: 9,
            total: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("4-9"), "got: {msg}");
        assert!(msg.contains("5 pages"), "got: {msg}");
    }

    #[test]
    fn store_error_classes() {
        let transient = StoreError::transient("query", "connection reset");
        let bug = StoreError::MissingPartitionKey {
            operation: "upsert".into(),
        };
        assert!(transient.to_string().contains("connection reset"));
        assert!(bug.to_string().contains("partition key"));
    }

    #[test]
    fn ingest_error_wraps_subtypes() {
        let e: IngestError = SplitError::InvalidRange { start: 3, end: 1 }.into();
        assert!(e.to_string().contains("start 3 > end 1"));

        let e: IngestError = AnalysisError::RateLimitExceeded { attempts: 3 }.into();
        assert!(e.to_string().contains("3 attempts"));
    }
}
