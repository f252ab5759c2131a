//! Core data model: boundaries, chunks, typed field values, analysis
//! results, and the processing-job record.
//!
//! Everything here is plain data with serde derives — no I/O, no
//! collaborator handles. The one piece of behaviour that lives here is the
//! job state machine ([`JobStatus::can_transition`]): keeping it next to the
//! status enum makes the forward-only rule impossible to bypass by accident,
//! because [`crate::job::JobManager`] routes every status change through it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ChunkFailure;

// ── Boundaries and chunks ────────────────────────────────────────────────

/// How a form boundary was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMethod {
    /// "Page X of Y" style signals found in the page text.
    PageNumber,
    /// First-page header repeated with high Jaccard similarity.
    HeaderMatch,
    /// Fixed-size fallback partition.
    Fixed,
    /// Single-page document short-circuit.
    Single,
}

/// One logical form within a larger document: a 1-indexed, inclusive page
/// range plus how (and how confidently) it was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormBoundary {
    pub start_page: usize,
    pub end_page: usize,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    pub method: BoundaryMethod,
}

impl FormBoundary {
    pub fn new(start_page: usize, end_page: usize, confidence: f64, method: BoundaryMethod) -> Self {
        Self {
            start_page,
            end_page,
            confidence,
            method,
        }
    }

    /// Number of pages covered, inclusive on both ends.
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }
}

/// Check that `boundaries` are contiguous, non-overlapping, and cover
/// `[1, total_pages]` exactly.
///
/// Detection strategies construct boundaries this way already; the check
/// exists so the splitter can refuse a hand-built list that doesn't.
pub fn boundaries_cover_exactly(boundaries: &[FormBoundary], total_pages: usize) -> bool {
    let mut expected_start = 1;
    for b in boundaries {
        if b.start_page != expected_start || b.end_page < b.start_page {
            return false;
        }
        expected_start = b.end_page + 1;
    }
    expected_start == total_pages + 1
}

/// The bytes of one extracted form plus the boundary that owns them.
///
/// Transient: exists only for the duration of one analysis call, so it is
/// deliberately not serialisable.
#[derive(Debug, Clone)]
pub struct FormChunk {
    pub bytes: Vec<u8>,
    pub boundary: FormBoundary,
}

impl FormChunk {
    /// Declared page count, from the owning boundary.
    pub fn page_count(&self) -> usize {
        self.boundary.page_count()
    }
}

// ── Typed field values ───────────────────────────────────────────────────

/// A typed field extracted by the analyzer.
///
/// Tagged union instead of attribute probing: consumers match exhaustively
/// and the compiler flags any new variant they forgot to handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Number(f64),
    Date(NaiveDate),
    Currency { amount: f64, code: String },
    Array(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
    Null,
}

impl FieldValue {
    /// The string payload, if this is a `String` field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric payload for `Number` and `Currency` fields.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Currency { amount, .. } => Some(*amount),
            _ => None,
        }
    }
}

// ── Analysis results ─────────────────────────────────────────────────────

/// Normalized result of analysing one chunk.
///
/// Produced by [`crate::pipeline::gateway::AnalysisGateway`] from the raw
/// collaborator response; see that module for the field-prefixing rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub model_id: String,
    /// Document type reported by the model, when exactly one form was
    /// recognized.
    pub doc_type: Option<String>,
    /// Mean confidence across recognized forms that reported one.
    pub aggregate_confidence: Option<f64>,
    pub fields: BTreeMap<String, FieldValue>,
    pub field_confidence: BTreeMap<String, f64>,
    pub pages_analyzed: usize,
    pub recognized_count: usize,
    /// Non-fatal: set when the model recognized fewer sub-documents than
    /// pages it analysed.
    pub warning: Option<String>,
}

/// What happened to one chunk during job processing.
///
/// Chunks may complete out of order; `form_number` (1-indexed) is the
/// reassembly key, never arrival order.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub form_number: usize,
    pub boundary: FormBoundary,
    pub result: Result<AnalysisResult, ChunkFailure>,
    /// True when the result was reused from a completed duplicate rather
    /// than a fresh analyzer call.
    pub deduplicated: bool,
}

impl ChunkOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

// ── Job lifecycle ────────────────────────────────────────────────────────

/// Lifecycle status of a processing job.
///
/// ```text
/// Pending → Queued → Processing → {Completed | Partial | Failed}
///                                              Failed → DeadLetter
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    /// Some, but not all, chunks succeeded.
    Partial,
    Failed,
    /// Permanently abandoned after exceeding the retry ceiling.
    DeadLetter,
}

impl JobStatus {
    /// Forward-only transition rule. Terminal states accept nothing, except
    /// `Failed`, which may still be dead-lettered.
    ///
    /// `Pending → Processing` is a sanctioned shortcut past `Queued` for
    /// single-process callers that drive processing directly instead of
    /// going through a work queue.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Partial)
                | (Processing, Failed)
                | (Failed, DeadLetter)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::DeadLetter
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }
}

/// Chunk-level progress of a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    pub processed: usize,
    pub total: usize,
    /// `processed / total * 100`, rounded to one decimal. 0 when total is 0.
    pub percent: f64,
}

impl JobProgress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            let raw = processed as f64 / total as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        };
        Self {
            processed,
            total,
            percent,
        }
    }
}

/// Persistent record of one document's processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: String,
    /// Opaque identity of the source document (path, blob name, …).
    pub source_id: String,
    pub model_id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Merged whole-document result, present once terminal and non-empty.
    pub result: Option<AnalysisResult>,
    /// Last failure reason, for surfacing through an HTTP layer above.
    pub error: Option<String>,
}
