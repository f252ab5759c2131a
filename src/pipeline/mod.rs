//! Pipeline stages for document ingestion.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage is independently testable and a stage can be reworked (say, a
//! different boundary heuristic) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ boundary ──▶ split ──▶ idempotency ──▶ gateway
//! (PDF)     (detect)    (chunks)   (dedup check)   (analyze)
//! ```
//!
//! 1. [`boundary`] — pure form-boundary detection over per-page text
//! 2. [`split`]    — load the PDF and cut it into per-boundary chunks
//! 3. [`idempotency`] — fingerprint each chunk and look for prior results
//! 4. [`gateway`]  — bounded-concurrency analyzer calls with throttle
//!    retry; the only stage with network I/O
//!
//! [`crate::job::JobManager`] orchestrates the stages and owns persistence.

pub mod boundary;
pub mod gateway;
pub mod idempotency;
pub mod split;
