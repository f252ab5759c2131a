//! Outbound collaborator traits: terminal-event notification and the work
//! queue.
//!
//! Notification is fire-and-forget: the trait returns nothing, and
//! implementations carry their own retry. A webhook that is down must never
//! be able to fail a job's terminal transition — the job record in the
//! store is the source of truth, the notification is advisory.
//!
//! All methods have working defaults on the no-op implementations so tests
//! only wire up what they observe.

use crate::error::IngestError;
use crate::model::{JobProgress, JobStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A terminal job event delivered to the [`Notifier`].
///
/// Dead-lettering is a distinct event kind, not a `Failed` with a flag:
/// downstream consumers route abandoned jobs to a different channel than
/// ordinary failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobCompleted {
        job_id: String,
        source_id: String,
        progress: JobProgress,
    },
    JobPartial {
        job_id: String,
        source_id: String,
        progress: JobProgress,
    },
    JobFailed {
        job_id: String,
        source_id: String,
        reason: String,
    },
    JobDeadLettered {
        job_id: String,
        source_id: String,
        retry_count: u32,
        reason: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobPartial { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobDeadLettered { job_id, .. } => job_id,
        }
    }

    /// The status this event corresponds to.
    pub fn status(&self) -> JobStatus {
        match self {
            JobEvent::JobCompleted { .. } => JobStatus::Completed,
            JobEvent::JobPartial { .. } => JobStatus::Partial,
            JobEvent::JobFailed { .. } => JobStatus::Failed,
            JobEvent::JobDeadLettered { .. } => JobStatus::DeadLetter,
        }
    }
}

/// Terminal-transition notification collaborator (webhook, queue, …).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event`. Must not fail the caller; swallow and log internally.
    async fn notify(&self, event: &JobEvent);
}

/// Silently drops every event.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &JobEvent) {}
}

/// External work queue that picks up queued jobs for processing.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, job_id: &str) -> Result<(), IngestError>;
}

/// Accepts every handoff and does nothing. For tests and single-process
/// setups where the caller drives processing directly.
pub struct NoopWorkQueue;

#[async_trait]
impl WorkQueue for NoopWorkQueue {
    async fn push(&self, _job_id: &str) -> Result<(), IngestError> {
        Ok(())
    }
}
