//! Document-store and blob-store collaborator traits.
//!
//! The store is modeled after a partitioned document database: every record
//! carries a string id and a partition key, and queries are scoped to a
//! partition for efficiency. Partition-key omission on a query is allowed by
//! the trait signature (cross-partition scans exist) but implementations may
//! reject it with [`StoreError::MissingPartitionKey`] where the backing
//! store cannot serve one.
//!
//! [`MemoryDocumentStore`] and [`MemoryBlobStore`] are reference
//! implementations used by the tests and the CLI; production deployments
//! provide their own impls over whatever database and object store they run.

use crate::error::StoreError;
use crate::model::{AnalysisResult, JobStatus, ProcessingJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One persisted record: either a job header or a per-chunk result.
///
/// Ids are strings by construction — the type system discharges the
/// "id must be a string" rule instead of runtime coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    /// Partition key; for this pipeline, always the source id.
    pub partition_key: String,
    pub idempotency_key: Option<String>,
    pub status: String,
    /// 1-indexed position of this chunk within its document.
    pub form_number: Option<usize>,
    /// Total chunk count, stored on every chunk record so a whole document
    /// can be reassembled by enumerating form numbers.
    pub total_forms: Option<usize>,
    pub result: Option<AnalysisResult>,
    pub updated_at: DateTime<Utc>,
    /// Full job record, present on job-header documents only.
    pub job: Option<ProcessingJob>,
}

impl StoredDocument {
    /// A per-chunk result record.
    pub fn chunk_record(
        id: impl Into<String>,
        partition_key: impl Into<String>,
        idempotency_key: impl Into<String>,
        form_number: usize,
        total_forms: usize,
        result: AnalysisResult,
    ) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
            idempotency_key: Some(idempotency_key.into()),
            status: JobStatus::Completed.as_str().to_string(),
            form_number: Some(form_number),
            total_forms: Some(total_forms),
            result: Some(result),
            updated_at: Utc::now(),
            job: None,
        }
    }

    /// A job-header record.
    pub fn job_record(job: &ProcessingJob) -> Self {
        Self {
            id: job.job_id.clone(),
            partition_key: job.source_id.clone(),
            idempotency_key: None,
            status: job.status.as_str().to_string(),
            form_number: None,
            total_forms: None,
            result: None,
            updated_at: Utc::now(),
            job: Some(job.clone()),
        }
    }
}

/// Predicate for [`DocumentStore::query`]. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub idempotency_key: Option<String>,
    pub status: Option<String>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &StoredDocument) -> bool {
        if let Some(ref key) = self.idempotency_key {
            if doc.idempotency_key.as_deref() != Some(key.as_str()) {
                return false;
            }
        }
        if let Some(ref status) = self.status {
            if &doc.status != status {
                return false;
            }
        }
        true
    }
}

/// The document-store collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the record keyed by `(doc.id, doc.partition_key)`.
    async fn upsert(&self, doc: StoredDocument) -> Result<(), StoreError>;

    async fn get(
        &self,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// Return all records matching `filter`, scoped to `partition_key` when
    /// given.
    async fn query(
        &self,
        filter: DocumentFilter,
        partition_key: Option<&str>,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}

/// The blob-store collaborator: a byte source/sink addressed by URL or
/// container+name. Out of scope algorithmically.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError>;

    /// Stage bytes and return a URL the analyzer can fetch them from.
    async fn put(&self, container: &str, name: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

// ── In-memory reference implementations ──────────────────────────────────

/// In-memory [`DocumentStore`] keyed by `(partition_key, id)`.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<(String, String), StoredDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records. Test convenience.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, doc: StoredDocument) -> Result<(), StoreError> {
        self.docs
            .write()
            .await
            .insert((doc.partition_key.clone(), doc.id.clone()), doc);
        Ok(())
    }

    async fn get(
        &self,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self
            .docs
            .read()
            .await
            .get(&(partition_key.to_string(), id.to_string()))
            .cloned())
    }

    async fn query(
        &self,
        filter: DocumentFilter,
        partition_key: Option<&str>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|d| partition_key.map_or(true, |pk| d.partition_key == pk))
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }
}

/// In-memory [`BlobStore`] with `mem://container/name` URLs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| StoreError::transient("fetch", format!("blob not found: {url}")))
    }

    async fn put(&self, container: &str, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let url = format!("mem://{container}/{name}");
        self.blobs.write().await.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }
}
