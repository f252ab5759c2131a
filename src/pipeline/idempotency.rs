//! Idempotency: deterministic request fingerprints and duplicate lookup.
//!
//! The key is a pure function of the request tuple — same inputs, same 32
//! hex characters, on any machine, forever. That makes resubmission of the
//! same document with the same settings detectable without coordination.
//!
//! Duplicate lookup is **fail-open**: when the store query itself errors,
//! the caller proceeds as if no duplicate exists. Reprocessing a document
//! costs analyzer quota; refusing to process anything while the store
//! hiccups costs availability. The check-then-write race this leaves open
//! (two concurrent first-time requests both passing the check) is accepted
//! and documented, not fixed — the store's upsert makes the second write a
//! harmless overwrite of an identical record.

use crate::store::{DocumentFilter, DocumentStore, StoredDocument};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Length of the truncated hex digest.
const KEY_LEN: usize = 32;

/// Derive the idempotency key for a processing request.
///
/// The tuple is joined with a separator and hashed with SHA-256; the digest
/// is truncated to 32 hex characters (128 bits — collision-resistant for
/// practical purposes). Changing any single input changes the output.
pub fn generate_key(
    source_id: &str,
    model_id: &str,
    pages_per_form: usize,
    processing_version: &str,
    content_hash: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"|");
    hasher.update(model_id.as_bytes());
    hasher.update(b"|");
    hasher.update(pages_per_form.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(processing_version.as_bytes());
    if let Some(hash) = content_hash {
        hasher.update(b"|");
        hasher.update(hash.as_bytes());
    }
    let mut key = hex::encode(hasher.finalize());
    key.truncate(KEY_LEN);
    key
}

/// Hex SHA-256 of raw content bytes, for the `content_hash` key ingredient.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Duplicate detection against the document store.
pub struct IdempotencyEngine {
    store: Arc<dyn DocumentStore>,
}

impl IdempotencyEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Look up a completed record with this key, scoped to the source's
    /// partition.
    ///
    /// Returns `None` both when no duplicate exists and when the store
    /// query fails (fail-open, logged at warn).
    pub async fn check_duplicate(&self, key: &str, source_id: &str) -> Option<StoredDocument> {
        let filter = DocumentFilter {
            idempotency_key: Some(key.to_string()),
            status: Some("completed".to_string()),
        };
        match self.store.query(filter, Some(source_id)).await {
            Ok(mut docs) => {
                let hit = if docs.is_empty() {
                    None
                } else {
                    Some(docs.remove(0))
                };
                if hit.is_some() {
                    debug!(key, source_id, "idempotency hit, reusing prior result");
                }
                hit
            }
            Err(e) => {
                warn!(key, source_id, error = %e, "duplicate check failed, proceeding without dedup");
                None
            }
        }
    }
}
