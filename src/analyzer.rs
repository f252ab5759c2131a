//! The Analyzer collaborator trait and its wire types.
//!
//! The analysis service is a black box to this crate: it receives chunk
//! bytes (or a URL the service can fetch itself) plus a model id, and
//! returns whatever sub-documents the model recognized. Everything about
//! transport, authentication, and polling lives behind this trait; the
//! pipeline only sees the two failure classes it must react to —
//! throttling and hard failure.
//!
//! [`crate::pipeline::gateway::AnalysisGateway`] wraps implementations of
//! this trait with concurrency admission and throttle-aware retry; nothing
//! else in the crate calls an [`Analyzer`] directly.

use crate::error::AnalysisError;
use crate::model::FieldValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input to one analysis call.
///
/// `Url` lets implementations hand the service a pre-staged blob location
/// instead of uploading bytes inline.
#[derive(Debug, Clone)]
pub enum AnalyzeInput<'a> {
    Bytes(&'a [u8]),
    Url(&'a str),
}

/// One sub-document the model recognized within an analysed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedForm {
    pub doc_type: Option<String>,
    /// Overall confidence for this form, when the model reports one.
    pub confidence: Option<f64>,
    pub fields: BTreeMap<String, FieldValue>,
    pub field_confidence: BTreeMap<String, f64>,
    /// 1-indexed pages (within the chunk) this form spans.
    pub page_numbers: Vec<usize>,
}

/// Raw response from the analysis collaborator, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerResponse {
    pub recognized_forms: Vec<RecognizedForm>,
    pub pages_analyzed: usize,
}

/// The external document-analysis service.
///
/// Implementations raise [`AnalysisError::RateLimited`] for a 429-equivalent
/// response and [`AnalysisError::Failed`] for anything else; they never
/// retry internally — retry policy belongs to the gateway.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        input: AnalyzeInput<'_>,
        model_id: &str,
    ) -> Result<AnalyzerResponse, AnalysisError>;
}
