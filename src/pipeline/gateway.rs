//! Analysis gateway: concurrency admission, throttle-aware retry, and
//! result normalization around the [`Analyzer`] collaborator.
//!
//! ## Admission
//!
//! A process-wide counting semaphore caps in-flight analyzer calls at a
//! capacity chosen below the collaborator's published rate ceiling. The
//! permit is held only for the duration of one network call and released
//! before any backoff sleep — a task waiting out a 429 is not in flight and
//! must not starve others of a slot.
//!
//! ## Retry
//!
//! On throttling the *entire* analyze operation is retried, never just a
//! result poll: a partial retry would not reset the collaborator's own
//! internal retry budget. Backoff follows the usual
//! `initial_delay * 2^attempt` doubling. Exhaustion yields
//! [`AnalysisError::RateLimitExceeded`], which stays distinct from
//! [`AnalysisError::Failed`] so callers can map it to 429 rather than 500.
//! Non-429 failures are returned immediately — retrying a hard error only
//! burns quota.

use crate::analyzer::{AnalyzeInput, Analyzer, AnalyzerResponse, RecognizedForm};
use crate::config::ProcessingConfig;
use crate::error::AnalysisError;
use crate::model::{AnalysisResult, FieldValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Bounded-concurrency, backoff-retrying proxy to the analysis service.
///
/// Construct one per process and share it via `Arc`; the semaphore inside
/// is the global in-flight ceiling.
pub struct AnalysisGateway {
    analyzer: Arc<dyn Analyzer>,
    permits: Arc<Semaphore>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl AnalysisGateway {
    pub fn new(analyzer: Arc<dyn Analyzer>, config: &ProcessingConfig) -> Self {
        Self {
            analyzer,
            permits: Arc::new(Semaphore::new(config.analysis_concurrency)),
            max_attempts: config.max_analysis_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Analyze one chunk, returning a normalized result.
    ///
    /// Blocks until a concurrency slot is free, then drives the retry loop
    /// described in the module docs.
    pub async fn analyze(
        &self,
        input: AnalyzeInput<'_>,
        model_id: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let backoff = self.initial_backoff * 2u32.pow(attempt - 1);
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "analyzer throttled, backing off before retry"
                );
                sleep(backoff).await;
            }

            // Semaphore is never closed, so acquire can only fail if the
            // gateway itself were dropped mid-call; treat that as a hard
            // fault rather than throttling.
            let permit = self.permits.acquire().await.map_err(|_| AnalysisError::Failed {
                status_code: 500,
                message: "analysis gateway shut down".into(),
            })?;

            let outcome = self.analyzer.analyze(input.clone(), model_id).await;
            drop(permit);

            match outcome {
                Ok(response) => {
                    debug!(
                        recognized = response.recognized_forms.len(),
                        pages = response.pages_analyzed,
                        attempt,
                        "analysis call succeeded"
                    );
                    return Ok(normalize(response, model_id));
                }
                Err(e) if e.is_retryable() => continue,
                Err(e) => return Err(e),
            }
        }

        Err(AnalysisError::RateLimitExceeded {
            attempts: self.max_attempts,
        })
    }

    /// Current number of free concurrency slots. Test instrumentation.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

// ── Result normalization ─────────────────────────────────────────────────

/// Collapse the collaborator's recognized forms into one [`AnalysisResult`].
///
/// * Exactly one form: its fields populate the result directly. If the
///   form's reported page span covers more than one page, the fields are
///   additionally mirrored under a `page<N>_` prefix so they cannot collide
///   when merged with other chunks' results later.
/// * Multiple forms: each contributes its fields under its page prefix
///   only, and the aggregate confidence is the arithmetic mean of the
///   confidences that were actually reported — a form without one is
///   excluded from the mean, not counted as zero.
/// * Fewer recognized forms than analysed pages: non-fatal `warning`.
fn normalize(response: AnalyzerResponse, model_id: &str) -> AnalysisResult {
    let recognized_count = response.recognized_forms.len();
    let pages_analyzed = response.pages_analyzed;

    let mut fields = BTreeMap::new();
    let mut field_confidence = BTreeMap::new();
    let mut doc_type = None;
    let mut aggregate_confidence = None;

    match response.recognized_forms.as_slice() {
        [] => {}
        [form] => {
            doc_type = form.doc_type.clone();
            aggregate_confidence = form.confidence;

            fields.extend(form.fields.clone());
            field_confidence.extend(form.field_confidence.clone());

            if form.page_numbers.len() > 1 {
                mirror_with_prefix(form, &mut fields, &mut field_confidence);
            }
        }
        forms => {
            for form in forms {
                mirror_with_prefix(form, &mut fields, &mut field_confidence);
            }
            let reported: Vec<f64> = forms.iter().filter_map(|f| f.confidence).collect();
            if !reported.is_empty() {
                aggregate_confidence =
                    Some(reported.iter().sum::<f64>() / reported.len() as f64);
            }
        }
    }

    let warning = (recognized_count < pages_analyzed).then(|| {
        format!(
            "model recognized {recognized_count} of {pages_analyzed} analyzed pages; \
             the remainder did not match model '{model_id}'"
        )
    });

    AnalysisResult {
        model_id: model_id.to_string(),
        doc_type,
        aggregate_confidence,
        fields,
        field_confidence,
        pages_analyzed,
        recognized_count,
        warning,
    }
}

/// Copy a form's fields under its `page<N>_` prefix, where `N` is the first
/// page the form spans.
fn mirror_with_prefix(
    form: &RecognizedForm,
    fields: &mut BTreeMap<String, FieldValue>,
    field_confidence: &mut BTreeMap<String, f64>,
) {
    let page = form.page_numbers.first().copied().unwrap_or(1);
    for (name, value) in &form.fields {
        fields.insert(format!("page{page}_{name}"), value.clone());
    }
    for (name, conf) in &form.field_confidence {
        field_confidence.insert(format!("page{page}_{name}"), *conf);
    }
}
