//! Configuration for the ingestion pipeline.
//!
//! All knobs live in one [`ProcessingConfig`] built via its builder, so a
//! config can be cloned across tasks, serialised for logging, and diffed
//! between two runs. Validation happens once in
//! [`ProcessingConfigBuilder::build`], not at every use site.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};

/// Configuration for document ingestion and analysis.
///
/// # Example
/// ```rust
/// use formgate::ProcessingConfig;
///
/// let config = ProcessingConfig::builder()
///     .pages_per_form(2)
///     .analysis_concurrency(5)
///     .model_id("prebuilt-invoice")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Analyzer model identifier submitted with every chunk. Default:
    /// `"prebuilt-document"`.
    pub model_id: String,

    /// Version tag mixed into idempotency keys. Bump it to force
    /// reprocessing after a pipeline behaviour change. Default: `"v1"`.
    pub processing_version: String,

    /// Pages per form for the fixed-fallback boundary strategy, and an
    /// idempotency-key ingredient. Default: 2.
    pub pages_per_form: usize,

    /// Jaccard similarity threshold for the header-match boundary strategy.
    /// Range `(0, 1]`. Default: 0.7.
    pub header_similarity_threshold: f64,

    /// Confidence floor for header-match boundaries whose length deviates
    /// far from the mean form length. Default: 0.5.
    pub min_boundary_confidence: f64,

    /// Maximum concurrent in-flight analyzer calls, process-wide.
    /// Default: 5.
    ///
    /// Choose this safely below the collaborator's published rate ceiling;
    /// the gateway's semaphore enforces it regardless of how many jobs run
    /// at once.
    pub analysis_concurrency: usize,

    /// Retry attempts when the analyzer throttles (429). Non-429 failures
    /// are never retried. Default: 5.
    pub max_analysis_attempts: u32,

    /// Base delay for exponential backoff between throttled attempts:
    /// `initial_backoff_ms * 2^attempt`. Default: 500.
    pub initial_backoff_ms: u64,

    /// Job-level retry ceiling. Once `retry_count` exceeds this, the job is
    /// dead-lettered. Default: 3.
    pub max_job_retries: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            model_id: "prebuilt-document".to_string(),
            processing_version: "v1".to_string(),
            pages_per_form: 2,
            header_similarity_threshold: 0.7,
            min_boundary_confidence: 0.5,
            analysis_concurrency: 5,
            max_analysis_attempts: 5,
            initial_backoff_ms: 500,
            max_job_retries: 3,
        }
    }
}

impl ProcessingConfig {
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ProcessingConfig`].
#[derive(Debug)]
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl ProcessingConfigBuilder {
    pub fn model_id(mut self, model: impl Into<String>) -> Self {
        self.config.model_id = model.into();
        self
    }

    pub fn processing_version(mut self, version: impl Into<String>) -> Self {
        self.config.processing_version = version.into();
        self
    }

    pub fn pages_per_form(mut self, n: usize) -> Self {
        self.config.pages_per_form = n;
        self
    }

    pub fn header_similarity_threshold(mut self, t: f64) -> Self {
        self.config.header_similarity_threshold = t;
        self
    }

    pub fn min_boundary_confidence(mut self, c: f64) -> Self {
        self.config.min_boundary_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn analysis_concurrency(mut self, n: usize) -> Self {
        self.config.analysis_concurrency = n;
        self
    }

    pub fn max_analysis_attempts(mut self, n: u32) -> Self {
        self.config.max_analysis_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_job_retries(mut self, n: u32) -> Self {
        self.config.max_job_retries = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, IngestError> {
        let c = &self.config;
        if c.pages_per_form == 0 {
            return Err(IngestError::InvalidConfig(
                "pages_per_form must be >= 1".into(),
            ));
        }
        if c.analysis_concurrency == 0 {
            return Err(IngestError::InvalidConfig(
                "analysis_concurrency must be >= 1".into(),
            ));
        }
        if c.max_analysis_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "max_analysis_attempts must be >= 1".into(),
            ));
        }
        if !(c.header_similarity_threshold > 0.0 && c.header_similarity_threshold <= 1.0) {
            return Err(IngestError::InvalidConfig(format!(
                "header_similarity_threshold must be in (0, 1], got {}",
                c.header_similarity_threshold
            )));
        }
        if c.model_id.is_empty() {
            return Err(IngestError::InvalidConfig("model_id must not be empty".into()));
        }
        Ok(self.config)
    }
}
