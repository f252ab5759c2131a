//! Document loading and chunk extraction.
//!
//! [`SourceDocument`] wraps a parsed PDF and is the only place in the crate
//! that touches `lopdf` directly. Splitting works at the object level: the
//! pages outside a boundary are deleted from a clone of the document and the
//! remainder is re-serialised. Content streams of surviving pages are
//! carried over untouched, so re-measuring a chunk always reproduces the
//! boundary's declared page count.
//!
//! A boundary that spans the whole document returns the original bytes
//! verbatim instead of a rebuilt file — rebuilding can reorder object ids
//! and change bytes without changing meaning, which would defeat
//! content-hash idempotency for the single-form case.

use crate::error::SplitError;
use crate::model::{boundaries_cover_exactly, FormBoundary, FormChunk};
use crate::pipeline::boundary::{detect_boundaries, fixed_boundaries, DetectOptions};
use lopdf::Document;
use tracing::{debug, warn};

/// A loaded source document: immutable once read.
#[derive(Debug)]
pub struct SourceDocument {
    source_id: String,
    bytes: Vec<u8>,
    doc: Document,
    page_count: usize,
}

impl SourceDocument {
    /// Parse `bytes` as a PDF.
    pub fn from_bytes(source_id: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SplitError> {
        let doc = Document::load_mem(&bytes).map_err(|e| SplitError::Malformed(e.to_string()))?;
        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(SplitError::Malformed("document has no pages".into()));
        }
        Ok(Self {
            source_id: source_id.into(),
            bytes,
            doc,
            page_count,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Extract the text of every page, in page order.
    ///
    /// Lenient by design: a page whose content stream cannot be decoded
    /// yields an empty string rather than an error. With no readable text
    /// anywhere, boundary detection naturally lands on the fixed fallback.
    pub fn page_texts(&self) -> Vec<String> {
        (1..=self.page_count as u32)
            .map(|page| match self.doc.extract_text(&[page]) {
                Ok(text) => text,
                Err(e) => {
                    debug!(page, error = %e, "page text extraction failed, treating as empty");
                    String::new()
                }
            })
            .collect()
    }

    /// Detect form boundaries for this document.
    pub fn detect(&self, opts: &DetectOptions) -> Vec<FormBoundary> {
        detect_boundaries(&self.page_texts(), opts)
    }

    /// Extract the pages covered by `boundary` into an independent chunk.
    pub fn extract(&self, boundary: &FormBoundary) -> Result<FormChunk, SplitError> {
        let (start, end) = (boundary.start_page, boundary.end_page);
        if start > end {
            return Err(SplitError::InvalidRange { start, end });
        }
        if start < 1 || end > self.page_count {
            return Err(SplitError::PageOutOfRange {
                start,
                end,
                total: self.page_count,
            });
        }

        // Whole-document boundary: hand back the original bytes unmodified.
        if start == 1 && end == self.page_count {
            return Ok(FormChunk {
                bytes: self.bytes.clone(),
                boundary: boundary.clone(),
            });
        }

        let mut doc = self.doc.clone();
        let delete: Vec<u32> = (1..=self.page_count as u32)
            .filter(|&p| (p as usize) < start || (p as usize) > end)
            .collect();
        doc.delete_pages(&delete);
        doc.prune_objects();
        doc.renumber_objects();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).map_err(|e| SplitError::WriteFailed {
            start,
            end,
            detail: e.to_string(),
        })?;

        Ok(FormChunk {
            bytes,
            boundary: boundary.clone(),
        })
    }

    /// Cut the document into one chunk per boundary.
    ///
    /// The boundary list must exactly cover `[1, page_count]` — detection
    /// strategies always produce such a list, so a failure here means the
    /// caller hand-built a broken one.
    pub fn split(&self, boundaries: &[FormBoundary]) -> Result<Vec<FormChunk>, SplitError> {
        if !boundaries_cover_exactly(boundaries, self.page_count) {
            return Err(SplitError::Malformed(format!(
                "boundary list does not exactly cover pages 1-{}",
                self.page_count
            )));
        }
        boundaries.iter().map(|b| self.extract(b)).collect()
    }

    /// Detect boundaries and split in one step, falling back to the fixed
    /// partition if the detected set fails validation.
    pub fn detect_and_split(
        &self,
        opts: &DetectOptions,
    ) -> Result<(Vec<FormBoundary>, Vec<FormChunk>), SplitError> {
        let mut boundaries = self.detect(opts);
        if !boundaries_cover_exactly(&boundaries, self.page_count) {
            warn!(
                source_id = %self.source_id,
                "detected boundaries failed cover validation, using fixed partition"
            );
            boundaries = fixed_boundaries(self.page_count, opts.pages_per_form);
        }
        let chunks = self.split(&boundaries)?;
        Ok((boundaries, chunks))
    }
}
