//! Form-boundary detection: decide where one logical form ends and the next
//! begins, from page text alone.
//!
//! Three strategies run in order; the first that yields a non-empty result
//! wins:
//!
//! 1. **Page-number signals** — "Page X of Y", "Pg X of Y", "X/Y" printed on
//!    the pages themselves. The strongest evidence when present.
//! 2. **Header similarity** — repeated first-page headers (a batch of the
//!    same blank form filled out many times) found via Jaccard similarity
//!    over the first three lines of each page.
//! 3. **Fixed fallback** — partition into groups of `pages_per_form`.
//!
//! The whole module is pure (`&[String]` in, `Vec<FormBoundary>` out) so
//! every strategy is testable without a PDF in sight. Text extraction — and
//! swallowing extraction failures into the fixed fallback — happens in
//! [`crate::pipeline::split`].

use crate::model::{BoundaryMethod, FormBoundary};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// Signals with `Y` above this are treated as noise (a "12/25" date, an
/// invoice number), not a page counter.
const MAX_FORM_PAGES: usize = 20;

/// Confidence for a form closed implicitly by the next form's "page 1".
const CONFIDENCE_INFERRED_START: f64 = 0.9;
/// Confidence for a form closed by an explicit "page Y of Y".
const CONFIDENCE_EXPLICIT_CLOSE: f64 = 0.95;
/// Confidence for the residual tail run with no explicit close.
const CONFIDENCE_RESIDUAL_TAIL: f64 = 0.7;

/// Tunables for detection; mirrors the relevant
/// [`crate::config::ProcessingConfig`] fields.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub pages_per_form: usize,
    /// Jaccard similarity at or above which a page counts as a new-form
    /// start for the header strategy.
    pub header_similarity_threshold: f64,
    /// Floor for header-strategy confidences.
    pub min_confidence: f64,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            pages_per_form: 2,
            header_similarity_threshold: 0.7,
            min_confidence: 0.5,
        }
    }
}

impl From<&crate::config::ProcessingConfig> for DetectOptions {
    fn from(c: &crate::config::ProcessingConfig) -> Self {
        Self {
            pages_per_form: c.pages_per_form,
            header_similarity_threshold: c.header_similarity_threshold,
            min_confidence: c.min_boundary_confidence,
        }
    }
}

/// Detect form boundaries for a document given its per-page text.
///
/// `page_texts[0]` is page 1. The result is always a contiguous,
/// non-overlapping, exact cover of `[1, page_texts.len()]`.
pub fn detect_boundaries(page_texts: &[String], opts: &DetectOptions) -> Vec<FormBoundary> {
    let total = page_texts.len();
    if total == 0 {
        return Vec::new();
    }
    if total == 1 {
        return vec![FormBoundary::new(1, 1, 1.0, BoundaryMethod::Single)];
    }

    let by_signal = page_number_boundaries(page_texts);
    if !by_signal.is_empty() {
        debug!(boundaries = by_signal.len(), "boundaries from page-number signals");
        return by_signal;
    }

    let by_header = header_boundaries(page_texts, opts);
    if !by_header.is_empty() {
        debug!(boundaries = by_header.len(), "boundaries from header similarity");
        return by_header;
    }

    debug!(pages_per_form = opts.pages_per_form, "falling back to fixed partition");
    fixed_boundaries(total, opts.pages_per_form)
}

// ── Strategy 1: page-number signals ──────────────────────────────────────

static RE_PAGE_OF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:page|pg\.?)\s*(\d{1,3})\s*(?:of|/)\s*(\d{1,3})\b").unwrap());
static RE_BARE_FRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3})\s*/\s*(\d{1,3})\b").unwrap());

/// Extract the first plausible `(page, of_total)` signal from one page's
/// text. Returns `None` when nothing matches or everything that matches
/// fails the `1 <= X <= Y <= MAX_FORM_PAGES` sanity bound.
fn page_signal(text: &str) -> Option<(usize, usize)> {
    for re in [&*RE_PAGE_OF, &*RE_BARE_FRACTION] {
        for caps in re.captures_iter(text) {
            let x: usize = caps[1].parse().ok()?;
            let y: usize = caps[2].parse().ok()?;
            if x >= 1 && x <= y && y <= MAX_FORM_PAGES {
                return Some((x, y));
            }
        }
    }
    None
}

/// Build boundaries from per-page `(X, Y)` signals.
///
/// A page carrying `(1, N)` starts a new form, closing the prior run; a
/// page carrying `(Y, Y)` closes the current form. Pages with no signal
/// extend the current run. Returns empty (strategy declined) when no page
/// carried a valid signal.
fn page_number_boundaries(page_texts: &[String]) -> Vec<FormBoundary> {
    let total = page_texts.len();
    let mut boundaries = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut saw_signal = false;

    for (idx, text) in page_texts.iter().enumerate() {
        let page = idx + 1;
        match page_signal(text) {
            Some((1, n)) => {
                saw_signal = true;
                if let Some(start) = run_start.take() {
                    boundaries.push(FormBoundary::new(
                        start,
                        page - 1,
                        CONFIDENCE_INFERRED_START,
                        BoundaryMethod::PageNumber,
                    ));
                }
                if n == 1 {
                    // "Page 1 of 1": opens and closes on the same page.
                    boundaries.push(FormBoundary::new(
                        page,
                        page,
                        CONFIDENCE_EXPLICIT_CLOSE,
                        BoundaryMethod::PageNumber,
                    ));
                } else {
                    run_start = Some(page);
                }
            }
            Some((x, y)) if x == y => {
                saw_signal = true;
                let start = run_start.take().unwrap_or(page);
                boundaries.push(FormBoundary::new(
                    start,
                    page,
                    CONFIDENCE_EXPLICIT_CLOSE,
                    BoundaryMethod::PageNumber,
                ));
            }
            Some(_) => {
                saw_signal = true;
                if run_start.is_none() {
                    run_start = Some(page);
                }
            }
            None => {
                if run_start.is_none() {
                    run_start = Some(page);
                }
            }
        }
    }

    if !saw_signal {
        return Vec::new();
    }

    if let Some(start) = run_start {
        boundaries.push(FormBoundary::new(
            start,
            total,
            CONFIDENCE_RESIDUAL_TAIL,
            BoundaryMethod::PageNumber,
        ));
    }

    boundaries
}

// ── Strategy 2: header similarity ────────────────────────────────────────

/// The first three non-empty-trimmed lines of a page, joined.
fn header_of(text: &str) -> String {
    text.lines().take(3).collect::<Vec<_>>().join("\n")
}

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|` over lowercase whitespace tokens.
/// 0 when either side is empty.
fn jaccard(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

/// Build boundaries from pages whose header resembles page 1's header.
///
/// Needs at least two detected starts (page 1 always counts); otherwise the
/// strategy declines. Boundaries close to the mean form length score higher:
/// `confidence = max(min_conf, 1 - |len - mean| / mean)`.
fn header_boundaries(page_texts: &[String], opts: &DetectOptions) -> Vec<FormBoundary> {
    let total = page_texts.len();
    let reference = header_of(&page_texts[0]);
    if reference.trim().is_empty() {
        return Vec::new();
    }

    let mut starts = vec![1usize];
    for (idx, text) in page_texts.iter().enumerate().skip(1) {
        let page = idx + 1;
        if jaccard(&reference, &header_of(text)) >= opts.header_similarity_threshold {
            starts.push(page);
        }
    }

    if starts.len() < 2 {
        return Vec::new();
    }

    let mut boundaries = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(total, |&next| next - 1);
        boundaries.push(FormBoundary::new(start, end, 0.0, BoundaryMethod::HeaderMatch));
    }

    let mean = total as f64 / boundaries.len() as f64;
    for b in &mut boundaries {
        let deviation = (b.page_count() as f64 - mean).abs() / mean;
        b.confidence = (1.0 - deviation).max(opts.min_confidence);
    }

    boundaries
}

// ── Strategy 3: fixed fallback ───────────────────────────────────────────

/// Partition `[1, total_pages]` into consecutive groups of `pages_per_form`.
/// The last group may be short. Confidence 1.0 — the partition is exact by
/// construction, it just carries no evidence about actual form edges.
pub fn fixed_boundaries(total_pages: usize, pages_per_form: usize) -> Vec<FormBoundary> {
    let size = pages_per_form.max(1);
    let mut boundaries = Vec::with_capacity(total_pages.div_ceil(size));
    let mut start = 1;
    while start <= total_pages {
        let end = (start + size - 1).min(total_pages);
        boundaries.push(FormBoundary::new(start, end, 1.0, BoundaryMethod::Fixed));
        start = end + 1;
    }
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::boundaries_cover_exactly;

    fn texts(pages: &[&str]) -> Vec<String> {
        pages.iter().map(|s| s.to_string()).collect()
    }

    // ── page_signal ──────────────────────────────────────────────────

    #[test]
    fn signal_page_of_variants() {
        assert_eq!(page_signal("Invoice\nPage 1 of 3"), Some((1, 3)));
        assert_eq!(page_signal("pg 2 of 2"), Some((2, 2)));
        assert_eq!(page_signal("Pg. 3 of 4"), Some((3, 4)));
        assert_eq!(page_signal("footer 2/3 end"), Some((2, 3)));
    }

    #[test]
    fn signal_rejects_noise() {
        // Y above the ceiling: an invoice number, not a page counter.
        assert_eq!(page_signal("ref 3/250"), None);
        // X > Y is nonsense.
        assert_eq!(page_signal("Page 5 of 2"), None);
        assert_eq!(page_signal("no numbers here"), None);
        assert_eq!(page_signal(""), None);
    }

    #[test]
    fn signal_skips_noise_then_accepts_valid() {
        // First fraction fails the bound, second is a real page counter.
        assert_eq!(page_signal("serial 7/9999 ... Page 1 of 2"), Some((1, 2)));
    }

    // ── strategy 1 ───────────────────────────────────────────────────

    #[test]
    fn page_numbers_split_two_forms_with_explicit_closes() {
        let pages = texts(&[
            "Form A\nPage 1 of 2",
            "Form A\nPage 2 of 2",
            "Form B\nPage 1 of 3",
            "Form B\nPage 2 of 3",
            "Form B\nPage 3 of 3",
        ]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert_eq!(bs.len(), 2);
        assert_eq!((bs[0].start_page, bs[0].end_page), (1, 2));
        assert_eq!((bs[1].start_page, bs[1].end_page), (3, 5));
        assert!(bs.iter().all(|b| b.method == BoundaryMethod::PageNumber));
        assert!(bs.iter().all(|b| b.confidence == 0.95));
        assert!(boundaries_cover_exactly(&bs, 5));
    }

    #[test]
    fn new_start_closes_prior_run_at_inferred_confidence() {
        // Second form starts but the first never said "2 of 2".
        let pages = texts(&[
            "Page 1 of 2",
            "continuation, no footer",
            "Page 1 of 2",
            "Page 2 of 2",
        ]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert_eq!(bs.len(), 2);
        assert_eq!((bs[0].start_page, bs[0].end_page), (1, 2));
        assert_eq!(bs[0].confidence, 0.9);
        assert_eq!(bs[1].confidence, 0.95);
    }

    #[test]
    fn residual_tail_gets_low_confidence() {
        let pages = texts(&["Page 1 of 3", "Page 2 of 3", "trailing page, no signal"]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert_eq!(bs.len(), 1);
        assert_eq!((bs[0].start_page, bs[0].end_page), (1, 3));
        assert_eq!(bs[0].confidence, 0.7);
    }

    #[test]
    fn single_page_forms_via_one_of_one() {
        let pages = texts(&["Page 1 of 1", "Page 1 of 1", "Page 1 of 1"]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert_eq!(bs.len(), 3);
        assert!(bs.iter().all(|b| b.page_count() == 1));
        assert!(bs.iter().all(|b| b.confidence == 0.95));
        assert!(boundaries_cover_exactly(&bs, 3));
    }

    #[test]
    fn no_signals_declines_strategy_one() {
        let pages = texts(&["hello", "world", "again", "more"]);
        let bs = page_number_boundaries(&pages);
        assert!(bs.is_empty());
    }

    // ── strategy 2 ───────────────────────────────────────────────────

    #[test]
    fn jaccard_basics() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert_eq!(jaccard("", "a b"), 0.0);
        assert_eq!(jaccard("A B", "a b"), 1.0); // case-insensitive
        let half = jaccard("a b c d", "a b x y"); // 2 / 6
        assert!((half - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn header_of_takes_first_three_lines() {
        assert_eq!(header_of("l1\nl2\nl3\nl4"), "l1\nl2\nl3");
        assert_eq!(header_of("only"), "only");
    }

    #[test]
    fn repeated_headers_split_forms() {
        let header = "ACME CORP\nEXPENSE CLAIM FORM\nHR-DEPT-07";
        let pages = texts(&[
            &format!("{header}\nclaim for march"),
            "receipt scans\nno header here at all",
            &format!("{header}\nclaim for april"),
            "more receipts\nstill nothing",
        ]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert_eq!(bs.len(), 2);
        assert_eq!((bs[0].start_page, bs[0].end_page), (1, 2));
        assert_eq!((bs[1].start_page, bs[1].end_page), (3, 4));
        assert!(bs.iter().all(|b| b.method == BoundaryMethod::HeaderMatch));
        // Both forms are exactly mean length: full confidence.
        assert!(bs.iter().all(|b| (b.confidence - 1.0).abs() < 1e-9));
    }

    #[test]
    fn header_confidence_floors_at_min() {
        let header = "ACME CORP\nEXPENSE CLAIM FORM\nHR-DEPT-07";
        // Lengths 1 and 5: heavy deviation from mean 3.
        let pages = texts(&[
            &format!("{header}\nfirst"),
            &format!("{header}\nsecond"),
            "filler one two three",
            "filler",
            "filler",
            "filler",
        ]);
        let opts = DetectOptions {
            min_confidence: 0.5,
            ..DetectOptions::default()
        };
        let bs = header_boundaries(&pages, &opts);
        assert_eq!(bs.len(), 2);
        assert_eq!(bs[0].page_count(), 1);
        assert_eq!(bs[1].page_count(), 5);
        // |1-3|/3 = 0.667 deviation -> 0.333 raw, floored to 0.5.
        assert_eq!(bs[0].confidence, 0.5);
        assert_eq!(bs[1].confidence, 0.5);
    }

    #[test]
    fn one_start_declines_strategy_two() {
        let pages = texts(&["UNIQUE HEADER\nline\nline", "body text", "more body"]);
        assert!(header_boundaries(&pages, &DetectOptions::default()).is_empty());
    }

    // ── strategy 3 ───────────────────────────────────────────────────

    #[test]
    fn fixed_five_pages_by_two() {
        let bs = fixed_boundaries(5, 2);
        let ranges: Vec<_> = bs.iter().map(|b| (b.start_page, b.end_page)).collect();
        assert_eq!(ranges, vec![(1, 2), (3, 4), (5, 5)]);
        assert!(bs.iter().all(|b| b.method == BoundaryMethod::Fixed));
        assert!(bs.iter().all(|b| b.confidence == 1.0));
        assert_eq!(bs.last().unwrap().page_count(), 1);
    }

    #[test]
    fn fixed_partition_cover_property() {
        for total in 1..=23usize {
            for k in 1..=7usize {
                let bs = fixed_boundaries(total, k);
                assert!(
                    boundaries_cover_exactly(&bs, total),
                    "broken cover for total={total} k={k}"
                );
                assert_eq!(
                    bs.iter().map(FormBoundary::page_count).sum::<usize>(),
                    total
                );
                assert!(bs.iter().take(bs.len() - 1).all(|b| b.page_count() == k));
            }
        }
    }

    // ── strategy ordering / short-circuits ───────────────────────────

    #[test]
    fn single_page_document_short_circuits() {
        let pages = texts(&["Page 1 of 1"]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert_eq!(bs.len(), 1);
        assert_eq!(bs[0].method, BoundaryMethod::Single);
        assert_eq!(bs[0].confidence, 1.0);
    }

    #[test]
    fn empty_document_yields_no_boundaries() {
        assert!(detect_boundaries(&[], &DetectOptions::default()).is_empty());
    }

    #[test]
    fn falls_through_to_fixed_when_nothing_matches() {
        let pages = texts(&["alpha", "beta", "gamma", "delta", "epsilon"]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert!(bs.iter().all(|b| b.method == BoundaryMethod::Fixed));
        assert_eq!(bs.len(), 3);
    }

    #[test]
    fn signals_beat_headers() {
        // Pages have both repeated headers and page-number signals; the
        // signals win because strategy 1 runs first.
        let header = "SHARED HEADER\nLINE TWO\nLINE THREE";
        let pages = texts(&[
            &format!("{header}\nPage 1 of 1"),
            &format!("{header}\nPage 1 of 1"),
        ]);
        let bs = detect_boundaries(&pages, &DetectOptions::default());
        assert!(bs.iter().all(|b| b.method == BoundaryMethod::PageNumber));
    }
}
