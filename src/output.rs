//! Output types: word boxes, extraction reports and batch accounting.

use crate::config::BackendKind;
use crate::document::Document;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

// ── Words ────────────────────────────────────────────────────────────────

/// One OCR-detected word and its box.
///
/// Coordinates are page points with a top-left origin, i.e. the OCR pixel
/// box of the 2× raster divided by [`crate::pipeline::render::RENDER_SCALE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordBox {
    /// 1-based page index.
    pub page: usize,
    pub text: String,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl WordBox {
    /// Non-empty text and a box with positive width and height.
    ///
    /// Boxes failing this check are dropped before injection.
    pub fn is_injectable(&self) -> bool {
        !self.text.trim().is_empty()
            && self.x1 > self.x0
            && self.y1 > self.y0
            && [self.x0, self.y0, self.x1, self.y1]
                .iter()
                .all(|v| v.is_finite())
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Wall time spent on one progress unit.
#[derive(Debug, Clone, Serialize)]
pub struct PageTiming {
    /// 1-based page index, or 1 for the single unit of a whole-document run.
    pub page: usize,
    pub elapsed: Duration,
    /// The unit's output matched an error signature.
    pub error_detected: bool,
}

/// Result of running the extraction pipeline over one document.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub page_count: usize,
    pub timings: Vec<PageTiming>,
    pub total_elapsed: Duration,
    /// Word boxes from the local backend, reusable by the synthesizer.
    #[serde(skip)]
    pub words: Option<Vec<WordBox>>,
}

impl ExtractionReport {
    pub fn secs_per_page(&self) -> f64 {
        if self.page_count == 0 {
            return 0.0;
        }
        self.total_elapsed.as_secs_f64() / self.page_count as f64
    }
}

// ── Planning ─────────────────────────────────────────────────────────────

/// Projected scope and cost of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub backend: BackendKind,
    pub documents: usize,
    pub total_pages: usize,
    pub cost_per_page: f64,
}

impl CostEstimate {
    pub fn new(backend: BackendKind, documents: usize, total_pages: usize) -> Self {
        Self {
            backend,
            documents,
            total_pages,
            cost_per_page: backend.cost_per_page(),
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.total_pages as f64 * self.cost_per_page
    }

    /// `$1.23`
    pub fn formatted_cost(&self) -> String {
        format!("${:.2}", self.total_cost())
    }
}

// ── Batch items ──────────────────────────────────────────────────────────

/// Per-document pipeline state within one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentState {
    Discovered,
    Rasterizing,
    Extracting { page: usize, total: usize },
    Transcribed,
    Synthesized,
    Skipped,
    Failed { page: Option<usize>, reason: String },
}

impl DocumentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentState::Transcribed
                | DocumentState::Synthesized
                | DocumentState::Skipped
                | DocumentState::Failed { .. }
        )
    }
}

/// Ephemeral record pairing a document with its state for this run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub document: Document,
    pub state: DocumentState,
    /// An existing transcript was error-tainted or unreadable.
    pub recovering: bool,
    pub extraction: Option<ExtractionReport>,
    /// Pages written to the searchable PDF.
    pub injected_pages: Option<usize>,
}

impl BatchItem {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            state: DocumentState::Discovered,
            recovering: false,
            extraction: None,
            injected_pages: None,
        }
    }

    /// Pages this document contributed to the run total.
    pub fn pages(&self) -> usize {
        self.extraction
            .as_ref()
            .map(|r| r.page_count)
            .or(self.injected_pages)
            .unwrap_or(0)
    }
}

// ── Summary ──────────────────────────────────────────────────────────────

/// A document that failed, for the end-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub page: Option<usize>,
    pub message: String,
}

/// A document's per-page rate, for fastest / slowest reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRate {
    pub path: PathBuf,
    pub pages: usize,
    pub secs_per_page: f64,
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Documents re-run because an earlier transcript was error-tainted.
    pub recovered: usize,
    pub total_pages: usize,
    pub elapsed: Duration,
    pub fastest: Option<DocumentRate>,
    pub slowest: Option<DocumentRate>,
    pub failures: Vec<FailureRecord>,
    /// The user declined the confirmation prompt; nothing was touched.
    pub declined: bool,
    /// An interrupt stopped the loop early.
    pub interrupted: bool,
}

impl BatchSummary {
    /// Fold a document's rate into the fastest / slowest records.
    pub fn record_rate(&mut self, rate: DocumentRate) {
        if rate.pages == 0 {
            return;
        }
        let faster = self
            .fastest
            .as_ref()
            .map_or(true, |f| rate.secs_per_page < f.secs_per_page);
        let slower = self
            .slowest
            .as_ref()
            .map_or(true, |s| rate.secs_per_page > s.secs_per_page);
        if faster {
            self.fastest = Some(rate.clone());
        }
        if slower {
            self.slowest = Some(rate);
        }
    }

    pub fn record_failure(&mut self, path: PathBuf, page: Option<usize>, message: String) {
        self.errors += 1;
        self.failures.push(FailureRecord {
            path,
            page,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> WordBox {
        WordBox {
            page: 1,
            text: text.into(),
            x0,
            y0,
            x1,
            y1,
        }
    }

    #[test]
    fn malformed_boxes_are_not_injectable() {
        assert!(word("ok", 1.0, 1.0, 5.0, 4.0).is_injectable());
        assert!(!word("", 1.0, 1.0, 5.0, 4.0).is_injectable());
        assert!(!word("  ", 1.0, 1.0, 5.0, 4.0).is_injectable());
        assert!(!word("flat", 1.0, 4.0, 5.0, 4.0).is_injectable());
        assert!(!word("inverted", 5.0, 1.0, 1.0, 4.0).is_injectable());
        assert!(!word("nan", f32::NAN, 1.0, 5.0, 4.0).is_injectable());
    }

    #[test]
    fn cost_estimate_formats_two_decimals() {
        let est = CostEstimate::new(BackendKind::Claude, 3, 1000);
        assert!((est.total_cost() - 3.0).abs() < 1e-9);
        assert_eq!(est.formatted_cost(), "$3.00");

        let local = CostEstimate::new(BackendKind::Local, 3, 1000);
        assert_eq!(local.formatted_cost(), "$0.00");
    }

    #[test]
    fn summary_tracks_fastest_and_slowest() {
        let mut s = BatchSummary::default();
        for (name, spp) in [("a", 2.0), ("b", 0.5), ("c", 4.0)] {
            s.record_rate(DocumentRate {
                path: name.into(),
                pages: 2,
                secs_per_page: spp,
            });
        }
        assert_eq!(s.fastest.unwrap().path, PathBuf::from("b"));
        assert_eq!(s.slowest.unwrap().path, PathBuf::from("c"));
    }

    #[test]
    fn zero_page_rates_are_ignored() {
        let mut s = BatchSummary::default();
        s.record_rate(DocumentRate {
            path: "empty.pdf".into(),
            pages: 0,
            secs_per_page: 0.0,
        });
        assert!(s.fastest.is_none());
    }

    #[test]
    fn failure_counts_as_error() {
        let mut s = BatchSummary::default();
        s.record_failure("x.pdf".into(), Some(2), "rate_limit_error".into());
        assert_eq!(s.errors, 1);
        assert_eq!(s.failures[0].page, Some(2));
    }

    #[test]
    fn terminal_states() {
        assert!(!DocumentState::Rasterizing.is_terminal());
        assert!(!DocumentState::Extracting { page: 1, total: 3 }.is_terminal());
        assert!(DocumentState::Failed {
            page: Some(1),
            reason: "x".into()
        }
        .is_terminal());
    }
}
