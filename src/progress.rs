//! Progress callbacks for extraction and batch runs.
//!
//! The pipeline and the orchestrator never print. They report through these
//! traits, and the CLI turns the events into an `indicatif` display. All
//! methods default to no-ops so implementors only override what they use.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfocr::ExtractionProgress;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! struct Counter(AtomicUsize);
//!
//! impl ExtractionProgress for Counter {
//!     fn on_page_complete(&self, page: usize, total: usize, elapsed: Duration) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page}/{total} in {:.1}s", elapsed.as_secs_f64());
//!     }
//! }
//! ```

use crate::batch::BatchPlan;
use crate::output::BatchSummary;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Events from [`crate::extract::ExtractionPipeline`] for one document.
///
/// A whole-document backend reports a single unit: `total_units == 1`.
pub trait ExtractionProgress: Send + Sync {
    /// Called once after rasterisation, before the first backend call.
    fn on_document_start(&self, total_units: usize) {
        let _ = total_units;
    }

    fn on_page_start(&self, page: usize, total: usize) {
        let _ = (page, total);
    }

    /// Called after each unit, before its output is classified.
    fn on_page_complete(&self, page: usize, total: usize, elapsed: Duration) {
        let _ = (page, total, elapsed);
    }

    /// Called when a unit's output matched an error signature.
    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        let _ = (page, total, error);
    }
}

/// Events from [`crate::batch::BatchOrchestrator`].
pub trait BatchProgress: Send + Sync {
    /// Called after planning, before confirmation.
    fn on_plan(&self, plan: &BatchPlan) {
        let _ = plan;
    }

    /// Called when a queued document starts. `index` is 1-based.
    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    fn on_document_skipped(&self, path: &Path, reason: &str) {
        let _ = (path, reason);
    }

    fn on_document_complete(&self, path: &Path, pages: usize, elapsed: Duration) {
        let _ = (path, pages, elapsed);
    }

    fn on_document_error(&self, path: &Path, error: &str) {
        let _ = (path, error);
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// Ignores every event.
pub struct NoopProgress;

impl ExtractionProgress for NoopProgress {}
impl BatchProgress for NoopProgress {}

pub type ExtractionProgressCallback = Arc<dyn ExtractionProgress>;
pub type BatchProgressCallback = Arc<dyn BatchProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        total: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ExtractionProgress for Tracking {
        fn on_document_start(&self, total_units: usize) {
            self.total.store(total_units, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page: usize, _total: usize, _elapsed: Duration) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_everything() {
        let cb = NoopProgress;
        ExtractionProgress::on_document_start(&cb, 3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, Duration::from_millis(5));
        cb.on_page_error(2, 3, "boom");
        cb.on_batch_complete(&BatchSummary::default());
    }

    #[test]
    fn tracking_receives_events_through_arc() {
        let tracker = Arc::new(Tracking::default());
        let cb: ExtractionProgressCallback = tracker.clone();
        cb.on_document_start(2);
        cb.on_page_complete(1, 2, Duration::ZERO);
        cb.on_page_complete(2, 2, Duration::ZERO);
        cb.on_page_error(2, 2, "rate_limit_error");

        assert_eq!(tracker.total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
