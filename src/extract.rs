//! The extraction pipeline: one document in, one transcript file out.
//!
//! ```text
//! rasterize (once) ──▶ for each page: backend ──▶ classify ──▶ append block
//!                                                   │
//!                                       hit ──▶ abort document
//! ```
//!
//! The transcript is assembled in memory and written once, atomically, after
//! the last page. A document that aborts (classified error, unreadable
//! source, interrupt) leaves no transcript behind, so the next run sees it
//! as not yet done.
//!
//! Whole-document backends are driven through a single synthetic progress
//! unit.

use crate::backend::{DocumentText, ExtractionScope, SharedBackend};
use crate::classify::{looks_like_error, matched_signature};
use crate::config::OutputFormat;
use crate::error::PdfOcrError;
use crate::output::{ExtractionReport, PageTiming, WordBox};
use crate::pipeline::render::{run_blocking, SharedRasterizer};
use crate::progress::{ExtractionProgressCallback, NoopProgress};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Marker line for a whole-document block.
pub const DOCUMENT_MARKER: &str = "=== DOCUMENT ===";

/// `=== PAGE 3 ===`
pub fn page_marker(page: usize) -> String {
    format!("=== PAGE {page} ===")
}

/// Join page texts into a transcript: one marked block per page, in order,
/// separated by a blank line. Every slot gets its marker, even when empty.
pub fn assemble_transcript(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}\n{}", page_marker(i + 1), text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn assemble_whole(text: &str) -> String {
    format!("{DOCUMENT_MARKER}\n{text}")
}

/// Write `contents` to `target` via a temporary file in the same directory.
pub(crate) async fn write_atomic(target: &Path, contents: String) -> Result<(), PdfOcrError> {
    let target = target.to_path_buf();
    run_blocking(move || {
        let write_err = |source: std::io::Error| PdfOcrError::OutputWriteFailed {
            path: target.clone(),
            source,
        };
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".pdfocr-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&target).map_err(|e| write_err(e.error))?;
        Ok(())
    })
    .await
}

/// Drives a rasterizer and a backend over one document.
#[derive(Clone)]
pub struct ExtractionPipeline {
    rasterizer: SharedRasterizer,
    backend: SharedBackend,
    progress: ExtractionProgressCallback,
}

impl ExtractionPipeline {
    pub fn new(rasterizer: SharedRasterizer, backend: SharedBackend) -> Self {
        Self {
            rasterizer,
            backend,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: ExtractionProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Transcribe `source` and write the transcript to `target`.
    ///
    /// # Errors
    /// * [`PdfOcrError::DocumentUnreadable`] when the source cannot be opened
    /// * [`PdfOcrError::ClassifiedPageError`] naming the first page whose
    ///   output matched an error signature
    /// * [`PdfOcrError::OutputWriteFailed`] when the transcript cannot be saved
    pub async fn run(
        &self,
        source: &Path,
        target: &Path,
        format: OutputFormat,
    ) -> Result<ExtractionReport, PdfOcrError> {
        let (transcript, report) = self.transcribe(source, format).await?;
        write_atomic(target, transcript).await?;
        info!(
            "Wrote transcript {} ({} pages, {:.1}s)",
            target.display(),
            report.page_count,
            report.total_elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Transcribe `source` without writing anything.
    pub async fn transcribe(
        &self,
        source: &Path,
        format: OutputFormat,
    ) -> Result<(String, ExtractionReport), PdfOcrError> {
        match self.backend.scope() {
            ExtractionScope::PerPage => self.transcribe_pages(source, format).await,
            ExtractionScope::WholeDocument => self.transcribe_document(source, format).await,
        }
    }

    async fn transcribe_pages(
        &self,
        source: &Path,
        format: OutputFormat,
    ) -> Result<(String, ExtractionReport), PdfOcrError> {
        let start = Instant::now();
        let rasterizer = Arc::clone(&self.rasterizer);
        let path = source.to_path_buf();
        let pages = run_blocking(move || rasterizer.rasterize(&path)).await?;
        let total = pages.len();
        self.progress.on_document_start(total);

        let mut texts = Vec::with_capacity(total);
        let mut timings = Vec::with_capacity(total);

        for page in &pages {
            self.progress.on_page_start(page.index, total);
            let t0 = Instant::now();
            let text = self.backend.extract_page(page, format).await;
            let elapsed = t0.elapsed();
            self.progress.on_page_complete(page.index, total, elapsed);

            let error_detected = looks_like_error(&text);
            timings.push(PageTiming {
                page: page.index,
                elapsed,
                error_detected,
            });
            if error_detected {
                return Err(self.abort(page.index, total, &text));
            }
            debug!("Page {}/{}: {} chars in {:?}", page.index, total, text.len(), elapsed);
            texts.push(text);
        }
        drop(pages);

        let report = ExtractionReport {
            page_count: total,
            timings,
            total_elapsed: start.elapsed(),
            words: None,
        };
        Ok((assemble_transcript(&texts), report))
    }

    async fn transcribe_document(
        &self,
        source: &Path,
        format: OutputFormat,
    ) -> Result<(String, ExtractionReport), PdfOcrError> {
        let start = Instant::now();
        self.progress.on_document_start(1);
        self.progress.on_page_start(1, 1);

        let extraction = self.backend.extract_document(source, format).await?;
        let elapsed = start.elapsed();
        self.progress.on_page_complete(1, 1, elapsed);

        let (transcript, page_count) = match &extraction.text {
            DocumentText::Paged(texts) => {
                if let Some(i) = texts.iter().position(|t| looks_like_error(t)) {
                    return Err(self.abort(i + 1, 1, &texts[i]));
                }
                (assemble_transcript(texts), texts.len())
            }
            DocumentText::Whole(text) => {
                if looks_like_error(text) {
                    return Err(self.abort(1, 1, text));
                }
                let rasterizer = Arc::clone(&self.rasterizer);
                let path = source.to_path_buf();
                let pages = run_blocking(move || rasterizer.page_count(&path))
                    .await
                    .unwrap_or(1);
                (assemble_whole(text), pages)
            }
        };

        let report = ExtractionReport {
            page_count,
            timings: vec![PageTiming {
                page: 1,
                elapsed,
                error_detected: false,
            }],
            total_elapsed: start.elapsed(),
            words: Some(extraction.words),
        };
        Ok((transcript, report))
    }

    fn abort(&self, page: usize, total: usize, text: &str) -> PdfOcrError {
        warn!(
            "Page {}: output matched error signature {:?}; aborting document",
            page,
            matched_signature(text).unwrap_or_default()
        );
        self.progress.on_page_error(page, total, text);
        PdfOcrError::ClassifiedPageError {
            page,
            detail: text.trim().to_string(),
        }
    }
}

/// Word boxes carried by a report, if the backend produced any.
pub fn reusable_words(report: &ExtractionReport) -> Option<Vec<WordBox>> {
    report.words.clone().filter(|w| !w.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_markers_in_order() {
        let t = assemble_transcript(&["alpha".into(), "".into(), "gamma".into()]);
        assert_eq!(
            t,
            "=== PAGE 1 ===\nalpha\n\n=== PAGE 2 ===\n\n\n=== PAGE 3 ===\ngamma"
        );
        let markers: Vec<&str> = t.lines().filter(|l| l.starts_with("=== PAGE")).collect();
        assert_eq!(markers, vec!["=== PAGE 1 ===", "=== PAGE 2 ===", "=== PAGE 3 ==="]);
    }

    #[test]
    fn whole_document_block() {
        assert_eq!(assemble_whole("all text"), "=== DOCUMENT ===\nall text");
    }

    #[tokio::test]
    async fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.txt");
        std::fs::write(&target, "old").unwrap();
        write_atomic(&target, "new".into()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
