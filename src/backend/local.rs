//! Local layout OCR over a whole document. No API key.
//!
//! Each page goes through an explicit fallback chain:
//!
//! 1. [`FallbackStage::LayoutOcr`]: layout-aware OCR, text plus word boxes
//! 2. [`FallbackStage::PlainOcr`]: whole-image OCR, text only
//! 3. [`FallbackStage::EmbeddedText`]: the text layer already in the PDF
//!
//! A failing or empty stage is recorded as a [`StageAttempt`] and the next
//! stage runs. A page where some stage ran but found nothing (a blank sheet)
//! yields empty text. Only when every stage fails does the page get the
//! `[Error extracting page N: ...]` marker.

use super::tesseract::{LayoutResult, OcrEngine};
use super::{DocumentExtraction, DocumentText, ExtractionBackend, ExtractionScope};
use crate::config::{BackendKind, OutputFormat};
use crate::error::{OcrError, PdfOcrError};
use crate::output::WordBox;
use crate::pipeline::render::{run_blocking, Page, SharedRasterizer, RENDER_SCALE};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStage {
    LayoutOcr,
    PlainOcr,
    EmbeddedText,
}

impl FallbackStage {
    pub const CHAIN: [FallbackStage; 3] = [
        FallbackStage::LayoutOcr,
        FallbackStage::PlainOcr,
        FallbackStage::EmbeddedText,
    ];
}

impl fmt::Display for FallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackStage::LayoutOcr => "layout OCR",
            FallbackStage::PlainOcr => "plain OCR",
            FallbackStage::EmbeddedText => "embedded text",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Succeeded,
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageAttempt {
    pub stage: FallbackStage,
    pub outcome: StageOutcome,
}

/// Result of the fallback chain for one page.
#[derive(Debug, Clone)]
pub struct PageRecognition {
    pub page: usize,
    pub text: String,
    pub words: Vec<WordBox>,
    pub attempts: Vec<StageAttempt>,
}

impl PageRecognition {
    /// The stage that produced the text, `None` if the chain was exhausted.
    pub fn winning_stage(&self) -> Option<FallbackStage> {
        self.attempts
            .iter()
            .find(|a| a.outcome == StageOutcome::Succeeded)
            .map(|a| a.stage)
    }
}

/// Marker for a page where every stage failed.
pub fn exhausted_marker(page: usize, last_error: &str) -> String {
    format!("[Error extracting page {page}: {last_error}]")
}

/// Convert OCR pixel boxes from the 2× raster into page-point word boxes.
pub fn words_from_layout(layout: &LayoutResult, page: usize) -> Vec<WordBox> {
    layout
        .words
        .iter()
        .map(|w| WordBox {
            page,
            text: w.text.clone(),
            x0: w.left / RENDER_SCALE,
            y0: w.top / RENDER_SCALE,
            x1: (w.left + w.width) / RENDER_SCALE,
            y1: (w.top + w.height) / RENDER_SCALE,
        })
        .collect()
}

#[derive(Clone)]
pub struct LocalLayoutBackend {
    rasterizer: SharedRasterizer,
    engine: Arc<dyn OcrEngine>,
}

impl LocalLayoutBackend {
    pub fn new(rasterizer: SharedRasterizer, engine: Arc<dyn OcrEngine>) -> Self {
        Self { rasterizer, engine }
    }

    fn try_stage(
        &self,
        stage: FallbackStage,
        page: &Page,
        source: Option<&Path>,
    ) -> Result<(String, Vec<WordBox>), OcrError> {
        let (text, words) = match stage {
            FallbackStage::LayoutOcr => {
                let layout = self.engine.recognize_layout(&page.image)?;
                (layout.text(), words_from_layout(&layout, page.index))
            }
            FallbackStage::PlainOcr => (self.engine.recognize_plain(&page.image)?, Vec::new()),
            FallbackStage::EmbeddedText => {
                let path = source.ok_or_else(|| {
                    OcrError::EngineNotAvailable("no source document for embedded text".into())
                })?;
                let text = self
                    .rasterizer
                    .embedded_text(path, page.index)
                    .map_err(|e| OcrError::OcrFailed(e.to_string()))?;
                (text, Vec::new())
            }
        };
        if text.trim().is_empty() {
            return Err(OcrError::EmptyOutput);
        }
        Ok((text.trim().to_string(), words))
    }

    /// Run the fallback chain for one page. Blocking.
    pub fn recognize_page(&self, page: &Page, source: Option<&Path>) -> PageRecognition {
        let mut attempts = Vec::with_capacity(FallbackStage::CHAIN.len());
        let mut last_error = String::from("no OCR stage produced text");

        for stage in FallbackStage::CHAIN {
            match self.try_stage(stage, page, source) {
                Ok((text, words)) => {
                    attempts.push(StageAttempt {
                        stage,
                        outcome: StageOutcome::Succeeded,
                    });
                    debug!(
                        "Page {}: {} produced {} chars, {} words",
                        page.index,
                        stage,
                        text.len(),
                        words.len()
                    );
                    return PageRecognition {
                        page: page.index,
                        text,
                        words,
                        attempts,
                    };
                }
                Err(OcrError::EmptyOutput) => {
                    debug!("Page {}: {} produced no text", page.index, stage);
                    attempts.push(StageAttempt {
                        stage,
                        outcome: StageOutcome::Empty,
                    });
                }
                Err(e) => {
                    debug!("Page {}: {} failed: {}", page.index, stage, e);
                    last_error = e.to_string();
                    attempts.push(StageAttempt {
                        stage,
                        outcome: StageOutcome::Failed(last_error.clone()),
                    });
                }
            }
        }

        if attempts.iter().any(|a| a.outcome == StageOutcome::Empty) {
            info!("Page {}: no text found, treating as blank", page.index);
            return PageRecognition {
                page: page.index,
                text: String::new(),
                words: Vec::new(),
                attempts,
            };
        }

        warn!("Page {}: all OCR stages failed", page.index);
        PageRecognition {
            page: page.index,
            text: exhausted_marker(page.index, &last_error),
            words: Vec::new(),
            attempts,
        }
    }

    /// Run the chain over already rendered pages. Blocking.
    pub fn recognize_pages(&self, pages: &[Page], source: Option<&Path>) -> DocumentExtraction {
        let mut texts = Vec::with_capacity(pages.len());
        let mut words = Vec::new();
        for page in pages {
            let rec = self.recognize_page(page, source);
            texts.push(rec.text);
            words.extend(rec.words);
        }
        info!(
            "Local OCR: {} pages, {} word boxes",
            pages.len(),
            words.len()
        );
        DocumentExtraction {
            text: DocumentText::Paged(texts),
            words,
        }
    }

    /// Rasterise `path` and run the chain over every page. Blocking.
    pub fn recognize_document(&self, path: &Path) -> Result<DocumentExtraction, PdfOcrError> {
        let pages = self.rasterizer.rasterize(path)?;
        Ok(self.recognize_pages(&pages, Some(path)))
    }
}

#[async_trait]
impl ExtractionBackend for LocalLayoutBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn scope(&self) -> ExtractionScope {
        ExtractionScope::WholeDocument
    }

    async fn extract_page(&self, page: &Page, _format: OutputFormat) -> String {
        let this = self.clone();
        let page = page.clone();
        let index = page.index;
        match tokio::task::spawn_blocking(move || this.recognize_page(&page, None)).await {
            Ok(rec) => rec.text,
            Err(e) => exhausted_marker(index, &format!("OCR task panicked: {e}")),
        }
    }

    async fn extract_document(
        &self,
        path: &Path,
        _format: OutputFormat,
    ) -> Result<DocumentExtraction, PdfOcrError> {
        let this = self.clone();
        let path: PathBuf = path.to_path_buf();
        run_blocking(move || this.recognize_document(&path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tesseract::OcrWord;
    use crate::classify::looks_like_error;
    use crate::pipeline::render::PageRasterizer;
    use image::DynamicImage;

    #[derive(Clone, Copy)]
    enum Script {
        Layout,
        PlainOnly,
        Nothing,
        Broken,
    }

    struct ScriptedEngine(Script);

    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize_layout(&self, _image: &DynamicImage) -> Result<LayoutResult, OcrError> {
            match self.0 {
                Script::Layout => Ok(LayoutResult {
                    words: vec![OcrWord {
                        text: "Invoice".into(),
                        left: 100.0,
                        top: 200.0,
                        width: 160.0,
                        height: 40.0,
                        confidence: 95.0,
                        block: 1,
                        paragraph: 1,
                        line: 1,
                    }],
                }),
                _ => Err(OcrError::OcrFailed("layout model crashed".into())),
            }
        }

        fn recognize_plain(&self, _image: &DynamicImage) -> Result<String, OcrError> {
            match self.0 {
                Script::PlainOnly => Ok("plain words".into()),
                Script::Broken => Err(OcrError::OcrFailed("tesseract exited 1".into())),
                _ => Err(OcrError::EmptyOutput),
            }
        }
    }

    struct TwoPages {
        embedded: &'static str,
    }

    impl PageRasterizer for TwoPages {
        fn page_count(&self, _path: &Path) -> Result<usize, PdfOcrError> {
            Ok(2)
        }

        fn rasterize(&self, _path: &Path) -> Result<Vec<Page>, PdfOcrError> {
            Ok((1..=2).map(page).collect())
        }

        fn embedded_text(&self, _path: &Path, _page: usize) -> Result<String, PdfOcrError> {
            Ok(self.embedded.to_string())
        }
    }

    fn page(index: usize) -> Page {
        Page {
            index,
            image: DynamicImage::new_luma8(20, 30),
            width_pt: 10.0,
            height_pt: 15.0,
        }
    }

    fn backend(script: Script, embedded: &'static str) -> LocalLayoutBackend {
        LocalLayoutBackend::new(
            Arc::new(TwoPages { embedded }),
            Arc::new(ScriptedEngine(script)),
        )
    }

    #[test]
    fn layout_stage_wins_and_boxes_are_halved() {
        let rec = backend(Script::Layout, "").recognize_page(&page(1), None);
        assert_eq!(rec.winning_stage(), Some(FallbackStage::LayoutOcr));
        assert_eq!(rec.text, "Invoice");
        let w = &rec.words[0];
        assert_eq!((w.x0, w.y0, w.x1, w.y1), (50.0, 100.0, 130.0, 120.0));
        assert_eq!(w.page, 1);
    }

    #[test]
    fn falls_back_in_order() {
        let rec = backend(Script::PlainOnly, "").recognize_page(&page(1), None);
        assert_eq!(rec.winning_stage(), Some(FallbackStage::PlainOcr));
        assert_eq!(rec.attempts.len(), 2);
        assert_eq!(rec.attempts[0].stage, FallbackStage::LayoutOcr);
        assert!(matches!(rec.attempts[0].outcome, StageOutcome::Failed(_)));
        assert!(rec.words.is_empty());

        let rec = backend(Script::Nothing, "born-digital text")
            .recognize_page(&page(2), Some(Path::new("doc.pdf")));
        assert_eq!(rec.winning_stage(), Some(FallbackStage::EmbeddedText));
        assert_eq!(rec.text, "born-digital text");
        assert_eq!(rec.attempts[1].outcome, StageOutcome::Empty);
    }

    #[test]
    fn blank_page_yields_empty_text() {
        let rec = backend(Script::Nothing, "   ").recognize_page(&page(2), Some(Path::new("d.pdf")));
        assert_eq!(rec.winning_stage(), None);
        assert_eq!(rec.attempts.len(), 3);
        assert_eq!(rec.text, "");
        assert!(!looks_like_error(&rec.text));
    }

    #[test]
    fn exhaustion_yields_classified_marker() {
        let rec = backend(Script::Broken, "").recognize_page(&page(2), None);
        assert_eq!(rec.winning_stage(), None);
        assert_eq!(rec.attempts.len(), 3);
        assert!(rec
            .attempts
            .iter()
            .all(|a| matches!(a.outcome, StageOutcome::Failed(_))));
        assert!(rec.text.starts_with("[Error extracting page 2:"));
        assert!(looks_like_error(&rec.text));
    }

    #[tokio::test]
    async fn blank_pages_keep_their_slot() {
        let b = backend(Script::Nothing, "");
        let out = b
            .extract_document(Path::new("doc.pdf"), OutputFormat::Plain)
            .await
            .unwrap();
        assert_eq!(out.text, DocumentText::Paged(vec![String::new(), String::new()]));
        assert!(out.words.is_empty());
    }

    #[tokio::test]
    async fn whole_document_is_paged() {
        let b = backend(Script::Layout, "");
        let out = b
            .extract_document(Path::new("doc.pdf"), OutputFormat::Plain)
            .await
            .unwrap();
        assert_eq!(
            out.text,
            DocumentText::Paged(vec!["Invoice".into(), "Invoice".into()])
        );
        assert_eq!(out.words.iter().map(|w| w.page).collect::<Vec<_>>(), vec![1, 2]);
    }
}
