//! Searchable-PDF synthesis: scan image plus invisible text layer.
//!
//! Every output page is rebuilt from scratch:
//!
//! 1. the source page rendered at 2× becomes a full-bleed image on a new
//!    page of the same point size, so nothing of the original content stream
//!    survives except its pixels;
//! 2. each OCR word for that page is written on top in invisible render
//!    mode, anchored at its box's lower-left corner.
//!
//! Word boxes come from the local OCR pass, either reused from a local
//! extraction run or computed here once for the whole document. Because OCR
//! ran on the same 2× raster that becomes the page image, pixel boxes divided
//! by the render scale land on the glyphs they describe.
//!
//! Output goes to a staged temp file next to the target and is only moved
//! into place by [`StagedPdf::commit`]. Every output carries [`PRODUCER`] in
//! its document info, which is how an overwritten source is recognised as
//! already done.

use crate::backend::tesseract::TesseractEngine;
use crate::backend::LocalLayoutBackend;
use crate::error::PdfOcrError;
use crate::output::WordBox;
use crate::pipeline::render::{bind_pdfium, run_blocking, Page, PdfiumRasterizer, SharedRasterizer};
use async_trait::async_trait;
use lopdf::Object;
use pdfium_render::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Font size is this fraction of the word box height.
pub const FONT_HEIGHT_RATIO: f32 = 0.75;

/// Smallest font size used for injected words.
pub const MIN_FONT_SIZE: f32 = 6.0;

/// `/Producer` value stamped into every synthesized PDF.
pub const PRODUCER: &str = "edgequake-pdfocr";

/// Where and how one word is written.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPlacement {
    pub text: String,
    /// Anchor in top-left page space: `(x0, y1)` of the word box.
    pub anchor: (f32, f32),
    /// Anchor converted to PDF user space (bottom-left origin).
    pub pdf_x: f32,
    pub pdf_y: f32,
    pub font_size: f32,
}

impl TextPlacement {
    /// Placement for `word` on a page `page_height` points tall, `None` for
    /// malformed boxes.
    pub fn for_word(word: &WordBox, page_height: f32) -> Option<Self> {
        if !word.is_injectable() {
            return None;
        }
        Some(Self {
            text: word.text.trim().to_string(),
            anchor: (word.x0, word.y1),
            pdf_x: word.x0,
            pdf_y: page_height - word.y1,
            font_size: (word.height() * FONT_HEIGHT_RATIO).max(MIN_FONT_SIZE),
        })
    }
}

/// A fully written searchable PDF waiting to be moved to its target.
///
/// Dropping it deletes the staged file.
#[derive(Debug)]
pub struct StagedPdf {
    file: NamedTempFile,
    target: PathBuf,
    pub page_count: usize,
}

impl StagedPdf {
    /// Write `bytes` to a fresh staging file for `target`.
    pub fn write(target: &Path, bytes: &[u8], page_count: usize) -> Result<Self, PdfOcrError> {
        let mut file = staging_file(target)?;
        let write_err = |source: std::io::Error| PdfOcrError::OutputWriteFailed {
            path: target.to_path_buf(),
            source,
        };
        file.write_all(bytes).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        Ok(Self {
            file,
            target: target.to_path_buf(),
            page_count,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically rename the staged file onto its target.
    pub fn commit(self) -> Result<usize, PdfOcrError> {
        let target = self.target;
        self.file
            .persist(&target)
            .map_err(|e| PdfOcrError::OutputWriteFailed {
                path: target.clone(),
                source: e.error,
            })?;
        info!("Wrote searchable PDF {}", target.display());
        Ok(self.page_count)
    }
}

/// Create a uniquely named staging file in `target`'s directory.
pub fn staging_file(target: &Path) -> Result<NamedTempFile, PdfOcrError> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".pdf.tmp")
        .tempfile_in(&dir)
        .map_err(|source| PdfOcrError::OutputWriteFailed {
            path: target.to_path_buf(),
            source,
        })
}

/// Anything that can produce a staged searchable PDF.
#[async_trait]
pub trait SearchableSynthesizer: Send + Sync {
    /// Build the searchable version of `source`, staged next to `target`.
    ///
    /// `words` reuses boxes from an earlier local OCR run; `None` runs OCR.
    async fn stage(
        &self,
        source: &Path,
        target: &Path,
        words: Option<Vec<WordBox>>,
    ) -> Result<StagedPdf, PdfOcrError>;

    /// Whether `path` is already an output of this synthesizer. Blocking.
    fn is_synthesized(&self, path: &Path) -> bool {
        carries_producer_stamp(path)
    }

    /// Build and commit in one step. Returns the page count.
    async fn inject(&self, source: &Path, target: &Path) -> Result<usize, PdfOcrError> {
        let staged = self.stage(source, target, None).await?;
        run_blocking(move || staged.commit()).await
    }
}

pub type SharedSynthesizer = Arc<dyn SearchableSynthesizer>;

/// [`SearchableSynthesizer`] backed by pdfium, the local OCR chain and lopdf.
#[derive(Clone)]
pub struct TextLayerSynthesizer {
    rasterizer: SharedRasterizer,
    ocr: LocalLayoutBackend,
}

impl TextLayerSynthesizer {
    pub fn new(rasterizer: SharedRasterizer, ocr: LocalLayoutBackend) -> Self {
        Self { rasterizer, ocr }
    }

    /// pdfium rasterizer and tesseract in `language`.
    pub fn with_language(language: &str) -> Self {
        let rasterizer: SharedRasterizer = Arc::new(PdfiumRasterizer);
        let ocr = LocalLayoutBackend::new(
            Arc::clone(&rasterizer),
            Arc::new(TesseractEngine::new(language)),
        );
        Self::new(rasterizer, ocr)
    }

    fn stage_blocking(
        &self,
        source: &Path,
        target: &Path,
        words: Option<Vec<WordBox>>,
    ) -> Result<StagedPdf, PdfOcrError> {
        let pages = self.rasterizer.rasterize(source)?;
        let words = match words {
            Some(words) => words,
            None => self.ocr.recognize_pages(&pages, Some(source)).words,
        };

        let fail = |detail: String| PdfOcrError::SynthesisFailed {
            path: source.to_path_buf(),
            detail,
        };
        let raw = build_searchable_pdf(&pages, &words).map_err(fail)?;
        let bytes = finalize(&raw).map_err(fail)?;
        debug!("Finalized {} → {} bytes", raw.len(), bytes.len());

        StagedPdf::write(target, &bytes, pages.len())
    }
}

#[async_trait]
impl SearchableSynthesizer for TextLayerSynthesizer {
    async fn stage(
        &self,
        source: &Path,
        target: &Path,
        words: Option<Vec<WordBox>>,
    ) -> Result<StagedPdf, PdfOcrError> {
        let this = self.clone();
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        run_blocking(move || this.stage_blocking(&source, &target, words)).await
    }
}

/// Rebuild every page as image plus invisible words. Blocking.
fn build_searchable_pdf(pages: &[Page], words: &[WordBox]) -> Result<Vec<u8>, String> {
    let pdfium = bind_pdfium().map_err(|e| e.to_string())?;
    let mut document = pdfium.create_new_pdf().map_err(|e| format!("{e:?}"))?;
    let font = document.fonts_mut().helvetica();

    for page in pages {
        let width = PdfPoints::new(page.width_pt);
        let height = PdfPoints::new(page.height_pt);
        let page_err = |e: PdfiumError| format!("page {}: {:?}", page.index, e);

        let mut new_page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(width, height))
            .map_err(page_err)?;
        new_page.set_content_regeneration_strategy(
            PdfPageContentRegenerationStrategy::AutomaticOnDrop,
        );

        let mut image = PdfPageImageObject::new(&document, &page.image).map_err(page_err)?;
        image
            .scale(page.width_pt, page.height_pt)
            .map_err(page_err)?;
        new_page
            .objects_mut()
            .add_image_object(image)
            .map_err(page_err)?;

        let mut placed = 0usize;
        let mut dropped = 0usize;
        for word in words.iter().filter(|w| w.page == page.index) {
            let Some(placement) = TextPlacement::for_word(word, page.height_pt) else {
                dropped += 1;
                continue;
            };
            match place_word(&document, &mut new_page, font, &placement) {
                Ok(()) => placed += 1,
                Err(e) => {
                    debug!("Page {}: skipped word {:?}: {:?}", page.index, placement.text, e);
                    dropped += 1;
                }
            }
        }
        debug!("Page {}: {} words placed, {} dropped", page.index, placed, dropped);
    }

    document.save_to_bytes().map_err(|e| format!("{e:?}"))
}

fn place_word<'a>(
    document: &PdfDocument<'a>,
    page: &mut PdfPage<'a>,
    font: PdfFontToken,
    placement: &TextPlacement,
) -> Result<(), PdfiumError> {
    let mut text = PdfPageTextObject::new(
        document,
        &placement.text,
        font,
        PdfPoints::new(placement.font_size),
    )?;
    text.set_render_mode(PdfPageTextRenderMode::Invisible)?;
    text.translate(PdfPoints::new(placement.pdf_x), PdfPoints::new(placement.pdf_y))?;
    page.objects_mut().add_text_object(text)?;
    Ok(())
}

/// Stamp [`PRODUCER`], garbage-collect unused objects and deflate streams.
pub fn finalize(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("reload: {e}"))?;
    stamp_producer(&mut doc);
    let pruned = doc.prune_objects();
    let empty = doc.delete_zero_length_streams();
    doc.compress();
    debug!(
        "Compaction pruned {} objects, {} empty streams",
        pruned.len(),
        empty.len()
    );
    let mut out = Vec::with_capacity(bytes.len());
    doc.save_to(&mut out).map_err(|e| e.to_string())?;
    Ok(out)
}

fn stamp_producer(doc: &mut lopdf::Document) {
    let producer = Object::string_literal(PRODUCER);
    let info_id = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => *id,
        _ => {
            let id = doc.add_object(lopdf::Dictionary::new());
            doc.trailer.set("Info", id);
            id
        }
    };
    match doc.get_object_mut(info_id).and_then(Object::as_dict_mut) {
        Ok(info) => info.set("Producer", producer),
        Err(_) => {
            let id = doc.add_object(lopdf::dictionary! { "Producer" => producer });
            doc.trailer.set("Info", id);
        }
    }
}

fn producer(doc: &lopdf::Document) -> Option<Vec<u8>> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match info.get(b"Producer").ok()? {
        Object::String(bytes, _) => Some(bytes.clone()),
        _ => None,
    }
}

/// Whether the PDF at `path` was written by [`TextLayerSynthesizer`].
/// Unreadable files are not.
pub fn carries_producer_stamp(path: &Path) -> bool {
    match lopdf::Document::load(path) {
        Ok(doc) => producer(&doc).is_some_and(|p| p == PRODUCER.as_bytes()),
        Err(e) => {
            debug!("No producer stamp readable in {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(x0: f32, y0: f32, x1: f32, y1: f32) -> WordBox {
        WordBox {
            page: 1,
            text: "Total".into(),
            x0,
            y0,
            x1,
            y1,
        }
    }

    fn minimal_pdf() -> Vec<u8> {
        use lopdf::dictionary;
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn finalize_stamps_producer() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.pdf");
        let stamped = dir.path().join("stamped.pdf");
        let raw = minimal_pdf();
        std::fs::write(&plain, &raw).unwrap();
        std::fs::write(&stamped, finalize(&raw).unwrap()).unwrap();

        assert!(!carries_producer_stamp(&plain));
        assert!(carries_producer_stamp(&stamped));
        assert!(TextLayerSynthesizer::with_language("eng").is_synthesized(&stamped));
    }

    #[test]
    fn unreadable_files_carry_no_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.pdf");
        std::fs::write(&junk, b"%PDF-edgequake-pdfocr but not a pdf").unwrap();
        assert!(!carries_producer_stamp(&junk));
        assert!(!carries_producer_stamp(&dir.path().join("missing.pdf")));
        assert!(finalize(b"not a pdf").is_err());
    }

    #[test]
    fn placement_anchors_at_lower_left() {
        let p = TextPlacement::for_word(&word(72.0, 100.0, 120.0, 116.0), 792.0).unwrap();
        assert_eq!(p.anchor, (72.0, 116.0));
        assert_eq!(p.pdf_x, 72.0);
        assert_eq!(p.pdf_y, 792.0 - 116.0);
        assert_eq!(p.font_size, 12.0);
    }

    #[test]
    fn small_boxes_get_minimum_font() {
        let p = TextPlacement::for_word(&word(10.0, 10.0, 20.0, 13.0), 500.0).unwrap();
        assert_eq!(p.font_size, MIN_FONT_SIZE);
    }

    #[test]
    fn malformed_boxes_have_no_placement() {
        assert!(TextPlacement::for_word(&word(10.0, 10.0, 10.0, 20.0), 500.0).is_none());
        assert!(TextPlacement::for_word(&word(10.0, 20.0, 15.0, 10.0), 500.0).is_none());
        let mut blank = word(1.0, 1.0, 2.0, 2.0);
        blank.text = " ".into();
        assert!(TextPlacement::for_word(&blank, 500.0).is_none());
    }

    #[test]
    fn staging_file_sits_next_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("scan.pdf");
        let tmp = staging_file(&target).unwrap();
        assert_eq!(tmp.path().parent(), Some(dir.path()));
        let name = tmp.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".scan.") && name.ends_with(".pdf.tmp"), "{name}");
    }

    #[test]
    fn dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("scan.pdf");
        std::fs::write(&target, b"%PDF-original").unwrap();
        {
            let mut file = staging_file(&target).unwrap();
            file.write_all(b"%PDF-half").unwrap();
            let _staged = StagedPdf {
                file,
                target: target.clone(),
                page_count: 1,
            };
        }
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-original");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn commit_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("scan.pdf");
        std::fs::write(&target, b"%PDF-original").unwrap();
        let mut file = staging_file(&target).unwrap();
        file.write_all(b"%PDF-searchable").unwrap();
        let staged = StagedPdf {
            file,
            target: target.clone(),
            page_count: 2,
        };
        assert_eq!(staged.commit().unwrap(), 2);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-searchable");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
