//! PDF rasterisation at a fixed 2× scale.
//!
//! Every consumer of page pixels (remote vision backends, local OCR and the
//! text-layer synthesizer) sees the same raster, so OCR pixel boxes divided
//! by [`RENDER_SCALE`] land exactly on page points.
//!
//! pdfium wraps a C++ library with global state, so all calls here are
//! blocking and must run inside `tokio::task::spawn_blocking`.

use crate::error::PdfOcrError;
use image::DynamicImage;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Raster scale relative to the page's point size (72 dpi → 144 dpi).
pub const RENDER_SCALE: f32 = 2.0;

/// One rendered page.
#[derive(Clone)]
pub struct Page {
    /// 1-based page index.
    pub index: usize,
    pub image: DynamicImage,
    /// Page size in PDF points.
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Page {
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("pixels", &self.pixel_size())
            .field("points", &(self.width_pt, self.height_pt))
            .finish()
    }
}

/// Source of page rasters and page-level facts for a document.
///
/// Implementations are blocking.
pub trait PageRasterizer: Send + Sync {
    /// Number of pages, without rendering anything.
    fn page_count(&self, path: &Path) -> Result<usize, PdfOcrError>;

    /// Render every page in order at [`RENDER_SCALE`].
    fn rasterize(&self, path: &Path) -> Result<Vec<Page>, PdfOcrError>;

    /// Text already embedded in one page (1-based), empty when there is none.
    fn embedded_text(&self, path: &Path, page: usize) -> Result<String, PdfOcrError>;
}

pub type SharedRasterizer = Arc<dyn PageRasterizer>;

/// Bind to the pdfium shared library resolved by `pdfium-auto`.
pub fn bind_pdfium() -> Result<Pdfium, PdfOcrError> {
    pdfium_auto::bind_pdfium_silent().map_err(|e| PdfOcrError::PdfiumBindingFailed(e.to_string()))
}

pub(crate) fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
) -> Result<PdfDocument<'a>, PdfOcrError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| PdfOcrError::DocumentUnreadable {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

/// Render one page of an open document at [`RENDER_SCALE`].
pub(crate) fn render_page(document: &PdfDocument<'_>, index: usize) -> Result<Page, PdfOcrError> {
    let raster_err = |e: PdfiumError| PdfOcrError::RasterisationFailed {
        page: index,
        detail: format!("{:?}", e),
    };
    let u16_index = u16::try_from(index - 1).map_err(|_| PdfOcrError::RasterisationFailed {
        page: index,
        detail: "page index out of range".into(),
    })?;

    let page = document.pages().get(u16_index).map_err(raster_err)?;
    let config = PdfRenderConfig::new().scale_page_by_factor(RENDER_SCALE);
    let bitmap = page.render_with_config(&config).map_err(raster_err)?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        index,
        image.width(),
        image.height()
    );

    Ok(Page {
        index,
        image,
        width_pt: page.width().value,
        height_pt: page.height().value,
    })
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, path: &Path) -> Result<usize, PdfOcrError> {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, path)?;
        Ok(document.pages().len() as usize)
    }

    fn rasterize(&self, path: &Path) -> Result<Vec<Page>, PdfOcrError> {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, path)?;
        let total = document.pages().len() as usize;
        info!("PDF loaded: {} ({} pages)", path.display(), total);

        (1..=total).map(|i| render_page(&document, i)).collect()
    }

    fn embedded_text(&self, path: &Path, page: usize) -> Result<String, PdfOcrError> {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, path)?;
        let text_err = |e: PdfiumError| PdfOcrError::RasterisationFailed {
            page,
            detail: format!("{:?}", e),
        };
        let index = u16::try_from(page.saturating_sub(1)).map_err(|_| {
            PdfOcrError::RasterisationFailed {
                page,
                detail: "page index out of range".into(),
            }
        })?;
        let pdf_page = document.pages().get(index).map_err(text_err)?;
        let text = pdf_page.text().map_err(text_err)?.all();
        Ok(text)
    }
}

/// Count of [`run_blocking`] jobs still running, including jobs whose
/// caller has been dropped.
static BLOCKING_JOBS: Lazy<watch::Sender<usize>> = Lazy::new(|| watch::channel(0).0);

/// Held by a blocking job until its result, including any temp files it
/// owns, has been dropped.
struct JobGuard;

impl JobGuard {
    fn enter() -> Self {
        BLOCKING_JOBS.send_modify(|n| *n += 1);
        JobGuard
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        BLOCKING_JOBS.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Run a blocking pdfium or filesystem call off the async executor.
///
/// Dropping the returned future does not stop the job; see
/// [`blocking_jobs_settled`].
pub async fn run_blocking<T, F>(f: F) -> Result<T, PdfOcrError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PdfOcrError> + Send + 'static,
{
    let guard = JobGuard::enter();
    // The guard travels with the output so that an abandoned job's output
    // (e.g. a staged temp file) is dropped before the count goes down.
    let (result, _guard) = tokio::task::spawn_blocking(move || {
        let guard = guard;
        (f(), guard)
    })
    .await
    .map_err(|e| PdfOcrError::Internal(format!("Blocking task panicked: {}", e)))?;
    result
}

/// Wait until every [`run_blocking`] job has finished and released its
/// output.
pub async fn blocking_jobs_settled() {
    let mut jobs = BLOCKING_JOBS.subscribe();
    let _ = jobs.wait_for(|n| *n == 0).await;
}
