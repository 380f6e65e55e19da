//! Extraction backends: remote vision models and local layout OCR.
//!
//! Every backend implements [`ExtractionBackend`]. Backends never return
//! structured errors for a page: a failure becomes an error-marker string in
//! that page's slot, so page alignment survives partial failure and the
//! classifier handles both "the call failed" and "the service answered with
//! an error payload" the same way.
//!
//! Backends come in two shapes, reported by [`ExtractionBackend::scope`]:
//!
//! * [`ExtractionScope::PerPage`]: one call per rendered page
//!   ([`remote::RemoteVisionBackend`]).
//! * [`ExtractionScope::WholeDocument`]: one call for the document path
//!   ([`local::LocalLayoutBackend`]), which also yields word boxes.

pub mod local;
pub mod remote;
pub mod tesseract;

use crate::config::{BackendConfig, BackendKind, OutputFormat};
use crate::error::PdfOcrError;
use crate::output::WordBox;
use crate::pipeline::render::{Page, PdfiumRasterizer};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub use local::LocalLayoutBackend;
pub use remote::RemoteVisionBackend;

/// How a backend consumes a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionScope {
    PerPage,
    WholeDocument,
}

/// Text returned by a whole-document extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentText {
    /// One entry per page, in page order.
    Paged(Vec<String>),
    /// Text that could not be attributed to pages.
    Whole(String),
}

/// Output of [`ExtractionBackend::extract_document`].
#[derive(Debug, Clone)]
pub struct DocumentExtraction {
    pub text: DocumentText,
    pub words: Vec<WordBox>,
}

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn scope(&self) -> ExtractionScope {
        ExtractionScope::PerPage
    }

    /// Transcribe one page. Failures come back as an error-marker string.
    async fn extract_page(&self, page: &Page, format: OutputFormat) -> String;

    /// Transcribe a whole document at once.
    ///
    /// Only called for [`ExtractionScope::WholeDocument`] backends. `Err` is
    /// reserved for an unreadable source; per-page failures are markers.
    async fn extract_document(
        &self,
        path: &Path,
        format: OutputFormat,
    ) -> Result<DocumentExtraction, PdfOcrError> {
        let _ = (path, format);
        Err(PdfOcrError::Internal(format!(
            "{} backend does not support whole-document extraction",
            self.kind()
        )))
    }
}

pub type SharedBackend = Arc<dyn ExtractionBackend>;

/// Build the backend selected by `config`.
///
/// # Errors
/// [`PdfOcrError::ProviderNotConfigured`] when a remote backend's credential
/// is missing or its provider cannot be created.
pub fn create_backend(config: &BackendConfig) -> Result<SharedBackend, PdfOcrError> {
    config.validate()?;
    let backend: SharedBackend = match config.kind {
        BackendKind::Local => Arc::new(LocalLayoutBackend::new(
            Arc::new(PdfiumRasterizer),
            Arc::new(tesseract::TesseractEngine::new(config.ocr_language.clone())),
        )),
        BackendKind::Claude | BackendKind::Gemini => Arc::new(RemoteVisionBackend::from_config(config)?),
    };
    info!(
        "Using {} backend{}",
        config.kind,
        config
            .effective_model()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default()
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PageOnly;

    #[async_trait]
    impl ExtractionBackend for PageOnly {
        fn kind(&self) -> BackendKind {
            BackendKind::Claude
        }

        async fn extract_page(&self, page: &Page, _format: OutputFormat) -> String {
            format!("text of page {}", page.index)
        }
    }

    #[tokio::test]
    async fn per_page_backend_rejects_whole_document() {
        let b = PageOnly;
        assert_eq!(b.scope(), ExtractionScope::PerPage);
        let err = b
            .extract_document(Path::new("x.pdf"), OutputFormat::Plain)
            .await
            .unwrap_err();
        assert!(matches!(err, PdfOcrError::Internal(_)));
    }

    #[test]
    fn local_backend_builds_without_credentials() {
        let backend = create_backend(&BackendConfig::new(BackendKind::Local)).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
        assert_eq!(backend.scope(), ExtractionScope::WholeDocument);
    }
}
