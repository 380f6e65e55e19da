//! Error types for the edgequake-pdfocr library.
//!
//! Three tiers of failure exist, and each has a different home:
//!
//! * [`PdfOcrError`] — returned as `Err` from every fallible public
//!   operation. Most variants are **fatal to one document** (unreadable
//!   source, classified remote-service error, save failure): the batch
//!   orchestrator counts them and moves on. A few are **fatal to the batch**
//!   (bad root directory, missing credential) and are reported before any
//!   work starts; see [`PdfOcrError::is_batch_fatal`].
//!
//! * [`OcrError`] — a single local OCR stage failed. These never leave the
//!   local backend: they are recorded as fallback-stage outcomes and the next
//!   stage is tried.
//!
//! * Word-level insertion failures in the synthesizer are not errors at all;
//!   the offending word is simply omitted.

use std::path::PathBuf;
use thiserror::Error;

/// All errors surfaced by the edgequake-pdfocr library.
#[derive(Debug, Error)]
pub enum PdfOcrError {
    // ── Batch-level (configuration) errors ────────────────────────────────
    /// The batch root does not exist.
    #[error("Directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// The batch root exists but is a file.
    #[error("Not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// The selected backend is missing its credential or failed to initialise.
    #[error("Backend '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Document-level errors ─────────────────────────────────────────────
    /// The source PDF could not be opened (corrupt, encrypted, unsupported).
    #[error("Cannot read document '{path}': {detail}")]
    DocumentUnreadable { path: PathBuf, detail: String },

    /// The file exists but does not start with the PDF magic bytes.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A page's backend output matched a known remote-service error signature.
    #[error("Page {page} returned a service error: {detail}")]
    ClassifiedPageError { page: usize, detail: String },

    /// Building or saving the searchable PDF failed.
    #[error("Searchable PDF synthesis failed for '{path}': {detail}")]
    SynthesisFailed { path: PathBuf, detail: String },

    /// Could not create, write or rename an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted before this document finished.
    #[error("Interrupted")]
    Interrupted,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PdfOcrError {
    /// True for errors that must stop a batch before any document is touched.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            PdfOcrError::DirectoryNotFound { .. }
                | PdfOcrError::NotADirectory { .. }
                | PdfOcrError::ProviderNotConfigured { .. }
                | PdfOcrError::InvalidConfig(_)
                | PdfOcrError::PdfiumBindingFailed(_)
        )
    }

    /// The 1-based page this error is attributed to, when there is one.
    pub fn failed_page(&self) -> Option<usize> {
        match self {
            PdfOcrError::ClassifiedPageError { page, .. }
            | PdfOcrError::RasterisationFailed { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// Failure of one local OCR stage.
///
/// Absorbed by the local backend's fallback chain; only the message survives,
/// inside the error marker written when every stage fails.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The OCR engine binary is not installed.
    #[error("OCR engine not available: {0}")]
    EngineNotAvailable(String),

    /// The engine ran but reported failure.
    #[error("OCR failed: {0}")]
    OcrFailed(String),

    /// The stage succeeded but produced no text.
    #[error("stage produced no text")]
    EmptyOutput,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
