//! # edgequake-pdfocr
//!
//! Resumable transcription of scanned PDF collections, plus searchable-PDF
//! synthesis.
//!
//! Point it at a directory tree of scans. For every `foo.pdf` it writes
//! `foo.txt`, a page-marked transcript, and `foo_searchable.pdf`, the same
//! page images with an invisible text layer so the document can be searched
//! and copied from. With `overwrite` set, the searchable copy replaces the
//! source instead.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory
//!  │
//!  ├─ 1. Plan      discover PDFs, read existing outputs, estimate cost
//!  ├─ 2. Confirm   ask once (or --yes)
//!  └─ 3. Per document, sequentially
//!        ├─ Render      rasterise pages via pdfium (spawn_blocking)
//!        ├─ Extract     Claude / Gemini per page, or local tesseract layout OCR
//!        ├─ Classify    abort on provider error text (rate_limit_error, …)
//!        ├─ Transcript  written atomically after the last page
//!        └─ Synthesize  page image + invisible words, staged then committed
//! ```
//!
//! Nothing records progress besides the outputs themselves: a document with a
//! clean transcript (and a searchable PDF, when requested) is done, and one
//! whose transcript contains provider error text is redone. Interrupt a run
//! at any time and start it again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfocr::{BackendConfig, BackendKind, BatchConfig, BatchOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Claude reads ANTHROPIC_API_KEY.
//!     let config = BatchConfig::builder()
//!         .backend(BackendConfig::new(BackendKind::Claude))
//!         .auto_confirm(true)
//!         .build()?;
//!     let summary = BatchOrchestrator::new(config)?
//!         .process("archive/scans".as_ref())
//!         .await?;
//!     eprintln!(
//!         "{} processed, {} skipped, {} errors",
//!         summary.processed, summary.skipped, summary.errors
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! | Backend  | Credential          | $/page (estimate) | Output |
//! |----------|---------------------|-------------------|--------|
//! | `claude` | `ANTHROPIC_API_KEY` | 0.003             | per page |
//! | `gemini` | `GEMINI_API_KEY`    | 0.0004            | per page |
//! | `local`  | none (tesseract)    | 0                 | per page, with word boxes |
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pdfocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `bundled` | off     | Embed the pdfium library in the binary |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod batch;
pub mod classify;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod synthesize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    create_backend, ExtractionBackend, LocalLayoutBackend, RemoteVisionBackend, SharedBackend,
};
pub use batch::{BatchOrchestrator, BatchPlan, ConfirmationPrompt, StdinPrompt};
pub use classify::looks_like_error;
pub use config::{BackendConfig, BackendKind, BatchConfig, BatchConfigBuilder, OutputFormat};
pub use document::{discover, Document};
pub use error::{OcrError, PdfOcrError};
pub use extract::ExtractionPipeline;
pub use output::{BatchSummary, CostEstimate, DocumentState, ExtractionReport, WordBox};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{
    BatchProgress, BatchProgressCallback, ExtractionProgress, ExtractionProgressCallback,
    NoopProgress,
};
pub use synthesize::{SearchableSynthesizer, TextLayerSynthesizer};
