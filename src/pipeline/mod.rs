//! Shared stages used by both the extraction pipeline and the synthesizer.
//!
//! ```text
//! render ──▶ encode ──▶ (remote backend) ──▶ postprocess
//! (pdfium 2×) (base64 PNG)                   (cleanup)
//! ```
//!
//! 1. [`render`] — rasterise pages at the fixed 2× scale; blocking, run in
//!    `spawn_blocking`
//! 2. [`encode`] — PNG-encode a page for a vision request or an OCR engine
//! 3. [`postprocess`] — deterministic cleanup of remote model output

pub mod encode;
pub mod postprocess;
pub mod render;
