//! Configuration types for transcription and searchable-PDF batches.
//!
//! Two structs carry every knob:
//!
//! * [`BackendConfig`] — which extraction backend to use and how to talk to it.
//! * [`BatchConfig`] — what a batch run does with each document, built via
//!   [`BatchConfigBuilder`] so validation happens once, up front.
//!
//! The backend is selected by the typed [`BackendKind`] enumeration; its cost
//! constant, provider name and credential variable are all looked up from the
//! variant rather than from a string-keyed table.

use crate::error::PdfOcrError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Enums ────────────────────────────────────────────────────────────────

/// The extraction backend used for transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Anthropic Claude vision model, one request per page.
    #[default]
    Claude,
    /// Google Gemini vision model, one request per page.
    Gemini,
    /// Local layout-aware OCR over the whole document. No API key.
    Local,
}

impl BackendKind {
    /// Estimated all-in cost of one page, in USD.
    ///
    /// Claude: ~750 image input tokens at $3/1M plus ~500 output tokens at
    /// $15/1M. Gemini Flash is roughly an order of magnitude cheaper.
    pub fn cost_per_page(self) -> f64 {
        match self {
            BackendKind::Claude => 0.003,
            BackendKind::Gemini => 0.0004,
            BackendKind::Local => 0.0,
        }
    }

    /// edgequake-llm provider name, `None` for the local backend.
    pub fn provider_name(self) -> Option<&'static str> {
        match self {
            BackendKind::Claude => Some("anthropic"),
            BackendKind::Gemini => Some("gemini"),
            BackendKind::Local => None,
        }
    }

    /// Environment variable holding the API key, `None` when no key is needed.
    pub fn credential_env(self) -> Option<&'static str> {
        match self {
            BackendKind::Claude => Some("ANTHROPIC_API_KEY"),
            BackendKind::Gemini => Some("GEMINI_API_KEY"),
            BackendKind::Local => None,
        }
    }

    pub fn default_model(self) -> Option<&'static str> {
        match self {
            BackendKind::Claude => Some("claude-sonnet-4-5-20250929"),
            BackendKind::Gemini => Some("gemini-2.5-flash"),
            BackendKind::Local => None,
        }
    }

    pub fn is_remote(self) -> bool {
        !matches!(self, BackendKind::Local)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Claude => "claude",
            BackendKind::Gemini => "gemini",
            BackendKind::Local => "local",
        })
    }
}

/// Transcript flavour requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Headings, lists, tables and code blocks inferred from the page layout.
    Markdown,
    /// Raw text only.
    #[default]
    Plain,
}

// ── Backend configuration ────────────────────────────────────────────────

/// How to reach the extraction backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Model identifier. `None` uses [`BackendKind::default_model`].
    pub model: Option<String>,

    /// Sampling temperature for remote models. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum tokens a remote model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a failed remote call before the page is given up. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout for remote calls in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Tesseract language pack for the local backend. Default: "eng".
    pub ocr_language: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            ocr_language: "eng".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// The model that will actually be requested.
    pub fn effective_model(&self) -> Option<&str> {
        self.model.as_deref().or_else(|| self.kind.default_model())
    }

    /// Check that the selected backend can run at all.
    ///
    /// Remote backends need their credential variable set and non-empty.
    pub fn validate(&self) -> Result<(), PdfOcrError> {
        if let Some(var) = self.kind.credential_env() {
            let present = std::env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false);
            if !present {
                return Err(PdfOcrError::ProviderNotConfigured {
                    provider: self.kind.to_string(),
                    hint: format!("Set it with: export {var}='your-key-here'"),
                });
            }
        }
        if self.max_tokens == 0 {
            return Err(PdfOcrError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if self.ocr_language.trim().is_empty() {
            return Err(PdfOcrError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ── Batch configuration ──────────────────────────────────────────────────

/// Configuration for one batch run over a directory tree.
///
/// Built via [`BatchConfig::builder()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfocr::{BackendConfig, BackendKind, BatchConfig};
///
/// let config = BatchConfig::builder()
///     .backend(BackendConfig::new(BackendKind::Local))
///     .skip_existing(true)
///     .auto_confirm(true)
///     .build()
///     .unwrap();
/// assert!(config.transcribe && config.searchable);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub backend: BackendConfig,

    /// Replace the source PDFs with their searchable versions. Default: false.
    ///
    /// When false, `<stem>_searchable.pdf` is written next to each source.
    pub overwrite: bool,

    /// Skip documents whose clean transcript already exists. Default: true.
    pub skip_existing: bool,

    /// Transcript flavour. Default: plain.
    pub output_format: OutputFormat,

    /// Do not ask before processing. Default: false.
    pub auto_confirm: bool,

    /// Run the extraction pipeline. Default: true.
    pub transcribe: bool,

    /// Run the text-layer synthesizer. Default: true.
    pub searchable: bool,

    /// Pages assumed for documents whose page count cannot be read. Default: 5.
    pub fallback_page_estimate: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            overwrite: false,
            skip_existing: true,
            output_format: OutputFormat::default(),
            auto_confirm: false,
            transcribe: true,
            searchable: true,
            fallback_page_estimate: 5,
        }
    }
}

impl BatchConfig {
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn skip_existing(mut self, v: bool) -> Self {
        self.config.skip_existing = v;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn auto_confirm(mut self, v: bool) -> Self {
        self.config.auto_confirm = v;
        self
    }

    pub fn transcribe(mut self, v: bool) -> Self {
        self.config.transcribe = v;
        self
    }

    pub fn searchable(mut self, v: bool) -> Self {
        self.config.searchable = v;
        self
    }

    pub fn fallback_page_estimate(mut self, pages: usize) -> Self {
        self.config.fallback_page_estimate = pages;
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Credential checks are left to [`BackendConfig::validate`], which the
    /// orchestrator runs when it constructs the backend.
    pub fn build(self) -> Result<BatchConfig, PdfOcrError> {
        let c = &self.config;
        if !c.transcribe && !c.searchable {
            return Err(PdfOcrError::InvalidConfig(
                "nothing to do: both transcription and searchable-PDF output are disabled".into(),
            ));
        }
        if c.fallback_page_estimate == 0 {
            return Err(PdfOcrError::InvalidConfig(
                "fallback page estimate must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_constants_are_typed_per_backend() {
        assert!(BackendKind::Claude.cost_per_page() > BackendKind::Gemini.cost_per_page());
        assert_eq!(BackendKind::Local.cost_per_page(), 0.0);
    }

    #[test]
    fn local_backend_needs_no_credential() {
        let cfg = BackendConfig::new(BackendKind::Local);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.effective_model(), None);
    }

    #[test]
    fn explicit_model_wins() {
        let mut cfg = BackendConfig::new(BackendKind::Gemini);
        assert_eq!(cfg.effective_model(), Some("gemini-2.5-flash"));
        cfg.model = Some("gemini-2.5-pro".into());
        assert_eq!(cfg.effective_model(), Some("gemini-2.5-pro"));
    }

    #[test]
    fn builder_defaults() {
        let cfg = BatchConfig::builder().build().unwrap();
        assert!(cfg.skip_existing);
        assert!(!cfg.overwrite);
        assert_eq!(cfg.fallback_page_estimate, 5);
        assert_eq!(cfg.output_format, OutputFormat::Plain);
    }

    #[test]
    fn builder_rejects_empty_work() {
        let err = BatchConfig::builder()
            .transcribe(false)
            .searchable(false)
            .build()
            .unwrap_err();
        assert!(matches!(err, PdfOcrError::InvalidConfig(_)));
    }

    #[test]
    fn backend_kind_serde_is_lowercase() {
        let json = serde_json::to_string(&BackendKind::Gemini).unwrap();
        assert_eq!(json, "\"gemini\"");
    }
}
