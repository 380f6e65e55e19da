//! Remote vision backends (Claude, Gemini) through `edgequake-llm`.
//!
//! One request per page: the transcription instruction as the system
//! message, the page PNG as the user message. Both providers sit behind the
//! same `LLMProvider` trait and differ only in the provider name and model.
//!
//! ## Retry strategy
//!
//! A failed or timed-out call is retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). With 500 ms base and 3 retries the waits
//! are 500 ms → 1 s → 2 s. When every attempt fails the page becomes
//! `page-<n> extraction error: <message>`.

use super::{ExtractionBackend, ExtractionScope};
use crate::config::{BackendConfig, BackendKind, OutputFormat};
use crate::error::PdfOcrError;
use crate::pipeline::encode::encode_page;
use crate::pipeline::postprocess::clean_page_text;
use crate::pipeline::render::Page;
use crate::prompts::prompt_for;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

const USER_TURN: &str = "Transcribe this page.";

/// The error marker a failed remote page leaves in its transcript slot.
pub fn error_marker(page: usize, message: &str) -> String {
    format!("page-{page} extraction error: {message}")
}

pub struct RemoteVisionBackend {
    kind: BackendKind,
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl RemoteVisionBackend {
    /// Create the provider named by `config.kind`.
    pub fn from_config(config: &BackendConfig) -> Result<Self, PdfOcrError> {
        let provider_name = config.kind.provider_name().ok_or_else(|| {
            PdfOcrError::InvalidConfig(format!("{} is not a remote backend", config.kind))
        })?;
        let model = config.effective_model().unwrap_or_default();
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            PdfOcrError::ProviderNotConfigured {
                provider: provider_name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::with_provider(config, provider))
    }

    /// Use an already constructed provider.
    pub fn with_provider(config: &BackendConfig, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            kind: config.kind,
            provider,
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    async fn call_with_retry(&self, page: usize, messages: &[ChatMessage]) -> Result<String, String> {
        let start = Instant::now();
        let mut last_err = String::from("unknown error");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.call_timeout, self.provider.chat(messages, Some(&self.options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!("Page {}: attempt {} failed: {}", page, attempt + 1, last_err);
                }
                Err(_) => {
                    last_err = format!("request timed out after {}s", self.call_timeout.as_secs());
                    warn!("Page {}: attempt {} timed out", page, attempt + 1);
                }
            }
        }
        Err(last_err)
    }
}

fn build_messages(image: ImageData, format: OutputFormat) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(prompt_for(format)),
        ChatMessage::user_with_images(USER_TURN, vec![image]),
    ]
}

fn build_options(config: &BackendConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl ExtractionBackend for RemoteVisionBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn scope(&self) -> ExtractionScope {
        ExtractionScope::PerPage
    }

    async fn extract_page(&self, page: &Page, format: OutputFormat) -> String {
        let image = match encode_page(&page.image) {
            Ok(image) => image,
            Err(e) => return error_marker(page.index, &format!("image encoding failed: {e}")),
        };
        let messages = build_messages(image, format);

        match self.call_with_retry(page.index, &messages).await {
            Ok(content) => clean_page_text(&content, format),
            Err(message) => error_marker(page.index, &message),
        }
    }
}
