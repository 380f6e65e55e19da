//! Resumable batch processing of a directory tree.
//!
//! A run has three phases:
//!
//! 1. **Plan**: discover every source PDF, decide from the files already on
//!    disk whether each one is done, needs work, or needs its error-tainted
//!    transcript redone, and estimate cost from page counts.
//! 2. **Confirm**: unless `auto_confirm` is set, ask before touching anything.
//!    Declining or interrupting here changes nothing.
//! 3. **Execute**: documents one at a time in discovery order. Each one is
//!    re-checked first (the plan is advisory), then transcribed and/or
//!    synthesised. A failing document is counted and the loop moves on; an
//!    interrupt drops the in-flight document and stops the loop.
//!
//! There is no run ledger. The state of a document is derived every time
//! from its transcript and searchable PDF (in overwrite mode, the producer
//! stamp on the replaced source), so a crashed or interrupted run is resumed
//! simply by running again.

use crate::backend::{create_backend, SharedBackend};
use crate::classify::{looks_like_error, matched_signature};
use crate::config::BatchConfig;
use crate::document::{discover, Document};
use crate::error::PdfOcrError;
use crate::extract::{reusable_words, write_atomic, ExtractionPipeline};
use crate::output::{
    BatchItem, BatchSummary, CostEstimate, DocumentRate, DocumentState, ExtractionReport,
};
use crate::pipeline::render::{
    blocking_jobs_settled, run_blocking, PdfiumRasterizer, SharedRasterizer,
};
use crate::progress::{
    BatchProgressCallback, ExtractionProgress, ExtractionProgressCallback, NoopProgress,
};
use crate::synthesize::{SearchableSynthesizer, SharedSynthesizer, TextLayerSynthesizer};
use serde::Serialize;
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Filesystem evidence ──────────────────────────────────────────────────

/// What an existing transcript says about a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptState {
    Missing,
    Clean,
    /// Contains a known error signature.
    Tainted(String),
    /// Exists but cannot be read as UTF-8 text.
    Unreadable(String),
}

impl TranscriptState {
    pub fn of(path: &Path) -> Self {
        if !path.exists() {
            return TranscriptState::Missing;
        }
        match std::fs::read_to_string(path) {
            Ok(text) if looks_like_error(&text) => TranscriptState::Tainted(
                matched_signature(&text).unwrap_or_default().to_string(),
            ),
            Ok(_) => TranscriptState::Clean,
            Err(e) => TranscriptState::Unreadable(e.to_string()),
        }
    }

    pub fn needs_recovery(&self) -> bool {
        matches!(
            self,
            TranscriptState::Tainted(_) | TranscriptState::Unreadable(_)
        )
    }
}

/// Work still to do for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkNeeded {
    pub transcribe: bool,
    pub synthesize: bool,
    /// A previous transcript was error-tainted or unreadable.
    pub recovering: bool,
}

impl WorkNeeded {
    pub fn is_done(&self) -> bool {
        !self.transcribe && !self.synthesize
    }
}

/// Decide what `document` still needs under `config`.
///
/// `synthesizer` recognises its own output, which is the only evidence that
/// an overwritten source has been done.
pub fn assess(
    document: &Document,
    config: &BatchConfig,
    synthesizer: &dyn SearchableSynthesizer,
) -> WorkNeeded {
    let transcript = TranscriptState::of(&document.transcript_path());
    let recovering = config.transcribe && transcript.needs_recovery();

    if !config.skip_existing {
        return WorkNeeded {
            transcribe: config.transcribe,
            synthesize: config.searchable,
            recovering,
        };
    }

    let transcript_done = transcript == TranscriptState::Clean;
    let pdf_done = if !config.searchable {
        true
    } else if config.overwrite {
        synthesizer.is_synthesized(&document.path)
    } else {
        document.searchable_path().exists()
    };

    WorkNeeded {
        transcribe: config.transcribe && !transcript_done,
        synthesize: config.searchable && !pdf_done,
        recovering,
    }
}

// ── Planning ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PlannedDocument {
    pub document: Document,
    pub work: WorkNeeded,
    /// Page count, or the fallback estimate when the source is unreadable.
    pub pages: usize,
}

/// Outcome of the planning pass.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub root: PathBuf,
    pub queued: Vec<PlannedDocument>,
    pub skipped: Vec<Document>,
    pub estimate: CostEstimate,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Queued documents whose previous transcript was error-tainted.
    pub fn recovering(&self) -> impl Iterator<Item = &PlannedDocument> {
        self.queued.iter().filter(|p| p.work.recovering)
    }
}

// ── Confirmation ─────────────────────────────────────────────────────────

/// Asks the user whether to go ahead with a plan. Blocking.
pub trait ConfirmationPrompt: Send + Sync {
    fn confirm(&self, plan: &BatchPlan) -> bool;
}

/// Reads a `y`/`yes` answer from stdin.
pub struct StdinPrompt;

impl ConfirmationPrompt for StdinPrompt {
    fn confirm(&self, plan: &BatchPlan) -> bool {
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "Process {} document(s) for an estimated {}? [y/N] ",
            plan.queued.len(),
            plan.estimate.formatted_cost()
        );
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

// ── Per-document state tracking ──────────────────────────────────────────

/// Mirrors extraction events into a [`DocumentState`] and forwards them.
struct StateTracker {
    state: Mutex<DocumentState>,
    inner: ExtractionProgressCallback,
}

impl StateTracker {
    fn new(inner: ExtractionProgressCallback) -> Self {
        Self {
            state: Mutex::new(DocumentState::Rasterizing),
            inner,
        }
    }

    fn set(&self, state: DocumentState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    fn current_page(&self) -> Option<usize> {
        match self.state.lock().ok()?.clone() {
            DocumentState::Extracting { page, .. } if page > 0 => Some(page),
            _ => None,
        }
    }
}

impl ExtractionProgress for StateTracker {
    fn on_document_start(&self, total_units: usize) {
        self.set(DocumentState::Extracting {
            page: 0,
            total: total_units,
        });
        self.inner.on_document_start(total_units);
    }

    fn on_page_start(&self, page: usize, total: usize) {
        self.set(DocumentState::Extracting { page, total });
        self.inner.on_page_start(page, total);
    }

    fn on_page_complete(&self, page: usize, total: usize, elapsed: Duration) {
        self.inner.on_page_complete(page, total, elapsed);
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        self.inner.on_page_error(page, total, error);
    }
}

enum DocumentOutcome {
    Done,
    Skipped(&'static str),
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Walks a directory tree and drives extraction and synthesis per document.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdfocr::{BackendConfig, BackendKind, BatchConfig, BatchOrchestrator};
///
/// # async fn run() -> Result<(), edgequake_pdfocr::PdfOcrError> {
/// let config = BatchConfig::builder()
///     .backend(BackendConfig::new(BackendKind::Local))
///     .auto_confirm(true)
///     .build()?;
/// let summary = BatchOrchestrator::new(config)?.process("scans".as_ref()).await?;
/// println!("{} processed, {} errors", summary.processed, summary.errors);
/// # Ok(())
/// # }
/// ```
pub struct BatchOrchestrator {
    config: BatchConfig,
    rasterizer: SharedRasterizer,
    backend: Option<SharedBackend>,
    synthesizer: SharedSynthesizer,
    prompt: Arc<dyn ConfirmationPrompt>,
    progress: BatchProgressCallback,
    extraction_progress: ExtractionProgressCallback,
}

impl BatchOrchestrator {
    /// Build with the real pdfium rasterizer, the configured backend and
    /// the tesseract-backed synthesizer.
    ///
    /// # Errors
    /// Fatal-to-batch configuration errors, such as a missing credential.
    pub fn new(config: BatchConfig) -> Result<Self, PdfOcrError> {
        let backend = if config.transcribe {
            Some(create_backend(&config.backend)?)
        } else {
            None
        };
        let synthesizer: SharedSynthesizer =
            Arc::new(TextLayerSynthesizer::with_language(&config.backend.ocr_language));
        Self::with_components(config, Arc::new(PdfiumRasterizer), backend, synthesizer)
    }

    /// Build from explicit components.
    pub fn with_components(
        config: BatchConfig,
        rasterizer: SharedRasterizer,
        backend: Option<SharedBackend>,
        synthesizer: SharedSynthesizer,
    ) -> Result<Self, PdfOcrError> {
        if config.transcribe && backend.is_none() {
            return Err(PdfOcrError::InvalidConfig(
                "transcription requested but no backend supplied".into(),
            ));
        }
        Ok(Self {
            config,
            rasterizer,
            backend,
            synthesizer,
            prompt: Arc::new(StdinPrompt),
            progress: Arc::new(NoopProgress),
            extraction_progress: Arc::new(NoopProgress),
        })
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_progress(mut self, progress: BatchProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_extraction_progress(mut self, progress: ExtractionProgressCallback) -> Self {
        self.extraction_progress = progress;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Discover documents, classify them and estimate cost.
    ///
    /// # Errors
    /// [`PdfOcrError::DirectoryNotFound`] / [`PdfOcrError::NotADirectory`].
    pub async fn plan(&self, root: &Path) -> Result<BatchPlan, PdfOcrError> {
        let documents = discover(root)?;
        let mut queued = Vec::new();
        let mut skipped = Vec::new();

        for document in documents {
            let work = assess(&document, &self.config, self.synthesizer.as_ref());
            if work.is_done() {
                debug!("Plan: skip {}", document.path.display());
                skipped.push(document);
                continue;
            }
            if work.recovering {
                info!(
                    "Plan: {} has an error-tainted transcript; re-queued",
                    document.path.display()
                );
            }
            let pages = self.page_count_or_estimate(&document.path).await;
            queued.push(PlannedDocument {
                document,
                work,
                pages,
            });
        }

        let total_pages = queued.iter().map(|p| p.pages).sum();
        let estimate = CostEstimate::new(self.config.backend.kind, queued.len(), total_pages);
        info!(
            "Plan: {} queued, {} skipped, {} pages, estimated {}",
            queued.len(),
            skipped.len(),
            total_pages,
            estimate.formatted_cost()
        );

        Ok(BatchPlan {
            root: root.to_path_buf(),
            queued,
            skipped,
            estimate,
        })
    }

    async fn page_count_or_estimate(&self, path: &Path) -> usize {
        let rasterizer = Arc::clone(&self.rasterizer);
        let owned = path.to_path_buf();
        match run_blocking(move || rasterizer.page_count(&owned)).await {
            Ok(n) => n,
            Err(e) => {
                debug!(
                    "Page count unavailable for {} ({}); assuming {}",
                    path.display(),
                    e,
                    self.config.fallback_page_estimate
                );
                self.config.fallback_page_estimate
            }
        }
    }

    /// Run the batch, stopping early on Ctrl-C.
    pub async fn process(&self, root: &Path) -> Result<BatchSummary, PdfOcrError> {
        self.process_until(root, async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the batch, stopping early when `shutdown` completes.
    ///
    /// Only fatal-to-batch errors are returned as `Err`; document failures
    /// are counted in the summary.
    pub async fn process_until<F>(
        &self,
        root: &Path,
        shutdown: F,
    ) -> Result<BatchSummary, PdfOcrError>
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let plan = self.plan(root).await?;
        self.progress.on_plan(&plan);

        let mut summary = BatchSummary {
            skipped: plan.skipped.len(),
            ..Default::default()
        };

        if plan.is_empty() {
            info!("All documents already processed");
            return Ok(self.finish(summary, start));
        }

        tokio::pin!(shutdown);

        if !self.config.auto_confirm {
            let prompt = Arc::clone(&self.prompt);
            let shown = plan.clone();
            let answer = tokio::select! {
                _ = &mut shutdown => None,
                joined = tokio::task::spawn_blocking(move || prompt.confirm(&shown)) => {
                    Some(joined.unwrap_or(false))
                }
            };
            match answer {
                None => {
                    summary.interrupted = true;
                    return Ok(self.finish(summary, start));
                }
                Some(false) => {
                    info!("Declined; nothing was changed");
                    summary.declined = true;
                    return Ok(self.finish(summary, start));
                }
                Some(true) => {}
            }
        }

        let total = plan.queued.len();
        for (i, planned) in plan.queued.into_iter().enumerate() {
            let path = planned.document.path.clone();
            let mut item = BatchItem::new(planned.document);
            item.recovering = planned.work.recovering;
            self.progress.on_document_start(i + 1, total, &path);
            let doc_start = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = self.process_document(&mut item) => Some(result),
            };

            match outcome {
                None => {
                    warn!("Interrupted while processing {}", path.display());
                    // Abandoned blocking jobs still own staged files.
                    blocking_jobs_settled().await;
                    summary.interrupted = true;
                    break;
                }
                Some(Ok(DocumentOutcome::Skipped(reason))) => {
                    summary.skipped += 1;
                    self.progress.on_document_skipped(&path, reason);
                }
                Some(Ok(DocumentOutcome::Done)) => {
                    let elapsed = doc_start.elapsed();
                    let pages = item.pages();
                    summary.processed += 1;
                    summary.total_pages += pages;
                    if item.recovering {
                        summary.recovered += 1;
                    }
                    if pages > 0 {
                        summary.record_rate(DocumentRate {
                            path: path.clone(),
                            pages,
                            secs_per_page: elapsed.as_secs_f64() / pages as f64,
                        });
                    }
                    self.progress.on_document_complete(&path, pages, elapsed);
                }
                Some(Err(e)) if e.is_batch_fatal() => {
                    self.finish(summary, start);
                    return Err(e);
                }
                Some(Err(e)) => {
                    let page = match &item.state {
                        DocumentState::Failed { page, .. } => *page,
                        _ => e.failed_page(),
                    };
                    warn!("Failed {}: {}", path.display(), e);
                    let message = e.to_string();
                    self.progress.on_document_error(&path, &message);
                    summary.record_failure(path, page, message);
                }
            }
        }

        Ok(self.finish(summary, start))
    }

    fn finish(&self, mut summary: BatchSummary, start: Instant) -> BatchSummary {
        summary.elapsed = start.elapsed();
        self.progress.on_batch_complete(&summary);
        summary
    }

    async fn process_document(
        &self,
        item: &mut BatchItem,
    ) -> Result<DocumentOutcome, PdfOcrError> {
        let document = item.document.clone();

        let work = assess(&document, &self.config, self.synthesizer.as_ref());
        if work.is_done() {
            item.state = DocumentState::Skipped;
            return Ok(DocumentOutcome::Skipped("already processed"));
        }
        document.check_magic()?;

        let mut words = None;
        if work.transcribe {
            let (transcript, report) = self.transcribe(item, &document).await?;
            words = reusable_words(&report);
            item.extraction = Some(report);
            self.write_transcript(item, &document, transcript).await?;
            item.state = DocumentState::Transcribed;
        }

        if work.synthesize {
            let target = document.final_pdf_path(self.config.overwrite);
            let staged = self
                .synthesizer
                .stage(&document.path, &target, words)
                .await
                .inspect_err(|e| item.state = failed(e, None))?;
            let pages = run_blocking(move || staged.commit())
                .await
                .inspect_err(|e| item.state = failed(e, None))?;
            item.injected_pages = Some(pages);
            item.state = DocumentState::Synthesized;
        }

        Ok(DocumentOutcome::Done)
    }

    async fn transcribe(
        &self,
        item: &mut BatchItem,
        document: &Document,
    ) -> Result<(String, ExtractionReport), PdfOcrError> {
        let backend = self.backend.clone().ok_or_else(|| {
            PdfOcrError::InvalidConfig("transcription requested but no backend configured".into())
        })?;
        item.state = DocumentState::Rasterizing;
        let tracker = Arc::new(StateTracker::new(Arc::clone(&self.extraction_progress)));
        let pipeline = ExtractionPipeline::new(Arc::clone(&self.rasterizer), backend)
            .with_progress(tracker.clone());

        pipeline
            .transcribe(&document.path, self.config.output_format)
            .await
            .inspect_err(|e| item.state = failed(e, tracker.current_page()))
    }

    async fn write_transcript(
        &self,
        item: &mut BatchItem,
        document: &Document,
        transcript: String,
    ) -> Result<(), PdfOcrError> {
        let target = document.transcript_path();
        write_atomic(&target, transcript)
            .await
            .inspect_err(|e| item.state = failed(e, None))?;
        info!("Wrote transcript {}", target.display());
        Ok(())
    }
}

fn failed(error: &PdfOcrError, current_page: Option<usize>) -> DocumentState {
    DocumentState::Failed {
        page: error.failed_page().or(current_page),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::WordBox;
    use crate::synthesize::StagedPdf;
    use async_trait::async_trait;

    const OWN_OUTPUT: &[u8] = b"%PDF-own-output";

    /// Recognises [`OWN_OUTPUT`] as its own work; never stages anything.
    struct MarkerSynth;

    #[async_trait]
    impl SearchableSynthesizer for MarkerSynth {
        async fn stage(
            &self,
            source: &Path,
            _target: &Path,
            _words: Option<Vec<WordBox>>,
        ) -> Result<StagedPdf, PdfOcrError> {
            Err(PdfOcrError::SynthesisFailed {
                path: source.to_path_buf(),
                detail: "not used".into(),
            })
        }

        fn is_synthesized(&self, path: &Path) -> bool {
            std::fs::read(path).is_ok_and(|b| b == OWN_OUTPUT)
        }
    }

    fn config(transcribe: bool, searchable: bool, overwrite: bool) -> BatchConfig {
        BatchConfig::builder()
            .transcribe(transcribe)
            .searchable(searchable)
            .overwrite(overwrite)
            .auto_confirm(true)
            .build()
            .unwrap()
    }

    #[test]
    fn transcript_states() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        assert_eq!(TranscriptState::of(&p), TranscriptState::Missing);
        std::fs::write(&p, "=== PAGE 1 ===\nhello").unwrap();
        assert_eq!(TranscriptState::of(&p), TranscriptState::Clean);
        std::fs::write(&p, "=== PAGE 1 ===\n{\"type\":\"rate_limit_error\"}").unwrap();
        assert_eq!(
            TranscriptState::of(&p),
            TranscriptState::Tainted("rate_limit_error".into())
        );
        std::fs::write(&p, [0xff, 0xfe, 0x00, 0x41]).unwrap();
        assert!(TranscriptState::of(&p).needs_recovery());
    }

    #[test]
    fn assess_follows_filesystem_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::new(dir.path().join("scan.pdf"));
        std::fs::write(&doc.path, b"%PDF-1.4").unwrap();

        let both = config(true, true, false);
        let w = assess(&doc, &both, &MarkerSynth);
        assert!(w.transcribe && w.synthesize && !w.recovering);

        std::fs::write(doc.transcript_path(), "=== PAGE 1 ===\nok").unwrap();
        let w = assess(&doc, &both, &MarkerSynth);
        assert!(!w.transcribe && w.synthesize);

        std::fs::write(doc.searchable_path(), b"%PDF").unwrap();
        assert!(assess(&doc, &both, &MarkerSynth).is_done());

        std::fs::write(doc.transcript_path(), "page-1 extraction error: overloaded_error").unwrap();
        let w = assess(&doc, &both, &MarkerSynth);
        assert!(w.transcribe && w.recovering && !w.synthesize);
    }

    #[test]
    fn overwrite_mode_uses_producer_stamp_as_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::new(dir.path().join("scan.pdf"));
        std::fs::write(&doc.path, b"%PDF-1.4").unwrap();
        let cfg = config(true, true, true);
        assert!(!assess(&doc, &cfg, &MarkerSynth).is_done());

        // A clean transcript alone does not mean the source was replaced.
        std::fs::write(doc.transcript_path(), "=== PAGE 1 ===\nok").unwrap();
        let w = assess(&doc, &cfg, &MarkerSynth);
        assert!(!w.transcribe && w.synthesize);

        std::fs::write(&doc.path, OWN_OUTPUT).unwrap();
        assert!(assess(&doc, &cfg, &MarkerSynth).is_done());
    }

    #[test]
    fn overwrite_without_transcription_is_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::new(dir.path().join("scan.pdf"));
        std::fs::write(&doc.path, b"%PDF-1.4").unwrap();
        let cfg = config(false, true, true);
        let w = assess(&doc, &cfg, &MarkerSynth);
        assert!(!w.transcribe && w.synthesize);

        std::fs::write(&doc.path, OWN_OUTPUT).unwrap();
        assert!(assess(&doc, &cfg, &MarkerSynth).is_done());
    }

    #[test]
    fn skip_existing_off_redoes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::new(dir.path().join("scan.pdf"));
        std::fs::write(doc.transcript_path(), "=== PAGE 1 ===\nok").unwrap();
        std::fs::write(doc.searchable_path(), b"%PDF").unwrap();
        let cfg = BatchConfig::builder().skip_existing(false).build().unwrap();
        let w = assess(&doc, &cfg, &MarkerSynth);
        assert!(w.transcribe && w.synthesize && !w.recovering);
    }
}
