//! CLI binary for edgequake-pdfocr.
//!
//! A thin shim over the library crate: maps flags onto `BatchConfig` /
//! `BackendConfig`, renders progress with indicatif and prints the summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdfocr::{
    create_backend, BackendConfig, BackendKind, BatchConfig, BatchOrchestrator, BatchPlan,
    BatchProgress, BatchSummary, Document, ExtractionPipeline, ExtractionProgress, OutputFormat,
    PdfiumRasterizer, SearchableSynthesizer, TextLayerSynthesizer,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Exit status for a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() > max {
        format!("{}\u{2026}", flat.chars().take(max - 1).collect::<String>())
    } else {
        flat
    }
}

fn relative(path: &Path, root: &Path) -> String {
    Document::new(path).display_relative(root)
}

// ── CLI progress display using indicatif ─────────────────────────────────────

/// One bar over the queued documents; per-page activity goes in its message.
struct CliProgress {
    bar: ProgressBar,
    root: PathBuf,
}

impl CliProgress {
    fn new(root: PathBuf) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        Arc::new(Self { bar, root })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }
}

impl ExtractionProgress for CliProgress {
    fn on_document_start(&self, total_units: usize) {
        self.bar.set_message(format!("rendered, {total_units} unit(s)"));
    }

    fn on_page_start(&self, page: usize, total: usize) {
        self.bar.set_message(format!("page {page}/{total}"));
    }

    fn on_page_complete(&self, page: usize, total: usize, elapsed: Duration) {
        self.bar.set_message(format!(
            "page {page}/{total} {}",
            dim(&format!("{:.1}s", elapsed.as_secs_f64()))
        ));
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        self.bar.println(format!(
            "    {} page {page}/{total}  {}",
            red("✗"),
            red(&truncate(error, 80))
        ));
    }
}

impl BatchProgress for CliProgress {
    fn on_plan(&self, plan: &BatchPlan) {
        print_plan(plan);
    }

    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        if index == 1 {
            self.activate_bar(total);
        }
        self.bar.set_prefix(relative(path, &self.root));
        self.bar.set_message("rendering…");
    }

    fn on_document_skipped(&self, path: &Path, reason: &str) {
        self.bar.println(format!(
            "  {} {}  {}",
            dim("–"),
            relative(path, &self.root),
            dim(reason)
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, path: &Path, pages: usize, elapsed: Duration) {
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            relative(path, &self.root),
            dim(&format!("{pages} pages")),
            dim(&format!("{:.1}s", elapsed.as_secs_f64())),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, path: &Path, error: &str) {
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            relative(path, &self.root),
            red(&truncate(error, 100)),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

/// Plain log lines for `--no-progress` runs.
struct PlainProgress {
    root: PathBuf,
}

impl ExtractionProgress for PlainProgress {}

impl BatchProgress for PlainProgress {
    fn on_plan(&self, plan: &BatchPlan) {
        print_plan(plan);
    }

    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        eprintln!("[{index}/{total}] {}", relative(path, &self.root));
    }

    fn on_document_error(&self, path: &Path, error: &str) {
        eprintln!("  failed {}: {}", relative(path, &self.root), truncate(error, 100));
    }
}

fn print_plan(plan: &BatchPlan) {
    let found = plan.queued.len() + plan.skipped.len();
    eprintln!(
        "{} Found {} PDF(s) under {}",
        cyan("◆"),
        bold(&found.to_string()),
        plan.root.display()
    );
    eprintln!(
        "   {} already processed, {} to process",
        plan.skipped.len(),
        bold(&plan.queued.len().to_string())
    );
    let recovering: Vec<_> = plan.recovering().collect();
    if !recovering.is_empty() {
        eprintln!(
            "   {} with error-tainted transcripts (will be reprocessed):",
            yellow(&recovering.len().to_string())
        );
        for p in recovering {
            eprintln!("     {}", p.document.display_relative(&plan.root));
        }
    }
    if !plan.is_empty() {
        eprintln!(
            "   Estimated {} pages, cost {} ({} at ${}/page)",
            plan.estimate.total_pages,
            bold(&plan.estimate.formatted_cost()),
            plan.estimate.backend,
            plan.estimate.cost_per_page
        );
    }
}

fn print_summary(summary: &BatchSummary, root: &Path) {
    eprintln!();
    eprintln!("{}", bold("Summary"));
    eprintln!("   Processed:  {}", green(&summary.processed.to_string()));
    eprintln!("   Skipped:    {}", summary.skipped);
    eprintln!(
        "   Errors:     {}",
        if summary.errors == 0 {
            summary.errors.to_string()
        } else {
            red(&summary.errors.to_string())
        }
    );
    if summary.recovered > 0 {
        eprintln!("   Recovered:  {}", summary.recovered);
    }
    eprintln!("   Pages:      {}", summary.total_pages);
    eprintln!("   Elapsed:    {:.1}s", summary.elapsed.as_secs_f64());
    if let Some(ref f) = summary.fastest {
        eprintln!(
            "   Fastest:    {}  {}",
            relative(&f.path, root),
            dim(&format!("{:.2}s/page", f.secs_per_page))
        );
    }
    if let Some(ref s) = summary.slowest {
        eprintln!(
            "   Slowest:    {}  {}",
            relative(&s.path, root),
            dim(&format!("{:.2}s/page", s.secs_per_page))
        );
    }
    if !summary.failures.is_empty() {
        eprintln!("   Failures:");
        for f in &summary.failures {
            let page = f.page.map(|p| format!(" (page {p})")).unwrap_or_default();
            eprintln!(
                "     {} {}{}: {}",
                red("✗"),
                relative(&f.path, root),
                page,
                truncate(&f.message, 120)
            );
        }
    }
    if summary.interrupted {
        eprintln!("{}", yellow("Interrupted; run again to resume."));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Transcribe and make searchable every PDF under a directory (Claude)
  pdfocr batch ~/archive/scans

  # Local OCR only, no API costs, no prompt
  pdfocr batch --backend local --yes ~/archive/scans

  # Only transcripts, as markdown, with Gemini
  pdfocr batch --backend gemini --format markdown --no-searchable scans/

  # Replace the originals with searchable copies
  pdfocr batch --overwrite scans/

  # Single documents
  pdfocr extract scan.pdf scan.txt
  pdfocr inject scan.pdf scan_searchable.pdf

OUTPUTS (per foo.pdf):
  foo.txt               transcript, one "=== PAGE n ===" block per page
  foo_searchable.pdf    page images + invisible text layer
                        (replaces foo.pdf with --overwrite)

  Re-running is safe: documents with a clean transcript and searchable PDF
  are skipped, and transcripts containing provider errors are redone.

BACKENDS:
  Backend   Credential          Est. $/page
  ───────   ─────────────────   ───────────
  claude    ANTHROPIC_API_KEY   0.003
  gemini    GEMINI_API_KEY      0.0004
  local     none (tesseract)    0

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  TESSERACT_CMD           Path to the tesseract binary
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
  RUST_LOG                Override the log filter
"#;

/// Transcribe scanned PDFs and make them searchable.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Transcribe scanned PDFs and make them searchable",
    long_about = "Batch-transcribe directories of scanned PDFs with Claude, Gemini or local \
tesseract OCR, and rebuild each one with an invisible text layer. Runs are resumable: \
outputs already on disk are reused, error-tainted transcripts are redone.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFOCR_QUIET")]
    quiet: bool,

    /// Disable progress bars.
    #[arg(long, global = true, env = "PDFOCR_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every PDF under a directory tree.
    Batch(BatchArgs),
    /// Transcribe one PDF to a text file.
    Extract(ExtractArgs),
    /// Write a searchable copy of one PDF.
    Inject(InjectArgs),
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Extraction backend.
    #[arg(short, long, env = "PDFOCR_BACKEND", value_enum, default_value = "claude")]
    backend: BackendArg,

    /// Model ID for remote backends.
    #[arg(long, env = "PDFOCR_MODEL")]
    model: Option<String>,

    /// Transcript format for remote backends.
    #[arg(long, env = "PDFOCR_FORMAT", value_enum, default_value = "plain")]
    format: FormatArg,

    /// Tesseract language pack.
    #[arg(long, env = "PDFOCR_LANG", default_value = "eng")]
    lang: String,

    /// Max model output tokens per page.
    #[arg(long, env = "PDFOCR_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "PDFOCR_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on remote failure.
    #[arg(long, env = "PDFOCR_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page remote call timeout in seconds.
    #[arg(long, env = "PDFOCR_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

impl BackendArgs {
    fn to_config(&self) -> BackendConfig {
        BackendConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_retries: self.max_retries,
            api_timeout_secs: self.api_timeout,
            ocr_language: self.lang.clone(),
            ..BackendConfig::new(self.backend.clone().into())
        }
    }
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Root directory to scan recursively.
    directory: PathBuf,

    #[command(flatten)]
    backend: BackendArgs,

    /// Replace each source PDF with its searchable copy.
    #[arg(long, env = "PDFOCR_OVERWRITE")]
    overwrite: bool,

    /// Reprocess documents even when their outputs already exist.
    #[arg(long, env = "PDFOCR_NO_SKIP")]
    no_skip: bool,

    /// Do not write transcripts.
    #[arg(long, env = "PDFOCR_NO_TRANSCRIBE")]
    no_transcribe: bool,

    /// Do not write searchable PDFs.
    #[arg(long, env = "PDFOCR_NO_SEARCHABLE")]
    no_searchable: bool,

    /// Skip all confirmation prompts.
    #[arg(short = 'y', long, env = "PDFOCR_YES")]
    yes: bool,

    /// Print the summary as JSON on stdout.
    #[arg(long, env = "PDFOCR_JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    input: PathBuf,
    output: PathBuf,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args, Debug)]
struct InjectArgs {
    input: PathBuf,
    output: PathBuf,

    /// Tesseract language pack.
    #[arg(long, env = "PDFOCR_LANG", default_value = "eng")]
    lang: String,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum BackendArg {
    Claude,
    Gemini,
    Local,
}

impl From<BackendArg> for BackendKind {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Claude => BackendKind::Claude,
            BackendArg::Gemini => BackendKind::Gemini,
            BackendArg::Local => BackendKind::Local,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FormatArg {
    Markdown,
    Plain,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Plain => OutputFormat::Plain,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would tear through the progress bar; keep them down
    // to errors unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    ensure_pdfium(cli.quiet)?;

    match cli.command {
        Command::Batch(ref args) => run_batch(&cli, args).await,
        Command::Extract(ref args) => run_extract(&cli, args).await,
        Command::Inject(ref args) => run_inject(&cli, args).await,
    }
}

/// Make sure a pdfium library is available, downloading it on first run.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() || quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to prepare PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Ask for a typed `yes` on stderr/stdin.
fn confirm_typed(question: &str) -> Result<bool> {
    eprint!("{question} Type 'yes' to continue: ");
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

async fn run_batch(cli: &Cli, args: &BatchArgs) -> Result<()> {
    if args.overwrite && !args.yes {
        eprintln!(
            "{} {}",
            yellow("⚠"),
            bold("--overwrite replaces every processed source PDF with its searchable copy.")
        );
        let ok = tokio::task::block_in_place(|| {
            confirm_typed("The originals cannot be recovered afterwards.")
        })?;
        if !ok {
            eprintln!("Cancelled; nothing was changed.");
            return Ok(());
        }
    }

    let config = BatchConfig::builder()
        .backend(args.backend.to_config())
        .overwrite(args.overwrite)
        .skip_existing(!args.no_skip)
        .output_format(args.backend.format.clone().into())
        .auto_confirm(args.yes)
        .transcribe(!args.no_transcribe)
        .searchable(!args.no_searchable)
        .build()
        .context("Invalid configuration")?;

    let root = args.directory.clone();
    let mut orchestrator = BatchOrchestrator::new(config).context("Cannot start batch")?;

    if show_progress(cli) {
        let progress = CliProgress::new(root.clone());
        orchestrator = orchestrator
            .with_progress(progress.clone())
            .with_extraction_progress(progress);
    } else if !cli.quiet {
        let progress = Arc::new(PlainProgress { root: root.clone() });
        orchestrator = orchestrator
            .with_progress(progress.clone())
            .with_extraction_progress(progress);
    }

    let summary = orchestrator
        .process(&root)
        .await
        .with_context(|| format!("Batch over {} failed", root.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    }

    if summary.declined {
        if !cli.quiet {
            eprintln!("Declined; nothing was changed.");
        }
        return Ok(());
    }

    if !cli.quiet && (summary.processed + summary.errors > 0 || summary.interrupted) {
        print_summary(&summary, &root);
    } else if !cli.quiet {
        eprintln!("{} All documents already processed.", green("✔"));
    }

    // The orchestrator has already waited for in-flight file work. A
    // confirmation read may still be blocked on stdin, which runtime
    // shutdown would wait for, so exit directly.
    if summary.interrupted {
        std::process::exit(EXIT_INTERRUPTED);
    }
    if summary.errors > 0 {
        anyhow::bail!("{} document(s) failed", summary.errors);
    }
    Ok(())
}

fn show_progress(cli: &Cli) -> bool {
    !cli.quiet && !cli.no_progress
}

async fn run_extract(cli: &Cli, args: &ExtractArgs) -> Result<()> {
    Document::new(&args.input)
        .check_magic()
        .with_context(|| format!("Cannot read {}", args.input.display()))?;

    let backend = create_backend(&args.backend.to_config()).context("Cannot create backend")?;
    let mut pipeline = ExtractionPipeline::new(Arc::new(PdfiumRasterizer), backend);

    let progress = show_progress(cli).then(|| {
        let p = CliProgress::new(PathBuf::new());
        p.bar.set_prefix("Extracting");
        p.bar.enable_steady_tick(Duration::from_millis(80));
        p
    });
    if let Some(ref p) = progress {
        pipeline = pipeline.with_progress(p.clone());
    }

    let result = pipeline
        .run(&args.input, &args.output, args.backend.format.clone().into())
        .await;
    if let Some(p) = progress {
        p.bar.finish_and_clear();
    }
    let report = result.context("Extraction failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {:.1}s  ({:.2}s/page)  →  {}",
            green("✔"),
            report.page_count,
            report.total_elapsed.as_secs_f64(),
            report.secs_per_page(),
            bold(&args.output.display().to_string()),
        );
    }
    Ok(())
}

async fn run_inject(cli: &Cli, args: &InjectArgs) -> Result<()> {
    Document::new(&args.input)
        .check_magic()
        .with_context(|| format!("Cannot read {}", args.input.display()))?;

    let spinner = show_progress(cli).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Injecting");
        bar.set_message(args.input.display().to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let synthesizer = TextLayerSynthesizer::with_language(&args.lang);
    let result = synthesizer.inject(&args.input, &args.output).await;
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    let pages = result.context("Injection failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  →  {}",
            green("✔"),
            pages,
            bold(&args.output.display().to_string()),
        );
    }
    Ok(())
}
