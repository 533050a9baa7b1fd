//! CLI binary for scanscribe.
//!
//! A thin shim over the library crate: `convert` submits one document to an
//! in-process [`JobService`] and polls it to completion, `serve` runs the
//! HTTP service.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use scanscribe::pipeline::input;
use scanscribe::{
    Job, JobService, JobStatus, OutputFormat, PageSeparator, RepairConfig, ScribeConfig, Upload,
};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::ExitCode;
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Transcribe a scanned notebook to notebook.docx
  scanscribe convert notebook.pdf

  # Markdown output, four pages at a time
  scanscribe convert --format markdown --concurrency 4 notebook.pdf -o notes.md

  # From a URL
  scanscribe convert https://example.org/scans/letter.pdf -o letter.docx

  # Run the HTTP service
  scanscribe serve --bind 0.0.0.0:5001

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium shared library

REPAIR TOOLS:
  Damaged PDFs are rewritten with qpdf, then Ghostscript, when pdfium cannot
  open them. Either tool may be absent; disable it with --no-qpdf / --no-gs.
"#;

/// Turn scanned PDFs into Word or Markdown documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "scanscribe",
    version,
    about = "Turn scanned PDFs into Word or Markdown documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SCANSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SCANSCRIBE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one PDF (path or URL) and wait for the result.
    Convert(ConvertArgs),
    /// Run the HTTP job service.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Output file. Default: `<input stem>.<docx|md>` in the current directory.
    #[arg(short, long, env = "SCANSCRIBE_OUTPUT")]
    output: Option<PathBuf>,

    /// How often to poll the job, in milliseconds.
    #[arg(long, env = "SCANSCRIBE_POLL_INTERVAL_MS", default_value_t = 250)]
    poll_interval_ms: u64,

    /// HTTP download timeout in seconds (URL inputs).
    #[arg(long, env = "SCANSCRIBE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "SCANSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "SCANSCRIBE_BIND", default_value = "127.0.0.1:5001")]
    bind: SocketAddr,

    /// Hours a finished job stays queryable before it and its output are removed.
    #[arg(long, env = "SCANSCRIBE_RETENTION_HOURS", default_value_t = 24)]
    retention_hours: u64,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "SCANSCRIBE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages transcribed at the same time.
    #[arg(short, long, env = "SCANSCRIBE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Output document format.
    #[arg(long, env = "SCANSCRIBE_FORMAT", value_enum, default_value = "docx")]
    format: FormatArg,

    /// Markdown page separator: hr, comment, or custom string.
    #[arg(long, env = "SCANSCRIBE_SEPARATOR", default_value = "comment")]
    separator: String,

    /// Path to a text file containing a custom transcription prompt.
    #[arg(long, env = "SCANSCRIBE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "SCANSCRIBE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SCANSCRIBE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on LLM failure.
    #[arg(long, env = "SCANSCRIBE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "SCANSCRIBE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Skip the qpdf structural rewrite.
    #[arg(long, env = "SCANSCRIBE_NO_QPDF")]
    no_qpdf: bool,

    /// Skip the Ghostscript rewrite.
    #[arg(long, env = "SCANSCRIBE_NO_GS")]
    no_gs: bool,

    /// qpdf executable.
    #[arg(long, env = "SCANSCRIBE_QPDF", default_value = "qpdf")]
    qpdf_bin: PathBuf,

    /// Ghostscript executable.
    #[arg(long, env = "SCANSCRIBE_GS", default_value = "gs")]
    gs_bin: PathBuf,

    /// Wall-clock limit for one repair tool run, in seconds.
    #[arg(long, env = "SCANSCRIBE_REPAIR_TIMEOUT", default_value_t = 120)]
    repair_timeout: u64,

    /// Directory for uploads while their job runs.
    #[arg(long, env = "SCANSCRIBE_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Directory for finished documents.
    #[arg(long, env = "SCANSCRIBE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "SCANSCRIBE_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Docx,
    Markdown,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Docx => OutputFormat::Docx,
            FormatArg::Markdown => OutputFormat::Markdown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress,
        Command::Serve(_) => false,
    };
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

    match cli.command {
        Command::Convert(args) => run_convert(args, cli.quiet, show_progress).await,
        Command::Serve(args) => {
            let config = build_config(&args.config, Some(args.retention_hours)).await?;
            let service = Arc::new(
                JobService::from_config(config).context("Failed to initialise the job service")?,
            );
            scanscribe::http::serve(service, args.bind)
                .await
                .with_context(|| format!("HTTP server on {} failed", args.bind))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_convert(args: ConvertArgs, quiet: bool, show_progress: bool) -> Result<ExitCode> {
    let config = build_config(&args.config, None).await?;
    let extension = config.output_format.extension();
    let max_upload = config.max_upload_bytes;
    let service = JobService::from_config(config).context("Failed to initialise the job service")?;

    // ── Submit ───────────────────────────────────────────────────────────
    let id = if input::is_url(&args.input) {
        let (filename, bytes) = input::download_url(&args.input, args.download_timeout, max_upload)
            .await
            .context("Download failed")?;
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| download_output(&filename, extension));
        service
            .submit(Upload::new(filename, bytes).with_output(output))
            .await
    } else {
        let path = Path::new(&args.input);
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| default_output(path, extension));
        service.submit_path(path, Some(output)).await
    }
    .context("Submission rejected")?;

    // ── Poll ─────────────────────────────────────────────────────────────
    let mut reporter = Reporter::new(show_progress, quiet);
    let poll = Duration::from_millis(args.poll_interval_ms.max(10));
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut cancel_sent = false;

    let job = loop {
        let job = service.query(id).context("Job disappeared")?;
        reporter.update(&job);
        if job.is_terminal() {
            break job;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                reporter.note(&cyan("Cancelling…"));
                service.cancel(id).context("Cancel failed")?;
            }
        }
    };
    reporter.finish();

    match job.status {
        JobStatus::Complete => {
            if !quiet {
                let path = job
                    .output_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                eprintln!(
                    "{}  {} pages  →  {}",
                    green("✔"),
                    job.total,
                    bold(&path)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            eprintln!(
                "{}  {}",
                red("✘"),
                red(job.error_message.as_deref().unwrap_or("conversion failed"))
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

/// The input path with its extension swapped, so the result lands beside it.
fn default_output(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

/// `<stem>.<ext>` in the current directory, for a downloaded input.
fn download_output(filename: &str, extension: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", input::safe_stem(filename), extension))
}

/// Map CLI args to `ScribeConfig`.
async fn build_config(args: &ConfigArgs, retention_hours: Option<u64>) -> Result<ScribeConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ScribeConfig::builder()
        .dpi(args.dpi)
        .concurrency(args.concurrency)
        .output_format(args.format.into())
        .page_separator(parse_separator(&args.separator))
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .max_upload_bytes(args.max_upload_mb.saturating_mul(1024 * 1024))
        .repair(RepairConfig {
            structural: !args.no_qpdf,
            rasterize: !args.no_gs,
            qpdf_binary: args.qpdf_bin.clone(),
            ghostscript_binary: args.gs_bin.clone(),
            timeout_secs: args.repair_timeout,
        });

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref dir) = args.upload_dir {
        builder = builder.upload_dir(dir);
    }
    if let Some(ref dir) = args.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(hours) = retention_hours {
        builder = builder.retention_secs(hours.saturating_mul(3600));
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

// ── Progress reporting ───────────────────────────────────────────────────────

fn stage_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "Queued",
        JobStatus::Repairing => "Repairing",
        JobStatus::RenderingPages => "Rendering",
        JobStatus::RunningOcr => "Transcribing",
        JobStatus::BuildingDocx => "Assembling",
        JobStatus::Complete => "Done",
        JobStatus::Error => "Failed",
    }
}

/// Turns polled snapshots into a progress bar, or plain lines without one.
struct Reporter {
    bar: Option<ProgressBar>,
    quiet: bool,
    last_status: Option<JobStatus>,
    last_progress: usize,
}

impl Reporter {
    fn new(show_progress: bool, quiet: bool) -> Self {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new(0);
            let spinner_style =
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(spinner_style);
            bar.set_prefix("Queued");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Self {
            bar,
            quiet,
            last_status: None,
            last_progress: 0,
        }
    }

    fn update(&mut self, job: &Job) {
        if self.last_status != Some(job.status) {
            self.last_status = Some(job.status);
            self.on_stage(job);
        }
        if job.progress != self.last_progress {
            self.last_progress = job.progress;
            match &self.bar {
                Some(bar) => bar.set_position(job.progress as u64),
                None if !self.quiet => {
                    eprintln!("  {} page {}/{}", green("✓"), job.progress, job.total)
                }
                None => {}
            }
        }
    }

    fn on_stage(&self, job: &Job) {
        let label = stage_label(job.status);
        match &self.bar {
            Some(bar) => {
                bar.set_prefix(label);
                if job.status == JobStatus::RunningOcr && job.total > 0 {
                    let progress_style = ProgressStyle::with_template(
                        "{spinner:.cyan} {prefix:.bold}  \
                         [{bar:42.green/238}] {pos:>3}/{len} pages  \
                         ⏱ {elapsed_precise}  ETA {eta_precise}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  ")
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
                    bar.set_length(job.total as u64);
                    bar.set_style(progress_style);
                    bar.reset_eta();
                }
                if !job.is_terminal() {
                    bar.println(format!("{} {}", cyan("◆"), bold(label)));
                }
            }
            None if !self.quiet && !job.is_terminal() => {
                eprintln!("{} {}", cyan("◆"), bold(label));
            }
            None => {}
        }
        if job.status == JobStatus::Repairing {
            self.note(&dim("container damaged, attempting repair"));
        }
    }

    fn note(&self, msg: &str) {
        match &self.bar {
            Some(bar) => bar.println(format!("  {msg}")),
            None if !self.quiet => eprintln!("  {msg}"),
            None => {}
        }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
