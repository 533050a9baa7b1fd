//! Configuration types for scanned-document conversion jobs.
//!
//! Every knob of the pipeline lives in [`ScribeConfig`], built via its
//! [`ScribeConfigBuilder`]. The same config is shared (behind an `Arc`) by the
//! job service, the orchestrator and each adapter, so two jobs submitted to the
//! same service always run with identical settings.

use crate::error::ScribeError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound for an uploaded container: 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Longest accepted retention window: one year.
pub const MAX_RETENTION_SECS: u64 = 365 * 24 * 60 * 60;

/// Default model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Configuration for the conversion service.
///
/// Built via [`ScribeConfig::builder()`] or using [`ScribeConfig::default()`].
///
/// # Example
/// ```rust
/// use scanscribe::{OutputFormat, ScribeConfig};
///
/// let config = ScribeConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .output_format(OutputFormat::Markdown)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct ScribeConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 150.
    ///
    /// Handwriting is harder to read than print; 150 DPI keeps pen strokes
    /// legible while staying well under typical upload limits of VLM APIs.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Number of pages transcribed concurrently. Default: 1 (strictly sequential).
    ///
    /// Pages are always reassembled in original order regardless of this value.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`] or `EDGEQUAKE_MODEL`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (transcription must be literal).
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts per page on a transient VLM failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-VLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom transcription prompt. If None, uses [`crate::prompts::TRANSCRIPTION_PROMPT`].
    pub system_prompt: Option<String>,

    /// Which repair strategies are available in this deployment.
    pub repair: RepairConfig,

    /// Output document format. Default: [`OutputFormat::Docx`].
    pub output_format: OutputFormat,

    /// Page boundary marker for Markdown output. Default: [`PageSeparator::Comment`].
    pub page_separator: PageSeparator,

    /// Where uploaded containers are persisted while their job runs.
    pub upload_dir: PathBuf,

    /// Where finished documents are written (and served from).
    pub output_dir: PathBuf,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// How long terminal jobs stay queryable before the sweep evicts them. Default: 24 h.
    pub retention_secs: u64,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("scanscribe");
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            system_prompt: None,
            repair: RepairConfig::default(),
            output_format: OutputFormat::default(),
            page_separator: PageSeparator::default(),
            upload_dir: base.join("uploads"),
            output_dir: base.join("outputs"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            retention_secs: 24 * 60 * 60,
        }
    }
}

impl fmt::Debug for ScribeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScribeConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("repair", &self.repair)
            .field("output_format", &self.output_format)
            .field("upload_dir", &self.upload_dir)
            .field("output_dir", &self.output_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("retention_secs", &self.retention_secs)
            .finish()
    }
}

impl ScribeConfig {
    /// Create a new builder for `ScribeConfig`.
    pub fn builder() -> ScribeConfigBuilder {
        ScribeConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Builder for [`ScribeConfig`].
#[derive(Debug)]
pub struct ScribeConfigBuilder {
    config: ScribeConfig,
}

impl ScribeConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn repair(mut self, repair: RepairConfig) -> Self {
        self.config.repair = repair;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScribeConfig, ScribeError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ScribeError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(ScribeError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ScribeError::InvalidConfig(
                "Upload limit must be > 0 bytes".into(),
            ));
        }
        if c.retention_secs > MAX_RETENTION_SECS {
            return Err(ScribeError::InvalidConfig(format!(
                "Retention must be at most {} s (one year), got {}",
                MAX_RETENTION_SECS, c.retention_secs
            )));
        }
        if c.upload_dir == c.output_dir {
            return Err(ScribeError::InvalidConfig(
                "upload_dir and output_dir must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Repair ───────────────────────────────────────────────────────────────

/// Which repair strategies a deployment offers, and where their tools live.
///
/// Either tool may be missing from a host; disabling it here skips the
/// strategy instead of recording a "binary not found" failure for every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Strategy A: non-destructive structural rewrite via `qpdf`. Default: on.
    pub structural: bool,
    /// Strategy B: rasterising rewrite via Ghostscript. Default: on.
    pub rasterize: bool,
    pub qpdf_binary: PathBuf,
    pub ghostscript_binary: PathBuf,
    /// Wall-clock limit for a single repair process. Default: 120.
    pub timeout_secs: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            structural: true,
            rasterize: true,
            qpdf_binary: PathBuf::from("qpdf"),
            ghostscript_binary: PathBuf::from("gs"),
            timeout_secs: 120,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Format of the assembled output document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Word document, one paragraph per transcribed line, hard page breaks. (default)
    #[default]
    Docx,
    /// Markdown, pages joined by a [`PageSeparator`].
    Markdown,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Markdown => "md",
        }
    }
}

/// How to mark page boundaries in Markdown output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// HTML comment with page number: "<!-- page N -->" (default)
    #[default]
    Comment,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator that precedes `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
