//! # scanscribe
//!
//! Turn scanned, possibly damaged PDFs into Word or Markdown documents with
//! Vision Language Models, tracked as pollable background jobs.
//!
//! ## Why jobs?
//!
//! Transcribing a 40-page handwritten notebook takes minutes: every page is a
//! separate VLM call. Instead of holding a request open, a submission returns
//! a job id at once and the work runs on its own task. Callers poll the job
//! for its stage and page progress until it is `complete` (with an output
//! file) or `error` (with the cause).
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 0. Repair  only if pdfium cannot open it: qpdf, then Ghostscript
//!  ├─ 1. Render  rasterise every page via pdfium (spawn_blocking)
//!  ├─ 2. OCR     one VLM call per page, results kept in page order
//!  ├─ 3. Clean   deterministic cleanup of each transcription
//!  └─ 4. Build   .docx with hard page breaks (or Markdown)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanscribe::{JobService, ScribeConfig};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let service = JobService::from_config(ScribeConfig::default())?;
//!     let id = service.submit_path(Path::new("notebook.pdf"), None).await?;
//!     loop {
//!         let job = service.query(id)?;
//!         if job.is_terminal() {
//!             println!("{}: {:?}", job.status, job.output_path);
//!             break;
//!         }
//!         tokio::time::sleep(Duration::from_millis(250)).await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | `scanscribe` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | HTTP adapter in [`http`] (axum + tower-http) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
#[cfg(feature = "server")]
pub mod http;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OutputFormat, PageSeparator, RepairConfig, ScribeConfig, ScribeConfigBuilder};
pub use error::{ErrorKind, RepairAttempt, ScribeError};
pub use job::{Job, JobId, JobStatus};
pub use orchestrator::Orchestrator;
pub use pipeline::{
    DocumentAssembler, DocxAssembler, MarkdownAssembler, PageImage, PageRenderer, PdfiumRenderer,
    Transcriber, VlmTranscriber,
};
pub use repair::{GhostscriptRewrite, QpdfRewrite, RepairCascade, RepairStrategy};
pub use service::{JobService, Upload};
pub use store::JobStore;
