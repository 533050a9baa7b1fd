//! Pipeline stages for scanned-document conversion.
//!
//! Each submodule implements exactly one transformation step. The
//! orchestrator depends on the traits ([`PageRenderer`], [`Transcriber`],
//! [`DocumentAssembler`]) rather than the concrete adapters, so tests can run
//! the full state machine with in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ transcribe ──▶ clean ──▶ assemble
//! (validate) (pdfium)  (base64)   (VLM)          (cleanup)  (docx / md)
//! ```
//!
//! 1. [`input`]: validate uploads; fetch URL inputs for the CLI
//! 2. [`render`]: open and rasterise pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: PNG-encode each page and base64-wrap it for the API
//! 4. [`transcribe`]: drive the VLM call with retry/backoff; the only stage
//!    with network I/O
//! 5. [`clean`]: deterministic text-cleanup rules for VLM quirks
//! 6. [`assemble`]: join page texts with explicit page boundaries

pub mod assemble;
pub mod clean;
pub mod encode;
pub mod input;
pub mod render;
pub mod transcribe;

pub use assemble::{DocumentAssembler, DocxAssembler, MarkdownAssembler};
pub use render::{PageImage, PageRenderer, PdfiumRenderer};
pub use transcribe::{Transcriber, VlmTranscriber};
