//! Error types for the scanscribe library.
//!
//! Every failure a job can hit maps to one [`ScribeError`] variant, and every
//! variant maps to one [`ErrorKind`] code. The orchestrator never propagates
//! stage errors to the submitter; it stores `error.to_string()` as the job's
//! `error_message` and `error.kind()` as its `error_kind`, so pollers always
//! see the terminal cause verbatim.
//!
//! Display strings start with the taxonomy name (`Unrepairable: …`,
//! `TranscriptionFailure: …`) so a human reading a status response can tell
//! the category at a glance without parsing the machine-readable kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One failed repair attempt, kept for diagnostics inside
/// [`ScribeError::Unrepairable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// Strategy name, e.g. `"qpdf"` or `"ghostscript"`.
    pub strategy: String,
    /// Why the strategy failed.
    pub cause: String,
}

impl fmt::Display for RepairAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({})", self.strategy, self.cause)
    }
}

fn format_attempts(attempts: &[RepairAttempt]) -> String {
    if attempts.is_empty() {
        return "no repair strategies are enabled".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// All errors returned by the scanscribe library.
#[derive(Debug, Error)]
pub enum ScribeError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// Bad or missing upload: empty body, wrong extension, not a PDF, too large.
    #[error("InvalidInput: {reason}")]
    InvalidInput { reason: String },

    /// Upload larger than the configured limit.
    #[error("InvalidInput: upload is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// Unknown job id or download filename.
    #[error("NotFound: {what}")]
    NotFound { what: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The container could not be opened and every repair strategy failed.
    #[error(
        "Unrepairable: container could not be opened and repair failed: {}",
        format_attempts(.attempts)
    )]
    Unrepairable { attempts: Vec<RepairAttempt> },

    /// pdfium could not open or rasterise the (possibly repaired) container.
    #[error("RenderFailure: {detail}")]
    RenderFailure { detail: String },

    /// The rendering library itself could not be loaded. Says nothing about
    /// the container, so it never triggers repair.
    #[error("RenderFailure: {detail}")]
    RendererUnavailable { detail: String },

    /// The transcription client failed on one page; the whole job fails.
    #[error("TranscriptionFailure: page {page}: {detail}")]
    TranscriptionFailure { page: usize, detail: String },

    /// The document writer rejected the page texts or the output could not be built.
    #[error("AssemblyFailure: {detail}")]
    AssemblyFailure { detail: String },

    /// The caller requested early termination through the job's cancellation token.
    #[error("Cancelled: job was cancelled before {stage}")]
    Cancelled { stage: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not persist the assembled output file.
    #[error("AssemblyFailure: failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── State machine errors ──────────────────────────────────────────────
    /// A job mutation would break a job invariant (backwards transition,
    /// progress past total, mutation after a terminal state).
    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-readable failure category, stored on the job and returned by the
/// status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Unrepairable,
    RenderFailure,
    TranscriptionFailure,
    AssemblyFailure,
    NotFound,
    Cancelled,
    Internal,
}

impl ScribeError {
    /// Map the error onto the taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScribeError::InvalidInput { .. }
            | ScribeError::TooLarge { .. }
            | ScribeError::InvalidConfig(_) => {
                ErrorKind::InvalidInput
            }
            ScribeError::NotFound { .. } => ErrorKind::NotFound,
            ScribeError::Unrepairable { .. } => ErrorKind::Unrepairable,
            ScribeError::RenderFailure { .. } | ScribeError::RendererUnavailable { .. } => {
                ErrorKind::RenderFailure
            }
            ScribeError::TranscriptionFailure { .. }
            | ScribeError::ProviderNotConfigured { .. } => ErrorKind::TranscriptionFailure,
            ScribeError::AssemblyFailure { .. } | ScribeError::OutputWriteFailed { .. } => {
                ErrorKind::AssemblyFailure
            }
            ScribeError::Cancelled { .. } => ErrorKind::Cancelled,
            ScribeError::InvalidTransition(_) | ScribeError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        ScribeError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ScribeError::NotFound { what: what.into() }
    }
}
