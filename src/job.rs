//! Job domain types: identifier, status state machine and the job record.
//!
//! ```text
//! queued ──▶ repairing ──▶ rendering_pages ──▶ running_ocr ──▶ building_docx ──▶ complete
//!    │   └──────────────────────▲
//!    └────── any non-terminal state ──────────────────────────────────────────▶ error
//! ```
//!
//! `repairing` is only entered when the container fails to open. All
//! invariants of the record are enforced here, by the mutating methods on
//! [`Job`]; the store simply refuses to commit a mutation that returns `Err`.

use crate::error::{ErrorKind, ScribeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Pipeline stage a job currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Repairing,
    RenderingPages,
    RunningOcr,
    BuildingDocx,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Repairing => "repairing",
            JobStatus::RenderingPages => "rendering_pages",
            JobStatus::RunningOcr => "running_ocr",
            JobStatus::BuildingDocx => "building_docx",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Position in the forward ordering. `error` has no rank of its own: it
    /// is reachable from every non-terminal state.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Repairing => 1,
            JobStatus::RenderingPages => 2,
            JobStatus::RunningOcr => 3,
            JobStatus::BuildingDocx => 4,
            JobStatus::Complete => 5,
            JobStatus::Error => u8::MAX,
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Error || next.rank() > self.rank()
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "repairing" => Ok(JobStatus::Repairing),
            "rendering_pages" => Ok(JobStatus::RenderingPages),
            "running_ocr" => Ok(JobStatus::RunningOcr),
            "building_docx" => Ok(JobStatus::BuildingDocx),
            "complete" => Ok(JobStatus::Complete),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of asynchronous conversion work.
///
/// Cloning a `Job` yields the immutable snapshot handed to status pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub output_path: Option<PathBuf>,
    pub output_filename: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub source_path: PathBuf,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, source_path: PathBuf, original_filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            total: 0,
            output_path: None,
            output_filename: None,
            error_message: None,
            error_kind: None,
            source_path,
            original_filename: original_filename.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a non-terminal stage. Use [`Job::complete`] / [`Job::fail`]
    /// for terminal states.
    pub fn advance_to(&mut self, next: JobStatus) -> Result<(), ScribeError> {
        if next.is_terminal() {
            return Err(ScribeError::InvalidTransition(format!(
                "{} is terminal; use complete() or fail()",
                next
            )));
        }
        self.check_transition(next)?;
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Record the page count once rendering has produced it.
    pub fn set_total(&mut self, total: usize) -> Result<(), ScribeError> {
        self.ensure_active()?;
        if self.total != 0 && self.total != total {
            return Err(ScribeError::InvalidTransition(format!(
                "total already set to {}, refusing {}",
                self.total, total
            )));
        }
        self.total = total;
        self.touch();
        Ok(())
    }

    /// Count one more transcribed page.
    pub fn record_page_done(&mut self) -> Result<(), ScribeError> {
        self.ensure_active()?;
        if self.progress >= self.total {
            return Err(ScribeError::InvalidTransition(format!(
                "progress {} already reached total {}",
                self.progress, self.total
            )));
        }
        self.progress += 1;
        self.touch();
        Ok(())
    }

    /// Terminal success. Requires every page to have been transcribed.
    pub fn complete(&mut self, output_path: PathBuf) -> Result<(), ScribeError> {
        self.check_transition(JobStatus::Complete)?;
        if self.total == 0 || self.progress != self.total {
            return Err(ScribeError::InvalidTransition(format!(
                "cannot complete with progress {}/{}",
                self.progress, self.total
            )));
        }
        self.output_filename = output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        self.output_path = Some(output_path);
        self.status = JobStatus::Complete;
        self.touch();
        Ok(())
    }

    /// Terminal failure with a human-readable cause.
    pub fn fail(&mut self, error: &ScribeError) -> Result<(), ScribeError> {
        self.check_transition(JobStatus::Error)?;
        let message = error.to_string();
        self.error_message = Some(if message.is_empty() {
            format!("{:?}", error.kind())
        } else {
            message
        });
        self.error_kind = Some(error.kind());
        self.output_path = None;
        self.output_filename = None;
        self.status = JobStatus::Error;
        self.touch();
        Ok(())
    }

    fn check_transition(&self, next: JobStatus) -> Result<(), ScribeError> {
        if self.status.can_advance_to(next) {
            Ok(())
        } else {
            Err(ScribeError::InvalidTransition(format!(
                "{} → {} is not allowed",
                self.status, next
            )))
        }
    }

    fn ensure_active(&self) -> Result<(), ScribeError> {
        if self.is_terminal() {
            Err(ScribeError::InvalidTransition(format!(
                "job is already {}",
                self.status
            )))
        } else {
            Ok(())
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
