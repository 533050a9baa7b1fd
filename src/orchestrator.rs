//! Per-job worker: drives one job through the conversion state machine.
//!
//! ```text
//! queued ─▶ [repairing] ─▶ rendering_pages ─▶ running_ocr ─▶ building_docx ─▶ complete
//!                 any stage error or cancellation ─▶ error
//! ```
//!
//! ## Ownership
//!
//! The orchestrator is the only writer of its job's record; it publishes
//! every transition through [`JobStore::update`], which readers observe as
//! atomic snapshots. It also owns every temporary artifact of the job: the
//! uploaded source, the repair scratch directory and the `.tmp` output. All
//! of them are gone before the terminal status is committed, so a poller
//! that sees `complete` or `error` never races the cleanup. A file already
//! sitting at the output path is never touched unless this job renamed its
//! own result over it.
//!
//! ## Failure semantics
//!
//! Pages are all-or-nothing: the first page that fails to transcribe fails
//! the job and nothing is assembled. A stage error never escapes `run`; it
//! becomes the job's `error_message` / `error_kind`. A worker that panics is
//! caught by the task [`Orchestrator::spawn`] supervises it from and the job
//! fails as `internal`.
//!
//! ## Cancellation
//!
//! The token is checked between stages and after every transcribed page.
//! Calls already in flight (a repair tool, a render, a page transcription)
//! always run to completion; no page is started once cancellation is seen.

use crate::config::ScribeConfig;
use crate::error::ScribeError;
use crate::job::{JobId, JobStatus};
use crate::pipeline::assemble::{self, DocumentAssembler};
use crate::pipeline::clean::clean_transcript;
use crate::pipeline::render::{PageImage, PageRenderer, PdfiumRenderer};
use crate::pipeline::transcribe::{Transcriber, VlmTranscriber};
use crate::repair::RepairCascade;
use crate::store::JobStore;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Runs jobs against a fixed set of pipeline adapters.
pub struct Orchestrator {
    store: Arc<JobStore>,
    renderer: Arc<dyn PageRenderer>,
    transcriber: Arc<dyn Transcriber>,
    assembler: Arc<dyn DocumentAssembler>,
    repair: Arc<RepairCascade>,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        renderer: Arc<dyn PageRenderer>,
        transcriber: Arc<dyn Transcriber>,
        assembler: Arc<dyn DocumentAssembler>,
        repair: RepairCascade,
    ) -> Self {
        Self {
            store,
            renderer,
            transcriber,
            assembler,
            repair: Arc::new(repair),
            concurrency: 1,
        }
    }

    /// Production wiring: pdfium renderer, VLM transcriber, configured
    /// assembler and repair cascade.
    pub fn from_config(store: Arc<JobStore>, config: &ScribeConfig) -> Result<Self, ScribeError> {
        let transcriber = VlmTranscriber::from_config(config)?;
        Ok(Self::new(
            store,
            Arc::new(PdfiumRenderer::from_config(config)),
            Arc::new(transcriber),
            assemble::for_config(config),
            RepairCascade::from_config(&config.repair),
        )
        .with_concurrency(config.concurrency))
    }

    /// Number of pages transcribed at once. Output order is unaffected.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Extension of the documents this orchestrator produces.
    pub fn output_extension(&self) -> &'static str {
        self.assembler.extension()
    }

    /// Run `job_id` on its own task, inside a `job` tracing span.
    ///
    /// The returned handle resolves once the job is terminal, including when
    /// the worker task panicked.
    pub fn spawn(
        self: &Arc<Self>,
        job_id: JobId,
        output_path: PathBuf,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let span = info_span!("job", job_id = %job_id);
        let worker = {
            let this = Arc::clone(self);
            let output_path = output_path.clone();
            tokio::spawn(
                async move { this.run(job_id, output_path, cancel).await }.instrument(span.clone()),
            )
        };
        let this = Arc::clone(self);
        tokio::spawn(
            async move {
                if let Err(e) = worker.await {
                    this.abandon(job_id, &output_path, e).await;
                }
            }
            .instrument(span),
        )
    }

    /// Record a worker that died without reaching a terminal state.
    async fn abandon(&self, job_id: JobId, output_path: &Path, cause: JoinError) {
        error!(error = %cause, "Job worker died");
        remove_quietly(&tmp_path(output_path)).await;
        let err = ScribeError::Internal(if cause.is_panic() {
            "job worker panicked".to_string()
        } else {
            format!("job worker stopped: {cause}")
        });
        let committed = self.store.update(job_id, |j| {
            if j.is_terminal() {
                Ok(())
            } else {
                j.fail(&err)
            }
        });
        if let Err(commit) = committed {
            error!(error = %commit, "Could not record failure");
        }
    }

    /// Drive `job_id` to a terminal state. Never returns an error: every
    /// failure is recorded on the job itself.
    pub async fn run(&self, job_id: JobId, output_path: PathBuf, cancel: CancellationToken) {
        let Some(job) = self.store.get(job_id) else {
            error!("Job vanished from the store before it started");
            return;
        };
        let source = SourceFile::new(job.source_path.clone());
        let start = Instant::now();

        let outcome = self
            .execute(job_id, &job.original_filename, source.path(), &output_path, &cancel)
            .await;
        source.remove().await;

        match outcome {
            Ok(()) => {
                match self
                    .store
                    .update(job_id, |j| j.complete(output_path.clone()))
                {
                    Ok(job) => info!(
                        pages = job.total,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        output = %output_path.display(),
                        "Job complete"
                    ),
                    Err(e) => {
                        // The rename already happened, so the file is ours.
                        error!(error = %e, "Could not record completion");
                        remove_quietly(&output_path).await;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Job failed");
                remove_quietly(&tmp_path(&output_path)).await;
                if let Err(commit) = self.store.update(job_id, |j| j.fail(&e)) {
                    error!(error = %commit, "Could not record failure");
                }
            }
        }
    }

    async fn execute(
        &self,
        id: JobId,
        source_name: &str,
        source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ScribeError> {
        // ── Open, repairing if needed ──────────────────────────────────────
        checkpoint(cancel, "opening the container")?;

        // `_workdir` keeps repaired copies alive until this function returns.
        let (container, _workdir): (PathBuf, Option<TempDir>) =
            match self.renderer.probe(source).await {
                Ok(pages) => {
                    debug!(pages, "Container opened cleanly");
                    (source.to_path_buf(), None)
                }
                // Only a container that failed to load is worth repairing.
                Err(e @ ScribeError::RenderFailure { .. }) => {
                    warn!(error = %e, "Container failed to open; repairing");
                    checkpoint(cancel, JobStatus::Repairing.as_str())?;
                    self.advance(id, JobStatus::Repairing)?;
                    let dir = tempfile::Builder::new()
                        .prefix("scanscribe-repair-")
                        .tempdir()
                        .map_err(|e| ScribeError::Internal(format!("repair workdir: {e}")))?;
                    let repaired = self.repair.repair(source, dir.path()).await?;
                    (repaired, Some(dir))
                }
                Err(e) => return Err(e),
            };

        // ── Render ─────────────────────────────────────────────────────────
        checkpoint(cancel, JobStatus::RenderingPages.as_str())?;
        self.advance(id, JobStatus::RenderingPages)?;
        let render_start = Instant::now();
        let pages = self.renderer.render(&container).await?;
        if pages.is_empty() {
            return Err(ScribeError::RenderFailure {
                detail: "document has no pages".into(),
            });
        }
        self.store.update(id, |j| j.set_total(pages.len()))?;
        info!(
            pages = pages.len(),
            elapsed_ms = render_start.elapsed().as_millis() as u64,
            "Pages rendered"
        );

        // ── Transcribe ─────────────────────────────────────────────────────
        checkpoint(cancel, JobStatus::RunningOcr.as_str())?;
        self.advance(id, JobStatus::RunningOcr)?;
        let texts = self.transcribe_all(id, &pages, cancel).await?;
        drop(pages);

        // ── Assemble ───────────────────────────────────────────────────────
        checkpoint(cancel, JobStatus::BuildingDocx.as_str())?;
        self.advance(id, JobStatus::BuildingDocx)?;
        let bytes = self.assembler.assemble(source_name, &texts)?;
        write_atomic(output, &bytes).await?;
        debug!(bytes = bytes.len(), "Output written");
        Ok(())
    }

    /// Transcribe every page, `concurrency` at a time, yielding results in
    /// page order. Progress is recorded as each in-order result arrives.
    ///
    /// On cancellation or a failed page no further page is started, and the
    /// stream is drained so calls already in flight finish first.
    async fn transcribe_all(
        &self,
        id: JobId,
        pages: &[PageImage],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ScribeError> {
        let total = pages.len();
        let stop = cancel.child_token();
        let mut results = stream::iter(pages.iter().map(|page| {
            let transcriber = Arc::clone(&self.transcriber);
            let stop = stop.clone();
            async move {
                let page_num = page.page_num();
                checkpoint(&stop, &format!("transcribing page {page_num}"))?;
                match transcriber.transcribe(page, total).await {
                    Ok(text) => Ok(clean_transcript(&text)),
                    Err(e @ ScribeError::TranscriptionFailure { .. }) => Err(e),
                    Err(e) => Err(ScribeError::TranscriptionFailure {
                        page: page_num,
                        detail: e.to_string(),
                    }),
                }
            }
        }))
        .buffered(self.concurrency)
        .boxed();

        let mut texts = Vec::with_capacity(total);
        let mut failure: Option<ScribeError> = None;
        while let Some(result) = results.next().await {
            if failure.is_some() {
                continue;
            }
            let step = result.and_then(|text| {
                texts.push(text);
                let job = self.store.update(id, |j| j.record_page_done())?;
                debug!(page = job.progress, total, "Page transcribed");
                if texts.len() < total {
                    checkpoint(cancel, &format!("transcribing page {}", texts.len() + 1))?;
                }
                Ok(())
            });
            if let Err(e) = step {
                stop.cancel();
                failure = Some(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(texts),
        }
    }

    fn advance(&self, id: JobId, next: JobStatus) -> Result<(), ScribeError> {
        self.store.update(id, |j| j.advance_to(next))?;
        info!(status = %next, "Stage entered");
        Ok(())
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

fn cancelled(stage: impl Into<String>) -> ScribeError {
    ScribeError::Cancelled {
        stage: stage.into(),
    }
}

fn checkpoint(cancel: &CancellationToken, stage: &str) -> Result<(), ScribeError> {
    if cancel.is_cancelled() {
        Err(cancelled(stage))
    } else {
        Ok(())
    }
}

// ── Files ────────────────────────────────────────────────────────────────

/// The persisted upload. Deleted explicitly before the terminal commit, or
/// on drop if the task is aborted first.
struct SourceFile {
    path: PathBuf,
    removed: bool,
}

impl SourceFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Could not delete source upload");
            }
        }
        self.removed = true;
    }
}

impl Drop for SourceFile {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomic write: write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ScribeError> {
    let write_err = |source: std::io::Error| ScribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp = tmp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    Ok(())
}

/// Remove an output file this job wrote, if it is there.
async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove partial output"),
    }
}
