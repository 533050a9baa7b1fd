//! Job service: the boundary every caller goes through.
//!
//! Both the HTTP handlers and the CLI talk only to [`JobService`]. It
//! validates input, persists the upload, creates the job record and hands the
//! job to the [`Orchestrator`] on a background task. [`JobService::submit`]
//! returns as soon as the job exists; callers learn about progress by polling
//! [`JobService::query`].

use crate::config::ScribeConfig;
use crate::error::ScribeError;
use crate::job::{Job, JobId, JobStatus};
use crate::orchestrator::Orchestrator;
use crate::pipeline::input;
use crate::store::JobStore;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A submitted container.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name, if any.
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    /// Where to write the result instead of the configured output dir.
    pub output_path: Option<PathBuf>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: Some(filename.into()),
            bytes: bytes.into(),
            output_path: None,
        }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }
}

type TokenMap = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

pub struct JobService {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    config: Arc<ScribeConfig>,
    tokens: TokenMap,
}

impl JobService {
    /// Wire a service around an already-built orchestrator; the job store is
    /// the orchestrator's.
    pub fn new(config: ScribeConfig, orchestrator: Orchestrator) -> Self {
        Self {
            store: Arc::clone(orchestrator.store()),
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Production wiring from configuration alone.
    pub fn from_config(config: ScribeConfig) -> Result<Self, ScribeError> {
        let store = Arc::new(JobStore::new());
        let orchestrator = Orchestrator::from_config(store, &config)?;
        Ok(Self::new(config, orchestrator))
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn config(&self) -> &ScribeConfig {
        &self.config
    }

    /// Validate and persist `upload`, create its job and start the worker.
    ///
    /// Returns the new job's id without waiting for any pipeline stage.
    pub async fn submit(&self, upload: Upload) -> Result<JobId, ScribeError> {
        input::validate_upload(
            upload.filename.as_deref(),
            &upload.bytes,
            self.config.max_upload_bytes,
        )?;

        let id = JobId::new();
        let original = upload
            .filename
            .clone()
            .unwrap_or_else(|| "upload.pdf".to_string());

        tokio::fs::create_dir_all(&self.config.upload_dir)
            .await
            .map_err(|e| ScribeError::Internal(format!("upload dir: {e}")))?;
        let source_path = self.config.upload_dir.join(format!("{id}.pdf"));
        tokio::fs::write(&source_path, &upload.bytes)
            .await
            .map_err(|e| ScribeError::Internal(format!("persisting upload: {e}")))?;

        let output_path = upload.output_path.clone().unwrap_or_else(|| {
            self.config.output_dir.join(format!(
                "{}_{}.{}",
                id,
                input::safe_stem(&original),
                self.orchestrator.output_extension()
            ))
        });

        if let Err(e) = self.store.create(Job::new(id, source_path.clone(), &original)) {
            let _ = tokio::fs::remove_file(&source_path).await;
            return Err(e);
        }

        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());

        info!(
            job_id = %id,
            filename = %original,
            bytes = upload.bytes.len(),
            "Job submitted"
        );
        self.start(id, output_path, token);
        Ok(id)
    }

    /// Submit a file from disk. The file is copied, so the caller's copy is
    /// never deleted.
    pub async fn submit_path(
        &self,
        path: &Path,
        output_path: Option<PathBuf>,
    ) -> Result<JobId, ScribeError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ScribeError::invalid_input(format!("cannot read {}: {}", path.display(), e))
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.submit(Upload {
            filename: Some(filename),
            bytes,
            output_path,
        })
        .await
    }

    /// Current snapshot of a job.
    pub fn query(&self, id: JobId) -> Result<Job, ScribeError> {
        self.store
            .get(id)
            .ok_or_else(|| ScribeError::not_found(format!("job {id}")))
    }

    /// Request early termination. Terminal jobs are returned unchanged.
    pub fn cancel(&self, id: JobId) -> Result<Job, ScribeError> {
        let job = self.query(id)?;
        if !job.is_terminal() {
            if let Some(token) = self
                .tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
            {
                info!(job_id = %id, status = %job.status, "Cancellation requested");
                token.cancel();
            }
        }
        Ok(job)
    }

    /// Map a download filename to the completed output it names.
    ///
    /// Rejects anything that could escape the output directory, and anything
    /// not produced by a `complete` job.
    pub fn resolve_download(&self, filename: &str) -> Result<PathBuf, ScribeError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ScribeError::invalid_input("Invalid filename"));
        }
        let expected = self.orchestrator.output_extension();
        if !Path::new(filename)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(expected))
        {
            return Err(ScribeError::invalid_input("Invalid file type"));
        }

        let not_found = || ScribeError::not_found(format!("file {filename}"));
        let job = self.store.find_by_output(filename).ok_or_else(not_found)?;
        if job.status != JobStatus::Complete {
            return Err(not_found());
        }
        let path = job.output_path.ok_or_else(not_found)?;
        if !path.is_file() {
            return Err(not_found());
        }
        Ok(path)
    }

    /// Evict terminal jobs older than the retention window and delete the
    /// outputs they produced in the output directory. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let evicted = match chrono::Duration::from_std(self.config.retention())
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        {
            Some(cutoff) => self.store.evict_terminal_before(cutoff),
            None => {
                warn!(
                    retention_secs = self.config.retention_secs,
                    "Retention out of range; nothing evicted"
                );
                Vec::new()
            }
        };

        for job in &evicted {
            if let Some(ref output) = job.output_path {
                if output.starts_with(&self.config.output_dir) {
                    if let Err(e) = tokio::fs::remove_file(output).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(
                                path = %output.display(),
                                error = %e,
                                "Could not delete expired output"
                            );
                        }
                    }
                }
            }
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Expired jobs evicted");
        }
        evicted.len()
    }

    /// Run [`JobService::sweep`] every `every` until the service is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    debug!("Service dropped; sweeper exiting");
                    return;
                };
                service.sweep().await;
            }
        })
    }

    fn start(&self, id: JobId, output_path: PathBuf, token: CancellationToken) {
        let worker = self.orchestrator.spawn(id, output_path, token);
        let tokens = Arc::clone(&self.tokens);
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                warn!(job_id = %id, error = %e, "Job supervisor stopped");
            }
            tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });
    }
}
