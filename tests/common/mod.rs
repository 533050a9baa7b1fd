//! Shared fakes and harness for the integration tests.
//!
//! The fake container format is a tiny text file that still passes upload
//! validation: `%PDF-1.4\nPAGES=<n>\n`, optionally carrying a `DAMAGED`
//! marker that makes the fake renderer refuse to open it until a repair
//! strategy has stripped the marker.

#![allow(dead_code)]

use async_trait::async_trait;
use scanscribe::{
    DocumentAssembler, DocxAssembler, Job, JobId, JobService, JobStatus, JobStore,
    MarkdownAssembler, Orchestrator, PageImage, PageRenderer, PageSeparator, RepairCascade,
    RepairStrategy, ScribeConfig, ScribeError, Transcriber,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const DAMAGED: &str = "DAMAGED";

/// A container body with `pages` pages.
pub fn pdf(pages: usize) -> Vec<u8> {
    format!("%PDF-1.4\nPAGES={pages}\n").into_bytes()
}

/// A container body pdfium (the fake) cannot open until repaired.
pub fn damaged_pdf(pages: usize) -> Vec<u8> {
    format!("%PDF-1.4\n{DAMAGED} PAGES={pages}\n").into_bytes()
}

fn page_count(body: &str) -> Option<usize> {
    body.split_whitespace()
        .find_map(|tok| tok.strip_prefix("PAGES="))
        .and_then(|n| n.parse().ok())
}

// ── Renderer ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRenderer {
    /// Behave like a host without the pdfium library.
    pub unavailable: bool,
    pub render_calls: AtomicUsize,
    /// Paths passed to `render`, to check which container was rasterised.
    pub rendered: Mutex<Vec<PathBuf>>,
}

impl FakeRenderer {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    async fn open(&self, path: &Path) -> Result<usize, ScribeError> {
        if self.unavailable {
            return Err(ScribeError::RendererUnavailable {
                detail: "pdfium library unavailable".into(),
            });
        }
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScribeError::RenderFailure {
                detail: format!("cannot read {}: {e}", path.display()),
            })?;
        if body.contains(DAMAGED) {
            return Err(ScribeError::RenderFailure {
                detail: "invalid cross-reference table".into(),
            });
        }
        page_count(&body).ok_or_else(|| ScribeError::RenderFailure {
            detail: "no page tree".into(),
        })
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn probe(&self, path: &Path) -> Result<usize, ScribeError> {
        self.open(path).await
    }

    async fn render(&self, path: &Path) -> Result<Vec<PageImage>, ScribeError> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        self.rendered.lock().unwrap().push(path.to_path_buf());
        let pages = self.open(path).await?;
        Ok((0..pages)
            .map(|index| PageImage {
                index,
                png: format!("png-{index}").into_bytes(),
            })
            .collect())
    }
}

// ── Transcriber ──────────────────────────────────────────────────────────────

/// Returns two lines per page, with optional failure and delays.
#[derive(Default)]
pub struct FakeTranscriber {
    /// 1-based page that fails.
    pub fail_on: Option<usize>,
    /// Fixed delay before every page.
    pub delay: Duration,
    /// Later pages finish first when set.
    pub reverse_delays: bool,
    /// 1-based page whose call panics.
    pub panic_on: Option<usize>,
    /// Calls started.
    pub calls: AtomicUsize,
    /// Calls that ran to the end, successfully or not.
    pub finished: AtomicUsize,
}

impl FakeTranscriber {
    pub fn text_for(page: usize) -> String {
        format!("Line one of page {page}\nLine two of page {page}")
    }

    pub fn failing_on(page: usize) -> Self {
        Self {
            fail_on: Some(page),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn panicking_on(page: usize) -> Self {
        Self {
            panic_on: Some(page),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, page: &PageImage, total: usize) -> Result<String, ScribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = page.page_num();
        let mut delay = self.delay;
        if self.reverse_delays {
            delay += Duration::from_millis(30 * (total - n) as u64);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.panic_on == Some(n) {
            panic!("transcriber crashed on page {n}");
        }
        if self.fail_on == Some(n) {
            return Err(ScribeError::TranscriptionFailure {
                page: n,
                detail: "provider returned HTTP 500".into(),
            });
        }
        // Fenced output exercises the cleanup step.
        Ok(format!("```markdown\n{}\n```", Self::text_for(n)))
    }
}

// ── Repair ───────────────────────────────────────────────────────────────────

/// Repair strategy that either strips the damage marker or fails.
pub struct ScriptedRepair {
    pub name: &'static str,
    pub succeed: bool,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedRepair {
    pub fn boxed(name: &'static str, succeed: bool) -> (Box<dyn RepairStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Self {
                name,
                succeed,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl RepairStrategy for ScriptedRepair {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn repair(&self, input: &Path, output: &Path) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed {
            return Err(format!("{}: object stream is corrupt", self.name));
        }
        let body = tokio::fs::read_to_string(input)
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::write(output, body.replace(DAMAGED, ""))
            .await
            .map_err(|e| e.to_string())
    }
}

// ── Assembler ────────────────────────────────────────────────────────────────

/// Assembler whose document writer always rejects the pages.
#[derive(Default)]
pub struct FailingAssembler {
    pub calls: AtomicUsize,
}

impl DocumentAssembler for FailingAssembler {
    fn assemble(&self, _source_name: &str, _pages: &[String]) -> Result<Vec<u8>, ScribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScribeError::AssemblyFailure {
            detail: "style table is corrupt".into(),
        })
    }

    fn extension(&self) -> &'static str {
        "md"
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub service: Arc<JobService>,
    pub renderer: Arc<FakeRenderer>,
    pub transcriber: Arc<FakeTranscriber>,
    pub dir: TempDir,
}

pub struct HarnessBuilder {
    renderer: FakeRenderer,
    transcriber: FakeTranscriber,
    assembler: Option<Arc<dyn DocumentAssembler>>,
    repair: Vec<Box<dyn RepairStrategy>>,
    docx: bool,
    concurrency: usize,
    max_upload_bytes: Option<usize>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            renderer: FakeRenderer::default(),
            transcriber: FakeTranscriber::default(),
            assembler: None,
            repair: Vec::new(),
            docx: false,
            concurrency: 1,
            max_upload_bytes: None,
        }
    }
}

impl HarnessBuilder {
    pub fn renderer(mut self, r: FakeRenderer) -> Self {
        self.renderer = r;
        self
    }

    pub fn transcriber(mut self, t: FakeTranscriber) -> Self {
        self.transcriber = t;
        self
    }

    pub fn assembler(mut self, a: Arc<dyn DocumentAssembler>) -> Self {
        self.assembler = Some(a);
        self
    }

    pub fn repair(mut self, strategies: Vec<Box<dyn RepairStrategy>>) -> Self {
        self.repair = strategies;
        self
    }

    pub fn docx(mut self) -> Self {
        self.docx = true;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.max_upload_bytes = Some(n);
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScribeConfig::builder()
            .upload_dir(dir.path().join("uploads"))
            .output_dir(dir.path().join("outputs"))
            .concurrency(self.concurrency);
        if let Some(n) = self.max_upload_bytes {
            config = config.max_upload_bytes(n);
        }
        let config = config.build().unwrap();

        let renderer = Arc::new(self.renderer);
        let transcriber = Arc::new(self.transcriber);
        let assembler: Arc<dyn DocumentAssembler> = match self.assembler {
            Some(a) => a,
            None if self.docx => Arc::new(DocxAssembler),
            None => Arc::new(MarkdownAssembler::new(PageSeparator::Comment)),
        };
        let store = Arc::new(JobStore::new());
        let orchestrator = Orchestrator::new(
            store,
            renderer.clone(),
            transcriber.clone(),
            assembler,
            RepairCascade::new(self.repair),
        )
        .with_concurrency(self.concurrency);

        Harness {
            service: Arc::new(JobService::new(config, orchestrator)),
            renderer,
            transcriber,
            dir,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.service.config().upload_dir.clone()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.service.config().output_dir.clone()
    }

    /// Files currently in `dir`, or none if it does not exist.
    pub fn files_in(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Poll until `id` is terminal. Panics after five seconds.
pub async fn wait_terminal(service: &JobService, id: JobId) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = service.query(id).expect("job must stay queryable");
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `id` reaches `status` (or a terminal state).
pub async fn wait_for_status(service: &JobService, id: JobId, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = service.query(id).expect("job must stay queryable");
        if job.status == status || job.is_terminal() {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "never reached {status}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Every committed snapshot of `id`, from a subscription taken before submit,
/// up to and including the terminal one.
pub async fn collect_trace(events: &mut broadcast::Receiver<Job>, id: JobId) -> Vec<Job> {
    let mut trace = Vec::new();
    let collect = async {
        loop {
            match events.recv().await {
                Ok(job) if job.id == id => {
                    let done = job.is_terminal();
                    trace.push(job);
                    if done {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => panic!("trace lagged by {n}"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("job never reached a terminal state");
    trace
}

/// Distinct statuses in commit order.
pub fn statuses(trace: &[Job]) -> Vec<JobStatus> {
    let mut out: Vec<JobStatus> = Vec::new();
    for job in trace {
        if out.last() != Some(&job.status) {
            out.push(job.status);
        }
    }
    out
}
