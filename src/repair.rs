//! Repair cascade for containers that fail to open.
//!
//! Strategies are tried in a fixed priority order and the first success wins:
//!
//! 1. [`QpdfRewrite`]: structural rewrite. Rebuilds the xref table and
//!    object streams without touching page content; cheap and lossless.
//! 2. [`GhostscriptRewrite`]: re-distills the whole document through
//!    Ghostscript's `pdfwrite` device. Recovers files qpdf gives up on, at the
//!    cost of possibly altering fonts and layout.
//!
//! There is no retry inside a strategy. When every strategy fails the cascade
//! returns [`ScribeError::Unrepairable`] carrying every cause.

use crate::config::RepairConfig;
use crate::error::{RepairAttempt, ScribeError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Longest stderr excerpt kept in a failure cause.
const STDERR_TAIL_CHARS: usize = 400;

/// One ranked way of producing a valid container from a damaged one.
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    /// Short identifier used in logs and failure causes.
    fn name(&self) -> &'static str;

    /// Write a repaired copy of `input` to `output`. Any `Err` means the
    /// strategy failed; the string is the human-readable cause.
    async fn repair(&self, input: &Path, output: &Path) -> Result<(), String>;
}

/// Ranked list of repair strategies.
pub struct RepairCascade {
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl RepairCascade {
    pub fn new(strategies: Vec<Box<dyn RepairStrategy>>) -> Self {
        Self { strategies }
    }

    /// Build the cascade a deployment has enabled in its [`RepairConfig`].
    pub fn from_config(config: &RepairConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut strategies: Vec<Box<dyn RepairStrategy>> = Vec::new();
        if config.structural {
            strategies.push(Box::new(QpdfRewrite::new(&config.qpdf_binary, timeout)));
        }
        if config.rasterize {
            strategies.push(Box::new(GhostscriptRewrite::new(
                &config.ghostscript_binary,
                timeout,
            )));
        }
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order; return the path of the first repaired copy.
    ///
    /// Repaired files are written inside `workdir`, which the caller owns and
    /// cleans up.
    pub async fn repair(&self, input: &Path, workdir: &Path) -> Result<PathBuf, ScribeError> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let output = workdir.join(format!("repaired-{}.pdf", strategy.name()));
            debug!(strategy = strategy.name(), "Attempting container repair");

            let outcome = match strategy.repair(input, &output).await {
                Ok(()) => verify_output(&output).await,
                Err(cause) => Err(cause),
            };

            match outcome {
                Ok(()) => {
                    info!(strategy = strategy.name(), "Container repaired");
                    return Ok(output);
                }
                Err(cause) => {
                    warn!(strategy = strategy.name(), %cause, "Repair strategy failed");
                    // Leave nothing half-written behind for the next strategy.
                    let _ = tokio::fs::remove_file(&output).await;
                    attempts.push(RepairAttempt {
                        strategy: strategy.name().to_string(),
                        cause,
                    });
                }
            }
        }

        Err(ScribeError::Unrepairable { attempts })
    }
}

/// A strategy that reported success must have produced a non-empty file.
async fn verify_output(output: &Path) -> Result<(), String> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err("produced an empty file".to_string()),
        Err(e) => Err(format!("produced no output: {e}")),
    }
}

// ── Strategy A: qpdf ─────────────────────────────────────────────────────

/// Structural rewrite with `qpdf <input> <output>`.
///
/// qpdf exits 3 when it succeeded with warnings, which is exactly the case for
/// a damaged xref it managed to reconstruct, so 3 counts as success.
pub struct QpdfRewrite {
    binary: PathBuf,
    timeout: Duration,
}

impl QpdfRewrite {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RepairStrategy for QpdfRewrite {
    fn name(&self) -> &'static str {
        "qpdf"
    }

    async fn repair(&self, input: &Path, output: &Path) -> Result<(), String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(input).arg(output);
        run_tool(cmd, &self.binary, self.timeout, &[0, 3]).await
    }
}

// ── Strategy B: Ghostscript ──────────────────────────────────────────────

/// Rasterising rewrite with
/// `gs -o <output> -sDEVICE=pdfwrite -dPDFSETTINGS=/prepress <input>`.
pub struct GhostscriptRewrite {
    binary: PathBuf,
    timeout: Duration,
}

impl GhostscriptRewrite {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RepairStrategy for GhostscriptRewrite {
    fn name(&self) -> &'static str {
        "ghostscript"
    }

    async fn repair(&self, input: &Path, output: &Path) -> Result<(), String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-q")
            .arg("-dBATCH")
            .arg("-dNOPAUSE")
            .arg("-dSAFER")
            .arg("-o")
            .arg(output)
            .arg("-sDEVICE=pdfwrite")
            .arg("-dPDFSETTINGS=/prepress")
            .arg(input);
        run_tool(cmd, &self.binary, self.timeout, &[0]).await
    }
}

/// Run an external repair tool to completion, killing it on timeout.
async fn run_tool(
    mut cmd: Command,
    binary: &Path,
    timeout: Duration,
    ok_codes: &[i32],
) -> Result<(), String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            format!("binary '{}' not found", binary.display())
        } else {
            format!("failed to start '{}': {e}", binary.display())
        }
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| format!("failed waiting for process: {e}"))?,
        Err(_) => return Err(format!("timed out after {}s", timeout.as_secs())),
    };

    match output.status.code() {
        Some(code) if ok_codes.contains(&code) => Ok(()),
        Some(code) => Err(format!(
            "exit status {code}: {}",
            stderr_tail(&output.stderr)
        )),
        None => Err("terminated by signal".to_string()),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "no diagnostics".to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= STDERR_TAIL_CHARS {
        text.to_string()
    } else {
        let tail: String = chars[chars.len() - STDERR_TAIL_CHARS..].iter().collect();
        format!("…{tail}")
    }
}
