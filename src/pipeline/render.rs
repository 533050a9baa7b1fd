//! Page rasterisation: open a container and render every page via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 7,000 × 9,900 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.

use crate::config::ScribeConfig;
use crate::error::ScribeError;
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an existing pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// One rendered page, PNG-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 0-based position in the container.
    pub index: usize,
    pub png: Vec<u8>,
}

impl PageImage {
    /// 1-based page number, as shown to users.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }
}

/// Opens containers and turns them into page images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Open the container without rendering; returns its page count.
    ///
    /// An `Err` here is what sends a job into the repair cascade.
    async fn probe(&self, path: &Path) -> Result<usize, ScribeError>;

    /// Render every page, in container order.
    async fn render(&self, path: &Path) -> Result<Vec<PageImage>, ScribeError>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    dpi: u32,
    max_pixels: u32,
    library: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(dpi: u32, max_pixels: u32) -> Self {
        Self {
            dpi,
            max_pixels,
            library: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
        }
    }

    pub fn from_config(config: &ScribeConfig) -> Self {
        Self::new(config.dpi, config.max_rendered_pixels)
    }

    /// Bind to a specific pdfium shared library instead of the system one.
    pub fn with_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library = Some(path.into());
        self
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn probe(&self, path: &Path) -> Result<usize, ScribeError> {
        let path = path.to_path_buf();
        let library = self.library.clone();

        tokio::task::spawn_blocking(move || probe_blocking(&path, library.as_deref()))
            .await
            .map_err(|e| ScribeError::Internal(format!("Probe task panicked: {}", e)))?
    }

    async fn render(&self, path: &Path) -> Result<Vec<PageImage>, ScribeError> {
        let path = path.to_path_buf();
        let library = self.library.clone();
        let (dpi, max_pixels) = (self.dpi, self.max_pixels);

        tokio::task::spawn_blocking(move || {
            render_blocking(&path, dpi, max_pixels, library.as_deref())
        })
        .await
        .map_err(|e| ScribeError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium, ScribeError> {
    let bindings = match library {
        Some(lib) => Pdfium::bind_to_library(lib),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ScribeError::RendererUnavailable {
        detail: format!(
            "pdfium library unavailable ({:?}); set {} to its path",
            e, PDFIUM_LIB_PATH_ENV
        ),
    })?;
    Ok(Pdfium::new(bindings))
}

fn probe_blocking(path: &Path, library: Option<&Path>) -> Result<usize, ScribeError> {
    let pdfium = bind_pdfium(library)?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ScribeError::RenderFailure {
            detail: format!("cannot open {}: {:?}", path.display(), e),
        })?;
    let pages = document.pages().len() as usize;
    debug!("Probed {}: {} pages", path.display(), pages);
    Ok(pages)
}

fn render_blocking(
    path: &Path,
    dpi: u32,
    max_pixels: u32,
    library: Option<&Path>,
) -> Result<Vec<PageImage>, ScribeError> {
    let pdfium = bind_pdfium(library)?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ScribeError::RenderFailure {
            detail: format!("cannot open {}: {:?}", path.display(), e),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    // PDF user space is 72 units per inch.
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(pages.len() as usize);

    for (index, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ScribeError::RenderFailure {
                detail: format!("page {}: {:?}", index + 1, e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );

        let png = encode::encode_png(&image).map_err(|e| ScribeError::RenderFailure {
            detail: format!("page {}: PNG encoding failed: {}", index + 1, e),
        })?;
        results.push(PageImage { index, png });
    }

    Ok(results)
}
