//! Document assembly: ordered page texts → one output document.
//!
//! Both writers take the cleaned transcription of every page, in page order,
//! and mark each page boundary explicitly. An empty page list is an error:
//! a document with zero pages means something upstream went wrong.

use crate::config::{OutputFormat, PageSeparator, ScribeConfig};
use crate::error::ScribeError;
use chrono::Utc;
use docx_rs::{BreakType, Docx, Paragraph, Run};
use std::io::{Cursor, Write};
use std::sync::Arc;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Author recorded in the core properties of every Word document.
pub const DOCUMENT_AUTHOR: &str = "scanscribe";

const CORE_PROPS_PART: &str = "docProps/core.xml";

/// Builds the final document bytes from per-page texts.
pub trait DocumentAssembler: Send + Sync {
    /// `pages[i]` is the text of page `i + 1`. `source_name` is the file name
    /// the container was uploaded under.
    fn assemble(&self, source_name: &str, pages: &[String]) -> Result<Vec<u8>, ScribeError>;

    /// File extension of the produced document, without the dot.
    fn extension(&self) -> &'static str;
}

/// Pick the assembler matching the configured output format.
pub fn for_config(config: &ScribeConfig) -> Arc<dyn DocumentAssembler> {
    match config.output_format {
        OutputFormat::Docx => Arc::new(DocxAssembler),
        OutputFormat::Markdown => Arc::new(MarkdownAssembler::new(config.page_separator.clone())),
    }
}

fn ensure_pages(pages: &[String]) -> Result<(), ScribeError> {
    if pages.is_empty() {
        return Err(ScribeError::AssemblyFailure {
            detail: "no pages to assemble".into(),
        });
    }
    Ok(())
}

// ── Word ─────────────────────────────────────────────────────────────────

/// Word document: one paragraph per transcribed line, and a hard page break
/// between consecutive pages (never after the last).
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxAssembler;

impl DocxAssembler {
    fn build(pages: &[String]) -> Docx {
        let mut docx = Docx::new();
        for (i, text) in pages.iter().enumerate() {
            if i > 0 {
                docx = docx.add_paragraph(
                    Paragraph::new().add_run(Run::new().add_break(BreakType::Page)),
                );
            }
            for line in text.split('\n') {
                docx = docx
                    .add_paragraph(Paragraph::new().add_run(Run::new().add_text(xml_safe(line))));
            }
        }
        docx
    }
}

impl DocumentAssembler for DocxAssembler {
    fn assemble(&self, source_name: &str, pages: &[String]) -> Result<Vec<u8>, ScribeError> {
        ensure_pages(pages)?;
        let mut buf = Cursor::new(Vec::new());
        Self::build(pages)
            .build()
            .pack(&mut buf)
            .map_err(|e| ScribeError::AssemblyFailure {
                detail: format!("docx packaging failed: {}", e),
            })?;
        let core = core_properties(&format!("OCR: {source_name}"), DOCUMENT_AUTHOR);
        let bytes = replace_part(buf.into_inner(), CORE_PROPS_PART, &core).map_err(|e| {
            ScribeError::AssemblyFailure {
                detail: format!("docx metadata failed: {}", e),
            }
        })?;
        debug!("Assembled {} pages → {} bytes docx", pages.len(), bytes.len());
        Ok(bytes)
    }

    fn extension(&self) -> &'static str {
        OutputFormat::Docx.extension()
    }
}

/// Drop characters XML 1.0 cannot carry (control codes other than tab).
fn xml_safe(line: &str) -> String {
    line.chars()
        .filter(|&c| c == '\t' || !c.is_control())
        .collect()
}

fn xml_escape(text: &str) -> String {
    xml_safe(text)
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `docProps/core.xml` with a title and author.
///
/// docx-rs only exposes the timestamps of this part, so the whole part is
/// written here and swapped into the packed archive.
fn core_properties(title: &str, author: &str) -> String {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let author = xml_escape(author);
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<cp:coreProperties "#,
            r#"xmlns:cp="http://schemas.openxmlformats.org/package/2006/"#,
            r#"metadata/core-properties" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#,
            r#"xmlns:dcterms="http://purl.org/dc/terms/" "#,
            r#"xmlns:dcmitype="http://purl.org/dc/dcmitype/" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            r#"<dc:title>{title}</dc:title>"#,
            r#"<dc:creator>{author}</dc:creator>"#,
            r#"<cp:lastModifiedBy>{author}</cp:lastModifiedBy>"#,
            r#"<dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created>"#,
            r#"<dcterms:modified xsi:type="dcterms:W3CDTF">{now}</dcterms:modified>"#,
            r#"<cp:revision>1</cp:revision>"#,
            r#"</cp:coreProperties>"#
        ),
        title = xml_escape(title),
        author = author,
        now = now,
    )
}

/// Rewrite `archive` with `part` replaced by `content`; other entries are
/// copied without recompression.
fn replace_part(archive: Vec<u8>, part: &str, content: &str) -> zip::result::ZipResult<Vec<u8>> {
    let mut reader = ZipArchive::new(Cursor::new(archive))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..reader.len() {
        let entry = reader.by_index_raw(i)?;
        if entry.name() == part {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }
    writer.start_file(
        part,
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
    )?;
    writer.write_all(content.as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

// ── Markdown ─────────────────────────────────────────────────────────────

/// Markdown: pages joined by a [`PageSeparator`].
#[derive(Debug, Clone, Default)]
pub struct MarkdownAssembler {
    separator: PageSeparator,
}

impl MarkdownAssembler {
    pub fn new(separator: PageSeparator) -> Self {
        Self { separator }
    }
}

impl DocumentAssembler for MarkdownAssembler {
    fn assemble(&self, _source_name: &str, pages: &[String]) -> Result<Vec<u8>, ScribeError> {
        ensure_pages(pages)?;
        let mut out = String::new();
        for (i, text) in pages.iter().enumerate() {
            if i > 0 {
                out.push_str(&self.separator.render(i + 1));
            }
            out.push_str(text);
        }
        let mut out = out.trim_end().to_string();
        out.push('\n');
        Ok(out.into_bytes())
    }

    fn extension(&self) -> &'static str {
        OutputFormat::Markdown.extension()
    }
}
