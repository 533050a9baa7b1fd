//! Input validation and resolution.
//!
//! Uploads are checked here before a job is created, so a bad request never
//! produces a job record. We look for the `%PDF` marker ourselves instead of
//! letting pdfium discover garbage later: a non-PDF upload is the caller's
//! mistake (`InvalidInput`), while a damaged PDF is a job-level problem the
//! repair cascade gets a chance at.
//!
//! The CLI also accepts HTTP(S) URLs; [`download_url`] fetches those into
//! memory, enforcing the same size limit while streaming.

use crate::error::ScribeError;
use std::path::Path;
use tracing::{debug, info};

/// How far into the file the `%PDF` marker may appear. Some producers
/// prepend junk bytes before the header, and readers tolerate up to 1 KiB.
pub const PDF_MARKER_WINDOW: usize = 1024;

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Whether `bytes` carries a `%PDF` marker within [`PDF_MARKER_WINDOW`].
pub fn has_pdf_marker(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_MARKER_WINDOW)];
    window.windows(4).any(|w| w == b"%PDF")
}

/// Validate an upload before it is persisted.
///
/// `filename` is the name the client supplied, if any.
pub fn validate_upload(
    filename: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<(), ScribeError> {
    if let Some(name) = filename {
        if name.trim().is_empty() {
            return Err(ScribeError::invalid_input("No file selected"));
        }
        if !has_pdf_extension(name) {
            return Err(ScribeError::invalid_input("Only PDF files are accepted"));
        }
    }
    if bytes.is_empty() {
        return Err(ScribeError::invalid_input("No file uploaded"));
    }
    if bytes.len() > max_bytes {
        return Err(ScribeError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    if !has_pdf_marker(bytes) {
        return Err(ScribeError::invalid_input(
            "File does not look like a PDF (no %PDF header)",
        ));
    }
    Ok(())
}

pub fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// File stem made safe for use inside an output filename.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
/// Falls back to `document` when nothing usable is left.
pub fn safe_stem(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Download a URL into memory. Returns the filename taken from the URL and the body.
pub async fn download_url(
    url: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<(String, Vec<u8>), ScribeError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScribeError::invalid_input(format!("cannot fetch {url}: {e}")))?;

    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ScribeError::invalid_input(format!("download of {url} timed out after {timeout_secs}s"))
        } else {
            ScribeError::invalid_input(format!("cannot fetch {url}: {e}"))
        }
    })?;

    if !response.status().is_success() {
        return Err(ScribeError::invalid_input(format!(
            "cannot fetch {url}: HTTP {}",
            response.status()
        )));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ScribeError::invalid_input(format!("cannot fetch {url}: {e}")))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(ScribeError::TooLarge {
                size: body.len() + chunk.len(),
                limit: max_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    let filename = filename_from_url(url);
    debug!("Downloaded {} bytes as {}", body.len(), filename);
    Ok((filename, body))
}

/// Extract a reasonable filename from the URL path.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if has_pdf_extension(last) {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
