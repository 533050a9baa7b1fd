//! Post-processing: deterministic cleanup of raw VLM transcriptions.
//!
//! Even with a literal-transcription prompt, models occasionally wrap the
//! reply in a code fence, emit Windows line endings or sprinkle zero-width
//! characters. Since every line of the cleaned text becomes one paragraph in
//! the assembled document, those artefacts would show up verbatim.
//!
//! ## Rule Order
//!
//! Line endings are normalised before trimming, and fences are stripped first
//! so the fence lines never reach the per-line passes.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw transcription.
///
/// Rules (applied in order):
/// 1. Strip an outer code fence (```` ``` ````, ```` ```text ````, …)
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines down to one
/// 6. Drop leading and trailing blank lines
///
/// Interior line breaks are preserved exactly otherwise.
pub fn clean_transcript(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Strip outer fence ────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank-line runs ─────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}
