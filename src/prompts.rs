//! System prompts for page transcription.
//!
//! Callers can override the default via [`crate::config::ScribeConfig::system_prompt`];
//! the constant here is used only when no override is provided.

/// Default instruction sent with every page image.
///
/// The scans this service receives are mostly handwriting, so the prompt asks
/// for a literal transcription with line breaks intact. Each line of the reply
/// becomes one paragraph in the assembled document.
pub const TRANSCRIPTION_PROMPT: &str = "This is a scanned image of a handwritten page. \
Please transcribe ALL handwritten text exactly as written, preserving line breaks. \
Do not add any commentary, formatting, or interpretation. \
Output only the transcribed text.";

/// Text of the user turn that carries the page image.
///
/// Some providers reject a user message whose text part is empty.
pub fn page_request(page_num: usize, total: usize) -> String {
    format!("Page {page_num} of {total}.")
}
