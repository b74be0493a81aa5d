//! Text preprocessing for embedding input.
//!
//! Prepares a job posting or resume body for the encoder:
//! 1. Collapse runs of whitespace (including newlines) into single spaces
//! 2. Trim, skip if empty
//! 3. Truncate to max length with ellipsis
//!
//! The caller's original text is what gets stored; only the encoder sees the
//! prepared form.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 2048;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}+#]*").expect("valid token regex"));

/// Prepare raw document text for embedding generation.
///
/// Returns `None` if nothing but whitespace is left.
pub fn prepare_text(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return None;
    }

    Some(truncate_content(&collapsed))
}

/// Split text into lowercase word tokens.
///
/// Keeps `+` and `#` inside a token so "C++" and "C#" survive.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Truncate content to MAX_CONTENT_LENGTH chars, adding ellipsis if truncated.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    // Count chars, not bytes, so multi-byte sequences are never split
    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
