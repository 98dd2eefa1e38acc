//! Utility functions for string handling, model-reply cleanup, and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging and prompt budgets
//! - Slugification for output file names
//! - JSON error classification and code-fence stripping for LLM replies
//! - Sentence-aware chunking for the translation and speech services
//! - File system validation for output directories

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// A sentence: everything up to terminators followed by whitespace or the end.
/// `।` is the Devanagari full stop, so translated Hindi splits too.
static SENTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\S.*?(?:[.!?।]+(?:\s|$)|$)").unwrap());

/// Largest byte index `<= max` that lies on a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = floor_char_boundary(s, max);
        format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
    }
}

/// Keep at most `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````) from a model reply.
///
/// Only the fence is removed; the payload itself is left untouched.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) up to the first newline.
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Convert a title to a URL-friendly slug.
///
/// Lowercases the text, removes special characters, and replaces spaces
/// with hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// assert_eq!(slugify_title("Test-Article!"), "test-article");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Split `text` into chunks of at most `max` bytes.
///
/// Sentences are packed greedily; a sentence longer than `max` is split on
/// whitespace, and a single word longer than `max` is split on char
/// boundaries. Chunks are trimmed and never empty.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    chunk_with(text, max, str::len)
}

/// Like [`chunk_text`], but `max` counts characters instead of bytes.
pub fn chunk_text_chars(text: &str, max: usize) -> Vec<String> {
    chunk_with(text, max, |s| s.chars().count())
}

fn chunk_with(text: &str, max: usize, measure: fn(&str) -> usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let push_piece = |piece: &str, current: &mut String, chunks: &mut Vec<String>| {
        let joined_len = if current.is_empty() {
            measure(piece)
        } else {
            measure(current) + 1 + measure(piece)
        };
        if joined_len > max && !current.is_empty() {
            chunks.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);
    };

    for sentence in SENTENCE.find_iter(text) {
        let sentence = sentence.as_str().trim();
        if sentence.is_empty() {
            continue;
        }
        if measure(sentence) <= max {
            push_piece(sentence, &mut current, &mut chunks);
            continue;
        }
        for word in sentence.split_whitespace() {
            let mut word = word;
            while measure(word) > max {
                let cut = longest_prefix_within(word, max, measure);
                push_piece(&word[..cut], &mut current, &mut chunks);
                word = &word[cut..];
            }
            if !word.is_empty() {
                push_piece(word, &mut current, &mut chunks);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Byte length of the longest prefix of `word` measuring at most `max`, and
/// never less than one char.
fn longest_prefix_within(word: &str, max: usize, measure: fn(&str) -> usize) -> usize {
    let mut cut = 0;
    for (idx, ch) in word.char_indices() {
        let end = idx + ch.len_utf8();
        if measure(&word[..end]) > max {
            break;
        }
        cut = end;
    }
    if cut == 0 {
        word.chars().next().map_or(word.len(), char::len_utf8)
    } else {
        cut
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        // 'é' is two bytes; cutting at 1 must not split it.
        let result = truncate_for_log("éé", 1);
        assert_eq!(result, "…(+4 bytes)");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("नमस्ते", 2), "नम");
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("Hello World"), "hello-world");
        assert_eq!(slugify_title("Acme Corp."), "acme-corp");
        assert_eq!(slugify_title("AT&T"), "att");
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"field": "value"#;
        let result: Result<serde_json::Value, _> = serde_json::from_str(json_eof);
        assert!(looks_truncated(&result.unwrap_err()));

        let json_bad = r#"{"field": value}"#;
        let result: Result<serde_json::Value, _> = serde_json::from_str(json_bad);
        assert!(!looks_truncated(&result.unwrap_err()));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("  [1]  "), "[1]");
    }

    #[test]
    fn test_chunk_text_respects_limit_and_keeps_words() {
        let text = "Tesla sales rose sharply. Regulators opened a probe into autopilot! \
                    Analysts remain split on the outlook?";
        let chunks = chunk_text(text, 40);
        assert!(chunks.iter().all(|c| c.len() <= 40 && !c.is_empty()));

        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn test_chunk_text_keeps_decimals_together() {
        let chunks = chunk_text("Shares rose 3.5% today. Then fell.", 24);
        assert_eq!(chunks, vec!["Shares rose 3.5% today.".to_string(), "Then fell.".to_string()]);
    }

    #[test]
    fn test_chunk_text_packs_short_sentences() {
        let chunks = chunk_text("One. Two. Three.", 100);
        assert_eq!(chunks, vec!["One. Two. Three.".to_string()]);
    }

    #[test]
    fn test_chunk_text_splits_long_word() {
        let chunks = chunk_text(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));
    }

    #[test]
    fn test_chunk_text_chars_counts_characters() {
        // 20 Devanagari chars per sentence, 3 bytes each.
        let sentence = format!("{}।", "न".repeat(19));
        let text = format!("{sentence} {sentence} {sentence}");
        let by_chars = chunk_text_chars(&text, 45);
        assert_eq!(by_chars.len(), 2);
        assert!(by_chars.iter().all(|c| c.chars().count() <= 45));
        // Counting bytes, each 60-byte sentence has to be cut in two.
        let by_bytes = chunk_text(&text, 45);
        assert_eq!(by_bytes.len(), 6);
        assert!(by_bytes.iter().all(|c| c.len() <= 45));
    }

    #[test]
    fn test_chunk_text_chars_splits_long_word_on_chars() {
        let chunks = chunk_text_chars(&"ब".repeat(25), 10);
        assert_eq!(chunks.iter().map(|c| c.chars().count()).collect::<Vec<_>>(), vec![10, 10, 5]);
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("   ", 10).is_empty());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        let path = nested.to_str().unwrap();
        ensure_writable_dir(path).await.unwrap();
        assert!(nested.is_dir());
    }
}
