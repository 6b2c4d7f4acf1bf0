//! # Text Normalization and Fixed-Window Chunking — SPEC_FULL.md §4.2 (C2)
//!
//! Pure functions, no I/O — the easiest module in the crate to give
//! thorough property tests, per spec.md §8.
//!
//! ## Windowing
//!
//! Window `k` spans `[start_k, start_k + size)` clamped to the text end;
//! the next window starts at `end_k - overlap`. For `size = 1200`,
//! `overlap = 200` over 2400 chars: windows start at 0, 1000, 2000 — each
//! overlapping its neighbor by exactly 200 characters so no sentence is cut
//! without appearing whole in an adjacent window too.

use unicode_normalization::UnicodeNormalization;

use crate::model::MIN_CHUNK_CHARS;

/// Canonicalizes extracted text:
/// - Unicode NFC normalization (precomposed form — the teacher's
///   `pdf::normalize_pdf_text` does this for PT-BR diacritics; this crate
///   needs it across every language the multilingual encoder sees, so
///   visually identical chunks embed identically regardless of whether the
///   source used precomposed or decomposed codepoints)
/// - NUL → space
/// - runs of spaces/tabs collapse to a single space
/// - CRLF/CR → LF
/// - runs of 3+ newlines collapse to exactly two
/// - trims leading/trailing whitespace
pub fn normalize(text: &str) -> String {
    let text: String = text.nfc().collect();
    let text = text.replace('\0', " ");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut collapsed_spaces = String::with_capacity(text.len());
    let mut last_was_space_or_tab = false;
    for ch in text.chars() {
        if ch == ' ' || ch == '\t' {
            if !last_was_space_or_tab {
                collapsed_spaces.push(' ');
            }
            last_was_space_or_tab = true;
        } else {
            collapsed_spaces.push(ch);
            last_was_space_or_tab = false;
        }
    }

    let mut result = String::with_capacity(collapsed_spaces.len());
    let mut newline_run = 0usize;
    for ch in collapsed_spaces.chars() {
        if ch == '\n' {
            newline_run += 1;
        } else {
            if newline_run > 0 {
                result.push_str(&"\n".repeat(newline_run.min(2)));
                newline_run = 0;
            }
            result.push(ch);
        }
    }
    if newline_run > 0 {
        result.push_str(&"\n".repeat(newline_run.min(2)));
    }

    result.trim().to_string()
}

/// Splits `text` into overlapping fixed-size character windows.
///
/// Window `k` spans `[start_k, start_k + size)` clamped to the text end; the
/// next `start_{k+1} = end_k - overlap` (never negative). Windows with fewer
/// than [`MIN_CHUNK_CHARS`] non-whitespace characters are dropped.
/// Terminates once `end >= length` — guaranteed because `size > overlap`
/// (enforced by clamping overlap below size).
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size.saturating_sub(1));

    let chars: Vec<char> = text.chars().collect();
    let length = chars.len();

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(length);
        let window: String = chars[start..end].iter().collect();
        if window.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CHUNK_CHARS {
            windows.push(window);
        }
        if end >= length {
            break;
        }
        start = end - overlap;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let raw = "a\0b\t\t c\r\nd\r e\n\n\n\nf   ";
        let once = normalize(raw);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_composes_combining_diacritics() {
        // "e" + combining acute accent (U+0301) decomposed form.
        let decomposed = "cafe\u{0301}";
        let normalized = normalize(decomposed);
        assert_eq!(normalized, "café");
        assert_eq!(normalized.chars().count(), 4);
    }

    #[test]
    fn normalize_collapses_blank_runs_to_two_newlines() {
        let out = normalize("a\n\n\n\n\nb");
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn normalize_replaces_nul_and_collapses_spaces() {
        let out = normalize("a\0\0b   c\t\td");
        assert_eq!(out, "a b c d");
    }

    #[test]
    fn empty_text_yields_zero_chunks() {
        assert!(chunk("", 1200, 200).is_empty());
    }

    #[test]
    fn short_chunk_is_dropped() {
        let text = "short";
        assert!(chunk(text, 1200, 200).is_empty());
    }

    #[test]
    fn windows_overlap_by_exactly_overlap_chars() {
        let text = "x".repeat(2400);
        let chunks = chunk(&text, 1200, 200);
        assert!(chunks.len() >= 2);
        // first window covers [0, 1200), second starts at 1000
        assert_eq!(chunks[0].len(), 1200);
    }

    #[test]
    fn chunking_terminates_and_is_idempotent_on_normalized_input() {
        let raw = "A. B. C. ".repeat(400);
        let normalized = normalize(&raw);
        let once = chunk(&normalized, 1200, 200);
        let twice = chunk(&normalize(&normalized), 1200, 200);
        assert_eq!(once, twice);
        assert!(once.len() >= 2);
    }

    #[test]
    fn last_window_may_be_shorter_than_size() {
        let text = "y".repeat(1300);
        let chunks = chunk(&text, 1200, 200);
        // second window starts at 1200-200=1000 and runs to the end (1300)
        assert_eq!(chunks.last().unwrap().len(), 300);
    }
}
