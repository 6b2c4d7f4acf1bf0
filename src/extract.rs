//! # Document Extraction — Bytes to Per-Page Text
//!
//! Grounded in the teacher's `pdf.rs`, which calls
//! `pdf_extract::extract_text_from_mem` and normalizes the result. The
//! teacher flattens the whole document into one string; this crate splits
//! pages back out on the form-feed (`\x0C`) page separator `pdf-extract`
//! inserts between pages, since chunk metadata needs a page number.
//!
//! ## Mime routing
//!
//! - `application/pdf` (or sniffed `%PDF-` magic bytes) → `pdf-extract`
//! - everything else → read as UTF-8 plain text, one page

use crate::error::AppError;
use crate::text::normalize;

pub struct ExtractedDocument {
    pub num_pages: u32,
    pub pages: Vec<String>,
}

/// Extracts normalized per-page text from a PDF or plain-text byte buffer.
///
/// `mime_type` selects the path: anything starting with `application/pdf`
/// goes through `pdf-extract`; everything else is read as UTF-8 plain text.
pub fn extract(bytes: &[u8], mime_type: &str) -> Result<ExtractedDocument, AppError> {
    if mime_type.starts_with("application/pdf") || mime_type.is_empty() && looks_like_pdf(bytes) {
        extract_pdf(bytes)
    } else {
        extract_plain_text(bytes)
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedDocument, AppError> {
    let span = tracing::info_span!("pdf_extraction");
    let _guard = span.enter();

    let raw_text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| AppError::Extract(format!("failed to extract text from PDF: {e}")))?;

    // pdf-extract inserts a form-feed between pages; documents with no
    // extractable page breaks come back as a single page.
    let mut pages: Vec<String> = raw_text
        .split('\x0C')
        .map(normalize)
        .filter(|p| !p.is_empty())
        .collect();
    if pages.is_empty() {
        pages.push(String::new());
    }

    tracing::info!(num_pages = pages.len(), "extracted PDF text");
    Ok(ExtractedDocument {
        num_pages: pages.len() as u32,
        pages,
    })
}

fn extract_plain_text(bytes: &[u8]) -> Result<ExtractedDocument, AppError> {
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|e| AppError::Extract(format!("invalid UTF-8 in text file: {e}")))?;
    Ok(ExtractedDocument {
        num_pages: 1,
        pages: vec![normalize(&text)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_single_page() {
        let doc = extract(b"hello   world\n\n\n\nfoo", "text/plain").unwrap();
        assert_eq!(doc.num_pages, 1);
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0], "hello world\n\nfoo");
    }

    #[test]
    fn invalid_utf8_fails_with_extract_error() {
        let bytes = vec![0xff, 0xfe, 0xfd];
        let err = extract(&bytes, "text/plain").unwrap_err();
        assert_eq!(err.kind(), "ExtractError");
    }

    #[test]
    fn malformed_pdf_fails_with_extract_error() {
        let err = extract(b"not a real pdf", "application/pdf").unwrap_err();
        assert_eq!(err.kind(), "ExtractError");
    }
}
