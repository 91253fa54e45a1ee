//! Policy document loading.
//!
//! Turns a source document on disk into a list of [`Page`]s of plain UTF-8
//! text. PDFs are extracted page by page so retrieved passages can cite
//! their page; everything else is read as a single unpaged text document.

use std::path::Path;

use crate::error::{ClaimError, Result};
use crate::models::Page;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// The built-in sample policy used by `intelliclaim seed`.
pub const SAMPLE_POLICY: &str = "Insurance Policy Document - HealthPlus Plan

Section 1: General Coverage
- All standard procedures are covered after a 30-day waiting period.
- Emergency procedures covered immediately.

Section 2: Special Procedures
- Coverage for specialized surgeries, including knee surgery, requires a 6-month waiting period from the policy start date.
- Cardiac procedures have a 12-month waiting period.
- Dental procedures require 3-month waiting period.

Section 3: Exclusions
- Pre-existing conditions are not covered for the first 24 months.
- Cosmetic procedures are not covered unless medically necessary.
";

/// Load a document and return its pages.
///
/// Fails with [`ClaimError::Indexing`] when the file is missing, empty,
/// unparseable, or contains no visible text.
pub fn load_document(path: &Path) -> Result<Vec<Page>> {
    if !path.exists() {
        return Err(ClaimError::Indexing(format!(
            "source document not found at: {}",
            path.display()
        )));
    }

    let bytes = std::fs::read(path).map_err(|e| {
        ClaimError::Indexing(format!("failed to read {}: {}", path.display(), e))
    })?;

    if bytes.is_empty() {
        return Err(ClaimError::Indexing(format!(
            "source document is empty: {}",
            path.display()
        )));
    }

    let pages = if is_pdf(path, &bytes) {
        extract_pdf(&bytes)?
    } else {
        extract_plain(&bytes)?
    };

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(ClaimError::Indexing(format!(
            "no text could be extracted from {}. Is the document empty or corrupted?",
            path.display()
        )));
    }

    Ok(pages)
}

/// Read a document as one string (used by the keyword retriever).
pub fn load_document_text(path: &Path) -> Result<String> {
    let pages = load_document(path)?;
    Ok(pages
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Write [`SAMPLE_POLICY`] to `path`, creating parent directories.
pub fn write_sample_policy(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, SAMPLE_POLICY)?;
    Ok(())
}

fn is_pdf(path: &Path, bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
        || path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Page>> {
    // pdf-extract panics on some malformed inputs.
    let texts = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ClaimError::Indexing("PDF extraction panicked on malformed input".into()))?
        .map_err(|e| ClaimError::Indexing(format!("PDF extraction failed: {}", e)))?;

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            number: Some(i as i64 + 1),
            text,
        })
        .collect())
}

fn extract_plain(bytes: &[u8]) -> Result<Vec<Page>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ClaimError::Indexing(format!("document is not valid UTF-8: {}", e)))?;
    Ok(vec![Page {
        number: None,
        text: text.to_string(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_document_is_indexing_error() {
        let err = load_document(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ClaimError::Indexing(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn empty_document_is_indexing_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_document(&path),
            Err(ClaimError::Indexing(_))
        ));

        std::fs::write(&path, "   \n\n  ").unwrap();
        assert!(matches!(
            load_document(&path),
            Err(ClaimError::Indexing(_))
        ));
    }

    #[test]
    fn plain_text_is_single_unpaged_page() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.txt");
        write_sample_policy(&path).unwrap();
        let pages = load_document(&path).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, None);
        assert!(pages[0].text.contains("6-month waiting period"));
    }

    /// Single-page PDF showing `phrase`, with a correct xref table.
    fn minimal_pdf(phrase: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
        let mut out = Vec::new();
        let mut offsets = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        offsets.push(out.len());
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content.len(),
                content
            )
            .as_bytes(),
        );
        offsets.push(out.len());
        out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 6\n");
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{}\n%%EOF\n", xref_start).as_bytes());
        out
    }

    #[test]
    fn pdf_pages_are_numbered_from_one() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.pdf");
        std::fs::write(&path, minimal_pdf("knee surgery waiting period")).unwrap();
        let pages = load_document(&path).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, Some(1));
        assert!(pages[0].text.contains("knee surgery waiting period"));
    }

    #[test]
    fn corrupt_pdf_is_indexing_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\nthis is not really a pdf").unwrap();
        assert!(matches!(
            load_document(&path),
            Err(ClaimError::Indexing(_))
        ));
    }
}
