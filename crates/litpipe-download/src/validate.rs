//! Structural PDF validation.
//!
//! A payload only counts as a usable full text if it parses as an
//! unencrypted PDF with enough pages to plausibly be the work itself
//! rather than a landing page, abstract or review.

use lopdf::Document;
use thiserror::Error;

/// Minimum page count for ordinary article-like references.
const MIN_PAGES: usize = 5;
/// Books are held to a much higher bar.
const MIN_PAGES_BOOK: usize = 50;

#[derive(Debug, Error)]
pub enum PdfIssue {
    #[error("payload is not a PDF (missing %PDF- header)")]
    NotPdf,
    #[error("PDF parse failed: {0}")]
    ParseFailed(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("PDF too short: {pages} pages, minimum {min}")]
    TooShort { pages: usize, min: usize },
}

fn is_book(entry_type: Option<&str>) -> bool {
    entry_type.is_some_and(|t| {
        let t = t.to_lowercase();
        t == "book" || t == "monograph"
    })
}

/// Validate a downloaded payload. Returns the page count on success.
pub fn check_pdf(bytes: &[u8], entry_type: Option<&str>) -> Result<usize, PdfIssue> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(PdfIssue::NotPdf);
    }

    let doc = Document::load_mem(bytes).map_err(|e| PdfIssue::ParseFailed(e.to_string()))?;
    if doc.is_encrypted() {
        return Err(PdfIssue::Encrypted);
    }

    let pages = doc.get_pages().len();
    let min = if is_book(entry_type) {
        MIN_PAGES_BOOK
    } else {
        MIN_PAGES
    };
    if pages < min {
        return Err(PdfIssue::TooShort { pages, min });
    }
    Ok(pages)
}

#[cfg(test)]
pub(crate) fn make_test_pdf(pages: usize) -> Vec<u8> {
    use lopdf::{Document, Object, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
            });
            Object::Reference(page_id)
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_pdf_rejected() {
        assert!(matches!(
            check_pdf(b"<html>paywall</html>", None),
            Err(PdfIssue::NotPdf)
        ));
    }

    #[test]
    fn garbage_after_header_rejected() {
        assert!(matches!(
            check_pdf(b"%PDF-1.5 but not really", None),
            Err(PdfIssue::ParseFailed(_))
        ));
    }

    #[test]
    fn five_pages_passes_for_articles() {
        let pdf = make_test_pdf(5);
        assert_eq!(check_pdf(&pdf, Some("article")).unwrap(), 5);
    }

    #[test]
    fn four_pages_fails_for_articles() {
        let pdf = make_test_pdf(4);
        assert!(matches!(
            check_pdf(&pdf, None),
            Err(PdfIssue::TooShort { pages: 4, min: 5 })
        ));
    }

    #[test]
    fn book_threshold_is_fifty() {
        let pdf = make_test_pdf(8);
        assert_eq!(check_pdf(&pdf, None).unwrap(), 8);
        assert!(matches!(
            check_pdf(&pdf, Some("book")),
            Err(PdfIssue::TooShort { pages: 8, min: 50 })
        ));
        let long = make_test_pdf(50);
        assert_eq!(check_pdf(&long, Some("Book")).unwrap(), 50);
    }
}
