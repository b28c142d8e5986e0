//! PDF-link extraction from landing pages.
//!
//! When a source hands back HTML instead of bytes, the page is scanned for
//! an anchor that plausibly points at the PDF, or a bare `GET` button on
//! mirror pages. Relative links resolve against the page URL.

use scraper::{Html, Selector};
use url::Url;

/// Does a URL look like it points straight at a PDF?
pub fn is_likely_pdf_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.ends_with(".pdf")
        || lower.contains("/pdf/")
        || (lower.contains("pdf") && lower.contains("/download"))
        || (lower.contains("pdf") && lower.contains("/view"))
}

/// Resolve a possibly-relative link against the page it came from.
pub fn resolve_link(base_url: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(base_url).ok()?.join(href).ok().map(Url::into)
}

/// Scan a landing page for a PDF-likely anchor, falling back to a `GET`
/// button link (LibGen mirror pages). Returns an absolute URL.
pub fn extract_pdf_link(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").ok()?;

    for a in doc.select(&anchors) {
        if let Some(href) = a.value().attr("href")
            && is_likely_pdf_url(href)
        {
            return resolve_link(page_url, href);
        }
    }

    for a in doc.select(&anchors) {
        let label: String = a.text().collect::<String>().trim().to_string();
        if label == "GET"
            && let Some(href) = a.value().attr("href")
        {
            return resolve_link(page_url, href);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_likely_patterns() {
        assert!(is_likely_pdf_url("https://x.org/paper.pdf"));
        assert!(is_likely_pdf_url("https://x.org/pdf/12345"));
        assert!(is_likely_pdf_url("https://x.org/pdf-item/download?id=1"));
        assert!(is_likely_pdf_url("https://x.org/content/pdf/view/7"));
        assert!(!is_likely_pdf_url("https://x.org/abstract/12345"));
        assert!(!is_likely_pdf_url("https://x.org/download/epub"));
    }

    #[test]
    fn extracts_first_pdf_anchor() {
        let html = r#"
            <html><body>
              <a href="/about">About</a>
              <a href="/articles/4375.pdf">Full text</a>
              <a href="/other.pdf">Other</a>
            </body></html>"#;
        assert_eq!(
            extract_pdf_link(html, "https://peerj.com/articles/4375"),
            Some("https://peerj.com/articles/4375.pdf".into())
        );
    }

    #[test]
    fn falls_back_to_get_button() {
        let html = r#"<html><body>
            <a href="/ads">click me</a>
            <a href="get.php?md5=abc&key=xyz"> GET </a>
        </body></html>"#;
        assert_eq!(
            extract_pdf_link(html, "https://mirror.example/page"),
            Some("https://mirror.example/get.php?md5=abc&key=xyz".into())
        );
    }

    #[test]
    fn no_link_is_none() {
        let html = "<html><body><p>Subscribe to read.</p></body></html>";
        assert_eq!(extract_pdf_link(html, "https://x.org/a"), None);
    }

    #[test]
    fn resolves_relative_and_protocol_relative() {
        assert_eq!(
            resolve_link("https://x.org/a/b", "c.pdf"),
            Some("https://x.org/a/c.pdf".into())
        );
        assert_eq!(
            resolve_link("https://x.org/a", "//cdn.x.org/p.pdf"),
            Some("https://cdn.x.org/p.pdf".into())
        );
        assert_eq!(
            resolve_link("https://x.org/a", "https://y.org/p.pdf"),
            Some("https://y.org/p.pdf".into())
        );
    }
}
