//! Sci-Hub page parsing.
//!
//! Mirrors serve the PDF behind an `<embed>`, an `<iframe id="pdf">`, or a
//! save button whose onclick carries the link. The mirror list rotates
//! between invocations and goes stale often, so it is configurable.

use scraper::{Html, Selector};

use crate::html::resolve_link;

/// Mirror list as last observed working; overridable from config.
pub const DEFAULT_MIRRORS: &[&str] = &[
    "https://sci-hub.al",
    "https://sci-hub.shop",
    "https://sci-hub.vg",
    "https://sci-hub.ren",
    "https://sci-hub.wf",
    "https://sci-hub.ee",
    "https://sci-hub.mksa.top",
];

/// Pull the PDF link out of a Sci-Hub article page. Checks the embed tag,
/// then the pdf iframe, then the save button. Relative links resolve
/// against the mirror.
pub fn extract_pdf_link(html: &str, mirror: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let embed = Selector::parse(r#"embed[type="application/pdf"]"#).ok()?;
    if let Some(el) = doc.select(&embed).next()
        && let Some(src) = el.value().attr("src")
    {
        return resolve_link(mirror, src);
    }

    let iframe = Selector::parse("iframe#pdf").ok()?;
    if let Some(el) = doc.select(&iframe).next()
        && let Some(src) = el.value().attr("src")
    {
        return resolve_link(mirror, src);
    }

    let button = Selector::parse("button[onclick]").ok()?;
    for el in doc.select(&button) {
        if let Some(onclick) = el.value().attr("onclick")
            && let Some(link) = onclick
                .split_once("location.href='")
                .and_then(|(_, rest)| rest.split('\'').next())
        {
            return resolve_link(mirror, link);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIRROR: &str = "https://sci-hub.wf";

    #[test]
    fn embed_tag_preferred() {
        let html = r#"<html><body>
            <embed type="application/pdf" src="/downloads/2020/paper.pdf#view=FitH"/>
            <iframe id="pdf" src="/other.pdf"></iframe>
        </body></html>"#;
        assert_eq!(
            extract_pdf_link(html, MIRROR),
            Some("https://sci-hub.wf/downloads/2020/paper.pdf#view=FitH".into())
        );
    }

    #[test]
    fn iframe_fallback() {
        let html = r#"<html><body><iframe id="pdf" src="//zero.sci-hub.se/123/paper.pdf"></iframe></body></html>"#;
        assert_eq!(
            extract_pdf_link(html, MIRROR),
            Some("https://zero.sci-hub.se/123/paper.pdf".into())
        );
    }

    #[test]
    fn save_button_onclick() {
        let html = r#"<html><body>
            <button onclick="location.href='/downloads/paper.pdf?download=true'">&darr; save</button>
        </body></html>"#;
        assert_eq!(
            extract_pdf_link(html, MIRROR),
            Some("https://sci-hub.wf/downloads/paper.pdf?download=true".into())
        );
    }

    #[test]
    fn absolute_links_kept() {
        let html = r#"<embed type="application/pdf" src="https://cdn.sci-hub.se/p.pdf"/>"#;
        assert_eq!(
            extract_pdf_link(html, MIRROR),
            Some("https://cdn.sci-hub.se/p.pdf".into())
        );
    }

    #[test]
    fn article_missing_is_none() {
        let html = "<html><body><p>article not found</p></body></html>";
        assert_eq!(extract_pdf_link(html, MIRROR), None);
    }
}
