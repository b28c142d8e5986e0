//! LibGen search-result parsing.
//!
//! Results come back as a `tablelibgen` table. Only rows whose extension
//! column says `pdf` are considered, and review rows (flagged in the author
//! or title cells) are skipped. Each surviving row contributes its mirror
//! links in order.

use scraper::{Html, Selector};

use crate::html::resolve_link;

pub const DEFAULT_BASE_URL: &str = "https://libgen.li";

/// Title substrings that mark a row as a review of the work, not the work.
const REVIEW_MARKERS: &[&str] = &[
    "vol.",
    "iss.",
    "pp.",
    "pages",
    "Review of",
    "Book Review",
    ") pp.",
    ") p.",
];

/// One candidate download link from the results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibgenHit {
    pub url: String,
    pub title: String,
    pub authors: String,
}

/// Search URL for `title + first author surname`.
pub fn search_url(base_url: &str, title: &str, first_author_surname: Option<&str>) -> String {
    let query = match first_author_surname {
        Some(surname) => format!("{title} {surname}"),
        None => title.to_string(),
    };
    format!(
        "{base_url}/index.php?req={}&lg_topic=libgen&open=0&view=simple&res=25&phrase=1&column=def",
        urlencoding::encode(query.trim())
    )
}

/// Parse the results table into PDF download candidates.
///
/// `is_book` switches on the review-marker title filter; review rows keyed
/// off the author cell are always skipped.
pub fn parse_results(html: &str, base_url: &str, is_book: bool) -> Vec<LibgenHit> {
    let doc = Html::parse_document(html);
    let Ok(table_sel) = Selector::parse("table#tablelibgen tr") else {
        return vec![];
    };
    let Ok(cell_sel) = Selector::parse("td") else {
        return vec![];
    };
    let Ok(anchor_sel) = Selector::parse("a[href]") else {
        return vec![];
    };

    let mut hits = Vec::new();
    for row in doc.select(&table_sel) {
        let cells: Vec<_> = row.select(&cell_sel).collect();
        if cells.len() < 9 {
            continue;
        }

        let cell_text = |i: usize| -> String {
            cells[i].text().collect::<String>().trim().to_string()
        };
        let title = cell_text(0);
        let authors = cell_text(1);
        let ext = cell_text(7).to_lowercase();

        if ext != "pdf" {
            continue;
        }
        if authors.contains("Review by:") {
            continue;
        }
        if is_book && REVIEW_MARKERS.iter().any(|m| title.contains(m)) {
            continue;
        }

        // Mirror links live in the last column.
        for link in cells[cells.len() - 1].select(&anchor_sel) {
            if let Some(href) = link.value().attr("href")
                && let Some(url) = resolve_link(base_url, href)
            {
                hits.push(LibgenHit {
                    url,
                    title: title.clone(),
                    authors: authors.clone(),
                });
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, authors: &str, ext: &str, mirror_href: &str) -> String {
        format!(
            "<tr><td>{title}</td><td>{authors}</td><td>pub</td><td>2019</td>\
             <td>en</td><td>300</td><td>2 MB</td><td>{ext}</td>\
             <td><a href=\"{mirror_href}\">[1]</a></td></tr>"
        )
    }

    fn page(rows: &[String]) -> String {
        format!(
            "<html><body><table id=\"tablelibgen\"><tr><th>Title</th></tr>{}</table></body></html>",
            rows.join("")
        )
    }

    #[test]
    fn pdf_rows_only() {
        let html = page(&[
            row("Wanted Book", "Real Author", "pdf", "/ads.php?md5=aaa"),
            row("Wanted Book", "Real Author", "epub", "/ads.php?md5=bbb"),
        ]);
        let hits = parse_results(&html, DEFAULT_BASE_URL, false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://libgen.li/ads.php?md5=aaa");
    }

    #[test]
    fn review_rows_skipped() {
        let html = page(&[
            row("Wanted Book", "Review by: Critic", "pdf", "/a"),
            row("Journal of Stuff vol. 3 pp. 1-4", "Someone", "pdf", "/b"),
            row("Wanted Book", "Real Author", "pdf", "/c"),
        ]);
        let hits = parse_results(&html, DEFAULT_BASE_URL, true);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].authors, "Real Author");
    }

    #[test]
    fn review_title_filter_only_applies_to_books() {
        let html = page(&[row("Paper with pp. in title", "Author", "pdf", "/x")]);
        assert_eq!(parse_results(&html, DEFAULT_BASE_URL, false).len(), 1);
        assert_eq!(parse_results(&html, DEFAULT_BASE_URL, true).len(), 0);
    }

    #[test]
    fn missing_table_is_empty() {
        let html = "<html><body><p>security check</p></body></html>";
        assert!(parse_results(html, DEFAULT_BASE_URL, false).is_empty());
    }

    #[test]
    fn short_rows_skipped() {
        let html = r#"<table id="tablelibgen"><tr><td>only</td><td>three</td><td>cells</td></tr></table>"#;
        assert!(parse_results(html, DEFAULT_BASE_URL, false).is_empty());
    }

    #[test]
    fn search_url_includes_surname() {
        let url = search_url(DEFAULT_BASE_URL, "Deep Learning", Some("Goodfellow"));
        assert!(url.contains("req=Deep%20Learning%20Goodfellow"));
        assert!(url.contains("lg_topic=libgen"));
    }
}
