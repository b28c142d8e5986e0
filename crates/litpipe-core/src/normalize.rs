//! Canonical identity forms for DOIs, OpenAlex IDs, titles and author lists.
//!
//! These forms exist only for duplicate comparison and are never shown to
//! users. Normalization is total: a malformed identifier normalizes to
//! `None`, never to a bogus canonical form.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static DOI_URL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(dx\.)?doi\.org/").unwrap());

static DOI_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^10\.\d{4,9}/\S+$").unwrap());

static OPENALEX_WORK_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(W\d+)").unwrap());

static NON_ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Normalize a DOI to its bare lowercase form.
///
/// Strips whitespace, a leading `doi:` label and any `https://doi.org/` /
/// `http://dx.doi.org/` prefix, lowercases, and drops trailing sentence
/// punctuation picked up from extracted text. Returns `None` unless the
/// result matches the registered DOI shape `10.<registrant>/<suffix>`.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_string();
    if doi.len() >= 4 && doi[..4].eq_ignore_ascii_case("doi:") {
        doi = doi[4..].trim_start().to_string();
    }
    doi = DOI_URL_PREFIX.replace(&doi, "").to_string();
    let mut doi = doi.to_lowercase();
    while doi.ends_with(['.', ',', ';']) {
        doi.pop();
    }
    if DOI_SHAPE.is_match(&doi) { Some(doi) } else { None }
}

/// Extract the `W<digits>` work identifier from an OpenAlex ID or URL.
pub fn normalize_openalex_id(raw: &str) -> Option<String> {
    OPENALEX_WORK_ID
        .captures(raw)
        .map(|c| c[1].to_uppercase())
}

/// Normalize a title to a lowercase ASCII word sequence.
///
/// NFKD-decomposes, drops combining marks (anything non-ASCII after
/// decomposition), lowercases, and collapses every run of non-alphanumerics
/// into a single space.
pub fn normalize_title(title: &str) -> String {
    let ascii: String = title.nfkd().filter(|c| c.is_ascii()).collect();
    NON_ALNUM_RUN
        .replace_all(&ascii.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Compact comparison form of a title: [`normalize_title`] with the spaces
/// stripped too, so punctuation and spacing differences never matter.
pub fn normalize_title_compact(title: &str) -> String {
    normalize_title(title).replace(' ', "")
}

/// Normalize an ordered author list to a sorted surname key.
///
/// The surname of each author is the token before the first comma when one
/// is present (`"Smith, J."`), otherwise the last whitespace-separated
/// token (`"Jane Smith"`). Surnames are lowercased, stripped of
/// punctuation, sorted and comma-joined. Returns `None` when no usable
/// surname survives.
pub fn normalize_authors(authors: &[String]) -> Option<String> {
    let mut surnames: Vec<String> = authors
        .iter()
        .filter_map(|a| {
            let a = a.trim();
            if a.is_empty() {
                return None;
            }
            let surname = match a.split_once(',') {
                Some((before, _)) => before.trim(),
                None => a.split_whitespace().last()?,
            };
            let cleaned: String = surname
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if cleaned.is_empty() { None } else { Some(cleaned) }
        })
        .collect();

    if surnames.is_empty() {
        return None;
    }
    surnames.sort();
    Some(surnames.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── normalize_doi ──────────────────────────────────────────────────

    #[test]
    fn doi_bare() {
        assert_eq!(normalize_doi("10.1000/xyz"), Some("10.1000/xyz".into()));
    }

    #[test]
    fn doi_variants_normalize_equal() {
        let expected = Some("10.1000/xyz".to_string());
        assert_eq!(normalize_doi("10.1000/xyz."), expected);
        assert_eq!(normalize_doi("doi:10.1000/xyz"), expected);
        assert_eq!(normalize_doi("https://dx.doi.org/10.1000/xyz"), expected);
        assert_eq!(normalize_doi("  https://doi.org/10.1000/XYZ, "), expected);
    }

    #[test]
    fn doi_uppercase_lowered() {
        assert_eq!(
            normalize_doi("10.48550/ARXIV.1706.03762"),
            Some("10.48550/arxiv.1706.03762".into())
        );
    }

    #[test]
    fn doi_trailing_punctuation_stripped() {
        assert_eq!(normalize_doi("10.1234/abc.def;"), Some("10.1234/abc.def".into()));
        assert_eq!(normalize_doi("10.1234/abc.,"), Some("10.1234/abc".into()));
    }

    #[test]
    fn doi_malformed_is_none() {
        assert_eq!(normalize_doi(""), None);
        assert_eq!(normalize_doi("not a doi"), None);
        assert_eq!(normalize_doi("11.1234/abc"), None);
        assert_eq!(normalize_doi("10.12/too-short-registrant"), None);
        // suffix with embedded whitespace is not a valid DOI
        assert_eq!(normalize_doi("10.1234/ab cd"), None);
    }

    // ── normalize_openalex_id ──────────────────────────────────────────

    #[test]
    fn openalex_id_from_url() {
        assert_eq!(
            normalize_openalex_id("https://openalex.org/W12345"),
            Some("W12345".into())
        );
    }

    #[test]
    fn openalex_id_bare_and_lowercase() {
        assert_eq!(normalize_openalex_id("W2741809807"), Some("W2741809807".into()));
        assert_eq!(normalize_openalex_id("w99"), Some("W99".into()));
    }

    #[test]
    fn openalex_id_invalid() {
        assert_eq!(normalize_openalex_id("A12345"), None);
        assert_eq!(normalize_openalex_id(""), None);
    }

    // ── normalize_title ────────────────────────────────────────────────

    #[test]
    fn title_basic() {
        assert_eq!(
            normalize_title("Attention Is All You Need!"),
            "attention is all you need"
        );
    }

    #[test]
    fn title_accents_and_punctuation() {
        assert_eq!(normalize_title("Rényi—divergence, revisited"), "renyi divergence revisited");
    }

    #[test]
    fn title_compact_ignores_spacing() {
        assert_eq!(
            normalize_title_compact("Deep   Learning: an overview"),
            normalize_title_compact("deep learning An Overview?")
        );
    }

    // ── normalize_authors ──────────────────────────────────────────────

    #[test]
    fn authors_surname_before_comma() {
        assert_eq!(
            normalize_authors(&["Smith, Jane".into(), "Doe, J.".into()]),
            Some("doe,smith".into())
        );
    }

    #[test]
    fn authors_last_token() {
        assert_eq!(
            normalize_authors(&["Jane Smith".into(), "John Doe".into()]),
            Some("doe,smith".into())
        );
    }

    #[test]
    fn authors_order_independent() {
        let a = normalize_authors(&["B. Zhou".into(), "A. Ahmed".into()]);
        let b = normalize_authors(&["Ahmed, A.".into(), "Zhou, B.".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn authors_empty_is_none() {
        assert_eq!(normalize_authors(&[]), None);
        assert_eq!(normalize_authors(&["   ".into()]), None);
    }
}
