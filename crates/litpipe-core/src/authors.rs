//! Fuzzy author-name matching for candidate scoring.
//!
//! Names are split into first name(s) and surname, with nobility particles
//! kept on the surname. Surnames must agree closely before first names are
//! consulted at all.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Particles that belong to the surname regardless of position.
static NOBILITY_PARTICLES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["von", "van", "de", "du", "der", "la", "le", "da", "dos", "del"]
        .into_iter()
        .collect()
});

/// Minimum surname similarity before a pair can score at all.
const SURNAME_THRESHOLD: f64 = 0.85;

/// Split an academic name into `(first_names, surname)`, both lowercase.
///
/// `"Lastname, First"` splits on the comma; otherwise the last token is the
/// surname and any particles are pulled onto it (`"Ludwig van Beethoven"` →
/// `("ludwig", "van beethoven")`). First names keep letters and spaces only
/// so dotted initials compare cleanly.
pub fn split_name(name: &str) -> Option<(String, String)> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }

    let (first_raw, last) = if let Some((before, after)) = name.split_once(',') {
        (after.trim().to_string(), before.trim().to_string())
    } else {
        let parts: Vec<&str> = name.split_whitespace().collect();
        let (particles, rest): (Vec<&str>, Vec<&str>) = parts
            .iter()
            .partition(|p| NOBILITY_PARTICLES.contains(**p));
        let Some((&surname, firsts)) = rest.split_last() else {
            return None;
        };
        let mut last_parts = particles;
        last_parts.push(surname);
        (firsts.join(" "), last_parts.join(" "))
    };

    if last.is_empty() {
        return None;
    }

    let first: String = first_raw
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    Some((first, last))
}

/// Score one reference author against one candidate author in `[0, 1]`.
///
/// Surname fuzzy ratio must clear [`SURNAME_THRESHOLD`] or the pair scores
/// zero. Matching leading-initial sequences on both first-name strings score
/// a full 1.0; otherwise the score blends surname and first-name similarity
/// weighted toward the surname.
pub fn match_author_pair(ref_author: &str, cand_author: &str) -> f64 {
    let Some((ref_first, ref_last)) = split_name(ref_author) else {
        return 0.0;
    };
    let Some((cand_first, cand_last)) = split_name(cand_author) else {
        return 0.0;
    };

    let last_sim = rapidfuzz::fuzz::ratio(ref_last.chars(), cand_last.chars());
    if last_sim < SURNAME_THRESHOLD {
        return 0.0;
    }

    if ref_first.is_empty() || cand_first.is_empty() {
        return last_sim;
    }

    let initials = |s: &str| -> String {
        s.split_whitespace()
            .filter_map(|w| w.chars().next())
            .collect()
    };
    if initials(&ref_first) == initials(&cand_first) {
        return 1.0;
    }

    let first_sim = rapidfuzz::fuzz::partial_ratio(ref_first.chars(), cand_first.chars());
    0.7 * last_sim + 0.3 * first_sim
}

/// Average of the top-N pair scores for one branch (authors or editors),
/// where N is the number of reference names in that branch.
fn branch_score(ref_names: &[String], cand_authors: &[String]) -> Option<f64> {
    if ref_names.is_empty() || cand_authors.is_empty() {
        return None;
    }

    let mut scores: Vec<f64> = Vec::with_capacity(ref_names.len() * cand_authors.len());
    for r in ref_names {
        for c in cand_authors {
            scores.push(match_author_pair(r, c));
        }
    }
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top: &[f64] = &scores[..ref_names.len().min(scores.len())];
    Some(top.iter().sum::<f64>() / top.len() as f64)
}

/// Score a candidate's author list against a reference's authors and
/// editors, taking the better of the two branches.
pub fn author_match_score(
    ref_authors: &[String],
    ref_editors: &[String],
    cand_authors: &[String],
) -> f64 {
    let author_branch = branch_score(ref_authors, cand_authors);
    let editor_branch = branch_score(ref_editors, cand_authors);
    match (author_branch, editor_branch) {
        (Some(a), Some(e)) => a.max(e),
        (Some(a), None) => a,
        (None, Some(e)) => e,
        (None, None) => 0.0,
    }
}
