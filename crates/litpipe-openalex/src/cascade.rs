//! Query shapes for the ten-step search cascade.
//!
//! Step 0 is the DOI short-circuit. Steps 1-3 pair the title (and container
//! when known) with the publication year at decreasing exactness, steps 4-6
//! repeat the same shapes without the year, step 7 falls back to free-text
//! search, step 8 goes to Crossref, and step 9 searches by container alone
//! for references that carry no usable title.

/// Where and how one cascade step queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepQuery {
    /// OpenAlex `filter=` query (optionally with a year clause baked in).
    OpenAlexFilter(String),
    /// OpenAlex free-text `search=`.
    OpenAlexSearch(String),
    /// Crossref `works?query=`.
    Crossref(String),
}

/// Strip characters that collide with OpenAlex filter syntax (commas split
/// filter clauses, quotes delimit phrases).
pub fn clean_search_term(term: &str) -> String {
    term.chars()
        .map(|c| if c == ',' || c == '"' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the query for one step, or `None` when the step's inputs are
/// missing (no container for step 9, nothing at all for 1-8).
pub fn build_step_query(
    step: u8,
    title: Option<&str>,
    container: Option<&str>,
    year: Option<i64>,
) -> Option<StepQuery> {
    let title = title.map(clean_search_term).filter(|t| !t.is_empty());
    let container = container.map(clean_search_term).filter(|c| !c.is_empty());

    match step {
        1..=6 => {
            let title = title?;
            let field = if step == 1 || step == 4 {
                "display_name"
            } else {
                "title.search"
            };
            let quoted = step != 3 && step != 6;
            let mut filter = match (&container, quoted) {
                (Some(c), true) => format!("{field}:\"{title}\"|\"{c}\""),
                (Some(c), false) => format!("{field}:{title}|{c}"),
                (None, true) => format!("{field}:\"{title}\""),
                (None, false) => format!("{field}:{title}"),
            };
            if let Some(y) = year
                && (1..=3).contains(&step)
            {
                filter.push_str(&format!(",publication_year:{y}"));
            }
            Some(StepQuery::OpenAlexFilter(filter))
        }
        7 => title.map(StepQuery::OpenAlexSearch),
        8 => {
            let mut parts: Vec<String> = Vec::new();
            if let Some(t) = title {
                parts.push(t);
            }
            if let Some(c) = container {
                parts.push(c);
            }
            if let Some(y) = year {
                parts.push(y.to_string());
            }
            if parts.is_empty() {
                None
            } else {
                Some(StepQuery::Crossref(parts.join(" ")))
            }
        }
        9 => container.map(StepQuery::OpenAlexSearch),
        _ => None,
    }
}
