//! Unpaywall response shape.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnpaywallResponse {
    pub best_oa_location: Option<OaLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OaLocation {
    pub url_for_pdf: Option<String>,
    pub host_type: Option<String>,
}

pub fn lookup_url(doi: &str, email: &str) -> String {
    format!(
        "https://api.unpaywall.org/v2/{doi}?email={}",
        urlencoding::encode(email)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_best_oa_location() {
        let resp: UnpaywallResponse = serde_json::from_value(serde_json::json!({
            "doi": "10.7717/peerj.4375",
            "is_oa": true,
            "best_oa_location": {
                "url_for_pdf": "https://peerj.com/articles/4375.pdf",
                "host_type": "publisher"
            }
        }))
        .unwrap();
        assert_eq!(
            resp.best_oa_location.unwrap().url_for_pdf.as_deref(),
            Some("https://peerj.com/articles/4375.pdf")
        );
    }

    #[test]
    fn closed_work_has_no_location() {
        let resp: UnpaywallResponse =
            serde_json::from_value(serde_json::json!({"is_oa": false, "best_oa_location": null}))
                .unwrap();
        assert!(resp.best_oa_location.is_none());
    }

    #[test]
    fn lookup_url_shape() {
        assert_eq!(
            lookup_url("10.1/x", "me@example.org"),
            "https://api.unpaywall.org/v2/10.1/x?email=me%40example.org"
        );
    }
}
