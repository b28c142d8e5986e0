//! Shared HTTP plumbing for the OpenAlex and Crossref endpoints.

use std::time::Duration;

use serde::de::DeserializeOwned;

use litpipe_core::rate_limit::{ServiceRateLimiter, check_rate_limit_response};

/// Why one fetch did not produce a page.
#[derive(Debug, Clone)]
pub(crate) enum FetchFailure {
    /// The service's daily budget is spent; callers short-circuit.
    Quota,
    /// Anything else: transport error, non-2xx, bad JSON.
    Other(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Quota => write!(f, "daily quota exhausted"),
            FetchFailure::Other(msg) => write!(f, "{msg}"),
        }
    }
}

pub(crate) fn user_agent(mailto: Option<&str>) -> String {
    match mailto {
        Some(email) => format!("litpipe/0.2 (mailto:{email})"),
        None => "litpipe/0.2".to_string(),
    }
}

/// Rate-limited GET returning parsed JSON.
///
/// `acquire` refusing (daily budget spent) maps to [`FetchFailure::Quota`];
/// a 429 adapts the service's backoff and fails this attempt; a success
/// resets the backoff.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    limiter: &ServiceRateLimiter,
    service: &str,
    url: &str,
    timeout: Duration,
    mailto: Option<&str>,
) -> Result<T, FetchFailure> {
    if !limiter.acquire(service).await {
        return Err(FetchFailure::Quota);
    }

    let resp = client
        .get(url)
        .header("User-Agent", user_agent(mailto))
        .header("Accept", "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FetchFailure::Other(e.to_string()))?;

    if let Err(hit) = check_rate_limit_response(&resp) {
        limiter.report_error(service, "HTTP 429");
        return Err(FetchFailure::Other(hit.to_string()));
    }
    if !resp.status().is_success() {
        return Err(FetchFailure::Other(format!("HTTP {}", resp.status())));
    }

    let parsed = resp
        .json::<T>()
        .await
        .map_err(|e| FetchFailure::Other(e.to_string()))?;
    limiter.report_success(service);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_includes_mailto() {
        assert_eq!(
            user_agent(Some("a@b.org")),
            "litpipe/0.2 (mailto:a@b.org)"
        );
        assert_eq!(user_agent(None), "litpipe/0.2");
    }
}
