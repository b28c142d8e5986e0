//! Per-service rate limiting with sliding windows and calendar-day quotas.
//!
//! Each external service gets its own state: timestamp deques for the
//! second/minute windows, a token deque for TPM-governed services, and a
//! per-calendar-day budget that refuses (rather than blocks) once spent.
//! `acquire` waits with the service lock released, so a slow service never
//! stalls callers of a different one. A 429 or provider quota error puts
//! the service into exponential backoff (doubled per hit, capped at an
//! hour), cleared again by the first successful call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

/// Maximum backoff after repeated quota errors.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Configured windows for one service. Any subset may be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceLimits {
    /// Max calls in any 1-second sliding window.
    pub rps: Option<u32>,
    /// Max calls in any 60-second sliding window.
    pub rpm: Option<u32>,
    /// Max token estimate sum per minute.
    pub tpm: Option<u64>,
    /// Max calls per calendar day.
    pub rpd: Option<u32>,
}

impl ServiceLimits {
    pub fn rps(n: u32) -> Self {
        Self {
            rps: Some(n),
            ..Default::default()
        }
    }

    pub fn rpm(n: u32) -> Self {
        Self {
            rpm: Some(n),
            ..Default::default()
        }
    }

    pub fn with_rpd(mut self, n: u32) -> Self {
        self.rpd = Some(n);
        self
    }

    pub fn with_tpm(mut self, n: u64) -> Self {
        self.tpm = Some(n);
        self
    }
}

struct ServiceState {
    limits: ServiceLimits,
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    day: VecDeque<Instant>,
    current_day: NaiveDate,
    daily_limit_exceeded: bool,
    quota_exceeded: bool,
    quota_reset: Option<Instant>,
    backoff: Duration,
}

impl ServiceState {
    fn new(limits: ServiceLimits) -> Self {
        Self {
            limits,
            second: VecDeque::new(),
            minute: VecDeque::new(),
            tokens: VecDeque::new(),
            day: VecDeque::new(),
            current_day: chrono::Local::now().date_naive(),
            daily_limit_exceeded: false,
            quota_exceeded: false,
            quota_reset: None,
            backoff: Duration::from_secs(1),
        }
    }

    /// Purge expired window entries, then either record the request (and
    /// return `None`) or return how long to wait for the tightest window.
    fn window_wait(&mut self, now: Instant, estimated_tokens: u64) -> Option<Duration> {
        let second_ago = now - Duration::from_secs(1);
        while self.second.front().is_some_and(|t| *t < second_ago) {
            self.second.pop_front();
        }
        let minute_ago = now - Duration::from_secs(60);
        while self.minute.front().is_some_and(|t| *t < minute_ago) {
            self.minute.pop_front();
        }
        while self.tokens.front().is_some_and(|(t, _)| *t < minute_ago) {
            self.tokens.pop_front();
        }

        if let Some(rps) = self.limits.rps
            && self.second.len() as u32 >= rps
            && let Some(oldest) = self.second.front()
        {
            return Some(*oldest + Duration::from_secs(1) - now);
        }
        if let Some(rpm) = self.limits.rpm
            && self.minute.len() as u32 >= rpm
            && let Some(oldest) = self.minute.front()
        {
            return Some(*oldest + Duration::from_secs(60) - now);
        }
        if let Some(tpm) = self.limits.tpm
            && estimated_tokens > 0
        {
            let used: u64 = self.tokens.iter().map(|(_, n)| n).sum();
            if used + estimated_tokens > tpm
                && let Some((oldest, _)) = self.tokens.front()
            {
                return Some(*oldest + Duration::from_secs(60) - now);
            }
        }

        // All windows have room: record and admit.
        if self.limits.rps.is_some() {
            self.second.push_back(now);
        }
        if self.limits.rpm.is_some() {
            self.minute.push_back(now);
        }
        if self.limits.tpm.is_some() && estimated_tokens > 0 {
            self.tokens.push_back((now, estimated_tokens));
        }
        if self.limits.rpd.is_some() {
            self.day.push_back(now);
        }
        None
    }
}

/// Per-service rate limiter. Built once at startup and injected into every
/// component that performs I/O; there is no global instance.
pub struct ServiceRateLimiter {
    services: HashMap<String, Mutex<ServiceState>>,
}

impl Default for ServiceRateLimiter {
    fn default() -> Self {
        let mut limiter = Self::empty();

        // OpenAlex: 10/s polite-pool guideline, 100k/day documented cap
        limiter.register("openalex", ServiceLimits::rps(10).with_rpd(100_000));
        // Crossref: conservative 2/s
        limiter.register("crossref", ServiceLimits::rps(2));
        // Unpaywall: 100k/day documented cap
        limiter.register("unpaywall", ServiceLimits::rps(5).with_rpd(100_000));
        // doi.org: no documented cap, be polite
        limiter.register("doi", ServiceLimits::rps(3));
        // Scraped sources: keep well under anything that looks automated
        limiter.register("scihub", ServiceLimits::rpm(30));
        limiter.register("libgen", ServiceLimits::rpm(20));

        limiter
    }
}

impl ServiceRateLimiter {
    /// A limiter with no services registered. Unknown services pass through.
    pub fn empty() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register (or replace) the limits for a service.
    pub fn register(&mut self, service: &str, limits: ServiceLimits) {
        self.services
            .insert(service.to_string(), Mutex::new(ServiceState::new(limits)));
    }

    /// Build from a `{service: limits}` table, e.g. parsed from config.
    pub fn from_table(table: impl IntoIterator<Item = (String, ServiceLimits)>) -> Self {
        let mut limiter = Self::empty();
        for (name, limits) in table {
            limiter.register(&name, limits);
        }
        limiter
    }

    /// Wait until a call to `service` may proceed, or return `false` if the
    /// daily budget is already spent for the rest of the day.
    pub async fn acquire(&self, service: &str) -> bool {
        self.acquire_with_tokens(service, 0).await
    }

    /// Like [`acquire`](Self::acquire), also accounting `estimated_tokens`
    /// against the service's TPM window when one is configured.
    pub async fn acquire_with_tokens(&self, service: &str, estimated_tokens: u64) -> bool {
        let Some(state_mutex) = self.services.get(service) else {
            // Unregistered services are not throttled.
            return true;
        };

        loop {
            let wait = {
                let mut st = state_mutex.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();

                // Calendar-day budget: roll over, then refuse without blocking.
                if let Some(rpd) = st.limits.rpd {
                    let today = chrono::Local::now().date_naive();
                    if st.current_day != today {
                        st.day.clear();
                        st.daily_limit_exceeded = false;
                        st.current_day = today;
                    }
                    if st.daily_limit_exceeded {
                        return false;
                    }
                    if st.day.len() as u32 >= rpd {
                        st.daily_limit_exceeded = true;
                        tracing::warn!(service, rpd, "daily quota spent, refusing until rollover");
                        return false;
                    }
                }

                // Quota backoff from a 429 / resource-exhausted error.
                let mut wait = None;
                if st.quota_exceeded {
                    match st.quota_reset {
                        Some(reset) if now < reset => wait = Some(reset - now),
                        _ => {
                            st.quota_exceeded = false;
                            st.quota_reset = None;
                            st.backoff = Duration::from_secs(1);
                        }
                    }
                }
                if wait.is_none() {
                    wait = st.window_wait(now, estimated_tokens);
                }
                wait
            };

            match wait {
                // Sleep with the lock released so other services proceed.
                Some(d) => tokio::time::sleep(d).await,
                None => return true,
            }
        }
    }

    /// Report a failed call. Quota-style errors (HTTP 429, provider
    /// "resource exhausted") put the service into backoff; anything else is
    /// ignored here and handled by the caller's cascade.
    pub fn report_error(&self, service: &str, error: &str) {
        let lowered = error.to_lowercase();
        if !lowered.contains("429") && !lowered.contains("resource exhausted") {
            return;
        }
        if let Some(state_mutex) = self.services.get(service) {
            let mut st = state_mutex.lock().unwrap_or_else(|e| e.into_inner());
            let backoff = st.backoff;
            st.quota_exceeded = true;
            st.quota_reset = Some(Instant::now() + backoff);
            st.backoff = (backoff * 2).min(MAX_BACKOFF);
            tracing::warn!(service, backoff_secs = backoff.as_secs(), "quota error, backing off");
        }
    }

    /// Report a successful call: resets the service's backoff to 1 s.
    pub fn report_success(&self, service: &str) {
        if let Some(state_mutex) = self.services.get(service) {
            let mut st = state_mutex.lock().unwrap_or_else(|e| e.into_inner());
            st.backoff = Duration::from_secs(1);
        }
    }

    /// Whether the service's daily budget is spent (test/observability hook).
    pub fn daily_exhausted(&self, service: &str) -> bool {
        self.services
            .get(service)
            .map(|m| {
                m.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .daily_limit_exceeded
            })
            .unwrap_or(false)
    }
}

/// A 429 response, with the parsed Retry-After when the server sent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHit {
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for RateLimitHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.retry_after {
            Some(d) => write!(f, "HTTP 429, retry after {:.1}s", d.as_secs_f64()),
            None => write!(f, "HTTP 429"),
        }
    }
}

impl std::error::Error for RateLimitHit {}

/// Check an HTTP response for 429 and extract Retry-After if present.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), RateLimitHit> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(RateLimitHit { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (integer seconds, or a conservative
/// fallback for HTTP-date forms).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(service: &str, limits: ServiceLimits) -> ServiceRateLimiter {
        let mut l = ServiceRateLimiter::empty();
        l.register(service, limits);
        l
    }

    // ── sliding windows ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unregistered_service_passes() {
        let l = ServiceRateLimiter::empty();
        assert!(l.acquire("nowhere").await);
    }

    #[tokio::test(start_paused = true)]
    async fn rps_third_call_waits_a_second() {
        let l = limiter_with("svc", ServiceLimits::rps(2));
        let start = Instant::now();
        assert!(l.acquire("svc").await);
        assert!(l.acquire("svc").await);
        assert!(l.acquire("svc").await);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn rpm_third_call_waits_a_minute() {
        let l = limiter_with("svc", ServiceLimits::rpm(2));
        let start = Instant::now();
        for _ in 0..3 {
            assert!(l.acquire("svc").await);
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn rpm_respected_across_concurrent_callers() {
        let l = std::sync::Arc::new(limiter_with("svc", ServiceLimits::rpm(2)));
        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let l = l.clone();
                tokio::spawn(async move { l.acquire("svc").await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn window_refills_after_expiry() {
        let l = limiter_with("svc", ServiceLimits::rps(1));
        assert!(l.acquire("svc").await);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let start = Instant::now();
        assert!(l.acquire("svc").await);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    // ── TPM ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn tpm_token_sum_blocks() {
        let l = limiter_with("svc", ServiceLimits::default().with_tpm(100));
        let start = Instant::now();
        assert!(l.acquire_with_tokens("svc", 60).await);
        assert!(l.acquire_with_tokens("svc", 60).await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn tpm_zero_tokens_not_counted() {
        let l = limiter_with("svc", ServiceLimits::default().with_tpm(10));
        let start = Instant::now();
        for _ in 0..5 {
            assert!(l.acquire("svc").await);
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    // ── RPD ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn rpd_refuses_without_blocking() {
        let l = limiter_with("svc", ServiceLimits::default().with_rpd(2));
        assert!(l.acquire("svc").await);
        assert!(l.acquire("svc").await);
        let start = Instant::now();
        assert!(!l.acquire("svc").await);
        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(l.daily_exhausted("svc"));
        // Further calls keep refusing immediately.
        assert!(!l.acquire("svc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn rpd_rolls_over_on_date_change() {
        let l = limiter_with("svc", ServiceLimits::default().with_rpd(1));
        assert!(l.acquire("svc").await);
        assert!(!l.acquire("svc").await);

        // Backdate the stored day so the next acquire sees a new date.
        {
            let mut st = l.services["svc"].lock().unwrap();
            st.current_day = st.current_day.pred_opt().unwrap();
        }
        assert!(l.acquire("svc").await);
        // The fresh day's budget is spent again after that single call.
        assert!(!l.acquire("svc").await);
    }

    // ── quota backoff ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn quota_error_delays_next_acquire() {
        let l = limiter_with("svc", ServiceLimits::rps(100));
        l.report_error("svc", "HTTP 429 Too Many Requests");
        let start = Instant::now();
        assert!(l.acquire("svc").await);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_backoff_doubles_and_caps() {
        let l = limiter_with("svc", ServiceLimits::rps(100));
        for _ in 0..20 {
            l.report_error("svc", "resource exhausted");
        }
        let st = l.services["svc"].lock().unwrap();
        assert_eq!(st.backoff, MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_backoff() {
        let l = limiter_with("svc", ServiceLimits::rps(100));
        l.report_error("svc", "429");
        l.report_error("svc", "429");
        l.report_success("svc");
        let st = l.services["svc"].lock().unwrap();
        assert_eq!(st.backoff, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn non_quota_error_ignored() {
        let l = limiter_with("svc", ServiceLimits::rps(100));
        l.report_error("svc", "connection refused");
        let start = Instant::now();
        assert!(l.acquire("svc").await);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_clears_quota_after_reset_passes() {
        let l = limiter_with("svc", ServiceLimits::rps(100));
        l.report_error("svc", "429");
        assert!(l.acquire("svc").await);
        let st = l.services["svc"].lock().unwrap();
        assert!(!st.quota_exceeded);
        assert_eq!(st.backoff, Duration::from_secs(1));
    }

    // ── defaults ───────────────────────────────────────────────────────

    #[test]
    fn default_has_expected_services() {
        let l = ServiceRateLimiter::default();
        for name in ["openalex", "crossref", "unpaywall", "doi", "scihub", "libgen"] {
            assert!(l.services.contains_key(name), "missing limiter for {name}");
        }
    }

    // ── parse_retry_after ──────────────────────────────────────────────

    #[test]
    fn retry_after_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("0"), Some(Duration::from_secs(0)));
    }

    #[test]
    fn retry_after_http_date_fallback() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn retry_after_garbage_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    // ── check_rate_limit_response ──────────────────────────────────────

    #[test]
    fn ok_on_200() {
        let http_resp = http::Response::builder().status(200).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        assert!(check_rate_limit_response(&resp).is_ok());
    }

    #[test]
    fn hit_on_429_with_header() {
        let http_resp = http::Response::builder()
            .status(429)
            .header("retry-after", "10")
            .body("")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        let err = check_rate_limit_response(&resp).unwrap_err();
        assert_eq!(err.retry_after, Some(Duration::from_secs(10)));
    }
}
