use reqwest::header::HeaderMap;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub const REMAINING_HEADER: &str = "requests-remaining";
pub const LIMIT_HEADER: &str = "requests-limit";
pub const PERIOD_HEADER: &str = "requests-period";
pub const RESET_HEADER: &str = "requests-reset";
pub const COOLDOWN_HEADER: &str = "cooldown-reset";

/// Per-endpoint quota state, rebuilt from the rate headers the server attaches
/// to every response. Created lazily on the first call to an endpoint.
pub struct RateLimiter {
    endpoint: String,
    requests_remaining: Option<u32>,
    requests_limit: Option<u32>,
    requests_period: Option<f64>,
    requests_reset: Option<f64>,
    cooldown: Option<f64>,
}

impl RateLimiter {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            requests_remaining: None,
            requests_limit: None,
            requests_period: None,
            requests_reset: None,
            cooldown: None,
        }
    }

    /// Ingests one response's rate headers. Last write wins per field; a
    /// header absent from this response leaves the previous value in place.
    pub fn update(&mut self, headers: &HeaderMap) {
        if let Some(v) = header_value(headers, REMAINING_HEADER) {
            self.requests_remaining = Some(v);
        }
        if let Some(v) = header_value(headers, LIMIT_HEADER) {
            self.requests_limit = Some(v);
        }
        if let Some(v) = header_value(headers, PERIOD_HEADER) {
            self.requests_period = Some(v);
        }
        if let Some(v) = header_value(headers, RESET_HEADER) {
            self.requests_reset = Some(v);
        }
        if let Some(v) = header_value(headers, COOLDOWN_HEADER) {
            self.cooldown = Some(v);
        }
    }

    pub fn requests_remaining(&self) -> Option<u32> {
        self.requests_remaining
    }

    pub fn requests_limit(&self) -> Option<u32> {
        self.requests_limit
    }

    pub fn requests_period(&self) -> Option<f64> {
        self.requests_period
    }

    pub fn requests_reset(&self) -> Option<f64> {
        self.requests_reset
    }

    /// Proactive delay that spreads the remaining quota evenly across the
    /// reset window: ceil(reset) / remaining. Returns None when either side
    /// is unknown or zero, in which case no pacing is applied.
    pub fn pacing_delay(&self) -> Option<Duration> {
        let reset = self.requests_reset?.ceil();
        let remaining = self.requests_remaining?;
        if reset == 0.0 || remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(reset / remaining as f64))
    }

    /// The server-advertised hard cooldown, if one has been seen.
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown.map(Duration::from_secs_f64)
    }

    /// Sleeps out the advertised cooldown after a quota rejection. Returns
    /// immediately if the server never advertised one.
    pub fn pause(&self) {
        match self.cooldown() {
            Some(duration) => {
                warn!(
                    "rate limit exceeded on {}, sleeping {:.1}s",
                    self.endpoint,
                    duration.as_secs_f64()
                );
                thread::sleep(duration);
            }
            None => debug!("rate limit exceeded on {} with no advertised cooldown", self.endpoint),
        }
    }
}

fn header_value<T: FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}
