//! Rate-limit header parsing.
//!
//! When a safe call is rate limited the server usually says how long to back off. These
//! hints stretch the next backoff delay; they never shorten it.

use http::HeaderMap;
use std::time::{Duration, SystemTime};

const GENERIC_WARNING: &str = "rate limit exceeded";

/// Information extracted from rate-limit response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// How long to wait before retrying (`Retry-After`, seconds or HTTP date).
    pub retry_after: Option<Duration>,

    /// Time until the current window resets (`RateLimit-Reset`, in seconds).
    pub reset_in: Option<Duration>,

    /// Requests left in the current window (`RateLimit-Remaining`).
    pub remaining: Option<u64>,

    /// Human-readable explanation sent by the server (`RateLimit-Warning`).
    pub warning: Option<String>,
}

impl RateLimitInfo {
    /// Extracts rate-limit information from response headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoist::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("ratelimit-reset", "12".parse().unwrap());
    /// headers.insert("ratelimit-remaining", "0".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert_eq!(info.reset_in, Some(Duration::from_secs(12)));
    /// assert_eq!(info.message(), "rate limit exceeded");
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: parse_retry_after(headers),
            reset_in: header_u64(headers, "ratelimit-reset").map(Duration::from_secs),
            remaining: header_u64(headers, "ratelimit-remaining"),
            warning: headers
                .get("ratelimit-warning")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToOwned::to_owned),
        }
    }

    /// Returns the server-suggested wait, capped at `max_wait`.
    ///
    /// `Retry-After` wins over `RateLimit-Reset` when both are present.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        self.retry_after
            .or(self.reset_in)
            .map(|delay| delay.min(max_wait))
    }

    /// The server's warning, or a generic message when none was sent.
    pub fn message(&self) -> &str {
        self.warning.as_deref().unwrap_or(GENERIC_WARNING)
    }
}

/// Configuration for honoring rate-limit hints.
///
/// # Examples
///
/// ```
/// use hoist::rate_limit::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::builder()
///     .max_wait(Duration::from_secs(30))
///     .build();
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether server hints may stretch the backoff delay.
    pub enabled: bool,

    /// Upper bound on any single hinted wait. Defaults to 60 seconds.
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Creates a new builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// A configuration that ignores server hints and relies on the backoff alone.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Default)]
pub struct RateLimitConfigBuilder {
    enabled: Option<bool>,
    max_wait: Option<Duration>,
}

impl RateLimitConfigBuilder {
    /// Sets whether server hints are honored.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the cap on a single hinted wait.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> RateLimitConfig {
        let default = RateLimitConfig::default();
        RateLimitConfig {
            enabled: self.enabled.unwrap_or(default.enabled),
            max_wait: self.max_wait.unwrap_or(default.max_wait),
        }
    }
}

/// Parses `Retry-After` as delay-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get("retry-after")?.to_str().ok()?.trim();

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(header).ok()?;
    // A date in the past means "retry now".
    Some(date.duration_since(SystemTime::now()).unwrap_or_default())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
