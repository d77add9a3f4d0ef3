use crate::{Error, ErrorContext, Result};
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Observable limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    /// Requests granted within the current rolling window.
    pub current_requests: usize,
    /// Whether a request would be granted right now without waiting.
    pub allowed: bool,
    /// Last limit reported by the relay, if any.
    pub limit: Option<u64>,
    /// Last remaining budget reported by the relay (decremented locally).
    pub remaining: Option<u64>,
    /// Estimated wait time until a slot is available (ms), if currently blocked.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Sustained ceiling: requests per rolling window.
    pub requests_per_second: f64,
    /// Maximum number of requests that may be granted back-to-back.
    pub burst_size: u32,
    /// When disabled every request is granted immediately.
    pub enabled: bool,
    /// Length of the rolling window the ceiling applies to.
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            requests_per_second: rps,
            burst_size: rps.max(1.0) as u32, // default burst: 1 second worth, at least 1
            enabled: true,
            window: Duration::from_secs(1),
        })
    }

    pub fn new() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 5,
            enabled: true,
            window: Duration::from_secs(1),
        }
    }

    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_burst_size(mut self, burst: u32) -> Self {
        self.burst_size = burst;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A zero, negative or non-finite rate can never be honored.
    pub fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(Error::configuration_with_context(
                format!(
                    "requests_per_second must be a positive number, got {}",
                    self.requests_per_second
                ),
                ErrorContext::new()
                    .with_field_path("rate_limit.requests_per_second")
                    .with_source("rate_limiter"),
            ));
        }
        if self.burst_size == 0 {
            return Err(Error::configuration_with_context(
                "burst_size must be at least 1",
                ErrorContext::new()
                    .with_field_path("rate_limit.burst_size")
                    .with_source("rate_limiter"),
            ));
        }
        if self.window.is_zero() {
            return Err(Error::configuration_with_context(
                "window must be non-zero",
                ErrorContext::new()
                    .with_field_path("rate_limit.window")
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }

    fn max_per_window(&self) -> usize {
        ((self.requests_per_second * self.window.as_secs_f64()).floor() as usize).max(1)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
    /// Grant times inside the rolling window.
    recent: VecDeque<Instant>,
    /// Absolute time when the budget is expected to reset (if blocked by the relay)
    blocked_until: Option<Instant>,
    /// Reset instant reported alongside the last remaining budget.
    reset_at: Option<Instant>,
    /// Last reported remaining budget from the relay
    remaining: Option<u64>,
    limit: Option<u64>,
}

impl State {
    fn fresh(burst: u32) -> Self {
        Self {
            tokens: burst as f64,
            last: Instant::now(),
            recent: VecDeque::new(),
            blocked_until: None,
            reset_at: None,
            remaining: None,
            limit: None,
        }
    }
}

/// Token bucket combined with a rolling-window ceiling.
///
/// - the bucket bounds back-to-back bursts to `burst_size`
/// - the window guarantees no more than `requests_per_second` grants in any
///   rolling window, for every observer
/// - relay headers can block the limiter until a reported reset
pub struct RateLimiter {
    cfg: std::sync::RwLock<RateLimiterConfig>,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Result<Self> {
        cfg.validate()?;
        let state = Mutex::new(State::fresh(cfg.burst_size));
        Ok(Self {
            cfg: std::sync::RwLock::new(cfg),
            state,
        })
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.cfg
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the policy; counters are kept, tokens are clamped to the new burst.
    pub async fn reconfigure(&self, cfg: RateLimiterConfig) -> Result<()> {
        cfg.validate()?;
        let mut st = self.state.lock().await;
        st.tokens = st.tokens.min(cfg.burst_size as f64);
        *self
            .cfg
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = cfg;
        Ok(())
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) {
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.requests_per_second).min(cfg.burst_size as f64);
            st.last = now;
        }
    }

    fn prune_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) {
        while let Some(front) = st.recent.front() {
            if now.duration_since(*front) >= cfg.window {
                st.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until a grant is possible, or `None` if one is possible now.
    fn wait_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) -> Option<Duration> {
        if let Some(until) = st.blocked_until {
            if until > now {
                return Some(until.duration_since(now));
            }
            st.blocked_until = None;
            st.remaining = None;
            st.reset_at = None;
        }

        Self::refill_locked(cfg, st, now);
        Self::prune_locked(cfg, st, now);

        let token_wait = if st.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - st.tokens) / cfg.requests_per_second)
        };
        let window_wait = if st.recent.len() >= cfg.max_per_window() {
            st.recent
                .front()
                .map(|oldest| (*oldest + cfg.window).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let wait = token_wait.max(window_wait);
        if wait.is_zero() {
            None
        } else {
            Some(wait)
        }
    }

    fn grant_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) {
        st.tokens -= 1.0;
        st.recent.push_back(now);
        if let Some(rem) = st.remaining.as_mut() {
            *rem = rem.saturating_sub(1);
            if *rem == 0 {
                // Budget spent locally: hold further grants until the reported reset.
                st.blocked_until = Some(st.reset_at.unwrap_or(now + cfg.window));
            }
        }
    }

    /// Suspend until a send slot is available. Never fails.
    pub async fn wait_for_request(&self) {
        loop {
            let wait = {
                let cfg = self.config();
                if !cfg.enabled {
                    return;
                }
                let mut st = self.state.lock().await;
                let now = Instant::now();
                match Self::wait_locked(&cfg, &mut st, now) {
                    None => {
                        Self::grant_locked(&cfg, &mut st, now);
                        return;
                    }
                    Some(w) => w,
                }
            };

            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Try to take a slot without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let cfg = self.config();
        if !cfg.enabled {
            return true;
        }
        let mut st = self.state.lock().await;
        let now = Instant::now();
        if Self::wait_locked(&cfg, &mut st, now).is_none() {
            Self::grant_locked(&cfg, &mut st, now);
            true
        } else {
            false
        }
    }

    /// Update limiter state from external signals.
    pub async fn update_budget(
        &self,
        limit: Option<u64>,
        remaining: Option<u64>,
        reset_after: Option<Duration>,
    ) {
        let mut st = self.state.lock().await;
        let now = Instant::now();
        if limit.is_some() {
            st.limit = limit;
        }
        if let Some(rem) = remaining {
            st.remaining = Some(rem);
            st.reset_at = reset_after.map(|d| now + d);
            if rem == 0 {
                // If 0 remaining, we must wait until reset or a default backoff
                let after = reset_after.unwrap_or(Duration::from_secs(1));
                st.blocked_until = Some(now + after);
            } else {
                st.blocked_until = None;
            }
        }
    }

    /// Adjust state from the relay's rate-limit response headers.
    ///
    /// Understands `Retry-After` (seconds) and the `X-RateLimit-*` /
    /// `RateLimit-*` families for limit, remaining and reset.
    pub async fn update_from_headers(&self, headers: &HeaderMap) {
        // 1. Retry-After wins (429/overload)
        if let Some(secs) = header_first(headers, &["retry-after"]).and_then(|v| v.parse::<u64>().ok()) {
            self.update_budget(None, Some(0), Some(Duration::from_secs(secs)))
                .await;
            return;
        }

        let limit = header_first(headers, &["x-ratelimit-limit", "ratelimit-limit"])
            .and_then(|s| s.parse::<u64>().ok());
        let remaining = header_first(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])
            .and_then(|s| s.parse::<u64>().ok());
        let reset_after = header_first(headers, &["x-ratelimit-reset", "ratelimit-reset"])
            .and_then(|s| parse_reset(&s));

        if limit.is_none() && remaining.is_none() {
            return;
        }
        self.update_budget(limit, remaining, reset_after).await;
    }

    pub async fn status(&self) -> RateLimitStatus {
        let cfg = self.config();
        let mut st = self.state.lock().await;
        let now = Instant::now();
        let wait = if cfg.enabled {
            Self::wait_locked(&cfg, &mut st, now)
        } else {
            None
        };
        Self::prune_locked(&cfg, &mut st, now);
        RateLimitStatus {
            current_requests: st.recent.len(),
            allowed: wait.is_none(),
            limit: st.limit,
            remaining: st.remaining,
            estimated_wait_ms: wait.map(|w| w.as_millis() as u64),
        }
    }

    /// Clear all counters and relay-supplied state.
    pub async fn reset(&self) {
        let burst = self.config().burst_size;
        *self.state.lock().await = State::fresh(burst);
    }
}

/// Extract the first matching non-empty header value from a list of header names.
pub(crate) fn header_first(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(v) = headers.get(*name) {
            if let Ok(s) = v.to_str() {
                let s = s.trim();
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

/// Reset values come as delta seconds, epoch seconds or epoch milliseconds.
fn parse_reset(raw: &str) -> Option<Duration> {
    let val = raw.parse::<u64>().ok()?;
    if val > 1_000_000_000_000 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_millis() as u64;
        Some(Duration::from_millis(val.saturating_sub(now)))
    } else if val > 1_000_000_000 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        Some(Duration::from_secs(val.saturating_sub(now)))
    } else {
        Some(Duration::from_secs(val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_rate_limiter_config_from_rps() {
        let config = RateLimiterConfig::from_rps(10.0).unwrap();
        assert_eq!(config.requests_per_second, 10.0);
        assert_eq!(config.burst_size, 10);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_invalid() {
        assert!(RateLimiterConfig::from_rps(0.0).is_none());
        assert!(RateLimiterConfig::from_rps(-1.0).is_none());
        assert!(RateLimiterConfig::from_rps(f64::NAN).is_none());
        assert!(RateLimiterConfig::from_rps(f64::INFINITY).is_none());
    }

    #[test]
    fn test_zero_rate_is_configuration_error() {
        let cfg = RateLimiterConfig::new().with_requests_per_second(0.0);
        assert!(matches!(
            RateLimiter::new(cfg),
            Err(Error::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_burst_then_block() {
        let config = RateLimiterConfig::new()
            .with_burst_size(3)
            .with_requests_per_second(1.0);
        let limiter = RateLimiter::new(config).unwrap();

        assert!(limiter.try_acquire().await);
        // Window ceiling of 1/s holds even though the bucket has tokens.
        assert!(!limiter.try_acquire().await);

        let status = limiter.status().await;
        assert_eq!(status.current_requests, 1);
        assert!(!status.allowed);
        assert!(status.estimated_wait_ms.is_some());
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let config = RateLimiterConfig::new()
            .with_requests_per_second(1.0)
            .with_burst_size(1)
            .with_enabled(false);
        let limiter = RateLimiter::new(config).unwrap();
        for _ in 0..10 {
            assert!(limiter.try_acquire().await);
        }
    }

    #[tokio::test]
    async fn test_ceiling_holds_in_tight_loop() {
        let config = RateLimiterConfig::new()
            .with_requests_per_second(10.0)
            .with_burst_size(10);
        let limiter = RateLimiter::new(config).unwrap();

        let mut grants = Vec::new();
        for _ in 0..15 {
            limiter.wait_for_request().await;
            grants.push(Instant::now());
        }

        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .filter(|t| t.duration_since(*start) < Duration::from_millis(990))
                .count();
            assert!(in_window <= 10, "{} grants inside one window", in_window);
        }
    }

    #[tokio::test]
    async fn test_update_budget_blocks_until_reset() {
        let limiter = RateLimiter::new(RateLimiterConfig::from_rps(10.0).unwrap()).unwrap();

        limiter
            .update_budget(Some(100), Some(0), Some(Duration::from_millis(50)))
            .await;
        assert!(!limiter.try_acquire().await);
        assert_eq!(limiter.status().await.limit, Some(100));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_headers_retry_after() {
        let limiter = RateLimiter::new(RateLimiterConfig::from_rps(10.0).unwrap()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        limiter.update_from_headers(&headers).await;

        let status = limiter.status().await;
        assert!(!status.allowed);
        assert!(status.estimated_wait_ms.unwrap() > 1000);
    }

    #[tokio::test]
    async fn test_headers_remaining_budget_is_consumed() {
        let limiter = RateLimiter::new(RateLimiterConfig::from_rps(100.0).unwrap()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("60"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("30"));
        limiter.update_from_headers(&headers).await;

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        // Relay budget exhausted: held until the reported reset.
        assert!(!limiter.try_acquire().await);
        let status = limiter.status().await;
        assert_eq!(status.limit, Some(60));
        assert_eq!(status.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_requests_per_second(1.0)
                .with_burst_size(1),
        )
        .unwrap();
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        limiter.reset().await;
        let status = limiter.status().await;
        assert_eq!(status.current_requests, 0);
        assert!(status.allowed);
        assert!(limiter.try_acquire().await);
    }

    #[test]
    fn test_parse_reset_forms() {
        assert_eq!(parse_reset("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_reset("abc"), None);
        let past_epoch = parse_reset("1000000001").unwrap();
        assert_eq!(past_epoch, Duration::ZERO);
    }
}
