//! In-memory sliding-window rate limiting
//!
//! Each limiter keeps, per client identifier, the timestamps (milliseconds
//! since the Unix epoch) of requests admitted within the trailing window.
//! State lives only in process memory and resets on restart; with several
//! server instances each one counts independently.
//!
//! Idle clients are swept lazily: at most once per cleanup interval, the
//! next `check` call drops every client with no timestamp left in the
//! window.

use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

/// Client identifier used when no address can be determined
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request was admitted (and recorded)
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Configured limit
    pub limit: u32,
    /// Window length in milliseconds
    pub window_ms: i64,
    /// Seconds until the oldest counted request leaves the window. Only set
    /// on rejection.
    pub retry_after_seconds: Option<u64>,
    /// Normalized client identifier the decision applies to
    pub client_id: String,
}

struct RateLimiterInner {
    entries: HashMap<String, VecDeque<i64>>,
    last_cleanup_ms: i64,
}

/// Sliding-window rate limiter shared across request handlers
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    cleanup_interval_ms: i64,
}

impl RateLimiter {
    /// Create a limiter that sweeps idle clients at most every `cleanup_interval_seconds`
    pub fn new(cleanup_interval_seconds: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                entries: HashMap::new(),
                last_cleanup_ms: now_ms(),
            })),
            cleanup_interval_ms: (cleanup_interval_seconds as i64).saturating_mul(1000),
        }
    }

    /// Check and record a request for `client_id` at the current time
    ///
    /// # Arguments
    ///
    /// * `client_id` - Normalized client identifier (see [`client_ip`])
    /// * `limit` - Maximum requests admitted within the window
    /// * `window_ms` - Window length in milliseconds
    ///
    /// # Returns
    ///
    /// Returns the decision. Rejected requests are not recorded.
    pub fn check(&self, client_id: &str, limit: u32, window_ms: i64) -> RateLimitDecision {
        self.check_at(client_id, limit, window_ms, now_ms())
    }

    /// Check and record with an explicit timestamp (milliseconds since epoch)
    pub fn check_at(
        &self,
        client_id: &str,
        limit: u32,
        window_ms: i64,
        now: i64,
    ) -> RateLimitDecision {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if now - inner.last_cleanup_ms >= self.cleanup_interval_ms {
            sweep(&mut inner.entries, now, window_ms);
            inner.last_cleanup_ms = now;
        }

        let timestamps = inner.entries.entry(client_id.to_string()).or_default();
        prune_window(timestamps, now, window_ms);

        if timestamps.len() >= limit as usize {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let wait_ms = (oldest + window_ms - now).max(0);
            let retry_after_seconds = ((wait_ms + 999) / 1000) as u64;

            tracing::debug!(
                client = client_id,
                limit,
                retry_after_seconds,
                "Rate limit exceeded"
            );

            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit,
                window_ms,
                retry_after_seconds: Some(retry_after_seconds),
                client_id: client_id.to_string(),
            };
        }

        timestamps.push_back(now);
        let remaining = limit.saturating_sub(timestamps.len() as u32);

        RateLimitDecision {
            allowed: true,
            remaining,
            limit,
            window_ms,
            retry_after_seconds: None,
            client_id: client_id.to_string(),
        }
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(300)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drop timestamps that are no longer strictly inside the window
fn prune_window(timestamps: &mut VecDeque<i64>, now: i64, window_ms: i64) {
    let cutoff = now - window_ms;
    while timestamps.front().is_some_and(|&ts| ts <= cutoff) {
        timestamps.pop_front();
    }
}

fn sweep(entries: &mut HashMap<String, VecDeque<i64>>, now: i64, window_ms: i64) {
    let before = entries.len();
    entries.retain(|_, timestamps| {
        prune_window(timestamps, now, window_ms);
        !timestamps.is_empty()
    });
    let removed = before - entries.len();
    if removed > 0 {
        tracing::debug!(removed, remaining = entries.len(), "Swept idle rate limit entries");
    }
}

/// Derive the rate limit identity of a request
///
/// Resolution order: first entry of `X-Forwarded-For`, then `X-Real-IP`,
/// then the socket peer address, then [`UNKNOWN_CLIENT`]. IPv6 addresses are
/// collapsed to their /64 prefix.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded.or(real_ip) {
        Some(ip) => normalize_ip(ip),
        None => match peer {
            Some(addr) => normalize_ip(&addr.to_string()),
            None => UNKNOWN_CLIENT.to_string(),
        },
    }
}

/// Normalize an address string for use as a rate limit key
///
/// IPv4-mapped IPv6 addresses become plain IPv4; other IPv6 addresses keep
/// only their first four groups followed by `::`.
pub fn normalize_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Ok(IpAddr::V6(v6)) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.to_string();
            }
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::", s[0], s[1], s[2], s[3])
        }
        Err(_) if ip.contains(':') => {
            let prefix: Vec<&str> = ip.split(':').take(4).collect();
            format!("{}::", prefix.join(":"))
        }
        Err(_) => ip.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn test_requests_within_limit_are_allowed() {
        let limiter = RateLimiter::default();
        let start = 1_700_000_000_000;
        for i in 0..5 {
            let decision = limiter.check_at("1.2.3.4", 5, HOUR_MS, start + i);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 4 - i as u32);
            assert!(decision.retry_after_seconds.is_none());
        }
    }

    #[test]
    fn test_request_over_limit_is_rejected_with_retry_hint() {
        let limiter = RateLimiter::default();
        let start = 1_700_000_000_000;
        for i in 0..3 {
            assert!(limiter.check_at("1.2.3.4", 3, HOUR_MS, start + i).allowed);
        }
        let decision = limiter.check_at("1.2.3.4", 3, HOUR_MS, start + 10_000);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.limit, 3);
        // oldest at `start`, window ends at start + 3600s, now is start + 10s
        assert_eq!(decision.retry_after_seconds, Some(3590));
    }

    #[test]
    fn test_rejected_requests_are_not_recorded() {
        let limiter = RateLimiter::default();
        let start = 1_700_000_000_000;
        assert!(limiter.check_at("c", 1, 1000, start).allowed);
        assert!(!limiter.check_at("c", 1, 1000, start + 500).allowed);
        // only the first request counts, so the window reopens at start + 1000
        assert!(limiter.check_at("c", 1, 1000, start + 1000).allowed);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::default();
        let start = 1_700_000_000_000;
        assert!(limiter.check_at("c", 2, 1000, start).allowed);
        assert!(limiter.check_at("c", 2, 1000, start + 600).allowed);
        assert!(!limiter.check_at("c", 2, 1000, start + 900).allowed);
        let decision = limiter.check_at("c", 2, 1000, start + 1001);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let limiter = RateLimiter::default();
        let now = 1_700_000_000_000;
        assert!(limiter.check_at("10.0.0.1", 1, HOUR_MS, now).allowed);
        assert!(!limiter.check_at("10.0.0.1", 1, HOUR_MS, now + 1).allowed);
        assert!(limiter.check_at("10.0.0.2", 1, HOUR_MS, now + 2).allowed);
    }

    #[test]
    fn test_clones_share_state() {
        let limiter = RateLimiter::default();
        let clone = limiter.clone();
        let now = 1_700_000_000_000;
        assert!(limiter.check_at("c", 1, HOUR_MS, now).allowed);
        assert!(!clone.check_at("c", 1, HOUR_MS, now + 1).allowed);
    }

    #[test]
    fn test_sweep_removes_idle_clients() {
        let limiter = RateLimiter::new(60);
        let start = limiter
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_cleanup_ms;
        limiter.check_at("idle", 5, 1000, start + 1);
        assert_eq!(limiter.tracked_clients(), 1);
        limiter.check_at("active", 5, 1000, start + 61_000);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_ip(&headers, None), "198.51.100.1");

        let empty = HeaderMap::new();
        let peer: IpAddr = "192.0.2.9".parse().unwrap();
        assert_eq!(client_ip(&empty, Some(peer)), "192.0.2.9");
        assert_eq!(client_ip(&empty, None), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_ipv6_is_truncated_to_prefix() {
        assert_eq!(
            normalize_ip("2001:db8:85a3:1234:5678:8a2e:370:7334"),
            "2001:db8:85a3:1234::"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("2001:db8:85a3:1234:aaaa:bbbb:cccc:dddd"),
        );
        assert_eq!(client_ip(&headers, None), "2001:db8:85a3:1234::");
    }

    #[test]
    fn test_ipv6_devices_in_same_prefix_share_bucket() {
        let limiter = RateLimiter::default();
        let now = 1_700_000_000_000;
        let a = normalize_ip("2001:db8:1:2:aaaa::1");
        let b = normalize_ip("2001:db8:1:2:bbbb::2");
        assert!(limiter.check_at(&a, 1, HOUR_MS, now).allowed);
        assert!(!limiter.check_at(&b, 1, HOUR_MS, now + 1).allowed);
    }

    #[test]
    fn test_ipv4_mapped_address_is_unwrapped() {
        assert_eq!(normalize_ip("::ffff:192.0.2.1"), "192.0.2.1");
    }

    #[test]
    fn test_unparseable_address_with_colons_is_truncated() {
        assert_eq!(normalize_ip("a:b:c:d:e:f:g"), "a:b:c:d::");
        assert_eq!(normalize_ip("proxy-host"), "proxy-host");
    }
}
