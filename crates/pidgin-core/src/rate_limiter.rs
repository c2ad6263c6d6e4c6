//! Per-provider sliding-window admission control (§4.2).
//!
//! `rate_limiter.py` was filtered out of the kept original source (see
//! DESIGN.md), so this is an original implementation honoring the spec's
//! contract rather than a port: two independent sliding windows per
//! provider (request-rate, token-rate), generous defaults for
//! unconfigured providers, admission blocks the caller until both windows
//! have room.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pidgin_types::config::ProviderRateLimit;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct ProviderWindow {
    /// Start times of admitted requests still inside the window.
    requests: Vec<Instant>,
    /// (completion time, tokens) pairs still inside the window.
    tokens: Vec<(Instant, u64)>,
}

impl ProviderWindow {
    fn prune(&mut self, now: Instant) {
        self.requests.retain(|t| now.duration_since(*t) < WINDOW);
        self.tokens.retain(|(t, _)| now.duration_since(*t) < WINDOW);
    }

    fn token_sum(&self) -> u64 {
        self.tokens.iter().map(|(_, n)| n).sum()
    }
}

/// Why (if at all) the rate limiter made a caller wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceReason {
    None,
    RequestRate,
    TokenRate,
    Mixed,
}

/// Outcome of an `acquire` call: how long the caller was made to wait and
/// why, for `RateLimitPace` emission.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub wait: Duration,
    pub reason: PaceReason,
}

/// Sliding-window request-rate and token-rate admission control, one pair
/// of windows per provider.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, ProviderWindow>>,
    limits: HashMap<String, ProviderRateLimit>,
    default_limit: ProviderRateLimit,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, ProviderRateLimit>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limits,
            default_limit: ProviderRateLimit::default(),
        }
    }

    fn limit_for(&self, provider: &str) -> ProviderRateLimit {
        self.limits.get(provider).copied().unwrap_or(self.default_limit)
    }

    /// How long admitting one more request of `estimated_tokens` would
    /// require the caller to wait, without mutating any state. Exposed so
    /// callers can decide whether to emit `RateLimitPace` before actually
    /// sleeping.
    fn required_wait(&self, provider: &str, estimated_tokens: u64, now: Instant) -> Admission {
        let limit = self.limit_for(provider);
        let mut windows = self.windows.lock();
        let window = windows.entry(provider.to_string()).or_default();
        window.prune(now);

        let mut request_wait = Duration::ZERO;
        if window.requests.len() as u32 >= limit.requests_per_minute {
            let oldest = window.requests[0];
            request_wait = WINDOW.saturating_sub(now.duration_since(oldest));
        }

        let mut token_wait = Duration::ZERO;
        if window.token_sum() + estimated_tokens > limit.tokens_per_minute as u64 {
            let mut acc = window.token_sum() + estimated_tokens;
            for (t, n) in &window.tokens {
                if acc <= limit.tokens_per_minute as u64 {
                    break;
                }
                acc -= n;
                token_wait = token_wait.max(WINDOW.saturating_sub(now.duration_since(*t)));
            }
        }

        let reason = match (request_wait.is_zero(), token_wait.is_zero()) {
            (true, true) => PaceReason::None,
            (false, true) => PaceReason::RequestRate,
            (true, false) => PaceReason::TokenRate,
            (false, false) => PaceReason::Mixed,
        };

        Admission {
            wait: request_wait.max(token_wait),
            reason,
        }
    }

    /// Admit a request of `estimated_tokens`, sleeping as long as
    /// necessary for both windows to have room, then record the request's
    /// start time. Returns the wait actually incurred so the caller can
    /// decide whether to emit `RateLimitPace`.
    pub async fn acquire(&self, provider: &str, estimated_tokens: u64) -> Admission {
        let admission = self.required_wait(provider, estimated_tokens, Instant::now());
        if !admission.wait.is_zero() {
            tokio::time::sleep(admission.wait).await;
        }
        self.windows
            .lock()
            .entry(provider.to_string())
            .or_default()
            .requests
            .push(Instant::now());
        admission
    }

    /// Record that a request completed, crediting its actual token usage
    /// to the token window.
    pub fn record_request_complete(&self, provider: &str, actual_tokens: u64) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(provider.to_string()).or_default();
        window.prune(now);
        window.tokens.push((now, actual_tokens));
    }

    /// Current token-window usage and the provider's configured limit, for
    /// `TokenUsage` telemetry (§3's "rate-limit stats" field).
    pub fn usage_snapshot(&self, provider: &str) -> (u64, u64) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(provider.to_string()).or_default();
        window.prune(now);
        (window.token_sum(), self.limit_for(provider).tokens_per_minute as u64)
    }
}

/// Estimate tokens in a message history the way the rate limiter sizes an
/// admission request: `chars / 3.5` plus a provider-specific overhead.
/// Distinct from the message handler's own payload estimate (§4.2's note
/// on the two estimators diverging) — this one exists purely to size
/// `acquire` calls.
pub fn estimate_tokens(total_chars: usize, provider: &str) -> u64 {
    let base = (total_chars as f64 / 3.5).ceil() as u64;
    let overhead = match provider {
        "anthropic" | "openai" | "google" => 200,
        _ => 100,
    };
    base + overhead
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rpm: u32, tpm: u32) -> HashMap<String, ProviderRateLimit> {
        let mut m = HashMap::new();
        m.insert(
            "test".to_string(),
            ProviderRateLimit {
                requests_per_minute: rpm,
                tokens_per_minute: tpm,
            },
        );
        m
    }

    #[tokio::test]
    async fn first_request_is_admitted_without_waiting() {
        let limiter = RateLimiter::new(limits(50, 100_000));
        let admission = limiter.acquire("test", 100).await;
        assert_eq!(admission.wait, Duration::ZERO);
        assert_eq!(admission.reason, PaceReason::None);
    }

    #[tokio::test]
    async fn unconfigured_provider_uses_generous_default() {
        let limiter = RateLimiter::new(HashMap::new());
        let admission = limiter.acquire("unknown-provider", 100).await;
        assert_eq!(admission.wait, Duration::ZERO);
    }

    #[tokio::test]
    async fn request_rate_exceeded_reports_request_rate_reason() {
        let limiter = RateLimiter::new(limits(1, 1_000_000));
        limiter.acquire("test", 10).await;
        let admission = limiter.required_wait("test", 10, Instant::now());
        assert_eq!(admission.reason, PaceReason::RequestRate);
        assert!(admission.wait > Duration::ZERO);
    }

    #[tokio::test]
    async fn token_rate_exceeded_reports_token_rate_reason() {
        let limiter = RateLimiter::new(limits(1000, 100));
        limiter.record_request_complete("test", 90);
        let admission = limiter.required_wait("test", 50, Instant::now());
        assert_eq!(admission.reason, PaceReason::TokenRate);
    }

    #[tokio::test]
    async fn record_request_complete_counts_toward_token_window() {
        let limiter = RateLimiter::new(limits(1000, 100));
        limiter.record_request_complete("test", 90);
        let admission = limiter.required_wait("test", 50, Instant::now());
        assert_eq!(admission.reason, PaceReason::TokenRate);
    }

    #[test]
    fn estimate_tokens_applies_provider_overhead() {
        assert_eq!(estimate_tokens(350, "anthropic"), 300);
        assert_eq!(estimate_tokens(350, "local"), 200);
    }
}
