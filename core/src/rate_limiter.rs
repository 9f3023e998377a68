//! Rate Limiter Module
//!
//! Token buckets enforcing per-model-family and per-API request ceilings.
//! Acquisition is cooperative: a caller that finds the bucket empty sleeps
//! in small increments until tokens refill or its timeout lapses. Callers
//! acquire the API bucket before the model bucket so an API-blocked call
//! never burns model budget.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

/// Sleep granularity while waiting on an empty bucket
const WAIT_INCREMENT: Duration = Duration::from_millis(25);

/// Default model-family limits: (prefix, tokens per second, burst capacity)
const MODEL_LIMITS: &[(&str, f64, f64)] = &[
    ("gemini", 5.0, 15.0),
    ("google", 5.0, 15.0),
    ("claude", 2.0, 8.0),
    ("anthropic", 2.0, 8.0),
    ("gpt", 3.0, 10.0),
    ("openai", 3.0, 10.0),
    ("minimax", 3.0, 10.0),
];

/// Fallback for unknown model families
const MODEL_DEFAULT: (f64, f64) = (2.0, 8.0);

/// Default API limits: (api key, requests per second, burst capacity)
const API_LIMITS: &[(&str, f64, f64)] = &[
    ("google-calendar", 2.0, 5.0),
    ("google-sheets", 2.0, 5.0),
    ("google-drive", 2.0, 5.0),
    ("gmail", 2.0, 5.0),
    ("github", 5.0, 15.0),
    ("linear", 3.0, 10.0),
    ("slack", 3.0, 10.0),
];

/// Static tool-name prefix to API bucket classification
const TOOL_API_PREFIXES: &[(&str, &str)] = &[
    ("googlecalendar", "google-calendar"),
    ("google_calendar", "google-calendar"),
    ("googlesheets", "google-sheets"),
    ("google_sheets", "google-sheets"),
    ("googledrive", "google-drive"),
    ("google_drive", "google-drive"),
    ("gmail", "gmail"),
    ("github", "github"),
    ("linear", "linear"),
    ("slack", "slack"),
];

/// Classic token bucket: refill by elapsed time, clamp at capacity
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    rate: f64,
}

impl TokenBucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            capacity,
            rate,
        }
    }

    fn refill_at(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume_at(&mut self, tokens: f64, now: Instant) -> bool {
        self.refill_at(now);
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Time until `tokens` will be available, assuming no other consumer
    fn wait_for(&self, tokens: f64) -> Duration {
        if self.tokens >= tokens {
            return Duration::ZERO;
        }
        if self.rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((tokens - self.tokens) / self.rate)
    }
}

/// Process-wide registry of model and API buckets
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the bucket key for a model id by family prefix
    pub fn model_key(model: &str) -> String {
        let lower = model.to_lowercase();
        for (prefix, _, _) in MODEL_LIMITS {
            if lower.starts_with(prefix) {
                return format!("model:{}", prefix);
            }
        }
        "model:default".to_string()
    }

    /// Classify a tool name to its API bucket key, if it has one
    pub fn api_key_for_tool(tool: &str) -> Option<String> {
        let lower = tool.to_lowercase();
        TOOL_API_PREFIXES
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
            .map(|(_, api)| format!("api:{}", api))
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                let (rate, capacity) = limits_for(key);
                Arc::new(Mutex::new(TokenBucket::new(rate, capacity)))
            })
            .clone()
    }

    /// Acquire `tokens` from the bucket behind `key`, waiting up to
    /// `timeout`. Returns false when the deadline passes first.
    pub async fn acquire(&self, key: &str, tokens: f64, timeout: Duration) -> bool {
        let bucket = self.bucket(key);
        let deadline = Instant::now() + timeout;
        loop {
            let wait = {
                let mut b = bucket.lock();
                let now = Instant::now();
                if b.try_consume_at(tokens, now) {
                    return true;
                }
                b.wait_for(tokens)
            };
            let now = Instant::now();
            if now >= deadline {
                debug!(key, "rate limit acquire timed out");
                return false;
            }
            let remaining = deadline - now;
            sleep(wait.min(WAIT_INCREMENT).min(remaining)).await;
        }
    }

    /// Convenience: acquire one request's worth for a model id
    pub async fn acquire_model(&self, model: &str, timeout: Duration) -> bool {
        self.acquire(&Self::model_key(model), 1.0, timeout).await
    }

    /// Convenience: acquire the API bucket for a tool name. Tools with no
    /// API classification are admitted immediately.
    pub async fn acquire_api(&self, tool: &str, timeout: Duration) -> bool {
        match Self::api_key_for_tool(tool) {
            Some(key) => self.acquire(&key, 1.0, timeout).await,
            None => true,
        }
    }
}

fn limits_for(key: &str) -> (f64, f64) {
    if let Some(family) = key.strip_prefix("model:") {
        for (prefix, rate, capacity) in MODEL_LIMITS {
            if family == *prefix {
                return (*rate, *capacity);
            }
        }
        return MODEL_DEFAULT;
    }
    if let Some(api) = key.strip_prefix("api:") {
        for (name, rate, capacity) in API_LIMITS {
            if api == *name {
                return (*rate, *capacity);
            }
        }
    }
    MODEL_DEFAULT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_refills_with_elapsed_time() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 8.0);
        // drain the burst
        for _ in 0..8 {
            assert!(bucket.try_consume_at(1.0, t0));
        }
        assert!(!bucket.try_consume_at(1.0, t0));
        // two seconds refill four tokens at 2/s
        let t1 = t0 + Duration::from_secs(2);
        assert!(bucket.try_consume_at(4.0, t1));
        assert!(!bucket.try_consume_at(1.0, t1));
    }

    #[test]
    fn refill_clamps_at_capacity() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(5.0, 15.0);
        bucket.refill_at(t0 + Duration::from_secs(3600));
        assert!(bucket.tokens <= 15.0);
    }

    #[test]
    fn model_key_prefix_match() {
        assert_eq!(RateLimiter::model_key("gemini-2.5-flash"), "model:gemini");
        assert_eq!(RateLimiter::model_key("claude-opus-4-5"), "model:claude");
        assert_eq!(RateLimiter::model_key("gpt-5-mini"), "model:gpt");
        assert_eq!(RateLimiter::model_key("mystery-model"), "model:default");
    }

    #[test]
    fn tool_api_classification() {
        assert_eq!(
            RateLimiter::api_key_for_tool("GMAIL_SEND_EMAIL").as_deref(),
            Some("api:gmail")
        );
        assert_eq!(
            RateLimiter::api_key_for_tool("GITHUB_CREATE_ISSUE").as_deref(),
            Some("api:github")
        );
        assert_eq!(RateLimiter::api_key_for_tool("lucy_read_skill"), None);
    }

    #[tokio::test]
    async fn acquire_within_burst_is_immediate() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        assert!(
            limiter
                .acquire_model("gpt-5-mini", Duration::from_secs(1))
                .await
        );
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn acquire_times_out_when_bucket_is_dry() {
        let limiter = RateLimiter::new();
        // burst for gpt family is 10; drain it
        for _ in 0..10 {
            assert!(
                limiter
                    .acquire_model("gpt-5-mini", Duration::from_millis(10))
                    .await
            );
        }
        // now the bucket refills at 3/s; a 20 ms timeout cannot cover it
        assert!(
            !limiter
                .acquire_model("gpt-5-mini", Duration::from_millis(20))
                .await
        );
    }

    #[tokio::test]
    async fn unclassified_tool_skips_api_bucket() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.acquire_api("lucy_log", Duration::ZERO).await);
        }
    }
}
