//! Tool-call deduplication
//!
//! Mutating tool calls repeated with identical parameters inside a short
//! window are almost always the model stuttering, not intent. Idempotent
//! verbs are exempt: reading twice is harmless.

use std::time::{Duration, Instant};

/// Default dedup window
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5);

const IDEMPOTENT_PREFIXES: &[&str] = &["get", "list", "search", "fetch", "read"];

/// A recently executed tool call
#[derive(Debug, Clone)]
pub struct RecentCall {
    pub name: String,
    pub params: String,
    pub at: Instant,
}

/// Rolling record of recent calls for one agent run
#[derive(Debug, Default)]
pub struct RecentCalls {
    calls: Vec<RecentCall>,
}

impl RecentCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, params: &str) {
        self.record_at(name, params, Instant::now());
    }

    pub fn record_at(&mut self, name: &str, params: &str, at: Instant) {
        self.calls.push(RecentCall {
            name: name.to_string(),
            params: params.to_string(),
            at,
        });
        // keep the window tidy
        self.calls
            .retain(|c| at.duration_since(c.at) <= DEDUP_WINDOW);
    }

    pub fn calls(&self) -> &[RecentCall] {
        &self.calls
    }
}

fn verb_of(name: &str) -> &str {
    let lower_end = name
        .find(|c: char| c == '_' || c == '-')
        .unwrap_or(name.len());
    &name[..lower_end]
}

/// Should this call be suppressed as a duplicate?
pub fn should_deduplicate_tool_call(
    name: &str,
    params: &str,
    recent: &[RecentCall],
    window: Duration,
) -> bool {
    should_deduplicate_at(name, params, recent, window, Instant::now())
}

pub fn should_deduplicate_at(
    name: &str,
    params: &str,
    recent: &[RecentCall],
    window: Duration,
    now: Instant,
) -> bool {
    let verb = verb_of(name).to_lowercase();
    if IDEMPOTENT_PREFIXES.iter().any(|p| verb.starts_with(p)) {
        return false;
    }
    recent.iter().any(|c| {
        c.name == name && c.params == params && now.duration_since(c.at) <= window
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_verbs_never_dedup() {
        let now = Instant::now();
        let recent = vec![RecentCall {
            name: "search_tools".into(),
            params: "{\"q\":\"x\"}".into(),
            at: now,
        }];
        assert!(!should_deduplicate_at(
            "search_tools",
            "{\"q\":\"x\"}",
            &recent,
            DEDUP_WINDOW,
            now
        ));
    }

    #[test]
    fn mutating_exact_repeat_inside_window_dedups() {
        let now = Instant::now();
        let recent = vec![RecentCall {
            name: "send_email".into(),
            params: "{\"to\":\"a@b.c\"}".into(),
            at: now,
        }];
        assert!(should_deduplicate_at(
            "send_email",
            "{\"to\":\"a@b.c\"}",
            &recent,
            DEDUP_WINDOW,
            now + Duration::from_secs(2)
        ));
    }

    #[test]
    fn different_params_pass() {
        let now = Instant::now();
        let recent = vec![RecentCall {
            name: "send_email".into(),
            params: "{\"to\":\"a@b.c\"}".into(),
            at: now,
        }];
        assert!(!should_deduplicate_at(
            "send_email",
            "{\"to\":\"d@e.f\"}",
            &recent,
            DEDUP_WINDOW,
            now
        ));
    }

    #[test]
    fn window_expiry_allows_repeat() {
        let now = Instant::now();
        let recent = vec![RecentCall {
            name: "create_issue".into(),
            params: "{}".into(),
            at: now,
        }];
        assert!(!should_deduplicate_at(
            "create_issue",
            "{}",
            &recent,
            DEDUP_WINDOW,
            now + Duration::from_secs(6)
        ));
    }
}
