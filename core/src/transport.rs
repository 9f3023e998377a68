//! Chat transport seam
//!
//! The core never talks to Slack directly. Inbound events arrive as plain
//! records; outbound messages leave through the [`ChatTransport`] trait.
//! Event deduplication lives here because re-delivery is a transport
//! phenomenon: the same `timestamp_unique` within 30 seconds is a no-op.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Raw inbound chat event as handed over by the transport adapter
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub team_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub user_id: String,
    pub text: String,
    /// Transport-unique timestamp, the dedup key
    pub timestamp_unique: String,
}

/// Outbound chat message handed to the transport adapter
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub team_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub text: String,
    /// Structured UI blocks when rich rendering is warranted
    pub blocks: Option<serde_json::Value>,
    pub fallback_text: Option<String>,
}

impl OutboundMessage {
    pub fn text_reply(
        team_id: impl Into<String>,
        channel_id: impl Into<String>,
        thread_id: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            thread_id,
            text: text.into(),
            blocks: None,
            fallback_text: None,
        }
    }
}

/// Narrow outbound contract the orchestrator depends on
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post to a channel (optionally inside a thread)
    async fn post_message(&self, message: OutboundMessage) -> Result<()>;

    /// Direct-message a user in a workspace
    async fn post_direct(&self, team_id: &str, user_id: &str, text: &str) -> Result<()>;
}

/// Transport that swallows everything. Used for wiring and tests.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl ChatTransport for NullTransport {
    async fn post_message(&self, _message: OutboundMessage) -> Result<()> {
        Ok(())
    }

    async fn post_direct(&self, _team_id: &str, _user_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

const DEDUP_TTL: Duration = Duration::from_secs(30);

/// Sliding-window event dedup on `timestamp_unique`
#[derive(Debug, Default)]
pub struct EventDeduper {
    seen: Mutex<HashMap<String, Instant>>,
}

impl EventDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this key was already seen inside the TTL window.
    /// A fresh key is recorded and returns false.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.duration_since(*at) < DEDUP_TTL);
        if seen.contains_key(key) {
            return true;
        }
        seen.insert(key.to_string(), now);
        false
    }

    #[cfg(test)]
    fn is_duplicate_at(&self, key: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.duration_since(*at) < DEDUP_TTL);
        if seen.contains_key(key) {
            return true;
        }
        seen.insert(key.to_string(), now);
        false
    }
}
