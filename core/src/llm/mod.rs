//! LLM gateway interface
//!
//! Chat types, the capability-tier ladder, and an OpenAI-compatible HTTP
//! client. The agent loop consumes the narrow [`ChatModel`] trait so tests
//! can substitute a scripted fake.

pub mod chat;
pub mod client;

pub use chat::{
    ChatMessage, ChatRequest, ChatResponse, MessageRole, ToolCall, ToolFunction, ToolSpec,
};
pub use client::HttpLlmClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ordered model capability tiers. Escalation only ever moves up the
/// ladder; once raised, the tier is sticky for the rest of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Default,
    Code,
    Document,
    Research,
    Frontier,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Default => "default",
            ModelTier::Code => "code",
            ModelTier::Document => "document",
            ModelTier::Research => "research",
            ModelTier::Frontier => "frontier",
        }
    }

    /// Position on the escalation ladder. Code and document answer at the
    /// same altitude; both escalate into research.
    pub fn rank(&self) -> u8 {
        match self {
            ModelTier::Fast => 0,
            ModelTier::Default => 1,
            ModelTier::Code | ModelTier::Document => 2,
            ModelTier::Research => 3,
            ModelTier::Frontier => 4,
        }
    }

    /// The next tier up. Frontier is terminal.
    pub fn escalate(&self) -> ModelTier {
        match self {
            ModelTier::Fast => ModelTier::Default,
            ModelTier::Default => ModelTier::Code,
            ModelTier::Code => ModelTier::Research,
            ModelTier::Document => ModelTier::Research,
            ModelTier::Research => ModelTier::Frontier,
            ModelTier::Frontier => ModelTier::Frontier,
        }
    }

    /// Keep the higher of two tiers; escalation never downgrades.
    pub fn max(self, other: ModelTier) -> ModelTier {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(ModelTier::Fast),
            "default" => Ok(ModelTier::Default),
            "code" => Ok(ModelTier::Code),
            "document" => Ok(ModelTier::Document),
            "research" => Ok(ModelTier::Research),
            "frontier" => Ok(ModelTier::Frontier),
            _ => Err(format!("unknown model tier: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token usage accumulated across a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One model turn as the agent loop sees it
#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl LlmReply {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Narrow seam between the orchestrator and whatever serves completions
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<LlmReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_is_monotonic() {
        let mut tier = ModelTier::Fast;
        let mut prev_rank = tier.rank();
        for _ in 0..6 {
            tier = tier.escalate();
            assert!(tier.rank() >= prev_rank);
            prev_rank = tier.rank();
        }
        assert_eq!(tier, ModelTier::Frontier);
    }

    #[test]
    fn frontier_is_terminal() {
        assert_eq!(ModelTier::Frontier.escalate(), ModelTier::Frontier);
    }

    #[test]
    fn max_never_downgrades() {
        assert_eq!(
            ModelTier::Research.max(ModelTier::Default),
            ModelTier::Research
        );
        assert_eq!(
            ModelTier::Default.max(ModelTier::Research),
            ModelTier::Research
        );
    }

    #[test]
    fn tier_round_trips_through_str() {
        for tier in [
            ModelTier::Fast,
            ModelTier::Default,
            ModelTier::Code,
            ModelTier::Document,
            ModelTier::Research,
            ModelTier::Frontier,
        ] {
            assert_eq!(tier.as_str().parse::<ModelTier>().unwrap(), tier);
        }
    }
}
