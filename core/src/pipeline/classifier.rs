//! Intent classification
//!
//! A pure function over the message text: priority-ordered regex matchers,
//! first match wins. No I/O, bounded sub-millisecond, never fails; anything
//! unmatched lands in the chat intent.

use crate::llm::ModelTier;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed intent set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Confirmation,
    Followup,
    Chat,
    Lookup,
    ToolUse,
    Command,
    Monitoring,
    Code,
    Reasoning,
    Data,
    Document,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Confirmation => "confirmation",
            Intent::Followup => "followup",
            Intent::Chat => "chat",
            Intent::Lookup => "lookup",
            Intent::ToolUse => "tool_use",
            Intent::Command => "command",
            Intent::Monitoring => "monitoring",
            Intent::Code => "code",
            Intent::Reasoning => "reasoning",
            Intent::Data => "data",
            Intent::Document => "document",
        }
    }
}

/// Prompt module selected by the classified intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptModule {
    Coding,
    Research,
    DataTasks,
    Integrations,
}

/// Classification output: intent, model tier, prompt modules
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub tier: ModelTier,
    pub modules: Vec<PromptModule>,
}

lazy_static! {
    // Priority-ordered: the first entry whose pattern matches decides.
    static ref MATCHERS: Vec<(Regex, Intent, ModelTier)> = vec![
        (
            Regex::new(r"(?i)^(hi|hey|hello|yo|howdy|good (morning|afternoon|evening))[\s!,.]*$").unwrap(),
            Intent::Greeting,
            ModelTier::Fast,
        ),
        (
            Regex::new(r"(?i)^(yes|no|yep|nope|yeah|ok|okay|sure|sounds good|thanks|thank you|got it|cool|perfect|great)[\s!,.]*$").unwrap(),
            Intent::Confirmation,
            ModelTier::Fast,
        ),
        (
            Regex::new(r"(?i)^(cancel|stop|abort|pause|resume|retry)\b").unwrap(),
            Intent::Command,
            ModelTier::Fast,
        ),
        (
            Regex::new(r"(?i)\b(monitor|watch|keep an eye|alert me|notify me|let me know (if|when)|every \d+ (minutes?|hours?)|heartbeat)\b").unwrap(),
            Intent::Monitoring,
            ModelTier::Default,
        ),
        (
            Regex::new(r"(?i)\b(write|draft|prepare)\b.{0,24}\b(doc|document|report|memo|proposal|blog post|article)\b").unwrap(),
            Intent::Document,
            ModelTier::Document,
        ),
        (
            Regex::new(r"(?i)\b(code|function|script|debug|refactor|compile|deploy|stack ?trace|regex|sql|typescript|python|rust)\b").unwrap(),
            Intent::Code,
            ModelTier::Code,
        ),
        (
            Regex::new(r"(?i)\b(csv|spreadsheet|dataset|pivot|sum up|average|median|per row|columns?)\b").unwrap(),
            Intent::Data,
            ModelTier::Default,
        ),
        (
            Regex::new(r"(?i)\b(analyz|compare|trade-?offs?|pros and cons|think through|deep dive|research|investigate)").unwrap(),
            Intent::Reasoning,
            ModelTier::Research,
        ),
        (
            Regex::new(r"(?i)\b(send|schedule|create|update|delete|archive|forward|email|calendar|invite|github|linear|jira|ticket|issue|pull request)\b").unwrap(),
            Intent::ToolUse,
            ModelTier::Default,
        ),
        (
            Regex::new(r"(?i)^(what|who|when|where|which|how (much|many)|is there|are there|do we)\b").unwrap(),
            Intent::Lookup,
            ModelTier::Default,
        ),
    ];

    static ref FOLLOWUP: Regex =
        Regex::new(r"(?i)^(and|also|what about|how about|then|same for|one more)\b").unwrap();
}

/// Classify a message. Empty input maps to chat/fast. Thread depth above 3
/// promotes fast to default; in-thread continuations after tool work are
/// follow-ups.
pub fn classify(message: &str, thread_depth: u32, prior_had_tools: bool) -> Classification {
    let trimmed = message.trim();

    let (intent, tier) = if trimmed.is_empty() {
        (Intent::Chat, ModelTier::Fast)
    } else if thread_depth > 0 && (FOLLOWUP.is_match(trimmed) || (prior_had_tools && trimmed.len() < 40)) {
        (Intent::Followup, ModelTier::Default)
    } else if let Some((_, intent, tier)) = MATCHERS.iter().find(|(re, _, _)| re.is_match(trimmed))
    {
        (*intent, *tier)
    } else if trimmed.len() <= 80 {
        (Intent::Chat, ModelTier::Fast)
    } else {
        (Intent::Chat, ModelTier::Default)
    };

    // Deep threads carry context a fast model will fumble.
    let tier = if thread_depth > 3 && tier == ModelTier::Fast {
        ModelTier::Default
    } else {
        tier
    };

    Classification {
        intent,
        tier,
        modules: modules_for(intent),
    }
}

fn modules_for(intent: Intent) -> Vec<PromptModule> {
    match intent {
        Intent::Code => vec![PromptModule::Coding],
        Intent::Reasoning | Intent::Lookup => vec![PromptModule::Research],
        Intent::Data | Intent::Document => vec![PromptModule::DataTasks],
        Intent::ToolUse | Intent::Monitoring => vec![PromptModule::Integrations],
        _ => Vec::new(),
    }
}
