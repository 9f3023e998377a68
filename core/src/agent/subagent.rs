//! Sub-agent delegation
//!
//! `delegate_to_{x}_agent` resolves to a spec and runs an isolated, much
//! smaller agent loop: its own system prompt, a tool subset, ten turns, an
//! 80k character payload and a two minute wall clock. The sub-agent's
//! final text becomes the tool result in the parent conversation. It runs
//! in the parent's worker slot, never through the queue.

use super::tool::{IntegrationClient, ToolOutcome};
use crate::approval::is_destructive;
use crate::error::ErrorKind;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ModelTier, ToolSpec};
use crate::rate_limiter::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const SUBAGENT_MAX_TURNS: usize = 10;
pub const SUBAGENT_MAX_PAYLOAD_CHARS: usize = 80_000;
pub const SUBAGENT_MAX_SECONDS: u64 = 120;

/// One delegated specialist
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    /// Short name, e.g. "email" for delegate_to_email_agent
    pub name: String,
    pub system_prompt: String,
    pub tier: ModelTier,
    /// External tool name prefixes this specialist may touch
    pub tool_prefixes: Vec<String>,
}

/// Registry of available specialists
#[derive(Default)]
pub struct SubAgentRegistry {
    specs: HashMap<String, SubAgentSpec>,
}

impl SubAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: SubAgentSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Resolve a delegation tool name to its spec
    pub fn resolve(&self, tool_name: &str) -> Option<&SubAgentSpec> {
        let inner = tool_name
            .strip_prefix("delegate_to_")?
            .strip_suffix("_agent")?;
        self.specs.get(inner)
    }

    /// Delegation tool schemas for the parent's tool list
    pub fn specs_for_parent(&self) -> Vec<ToolSpec> {
        let mut out: Vec<ToolSpec> = self
            .specs
            .values()
            .map(|s| {
                ToolSpec::function(
                    format!("delegate_to_{}_agent", s.name),
                    format!("Hand a self-contained task to the {} specialist", s.name),
                    serde_json::json!({
                        "type": "object",
                        "properties": { "task": { "type": "string" } },
                        "required": ["task"]
                    }),
                )
            })
            .collect();
        out.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        out
    }
}

/// The default specialist lineup
pub fn default_subagents() -> SubAgentRegistry {
    let mut registry = SubAgentRegistry::new();
    registry.register(SubAgentSpec {
        name: "email".to_string(),
        system_prompt: "You handle email triage and drafting. Read what you need, \
                        draft precisely, and report what you produced. You cannot \
                        send anything; the main agent handles sends."
            .to_string(),
        tier: ModelTier::Default,
        tool_prefixes: vec!["GMAIL".to_string()],
    });
    registry.register(SubAgentSpec {
        name: "research".to_string(),
        system_prompt: "You research one question end to end and return findings \
                        with sources. Separate facts from inference."
            .to_string(),
        tier: ModelTier::Research,
        tool_prefixes: vec!["COMPOSIO_SEARCH".to_string(), "search".to_string()],
    });
    registry.register(SubAgentSpec {
        name: "data".to_string(),
        system_prompt: "You pull and crunch numbers. State exactly what ranges you \
                        touched; never invent rows."
            .to_string(),
        tier: ModelTier::Default,
        tool_prefixes: vec!["GOOGLESHEETS".to_string(), "remote_workbench".to_string()],
    });
    registry
}

/// Everything a sub-agent run needs from the parent
pub struct SubAgentDeps {
    pub model: Arc<dyn ChatModel>,
    pub model_id: String,
    pub rate_limiter: Arc<RateLimiter>,
    pub integrations: Arc<dyn IntegrationClient>,
    pub workspace_id: String,
}

/// Run one delegated task to completion. Always returns an outcome; a
/// failed sub-agent is a tool failure the parent model can see.
pub async fn run_subagent(
    spec: &SubAgentSpec,
    deps: &SubAgentDeps,
    instruction: &str,
    cancel: &CancellationToken,
) -> ToolOutcome {
    let run = run_inner(spec, deps, instruction, cancel);
    match tokio::time::timeout(Duration::from_secs(SUBAGENT_MAX_SECONDS), run).await {
        Ok(outcome) => outcome,
        Err(_) => ToolOutcome::failure(
            ErrorKind::ToolTransient,
            format!("the {} specialist ran out of time", spec.name),
            true,
        ),
    }
}

async fn run_inner(
    spec: &SubAgentSpec,
    deps: &SubAgentDeps,
    instruction: &str,
    cancel: &CancellationToken,
) -> ToolOutcome {
    let mut messages = vec![
        ChatMessage::system(spec.system_prompt.clone()),
        ChatMessage::user(instruction.to_string()),
    ];

    let tools: Vec<ToolSpec> = deps
        .integrations
        .available_tools(&deps.workspace_id)
        .await
        .into_iter()
        .filter(|t| {
            spec.tool_prefixes
                .iter()
                .any(|p| t.function.name.starts_with(p.as_str()))
        })
        .collect();

    for turn in 0..SUBAGENT_MAX_TURNS {
        if cancel.is_cancelled() {
            return ToolOutcome::failure(ErrorKind::Cancelled, "delegation cancelled", false);
        }
        trim_payload(&mut messages);

        deps.rate_limiter
            .acquire_model(&deps.model_id, Duration::from_secs(30))
            .await;
        let request = ChatRequest::new(deps.model_id.clone(), messages.clone())
            .with_tools(tools.clone())
            .with_temperature(0.3);
        let reply = match deps.model.chat(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                return ToolOutcome::failure(
                    ErrorKind::ToolTransient,
                    format!("the {} specialist hit a model error: {}", spec.name, err),
                    true,
                )
            }
        };

        if reply.tool_calls.is_empty() {
            if reply.content.trim().is_empty() {
                messages.push(ChatMessage::user("please continue".to_string()));
                continue;
            }
            debug!(specialist = %spec.name, turn, "sub-agent finished");
            return ToolOutcome::success(reply.content);
        }

        messages.push(ChatMessage::assistant_with_tools(
            reply.content.clone(),
            reply.tool_calls.clone(),
        ));
        for call in &reply.tool_calls {
            let outcome = if is_destructive(&call.name) {
                // Destructive actions stay with the parent, where the
                // approval interstitial lives.
                ToolOutcome::failure(
                    ErrorKind::ToolFatal,
                    "destructive actions are not available to specialists; return the \
                     prepared content instead",
                    false,
                )
            } else {
                deps.rate_limiter
                    .acquire_api(&call.name, Duration::from_secs(30))
                    .await;
                deps.integrations
                    .execute(&deps.workspace_id, &call.name, &call.arguments)
                    .await
            };
            messages.push(ChatMessage::tool(call.id.clone(), outcome.render()));
        }
    }

    ToolOutcome::failure(
        ErrorKind::StuckLoop,
        format!("the {} specialist did not converge", spec.name),
        false,
    )
}

fn trim_payload(messages: &mut Vec<ChatMessage>) {
    let mut total: usize = messages.iter().map(|m| m.char_weight()).sum();
    while total > SUBAGENT_MAX_PAYLOAD_CHARS {
        // drop the oldest non-system message
        let Some(idx) = messages
            .iter()
            .position(|m| m.role != crate::llm::MessageRole::System)
        else {
            break;
        };
        total -= messages[idx].char_weight();
        messages.remove(idx);
    }
}
