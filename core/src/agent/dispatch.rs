//! Tool dispatch
//!
//! All tool calls from one model turn execute concurrently and come back
//! stitched in call order. Each call is routed by name shape, guarded by
//! the dedup window, bounded by the per-call soft budget, and rate limited
//! independently: the API bucket gates external calls before any model
//! budget is touched.

use super::subagent::{run_subagent, SubAgentDeps};
use super::tool::{kind_of, ToolContext, ToolKind, ToolOutcome};
use super::AgentShared;
use crate::error::ErrorKind;
use crate::llm::ToolCall;
use crate::pipeline::dedup::{should_deduplicate_tool_call, RecentCalls, DEDUP_WINDOW};
use crate::workspace::Workspace;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{TOOL_RESULT_MAX_CHARS, TOOL_RESULT_SUMMARY_THRESHOLD};

/// One executed call, in its original position
pub struct DispatchResult {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
    pub elapsed: Duration,
}

/// Execute a turn's tool calls in parallel, results in call order
pub async fn dispatch_turn(
    shared: &AgentShared,
    workspace: &Arc<Workspace>,
    user_id: &str,
    is_scheduled: bool,
    cancel: &CancellationToken,
    calls: Vec<ToolCall>,
    recent: &mut RecentCalls,
) -> Vec<DispatchResult> {
    // Dedup decisions are made serially so duplicates inside one batch are
    // caught too.
    let mut suppressed = vec![false; calls.len()];
    for (i, call) in calls.iter().enumerate() {
        if should_deduplicate_tool_call(&call.name, &call.arguments, recent.calls(), DEDUP_WINDOW) {
            suppressed[i] = true;
        } else {
            recent.record(&call.name, &call.arguments);
        }
    }

    let budget = Duration::from_secs(shared.agent_settings.tool_budget_secs);
    let futures = calls.into_iter().zip(suppressed).map(|(call, dup)| {
        let workspace = Arc::clone(workspace);
        let user_id = user_id.to_string();
        let cancel = cancel.clone();
        async move {
            let start = Instant::now();
            let outcome = if dup {
                ToolOutcome::success(
                    "duplicate call suppressed; the earlier result still stands",
                )
            } else {
                execute_one(shared, &workspace, &user_id, is_scheduled, &cancel, &call, budget)
                    .await
            };
            DispatchResult {
                call,
                outcome,
                elapsed: start.elapsed(),
            }
        }
    });

    let mut results = join_all(futures).await;
    for result in &mut results {
        result.outcome.payload = shape_result(&result.outcome.payload);
    }
    results
}

async fn execute_one(
    shared: &AgentShared,
    workspace: &Arc<Workspace>,
    user_id: &str,
    is_scheduled: bool,
    cancel: &CancellationToken,
    call: &ToolCall,
    budget: Duration,
) -> ToolOutcome {
    debug!(tool = %call.name, "dispatching tool call");
    let fut = route(shared, workspace, user_id, is_scheduled, cancel, call);
    match tokio::time::timeout(budget, fut).await {
        Ok(outcome) => outcome,
        Err(_) => ToolOutcome::failure(
            ErrorKind::ToolTransient,
            format!("call timed out after {}s", budget.as_secs()),
            true,
        ),
    }
}

async fn route(
    shared: &AgentShared,
    workspace: &Arc<Workspace>,
    user_id: &str,
    is_scheduled: bool,
    cancel: &CancellationToken,
    call: &ToolCall,
) -> ToolOutcome {
    match kind_of(&call.name) {
        ToolKind::Internal => {
            let ctx = ToolContext {
                workspace: Arc::clone(workspace),
                user_id: user_id.to_string(),
                is_scheduled,
            };
            shared
                .internal_tools
                .dispatch(&call.name, &call.arguments, &ctx)
                .await
        }
        ToolKind::Delegation => match shared.subagents.resolve(&call.name) {
            Some(spec) => {
                let instruction = delegation_task(&call.arguments);
                let deps = SubAgentDeps {
                    model: Arc::clone(&shared.model),
                    model_id: shared.llm.model_for(spec.tier),
                    rate_limiter: Arc::clone(&shared.rate_limiter),
                    integrations: Arc::clone(&shared.integrations),
                    workspace_id: workspace.id().to_string(),
                };
                run_subagent(spec, &deps, &instruction, cancel).await
            }
            None => ToolOutcome::failure(
                ErrorKind::UnknownTool,
                format!("{} does not name a specialist", call.name),
                false,
            ),
        },
        ToolKind::External => {
            // API bucket first: an API-blocked call must not burn model
            // budget anywhere downstream.
            if !shared
                .rate_limiter
                .acquire_api(&call.name, Duration::from_secs(30))
                .await
            {
                return ToolOutcome::failure(
                    ErrorKind::ToolTransient,
                    "the service is rate limited right now",
                    true,
                );
            }
            shared
                .integrations
                .execute(workspace.id(), &call.name, &call.arguments)
                .await
        }
    }
}

/// Extract the task text from delegation arguments, tolerating both a
/// plain string and a `{"task": ...}` object.
fn delegation_task(arguments: &str) -> String {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or(arguments)
            .to_string(),
        Ok(Value::String(s)) => s,
        _ => arguments.to_string(),
    }
}

/// Truncate oversized results and summarize long ones in place, on
/// character boundaries.
pub fn shape_result(payload: &str) -> String {
    let chars = payload.chars().count();
    if chars > TOOL_RESULT_MAX_CHARS {
        let kept: String = payload.chars().take(TOOL_RESULT_MAX_CHARS).collect();
        return format!("{}\n[truncated {} characters]", kept, chars - TOOL_RESULT_MAX_CHARS);
    }
    if chars > TOOL_RESULT_SUMMARY_THRESHOLD {
        let head: String = payload.chars().take(4_000).collect();
        let tail: String = {
            let skip = chars.saturating_sub(2_000);
            payload.chars().skip(skip).collect()
        };
        return format!(
            "{}\n[... {} characters elided ...]\n{}",
            head,
            chars - 6_000,
            tail
        );
    }
    payload.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_at_the_cap_are_kept() {
        let payload = "x".repeat(TOOL_RESULT_SUMMARY_THRESHOLD);
        assert_eq!(shape_result(&payload), payload);
    }

    #[test]
    fn results_over_summary_threshold_are_summarized() {
        let payload = "y".repeat(TOOL_RESULT_SUMMARY_THRESHOLD + 1);
        let shaped = shape_result(&payload);
        assert!(shaped.contains("characters elided"));
        assert!(shaped.len() < payload.len());
    }

    #[test]
    fn results_over_the_cap_are_truncated_with_marker() {
        let payload = "z".repeat(TOOL_RESULT_MAX_CHARS + 10);
        let shaped = shape_result(&payload);
        assert!(shaped.contains("[truncated 10 characters]"));
    }

    #[test]
    fn delegation_task_extraction() {
        assert_eq!(delegation_task(r#"{"task":"summarize inbox"}"#), "summarize inbox");
        assert_eq!(delegation_task(r#""plain string""#), "plain string");
        assert_eq!(delegation_task("raw text"), "raw text");
    }
}
