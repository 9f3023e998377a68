//! The agent loop
//!
//! One run is a sequence of model turns under cooperative cancellation and
//! an absolute wall clock. Every await is a cancellation point. Errors are
//! absorbed into tool results or interventions where possible; what cannot
//! be recovered escalates the model tier, and the tier never moves back
//! down.

use super::dispatch::{dispatch_turn, DispatchResult};
use super::gates::{quality_needs_rerun, quality_score, verify_completeness};
use super::partial::collect_partial;
use super::progress::{progress_line, should_post_progress};
use super::tool::ToolOutcome;
use super::{
    AgentShared, LOOP_SIGNATURE_LIMIT, MAX_CONTEXT_MESSAGES, MAX_PAYLOAD_CHARS, MAX_TOOL_TURNS,
    PER_TOOL_NAME_CAP, STUCK_ERROR_LIMIT,
};
use crate::approval::{is_destructive, ApprovalDecision};
use crate::error::{ErrorKind, LucyError, Result};
use crate::llm::{ChatMessage, ChatRequest, MessageRole, ModelTier, TokenUsage, ToolCall, ToolSpec};
use crate::pipeline::dedup::RecentCalls;
use crate::pipeline::{Intent, PromptModule};
use crate::prompt::PromptAssembler;
use crate::supervisor::{checkpoint_due, needs_plan, Decision, TaskPlan, TurnReport};
use crate::task::{StepKind, Task, TaskState};
use crate::trace::Trace;
use crate::transport::OutboundMessage;
use crate::workspace::Workspace;
use futures::future::BoxFuture;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

lazy_static! {
    static ref NARRATION: Regex = Regex::new(
        r"(?i)^(i['\u{2019}]ll|i will|let me|i['\u{2019}]m going to|i am going to|now i['\u{2019}]ll|next,? i will)\b.{0,80}\b(call|use|run|search|check|fetch|look|pull|query)"
    )
    .unwrap();
}

/// Everything one run needs to know about where it came from
pub struct RunContext {
    pub workspace: Arc<Workspace>,
    pub team_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub user_id: String,
    pub intent: Intent,
    pub modules: Vec<PromptModule>,
    pub tier: ModelTier,
    /// Prior conversation, newest last, at most [`MAX_CONTEXT_MESSAGES`]
    pub history: Vec<ChatMessage>,
    pub is_scheduled: bool,
    pub cancel: CancellationToken,
    /// Task record to mutate, when this run is task-backed
    pub task: Option<Arc<Mutex<Task>>>,
}

/// What a finished run hands back
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub text: String,
    pub tier: ModelTier,
    pub usage: TokenUsage,
    pub turns: usize,
    pub tool_calls: usize,
    pub cancelled: bool,
}

struct AttemptResult {
    text: String,
    tier: ModelTier,
    usage: TokenUsage,
    turns: usize,
    tool_calls: usize,
}

/// The multi-turn execution engine
pub struct AgentRunner {
    shared: Arc<AgentShared>,
}

impl AgentRunner {
    pub fn new(shared: Arc<AgentShared>) -> Self {
        Self { shared }
    }

    /// Boxed recursion point for retries and gate re-runs
    fn run_boxed<'a>(
        &'a self,
        ctx: &'a RunContext,
        message: &'a str,
        model_override: Option<ModelTier>,
        failure_context: Option<String>,
        retry_depth: u8,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(self.run(ctx, message, model_override, failure_context, retry_depth))
    }

    /// Run to completion. Retries once on unrecovered failure, passing the
    /// failure summary forward; post-loop gates may trigger one escalated
    /// re-run. Cancellation resolves to a friendly outcome, not an error.
    pub async fn run(
        &self,
        ctx: &RunContext,
        message: &str,
        model_override: Option<ModelTier>,
        failure_context: Option<String>,
        retry_depth: u8,
    ) -> Result<RunOutcome> {
        let start_tier = model_override.unwrap_or(ctx.tier);
        let mut trace = Trace::new(
            ctx.task.as_ref().map(|t| t.lock().id).unwrap_or_else(Uuid::new_v4),
            ctx.workspace.id(),
            ctx.intent.as_str(),
        );

        set_task_state(ctx, TaskState::Running);
        let attempt = self
            .run_attempt(ctx, message, start_tier, failure_context.as_deref(), &mut trace)
            .await;
        trace.finish();
        self.persist_trace(ctx, &trace);

        match attempt {
            Ok(result) => {
                if retry_depth == 0 {
                    if let Some(outcome) = self.gate_rerun(ctx, message, &result).await? {
                        return Ok(outcome);
                    }
                }
                Ok(RunOutcome {
                    text: result.text,
                    tier: result.tier,
                    usage: result.usage,
                    turns: result.turns,
                    tool_calls: result.tool_calls,
                    cancelled: false,
                })
            }
            Err(LucyError::Cancelled { reason }) => {
                info!(workspace = ctx.workspace.id(), "run cancelled: {}", reason);
                let notice = "Stopped. Let me know if you want me to pick it back up.";
                self.post(ctx, notice).await;
                if let Some(task) = &ctx.task {
                    let mut task = task.lock();
                    let seq = task.begin_step(StepKind::LlmCall);
                    if let Some(step) = task.step_mut(seq) {
                        step.fail("cancelled");
                    }
                    let _ = task.transition(TaskState::Cancelled);
                }
                Ok(RunOutcome {
                    text: notice.to_string(),
                    tier: start_tier,
                    usage: TokenUsage::default(),
                    turns: 0,
                    tool_calls: 0,
                    cancelled: true,
                })
            }
            Err(err) => {
                let recoverable = !matches!(
                    err.kind(),
                    ErrorKind::ApprovalExpired | ErrorKind::TenantIsolation
                );
                if retry_depth == 0 && recoverable {
                    warn!(
                        workspace = ctx.workspace.id(),
                        "run failed, retrying escalated: {}", err
                    );
                    return self
                        .run_boxed(
                            ctx,
                            message,
                            Some(start_tier.escalate()),
                            Some(format!("the previous attempt failed: {}", err)),
                            retry_depth + 1,
                        )
                        .await;
                }
                Err(err)
            }
        }
    }

    /// Post-loop quality and verification gates. A triggered gate runs the
    /// request once more at the next tier and returns that outcome.
    async fn gate_rerun(
        &self,
        ctx: &RunContext,
        message: &str,
        result: &AttemptResult,
    ) -> Result<Option<RunOutcome>> {
        let score = quality_score(message, &result.text, ctx.intent);
        if quality_needs_rerun(score, result.tier == ModelTier::Frontier) {
            debug!(score, "quality gate triggered escalated re-run");
            let outcome = self
                .run_boxed(
                    ctx,
                    message,
                    Some(result.tier.escalate()),
                    Some(format!(
                        "a previous draft looked low-confidence ({}/10); answer only what was \
                         asked, concretely and completely",
                        score
                    )),
                    1,
                )
                .await?;
            return Ok(Some(outcome));
        }

        let issues = verify_completeness(message, &result.text, ctx.intent);
        if !issues.is_empty() {
            debug!(?issues, "verification gate triggered escalated retry");
            let outcome = self
                .run_boxed(
                    ctx,
                    message,
                    Some(result.tier.escalate()),
                    Some(format!("a previous draft was incomplete: {}", issues.join("; "))),
                    1,
                )
                .await?;
            return Ok(Some(outcome));
        }
        Ok(None)
    }

    async fn run_attempt(
        &self,
        ctx: &RunContext,
        message: &str,
        start_tier: ModelTier,
        failure_context: Option<&str>,
        trace: &mut Trace,
    ) -> Result<AttemptResult> {
        let shared = &self.shared;
        let start = Instant::now();
        let wall_clock = Duration::from_secs(shared.agent_settings.absolute_max_seconds);

        let connected = shared
            .integrations
            .connected_services(ctx.workspace.id())
            .await;
        let system_prompt =
            PromptAssembler::assemble(&ctx.workspace, &connected, &ctx.modules, message);

        let mut plan: Option<TaskPlan> = None;
        if needs_plan(ctx.intent, message) {
            plan = Some(shared.supervisor.create_plan(message).await?);
        }

        let mut messages: Vec<ChatMessage> = vec![ChatMessage::system(system_prompt)];
        if let Some(plan) = &plan {
            messages.push(ChatMessage::system(plan.render()));
        }
        if let Some(failure) = failure_context {
            messages.push(ChatMessage::system(format!(
                "A previous attempt did not finish. Context: {}",
                failure
            )));
        }
        let history_start = ctx.history.len().saturating_sub(MAX_CONTEXT_MESSAGES);
        messages.extend_from_slice(&ctx.history[history_start..]);
        messages.push(ChatMessage::user(message.to_string()));

        let mut tools: Vec<ToolSpec> = shared.internal_tools.specs();
        tools.extend(shared.subagents.specs_for_parent());
        tools.extend(shared.integrations.available_tools(ctx.workspace.id()).await);

        let mut tier = start_tier;
        let mut usage = TokenUsage::default();
        let mut empty_replies = 0usize;
        let mut consecutive_errors = 0usize;
        let mut total_errors = 0usize;
        let mut edit_file_calls = 0usize;
        let mut transient_escalations = 0usize;
        let mut signatures: HashMap<String, usize> = HashMap::new();
        let mut per_tool: HashMap<String, usize> = HashMap::new();
        let mut turn_reports: Vec<TurnReport> = Vec::new();
        let mut recent = RecentCalls::new();
        let mut total_tool_calls = 0usize;
        let mut last_tool: Option<String> = None;
        let mut last_result: Option<String> = None;
        let mut last_checkpoint = Instant::now();

        for turn in 1..=MAX_TOOL_TURNS {
            if ctx.cancel.is_cancelled() {
                return Err(cancelled("stopped on request"));
            }
            if start.elapsed() >= wall_clock {
                return Err(cancelled("hit the absolute time limit"));
            }

            trim_context(&mut messages);
            trim_payload(&mut messages);

            let model_id = shared.llm.model_for(tier);
            shared
                .rate_limiter
                .acquire_model(&model_id, Duration::from_secs(60))
                .await;

            let llm_step = begin_step(ctx, StepKind::LlmCall);
            let call_started = Instant::now();
            let request = ChatRequest::new(model_id.clone(), messages.clone())
                .with_tools(tools.clone())
                .with_temperature(shared.llm.temperature)
                .with_max_tokens(shared.llm.max_tokens);
            let reply = cancellable(&ctx.cancel, shared.model.chat(&request)).await?;
            trace.note_model(&model_id);

            let reply = match reply {
                Ok(reply) => {
                    trace.record_span("llm_call", call_started, true, None);
                    finish_step(ctx, llm_step, "ok");
                    reply
                }
                Err(err) => {
                    trace.record_span("llm_call", call_started, false, Some(err.to_string()));
                    fail_step(ctx, llm_step, err.to_string());
                    match err.kind() {
                        ErrorKind::LlmMalformed if matches!(err, LucyError::LlmBadRequest { .. }) => {
                            // a request the gateway rejects outright needs
                            // the strongest model's tool discipline
                            if tier == ModelTier::Frontier {
                                return Err(err);
                            }
                            tier = tier.max(ModelTier::Frontier);
                            continue;
                        }
                        ErrorKind::LlmTransient | ErrorKind::RateLimited => {
                            // client retries are exhausted at this point
                            transient_escalations += 1;
                            if transient_escalations > 1 {
                                return Err(err);
                            }
                            tier = tier.escalate();
                            continue;
                        }
                        _ => return Err(err),
                    }
                }
            };
            usage.add(&reply.usage);
            trace.add_usage(&reply.usage);

            // empty response: nudge once, then escalate
            if reply.is_empty() {
                empty_replies += 1;
                match empty_replies {
                    1 => {
                        messages.push(ChatMessage::user("please continue".to_string()));
                    }
                    2 => {
                        tier = tier.escalate();
                    }
                    _ => {
                        let text =
                            collect_partial(last_tool.as_deref(), total_tool_calls, last_result.as_deref());
                        return Ok(AttemptResult {
                            text,
                            tier,
                            usage,
                            turns: turn,
                            tool_calls: total_tool_calls,
                        });
                    }
                }
                continue;
            }

            if reply.tool_calls.is_empty() {
                // narration instead of action gets one correction
                if NARRATION.is_match(reply.content.trim()) {
                    messages.push(ChatMessage::assistant(reply.content.clone()));
                    messages.push(ChatMessage::system(
                        "You described an action instead of performing it. Call the tool \
                         directly instead of narrating."
                            .to_string(),
                    ));
                    continue;
                }
                // terminal: plain content
                return Ok(AttemptResult {
                    text: reply.content,
                    tier,
                    usage,
                    turns: turn,
                    tool_calls: total_tool_calls,
                });
            }

            // loop detection across turns
            for call in &reply.tool_calls {
                let signature = call_signature(call);
                let count = signatures.entry(signature).or_insert(0);
                *count += 1;
                if *count >= LOOP_SIGNATURE_LIMIT {
                    warn!(tool = %call.name, "identical call repeated, breaking loop");
                    tier = tier.escalate();
                    let text = collect_partial(
                        Some(&call.name),
                        total_tool_calls,
                        last_result.as_deref(),
                    );
                    return Ok(AttemptResult {
                        text,
                        tier,
                        usage,
                        turns: turn,
                        tool_calls: total_tool_calls,
                    });
                }
            }

            messages.push(ChatMessage::assistant_with_tools(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));

            if should_post_progress(turn) {
                self.post(ctx, &progress_line(&shared.progress, message)).await;
            }

            // mid-loop tier shifts from the shape of the work
            for call in &reply.tool_calls {
                if call.name == "remote_workbench" || call.name == "remote_bash" {
                    tier = tier.max(ModelTier::Code);
                }
                if call.name.contains("edit_file") || call.name.contains("write_file") {
                    edit_file_calls += 1;
                }
            }
            if edit_file_calls >= 2 {
                tier = tier.max(ModelTier::Frontier);
            }

            // per-tool-name budget; search and workbench tools are exempt
            let mut denied: HashMap<usize, ToolOutcome> = HashMap::new();
            for (i, call) in reply.tool_calls.iter().enumerate() {
                let exempt = call.name.contains("search") || call.name.contains("workbench");
                let count = per_tool.entry(call.name.clone()).or_insert(0);
                *count += 1;
                if !exempt && *count > PER_TOOL_NAME_CAP {
                    denied.insert(
                        i,
                        ToolOutcome::failure(
                            ErrorKind::ToolFatal,
                            "per-task budget for this tool is used up; work with what you have",
                            false,
                        ),
                    );
                }
            }

            // destructive calls suspend behind the approval interstitial
            let destructive: Vec<&ToolCall> = reply
                .tool_calls
                .iter()
                .enumerate()
                .filter(|(i, c)| !denied.contains_key(i) && is_destructive(&c.name))
                .map(|(_, c)| c)
                .collect();
            let mut declined: Vec<String> = Vec::new();
            if !destructive.is_empty() {
                match self.await_approval(ctx, &destructive).await? {
                    ApprovalDecision::Approved => {}
                    ApprovalDecision::Rejected => {
                        declined = destructive.iter().map(|c| c.id.clone()).collect();
                    }
                    ApprovalDecision::Expired => unreachable!("expiry surfaces as an error"),
                }
            }

            // execute what's allowed, in parallel, results back in order
            let mut to_execute: Vec<ToolCall> = Vec::new();
            let mut placements: Vec<usize> = Vec::new();
            for (i, call) in reply.tool_calls.iter().enumerate() {
                if denied.contains_key(&i) || declined.contains(&call.id) {
                    continue;
                }
                to_execute.push(call.clone());
                placements.push(i);
            }
            let tool_step = begin_step(ctx, StepKind::ToolUse);
            let executed = cancellable(
                &ctx.cancel,
                dispatch_turn(
                    shared,
                    &ctx.workspace,
                    &ctx.user_id,
                    ctx.is_scheduled,
                    &ctx.cancel,
                    to_execute,
                    &mut recent,
                ),
            )
            .await?;
            finish_step(ctx, tool_step, format!("{} calls", executed.len()));

            let mut ordered: Vec<Option<DispatchResult>> =
                (0..reply.tool_calls.len()).map(|_| None).collect();
            for (slot, result) in placements.into_iter().zip(executed) {
                ordered[slot] = Some(result);
            }

            for (i, call) in reply.tool_calls.iter().enumerate() {
                let content = if let Some(outcome) = denied.remove(&i) {
                    outcome.render()
                } else if declined.contains(&call.id) {
                    "[error] the user declined this action".to_string()
                } else if let Some(result) = ordered[i].take() {
                    total_tool_calls += 1;
                    trace.note_tool(&call.name);
                    result.outcome.render()
                } else {
                    "[error] call was not executed".to_string()
                };

                let had_error = ToolOutcome::is_error_marker(&content);
                if had_error {
                    consecutive_errors += 1;
                    total_errors += 1;
                } else {
                    consecutive_errors = 0;
                }
                turn_reports.push(TurnReport::new(
                    turn,
                    &call.name,
                    &call.arguments,
                    &content,
                    had_error,
                ));
                last_tool = Some(call.name.clone());
                last_result = Some(content.clone());
                messages.push(ChatMessage::tool(call.id.clone(), content));
            }

            // stuck: errors keep landing, change something
            if consecutive_errors >= STUCK_ERROR_LIMIT {
                messages.push(ChatMessage::system(
                    "The last several attempts all failed. Step back, pick a different \
                     approach, and avoid repeating the failing call."
                        .to_string(),
                ));
                tier = tier.escalate();
                consecutive_errors = 0;
            }

            // supervisor checkpoint
            if checkpoint_due(turn, last_checkpoint.elapsed()) {
                last_checkpoint = Instant::now();
                let decision = shared
                    .supervisor
                    .evaluate(
                        plan.as_ref(),
                        &turn_reports,
                        total_errors,
                        consecutive_errors,
                        start.elapsed(),
                        0,
                        &model_id,
                    )
                    .await;
                match decision {
                    Decision::Continue => {}
                    Decision::Intervene => {
                        messages.push(ChatMessage::system(
                            "Check your recent steps against the goal; correct course before \
                             continuing."
                                .to_string(),
                        ));
                    }
                    Decision::Replan => {
                        let new_plan = shared.supervisor.create_plan(message).await?;
                        messages.push(ChatMessage::system(new_plan.render()));
                        plan = Some(new_plan);
                        consecutive_errors = 0;
                    }
                    Decision::Escalate => {
                        tier = tier.escalate();
                    }
                    Decision::AskUser => {
                        let text = format!(
                            "{} Before I go further, can you confirm I'm headed the right way?",
                            collect_partial(last_tool.as_deref(), total_tool_calls, last_result.as_deref())
                        );
                        return Ok(AttemptResult {
                            text,
                            tier,
                            usage,
                            turns: turn,
                            tool_calls: total_tool_calls,
                        });
                    }
                    Decision::Abort => {
                        let text = format!(
                            "I stopped this one early; it wasn't converging. {}",
                            collect_partial(last_tool.as_deref(), total_tool_calls, last_result.as_deref())
                        );
                        return Ok(AttemptResult {
                            text,
                            tier,
                            usage,
                            turns: turn,
                            tool_calls: total_tool_calls,
                        });
                    }
                }
            }
        }

        // turn budget exhausted
        Ok(AttemptResult {
            text: collect_partial(last_tool.as_deref(), total_tool_calls, last_result.as_deref()),
            tier,
            usage,
            turns: MAX_TOOL_TURNS,
            tool_calls: total_tool_calls,
        })
    }

    /// Post the approval interstitial and suspend until a human answers or
    /// the TTL lapses.
    async fn await_approval(
        &self,
        ctx: &RunContext,
        destructive: &[&ToolCall],
    ) -> Result<ApprovalDecision> {
        let summary = destructive
            .iter()
            .map(|c| crate::output::humanize_tool_name(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let (record, rx) = self
            .shared
            .approvals
            .request(ctx.workspace.id(), &destructive[0].name, &summary);
        self.post(
            ctx,
            &format!("Before I {}: want me to go ahead?", summary),
        )
        .await;

        set_task_state(ctx, TaskState::PendingApproval);
        let step = begin_step(ctx, StepKind::ApprovalWait);
        let ttl = Duration::from_secs(self.shared.agent_settings.approval_ttl_secs);
        let decision = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                self.shared.approvals.expire(record.id);
                return Err(cancelled("stopped while waiting for approval"));
            }
            answered = tokio::time::timeout(ttl, rx) => match answered {
                Ok(Ok(decision)) => decision,
                // timeout or a purged sender both read as expiry
                _ => ApprovalDecision::Expired,
            },
        };

        match decision {
            ApprovalDecision::Approved => {
                finish_step(ctx, step, "approved");
                set_task_state(ctx, TaskState::Running);
                Ok(ApprovalDecision::Approved)
            }
            ApprovalDecision::Rejected => {
                finish_step(ctx, step, "rejected");
                set_task_state(ctx, TaskState::Running);
                Ok(ApprovalDecision::Rejected)
            }
            ApprovalDecision::Expired => {
                self.shared.approvals.expire(record.id);
                fail_step(ctx, step, "approval-expired");
                if let Some(task) = &ctx.task {
                    let _ = task.lock().fail("approval-expired");
                }
                Err(LucyError::ApprovalExpired { action: summary })
            }
        }
    }

    async fn post(&self, ctx: &RunContext, text: &str) {
        let message = OutboundMessage::text_reply(
            ctx.team_id.clone(),
            ctx.channel_id.clone(),
            ctx.thread_id.clone(),
            text,
        );
        if let Err(err) = self.shared.transport.post_message(message).await {
            warn!("failed to post to chat: {}", err);
        }
    }

    fn persist_trace(&self, ctx: &RunContext, trace: &Trace) {
        let thread_key = ctx.thread_id.as_deref().unwrap_or(&ctx.channel_id);
        if let Err(err) = ctx
            .workspace
            .append_thread_record(thread_key, &trace.to_json_line())
        {
            warn!("failed to persist trace: {}", err);
        }
    }
}

fn cancelled(reason: &str) -> LucyError {
    LucyError::Cancelled {
        reason: reason.to_string(),
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled("stopped on request")),
        out = fut => Ok(out),
    }
}

/// Signature for loop detection: tool name plus normalized arguments.
/// Parsing through serde_json sorts object keys, so argument order noise
/// does not defeat the check.
fn call_signature(call: &ToolCall) -> String {
    let normalized = serde_json::from_str::<serde_json::Value>(&call.arguments)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| call.arguments.trim().to_string());
    format!("{}::{}", call.name, normalized)
}

/// Keep the window at [`MAX_CONTEXT_MESSAGES`], dropping oldest non-system
fn trim_context(messages: &mut Vec<ChatMessage>) {
    while messages.len() > MAX_CONTEXT_MESSAGES {
        let Some(idx) = messages.iter().position(|m| m.role != MessageRole::System) else {
            break;
        };
        messages.remove(idx);
    }
}

/// Keep total characters under [`MAX_PAYLOAD_CHARS`], dropping oldest
/// non-system tool results first
fn trim_payload(messages: &mut Vec<ChatMessage>) {
    let total = |msgs: &[ChatMessage]| msgs.iter().map(|m| m.char_weight()).sum::<usize>();
    while total(messages) > MAX_PAYLOAD_CHARS {
        let victim = messages
            .iter()
            .position(|m| m.role == MessageRole::Tool)
            .or_else(|| messages.iter().position(|m| m.role != MessageRole::System));
        match victim {
            Some(idx) => {
                messages.remove(idx);
            }
            None => break,
        }
    }
}

fn set_task_state(ctx: &RunContext, state: TaskState) {
    if let Some(task) = &ctx.task {
        let _ = task.lock().transition(state);
    }
}

fn begin_step(ctx: &RunContext, kind: StepKind) -> Option<u32> {
    ctx.task.as_ref().map(|t| t.lock().begin_step(kind))
}

fn finish_step(ctx: &RunContext, seq: Option<u32>, outcome: impl Into<String>) {
    if let (Some(task), Some(seq)) = (&ctx.task, seq) {
        if let Some(step) = task.lock().step_mut(seq) {
            step.finish(outcome);
        }
    }
}

fn fail_step(ctx: &RunContext, seq: Option<u32>, error: impl Into<String>) {
    if let (Some(task), Some(seq)) = (&ctx.task, seq) {
        if let Some(step) = task.lock().step_mut(seq) {
            step.fail(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::internal::default_registry;
    use crate::agent::subagent::default_subagents;
    use crate::agent::tool::NullIntegrationClient;
    use crate::agent::AgentShared;
    use crate::approval::ApprovalHub;
    use crate::config::{AgentSettings, LlmSettings};
    use crate::llm::{ChatModel, LlmReply};
    use crate::rate_limiter::RateLimiter;
    use crate::supervisor::Supervisor;
    use crate::transport::{ChatTransport, OutboundMessage};
    use crate::workspace::WorkspaceManager;
    use async_trait::async_trait;

    struct ScriptedModel {
        replies: Mutex<Vec<LlmReply>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<LlmReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, _request: &ChatRequest) -> Result<LlmReply> {
            let mut replies = self.replies.lock();
            Ok(if replies.is_empty() {
                LlmReply {
                    content: "all done".to_string(),
                    ..Default::default()
                }
            } else {
                replies.remove(0)
            })
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        posts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn post_message(&self, message: OutboundMessage) -> Result<()> {
            self.posts.lock().push(message.text);
            Ok(())
        }

        async fn post_direct(&self, _team: &str, _user: &str, text: &str) -> Result<()> {
            self.posts.lock().push(text.to_string());
            Ok(())
        }
    }

    fn text_reply(text: &str) -> LlmReply {
        LlmReply {
            content: text.to_string(),
            ..Default::default()
        }
    }

    fn tool_reply(name: &str, args: &str, id: &str) -> LlmReply {
        LlmReply {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            }],
            ..Default::default()
        }
    }

    fn harness(
        model: Arc<dyn ChatModel>,
        approval_ttl_secs: u64,
    ) -> (tempfile::TempDir, AgentRunner, RunContext, Arc<RecordingTransport>) {
        let dir = tempfile::tempdir().expect("tmp");
        let workspace = WorkspaceManager::new(dir.path().to_path_buf())
            .workspace("T01")
            .expect("ws");
        let rate_limiter = Arc::new(RateLimiter::new());
        let transport = Arc::new(RecordingTransport::default());
        let llm = LlmSettings::default();
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&model),
            llm.model_for(ModelTier::Fast),
            Arc::clone(&rate_limiter),
        ));
        let shared = Arc::new(AgentShared {
            model,
            llm,
            rate_limiter,
            approvals: Arc::new(ApprovalHub::new()),
            transport: transport.clone(),
            internal_tools: Arc::new(default_registry(50)),
            integrations: Arc::new(NullIntegrationClient),
            subagents: Arc::new(default_subagents()),
            supervisor,
            progress: Arc::new(crate::agent::progress::ProgressPool::new()),
            agent_settings: AgentSettings {
                approval_ttl_secs,
                tool_budget_secs: 5,
                ..AgentSettings::default()
            },
        });
        let ctx = RunContext {
            workspace,
            team_id: "T01".to_string(),
            channel_id: "C01".to_string(),
            thread_id: None,
            user_id: "U01".to_string(),
            intent: Intent::Chat,
            modules: Vec::new(),
            tier: ModelTier::Fast,
            history: Vec::new(),
            is_scheduled: false,
            cancel: CancellationToken::new(),
            task: None,
        };
        (dir, AgentRunner::new(shared), ctx, transport)
    }

    fn harness_default(
        model: Arc<dyn ChatModel>,
    ) -> (tempfile::TempDir, AgentRunner, RunContext, Arc<RecordingTransport>) {
        harness(model, 300)
    }

    #[tokio::test]
    async fn plain_reply_terminates_first_turn() {
        let model = ScriptedModel::new(vec![text_reply("hey, here's the answer")]);
        let (_dir, runner, ctx, _) = harness_default(model);
        let out = runner.run(&ctx, "quick one", None, None, 0).await.unwrap();
        assert_eq!(out.text, "hey, here's the answer");
        assert_eq!(out.turns, 1);
        assert!(!out.cancelled);
    }

    #[tokio::test]
    async fn empty_twice_escalates_one_tier() {
        let model = ScriptedModel::new(vec![
            LlmReply::default(),
            LlmReply::default(),
            text_reply("recovered"),
        ]);
        let (_dir, runner, ctx, _) = harness_default(model);
        let out = runner.run(&ctx, "hello there", None, None, 0).await.unwrap();
        assert_eq!(out.text, "recovered");
        // fast escalates exactly one step
        assert_eq!(out.tier, ModelTier::Default);
    }

    #[tokio::test]
    async fn identical_calls_break_the_loop_with_partial() {
        let call = || tool_reply("lucy_list_crons", r#"{"q":"x"}"#, "c1");
        let model = ScriptedModel::new(vec![call(), call(), call()]);
        let (_dir, runner, ctx, _) = harness_default(model);
        let out = runner.run(&ctx, "look this up", None, None, 0).await.unwrap();
        assert!(out.text.contains("partway"));
        // humanized name, never the raw one
        assert!(!out.text.contains("lucy_list_crons"));
    }

    #[tokio::test]
    async fn tool_results_are_folded_and_run_finishes() {
        let model = ScriptedModel::new(vec![
            tool_reply("lucy_recall", "{}", "c1"),
            text_reply("nothing remembered yet, clean slate"),
        ]);
        let (_dir, runner, ctx, _) = harness_default(model);
        let out = runner.run(&ctx, "what do you know", None, None, 0).await.unwrap();
        assert_eq!(out.tool_calls, 1);
        assert!(out.text.contains("clean slate"));
    }

    #[tokio::test]
    async fn narration_gets_corrected_then_finishes() {
        let model = ScriptedModel::new(vec![
            text_reply("I'll search for the file now"),
            text_reply("found it: the Q3 report"),
        ]);
        let (_dir, runner, ctx, _) = harness_default(model);
        let out = runner.run(&ctx, "find the report", None, None, 0).await.unwrap();
        assert!(out.text.contains("Q3"));
        assert_eq!(out.turns, 2);
    }

    #[tokio::test]
    async fn destructive_call_expires_without_approval() {
        let model = ScriptedModel::new(vec![tool_reply(
            "GMAIL_SEND_EMAIL",
            r#"{"to":"a@b.c"}"#,
            "c1",
        )]);
        // 0-second TTL: expiry is immediate
        let (_dir, runner, mut ctx, transport) = harness(model, 0);
        let task = Arc::new(Mutex::new(Task::new(
            "T01",
            "C01",
            None,
            "U01",
            "tool_use",
            ModelTier::Fast,
        )));
        ctx.task = Some(Arc::clone(&task));
        let err = runner
            .run(&ctx, "send that email", None, None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LucyError::ApprovalExpired { .. }));
        assert_eq!(task.lock().state, TaskState::Failed);
        assert_eq!(task.lock().failure_reason.as_deref(), Some("approval-expired"));
        // an approval prompt was posted
        assert!(transport
            .posts
            .lock()
            .iter()
            .any(|p| p.contains("go ahead")));
    }

    #[tokio::test]
    async fn cancellation_resolves_gracefully() {
        let model = ScriptedModel::new(vec![text_reply("should never be seen")]);
        let (_dir, runner, ctx, transport) = harness_default(model);
        ctx.cancel.cancel();
        let out = runner.run(&ctx, "do a thing", None, None, 0).await.unwrap();
        assert!(out.cancelled);
        assert!(transport.posts.lock().iter().any(|p| p.contains("Stopped")));
    }

    #[tokio::test]
    async fn tiers_never_regress_within_a_run() {
        // empty, empty (escalate), then done: the tier sequence must be
        // non-decreasing
        let model = ScriptedModel::new(vec![
            LlmReply::default(),
            LlmReply::default(),
            text_reply("ok"),
        ]);
        let (_dir, runner, mut ctx, _) = harness_default(model);
        ctx.tier = ModelTier::Code;
        let out = runner.run(&ctx, "hello", None, None, 0).await.unwrap();
        assert!(out.tier.rank() >= ModelTier::Code.rank());
    }

    #[test]
    fn context_trim_preserves_system_messages() {
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..60 {
            messages.push(ChatMessage::user(format!("m{}", i)));
        }
        trim_context(&mut messages);
        assert_eq!(messages.len(), MAX_CONTEXT_MESSAGES);
        assert_eq!(messages[0].role, MessageRole::System);
        // newest survive
        assert!(messages.last().unwrap().content.contains("59"));
    }

    #[test]
    fn payload_trim_prefers_tool_messages() {
        let mut messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::tool("c1", "x".repeat(70_000)),
            ChatMessage::tool("c2", "y".repeat(70_000)),
            ChatMessage::user("keep me"),
        ];
        trim_payload(&mut messages);
        let total: usize = messages.iter().map(|m| m.char_weight()).sum();
        assert!(total <= MAX_PAYLOAD_CHARS);
        assert!(messages.iter().any(|m| m.content == "keep me"));
    }

    #[test]
    fn signatures_normalize_argument_order() {
        let a = ToolCall {
            id: "1".into(),
            name: "send".into(),
            arguments: r#"{"b":2,"a":1}"#.into(),
        };
        let b = ToolCall {
            id: "2".into(),
            name: "send".into(),
            arguments: r#"{"a":1,"b":2}"#.into(),
        };
        assert_eq!(call_signature(&a), call_signature(&b));
    }
}
