//! Orchestrator
//!
//! The seam between inbound chat events and everything else: dedup,
//! pipeline routing, queue admission, the per-thread lock that keeps one
//! agent per conversation, task bookkeeping, output processing and the
//! reply post. Also the executor the scheduler calls for cron-initiated
//! agent runs.

use crate::agent::internal::default_registry;
use crate::agent::progress::ProgressPool;
use crate::agent::{
    default_subagents, AgentRunner, AgentShared, IntegrationClient, RunContext,
    MAX_CONTEXT_MESSAGES,
};
use crate::approval::{ApprovalDecision, ApprovalHub};
use crate::config::Settings;
use crate::error::{LucyError, Result};
use crate::llm::{ChatMessage, ChatModel, ModelTier};
use crate::pipeline::{classify, Classification, Disposition, FastCategory, VariationPool};
use crate::queue::{Priority, RequestQueue};
use crate::sandbox::Sandbox;
use crate::scheduler::{is_suppressed, CronJobSpec, JobExecutor, SystemJob};
use crate::supervisor::Supervisor;
use crate::task::Task;
use crate::transport::{ChatTransport, EventDeduper, InboundEvent, OutboundMessage};
use crate::workspace::{Workspace, WorkspaceManager};
use crate::{output, pipeline};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

struct ActiveRun {
    cancel: CancellationToken,
    hint: String,
}

/// Accumulated conversation state for one thread, kept alongside the
/// thread lock. Depth counts messages inside the thread, the tool flag
/// remembers whether the last completed run called any tools, and the
/// history is replayed into the next run's context window.
#[derive(Default)]
struct ThreadState {
    depth: u32,
    last_had_tools: bool,
    /// Prior turns, newest last, capped at [`MAX_CONTEXT_MESSAGES`]
    history: Vec<ChatMessage>,
}

/// Central wiring for one Lucy process
pub struct Orchestrator {
    settings: Settings,
    workspaces: Arc<WorkspaceManager>,
    queue: Arc<RequestQueue>,
    runner: Arc<AgentRunner>,
    shared: Arc<AgentShared>,
    transport: Arc<dyn ChatTransport>,
    deduper: EventDeduper,
    fast_pool: Arc<VariationPool>,
    /// One agent per thread at a time
    thread_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Running work per thread, for status and cancellation
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
    /// Conversation state per thread: depth, tool flag, rolling history
    threads: Mutex<HashMap<String, ThreadState>>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn ChatTransport>,
        integrations: Arc<dyn IntegrationClient>,
        _sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        let workspaces = Arc::new(WorkspaceManager::new(settings.workspace_root.clone()));
        let rate_limiter = Arc::new(crate::rate_limiter::RateLimiter::new());
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&model),
            settings.llm.model_for(ModelTier::Fast),
            Arc::clone(&rate_limiter),
        ));
        let shared = Arc::new(AgentShared {
            model,
            llm: settings.llm.clone(),
            rate_limiter,
            approvals: Arc::new(ApprovalHub::new()),
            transport: Arc::clone(&transport),
            internal_tools: Arc::new(default_registry(settings.scheduler.daily_fire_warning)),
            integrations,
            subagents: Arc::new(default_subagents()),
            supervisor,
            progress: Arc::new(ProgressPool::new()),
            agent_settings: settings.agent.clone(),
        });
        let queue = Arc::new(RequestQueue::new(settings.queue.clone()));
        Self {
            runner: Arc::new(AgentRunner::new(Arc::clone(&shared))),
            workspaces,
            queue,
            shared,
            transport,
            deduper: EventDeduper::new(),
            fast_pool: Arc::new(VariationPool::new()),
            thread_locks: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            threads: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn workspaces(&self) -> Arc<WorkspaceManager> {
        Arc::clone(&self.workspaces)
    }

    pub fn queue(&self) -> Arc<RequestQueue> {
        Arc::clone(&self.queue)
    }

    pub fn approvals(&self) -> Arc<ApprovalHub> {
        Arc::clone(&self.shared.approvals)
    }

    /// Start background machinery (queue workers)
    pub fn start(&self) {
        self.queue.start();
    }

    /// Drain and stop
    pub async fn stop(&self) {
        self.queue
            .shutdown(std::time::Duration::from_secs(
                self.settings.queue.drain_deadline_secs,
            ))
            .await;
    }

    /// Resolve a pending approval from a chat interaction
    pub fn resolve_approval(&self, id: Uuid, approved: bool) -> bool {
        self.shared.approvals.resolve(
            id,
            if approved {
                ApprovalDecision::Approved
            } else {
                ApprovalDecision::Rejected
            },
        )
    }

    fn thread_key(event_team: &str, channel: &str, thread: Option<&str>) -> String {
        format!("{}:{}:{}", event_team, channel, thread.unwrap_or(channel))
    }

    /// Entry point for one inbound chat event
    pub async fn handle_event(self: Arc<Self>, event: InboundEvent) -> Result<()> {
        // re-delivery inside the 30s window is a no-op
        if self.deduper.is_duplicate(&event.timestamp_unique) {
            return Ok(());
        }

        let workspace = self.workspaces.workspace(&event.team_id)?;
        let thread_key = Self::thread_key(&event.team_id, &event.channel_id, event.thread_id.as_deref());
        // read the thread's real state, then count this message toward its
        // depth; top-level channel messages stay at depth zero
        let (thread_depth, prior_had_tools) = {
            let mut threads = self.threads.lock();
            let state = threads.entry(thread_key.clone()).or_default();
            if event.thread_id.is_some() && state.depth == 0 {
                // a threaded reply always sits under a parent message
                state.depth = 1;
            }
            let snapshot = (state.depth, state.last_had_tools);
            if event.thread_id.is_some() {
                state.depth += 1;
            }
            snapshot
        };
        let (has_active, active_hint) = {
            let active = self.active.lock();
            match active.get(&thread_key) {
                Some(run) => (true, run.hint.clone()),
                None => (false, String::new()),
            }
        };

        let disposition = pipeline::decide(
            &event.text,
            thread_depth,
            prior_had_tools,
            has_active,
            &self.fast_pool,
        );
        match disposition {
            Disposition::FastReply(text) => {
                self.reply(&event, &text).await;
                Ok(())
            }
            Disposition::StatusReply => {
                let text = format!("Still working on \"{}\". I'll post here the moment it's done.", active_hint);
                self.reply(&event, &text).await;
                Ok(())
            }
            Disposition::CancelTask => {
                if let Some(run) = self.active.lock().get(&thread_key) {
                    run.cancel.cancel();
                }
                self.reply(&event, "Stopping that now.").await;
                Ok(())
            }
            Disposition::RespondIndependently(classification)
            | Disposition::Admit(classification) => {
                Self::admit(&self, event, workspace, classification, thread_key).await
            }
        }
    }

    async fn admit(
        this: &Arc<Self>,
        event: InboundEvent,
        workspace: Arc<Workspace>,
        classification: Classification,
        thread_key: String,
    ) -> Result<()> {
        let priority = match classification.tier {
            ModelTier::Fast => Priority::High,
            _ => Priority::Normal,
        };
        let orchestrator = Arc::clone(this);
        let request_id = event.timestamp_unique.clone();
        let handler_event = event.clone();
        let admitted = this.queue.enqueue(
            &event.team_id,
            priority,
            &request_id,
            Box::pin(async move {
                orchestrator
                    .run_admitted(handler_event, workspace, classification, thread_key)
                    .await;
            }),
        );
        if !admitted {
            warn!(team = event.team_id, "queue rejected request");
            this.reply(
                &event,
                "I'm at capacity right now; give me a few minutes and ask again.",
            )
            .await;
        } else if this.queue.is_busy() {
            this.reply(&event, "On it; I have a short backlog so this may take a little longer.")
                .await;
        }
        Ok(())
    }

    async fn run_admitted(
        self: Arc<Self>,
        event: InboundEvent,
        workspace: Arc<Workspace>,
        classification: Classification,
        thread_key: String,
    ) {
        // one agent per thread
        let lock = {
            let mut locks = self.thread_locks.lock();
            Arc::clone(
                locks
                    .entry(thread_key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _thread_guard = lock.lock().await;

        let cancel = CancellationToken::new();
        let hint: String = event.text.chars().take(60).collect();
        self.active.lock().insert(
            thread_key.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                hint,
            },
        );

        let task = Arc::new(Mutex::new(Task::new(
            event.team_id.clone(),
            event.channel_id.clone(),
            event.thread_id.clone(),
            event.user_id.clone(),
            classification.intent.as_str(),
            classification.tier,
        )));
        // replay what this thread has already said, under the thread lock
        // so back-to-back tasks see each other's turns
        let history = {
            let threads = self.threads.lock();
            threads
                .get(&thread_key)
                .map(|t| t.history.clone())
                .unwrap_or_default()
        };
        let ctx = RunContext {
            workspace,
            team_id: event.team_id.clone(),
            channel_id: event.channel_id.clone(),
            thread_id: event.thread_id.clone(),
            user_id: event.user_id.clone(),
            intent: classification.intent,
            modules: classification.modules.clone(),
            tier: classification.tier,
            history,
            is_scheduled: false,
            cancel,
            task: Some(Arc::clone(&task)),
        };

        let result = self.runner.run(&ctx, &event.text, None, None, 0).await;
        self.active.lock().remove(&thread_key);

        match result {
            Ok(outcome) => {
                if outcome.cancelled {
                    self.record_exchange(
                        &thread_key,
                        Some(&event.text),
                        &outcome.text,
                        outcome.tool_calls > 0,
                    );
                } else {
                    let processed = output::process(&outcome.text);
                    self.reply(&event, &processed).await;
                    self.record_exchange(
                        &thread_key,
                        Some(&event.text),
                        &processed,
                        outcome.tool_calls > 0,
                    );
                    let mut task = task.lock();
                    if !task.state.is_terminal() {
                        let _ = task.complete(processed.as_str());
                    }
                    let _ = ctx.workspace.log_activity(&format!(
                        "Completed task ({}, {} turns)",
                        task.intent, outcome.turns
                    ));
                }
            }
            Err(err) => {
                let kind = pipeline::classify_error_for_degradation(&err);
                info!(?kind, "run failed terminally: {}", err);
                let notice = err.user_message();
                self.reply(&event, &notice).await;
                self.record_exchange(&thread_key, Some(&event.text), &notice, false);
                let mut task = task.lock();
                if !task.state.is_terminal() {
                    let _ = task.fail(err.to_string());
                }
            }
        }
    }

    /// Fold one finished exchange into the thread's conversation state
    fn record_exchange(
        &self,
        thread_key: &str,
        user_text: Option<&str>,
        reply: &str,
        used_tools: bool,
    ) {
        let mut threads = self.threads.lock();
        let state = threads.entry(thread_key.to_string()).or_default();
        state.last_had_tools = used_tools;
        if let Some(user_text) = user_text {
            state.history.push(ChatMessage::user(user_text));
        }
        state.history.push(ChatMessage::assistant(reply));
        while state.history.len() > MAX_CONTEXT_MESSAGES {
            state.history.remove(0);
        }
    }

    async fn reply(&self, event: &InboundEvent, text: &str) {
        let message = OutboundMessage::text_reply(
            event.team_id.clone(),
            event.channel_id.clone(),
            event.thread_id.clone(),
            text,
        );
        if let Err(err) = self.transport.post_message(message).await {
            warn!("failed to post reply: {}", err);
        }
    }
}

#[async_trait]
impl JobExecutor for Orchestrator {
    async fn run_scheduled_instruction(
        &self,
        workspace: Arc<Workspace>,
        job: &CronJobSpec,
        instruction: &str,
    ) -> Result<String> {
        // a scheduled run posts into the delivery channel's conversation,
        // so it reads and extends that channel's thread state
        let thread_key = Self::thread_key(workspace.id(), &job.delivery_channel, None);
        let (thread_depth, prior_had_tools, history) = {
            let threads = self.threads.lock();
            threads
                .get(&thread_key)
                .map(|t| (t.depth, t.last_had_tools, t.history.clone()))
                .unwrap_or((0, false, Vec::new()))
        };
        let classification = classify(&job.description, thread_depth, prior_had_tools);
        let ctx = RunContext {
            workspace: Arc::clone(&workspace),
            team_id: workspace.id().to_string(),
            channel_id: job.delivery_channel.clone(),
            thread_id: None,
            user_id: job.requesting_user.clone(),
            intent: classification.intent,
            modules: classification.modules,
            tier: classification.tier,
            history,
            is_scheduled: true,
            cancel: CancellationToken::new(),
            task: None,
        };
        let outcome = self.runner.run(&ctx, instruction, None, None, 0).await?;
        if outcome.cancelled {
            return Err(LucyError::Cancelled {
                reason: "scheduled run cancelled".to_string(),
            });
        }
        // suppressed responses never reach the channel, so they don't
        // belong in its conversation either
        if !is_suppressed(&outcome.text) {
            self.record_exchange(&thread_key, None, &outcome.text, outcome.tool_calls > 0);
        }
        Ok(outcome.text)
    }

    async fn run_system_job(&self, job: SystemJob) {
        match job {
            SystemJob::PoolRefresh => {
                // regenerate the greeting pool with the fast model; a cold
                // pool falls back to hardcoded lines, so failure is benign
                let request = crate::llm::ChatRequest::new(
                    self.settings.llm.model_for(ModelTier::Fast),
                    vec![crate::llm::ChatMessage::user(
                        "Write 5 short, warm, distinct one-line replies to a coworker \
                         saying hi. One per line, no numbering.",
                    )],
                )
                .with_temperature(0.9);
                if let Ok(reply) = self.shared.model.chat(&request).await {
                    let lines: Vec<String> = reply
                        .content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect();
                    if !lines.is_empty() {
                        self.fast_pool.refresh(FastCategory::Greeting, lines);
                    }
                }
                // sweep approvals past their TTL on the same cadence
                self.shared.approvals.purge_expired(
                    std::time::Duration::from_secs(self.settings.agent.approval_ttl_secs),
                );
            }
            // message sync and memory consolidation belong to outer
            // collaborators; the hook exists so a deployment can wire them
            SystemJob::MessageSync | SystemJob::MemoryConsolidation => {}
        }
    }
}
