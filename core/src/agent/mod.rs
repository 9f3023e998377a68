//! Agent execution engine
//!
//! The bounded multi-turn loop at the heart of the system: model turns,
//! parallel tool dispatch, loop and stuck detection, human approval for
//! destructive actions, supervisor checkpoints, monotonic model
//! escalation, and graceful partial results when a run cannot finish.

pub mod dispatch;
pub mod gates;
pub mod internal;
pub mod partial;
pub mod progress;
pub mod runner;
pub mod subagent;
pub mod tool;

pub use runner::{AgentRunner, RunContext, RunOutcome};
pub use subagent::{default_subagents, SubAgentRegistry};
pub use tool::{
    kind_of, IntegrationClient, NullIntegrationClient, Tool, ToolContext, ToolKind, ToolOutcome,
    ToolRegistry,
};

use crate::approval::ApprovalHub;
use crate::config::{AgentSettings, LlmSettings};
use crate::llm::ChatModel;
use crate::rate_limiter::RateLimiter;
use crate::supervisor::Supervisor;
use crate::transport::ChatTransport;
use progress::ProgressPool;
use std::sync::Arc;

// Soft limits. None of these is a hard timeout; governance is the
// supervisor's job and the wall clock is a catastrophic safety net.
pub const MAX_TOOL_TURNS: usize = 50;
pub const MAX_CONTEXT_MESSAGES: usize = 40;
pub const TOOL_RESULT_MAX_CHARS: usize = 16_000;
pub const TOOL_RESULT_SUMMARY_THRESHOLD: usize = 8_000;
pub const MAX_PAYLOAD_CHARS: usize = 120_000;
/// Identical (name, args) signatures tolerated before the loop breaks
pub const LOOP_SIGNATURE_LIMIT: usize = 3;
/// Calls allowed per tool name per run; search and workbench tools exempt
pub const PER_TOOL_NAME_CAP: usize = 4;
/// Consecutive error results before an intervention plus escalation
pub const STUCK_ERROR_LIMIT: usize = 3;

/// Everything the loop needs, shared across runs
pub struct AgentShared {
    pub model: Arc<dyn ChatModel>,
    pub llm: LlmSettings,
    pub rate_limiter: Arc<RateLimiter>,
    pub approvals: Arc<ApprovalHub>,
    pub transport: Arc<dyn ChatTransport>,
    pub internal_tools: Arc<ToolRegistry>,
    pub integrations: Arc<dyn IntegrationClient>,
    pub subagents: Arc<SubAgentRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub progress: Arc<ProgressPool>,
    pub agent_settings: AgentSettings,
}
