//! Task lifecycle
//!
//! A Task is one agent execution unit, owned by exactly one workspace.
//! State moves along a DAG and never backwards; exactly one terminal state
//! is ever reached. TaskSteps record the ordered units of work inside it.

use crate::llm::{ModelTier, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Lifecycle states. Terminal: Completed, Failed, Cancelled, Timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    PendingApproval,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled | TaskState::Timeout
        )
    }

    /// Legal forward edges of the lifecycle DAG
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Created, PendingApproval) | (Created, Running) => true,
            (Created, Cancelled) => true,
            (PendingApproval, Running) | (PendingApproval, Failed) | (PendingApproval, Cancelled) => true,
            (Running, PendingApproval) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) | (Running, Timeout) => true,
            _ => false,
        }
    }
}

/// Kind of work one TaskStep records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    LlmCall,
    ToolUse,
    ApprovalWait,
    SubAgent,
}

/// Ordered child of a Task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub seq: u32,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Short outcome summary, or the error string on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default)]
    pub had_error: bool,
}

impl TaskStep {
    pub fn begin(seq: u32, kind: StepKind) -> Self {
        Self {
            seq,
            kind,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            had_error: false,
        }
    }

    pub fn finish(&mut self, outcome: impl Into<String>) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(outcome.into());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(error.into());
        self.had_error = true;
    }
}

/// A single agent execution unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workspace_id: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub requester: String,
    /// Classified intent tag, as produced by the pipeline
    pub intent: String,
    pub tier: ModelTier,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Structured failure reason, e.g. "approval-expired"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub steps: Vec<TaskStep>,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Set for scheduler-initiated runs
    #[serde(default)]
    pub is_scheduled: bool,
}

impl Task {
    pub fn new(
        workspace_id: impl Into<String>,
        channel_id: impl Into<String>,
        thread_id: Option<String>,
        requester: impl Into<String>,
        intent: impl Into<String>,
        tier: ModelTier,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            channel_id: channel_id.into(),
            thread_id,
            requester: requester.into(),
            intent: intent.into(),
            tier,
            state: TaskState::Created,
            created_at: now,
            updated_at: now,
            result: None,
            failure_reason: None,
            steps: Vec::new(),
            usage: TokenUsage::default(),
            is_scheduled: false,
        }
    }

    /// Apply a state transition, rejecting anything off the DAG.
    pub fn transition(&mut self, next: TaskState) -> crate::error::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(crate::error::LucyError::Internal {
                message: format!("illegal task transition {:?} -> {:?}", self.state, next),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Begin a new ordered step and return its sequence number
    pub fn begin_step(&mut self, kind: StepKind) -> u32 {
        let seq = self.steps.len() as u32;
        self.steps.push(TaskStep::begin(seq, kind));
        seq
    }

    pub fn step_mut(&mut self, seq: u32) -> Option<&mut TaskStep> {
        self.steps.get_mut(seq as usize)
    }

    pub fn complete(&mut self, result: impl Into<String>) -> crate::error::Result<()> {
        self.result = Some(result.into());
        self.transition(TaskState::Completed)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> crate::error::Result<()> {
        self.failure_reason = Some(reason.into());
        self.transition(TaskState::Failed)
    }
}
