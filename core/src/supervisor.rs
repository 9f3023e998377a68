//! Supervisor
//!
//! A cheap meta-model that plans complex tasks up front and issues a
//! single-letter decision at checkpoints while the agent loop runs. Plan
//! and turn reports flow in; a decision letter flows out. Supervisor calls
//! share the same rate limiter as the main agent and always use the fast
//! tier.

use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::pipeline::Intent;
use crate::rate_limiter::RateLimiter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Checkpoint cadence: every this many turns
pub const CHECK_EVERY_TURNS: usize = 3;
/// Or after this much wall time since the last check
pub const CHECK_EVERY_SECS: u64 = 60;
/// No checkpoint before this turn
pub const MIN_CHECK_TURN: usize = 2;

/// One step of a task plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tool: Option<String>,
}

/// The plan a complex task runs under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub success_criteria: String,
}

impl TaskPlan {
    /// Render for injection as a system message
    pub fn render(&self) -> String {
        let mut out = format!("<plan>\nGoal: {}\n", self.goal);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}", i + 1, step.description));
            if let Some(tool) = &step.expected_tool {
                out.push_str(&format!(" (likely: {})", tool));
            }
            out.push('\n');
        }
        out.push_str(&format!("Done when: {}\n</plan>", self.success_criteria));
        out
    }
}

/// What the agent reports about one turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub turn: usize,
    pub tool_name: String,
    /// First 80 chars of the arguments
    pub tool_args_summary: String,
    /// First 100 chars of the result
    pub result_preview: String,
    pub had_error: bool,
    pub error_summary: Option<String>,
}

impl TurnReport {
    pub fn new(
        turn: usize,
        tool_name: &str,
        args: &str,
        result: &str,
        had_error: bool,
    ) -> Self {
        Self {
            turn,
            tool_name: tool_name.to_string(),
            tool_args_summary: clip(args, 80),
            result_preview: clip(result, 100),
            had_error,
            error_summary: had_error.then(|| clip(result, 100)),
        }
    }
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Checkpoint decision, one letter each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// C: on track
    Continue,
    /// I: inject corrective guidance
    Intervene,
    /// R: discard the plan and regenerate
    Replan,
    /// E: advance the model tier
    Escalate,
    /// A: ask the user a clarifying question and pause
    AskUser,
    /// X: stop gracefully
    Abort,
}

/// Parse the first decision letter out of a model reply. Anything
/// unrecognizable is treated as Continue: a confused supervisor must never
/// kill a healthy run.
pub fn parse_decision(reply: &str) -> Decision {
    for c in reply.chars() {
        match c.to_ascii_uppercase() {
            'C' => return Decision::Continue,
            'I' => return Decision::Intervene,
            'R' => return Decision::Replan,
            'E' => return Decision::Escalate,
            'A' => return Decision::AskUser,
            'X' => return Decision::Abort,
            c if c.is_ascii_alphabetic() => return Decision::Continue,
            _ => continue,
        }
    }
    Decision::Continue
}

/// Is a checkpoint due at this turn?
pub fn checkpoint_due(turn: usize, since_last_check: Duration) -> bool {
    turn >= MIN_CHECK_TURN
        && (turn % CHECK_EVERY_TURNS == 0 || since_last_check.as_secs() >= CHECK_EVERY_SECS)
}

/// Intents that never get a plan
fn skips_planning(intent: Intent) -> bool {
    matches!(
        intent,
        Intent::Greeting | Intent::Confirmation | Intent::Followup | Intent::Chat | Intent::Command
    )
}

/// Does this request warrant a plan before the loop starts?
pub fn needs_plan(intent: Intent, message: &str) -> bool {
    if skips_planning(intent) {
        return false;
    }
    // Short imperatives don't need ceremony.
    message.split_whitespace().count() >= 8
}

/// The planning and checkpoint evaluator
pub struct Supervisor {
    model: Arc<dyn ChatModel>,
    /// Fast-tier model id
    model_id: String,
    rate_limiter: Arc<RateLimiter>,
}

impl Supervisor {
    pub fn new(model: Arc<dyn ChatModel>, model_id: String, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            model,
            model_id,
            rate_limiter,
        }
    }

    /// Produce a plan for a complex task. A model failure degrades to a
    /// single-step plan rather than blocking the run.
    pub async fn create_plan(&self, message: &str) -> Result<TaskPlan> {
        let prompt = format!(
            "Plan this request as JSON with keys goal, steps (array of \
             {{description, expected_tool}}), success_criteria. Three to six \
             steps. Reply with JSON only.\n\nRequest: {}",
            message
        );
        self.rate_limiter
            .acquire_model(&self.model_id, Duration::from_secs(10))
            .await;
        let request = ChatRequest::new(
            self.model_id.clone(),
            vec![ChatMessage::user(prompt)],
        )
        .with_temperature(0.2)
        .with_max_tokens(600);

        match self.model.chat(&request).await {
            Ok(reply) => Ok(parse_plan(&reply.content, message)),
            Err(err) => {
                warn!("plan generation failed, using fallback: {}", err);
                Ok(fallback_plan(message))
            }
        }
    }

    /// Evaluate progress and return a decision letter
    #[allow(clippy::too_many_arguments)]
    pub async fn evaluate(
        &self,
        plan: Option<&TaskPlan>,
        recent: &[TurnReport],
        total_errors: usize,
        consecutive_errors: usize,
        elapsed: Duration,
        response_len: usize,
        current_model: &str,
    ) -> Decision {
        let mut context = String::new();
        if let Some(plan) = plan {
            context.push_str(&format!("Goal: {}\n", plan.goal));
        }
        for report in recent.iter().rev().take(3).rev() {
            context.push_str(&format!(
                "turn {}: {}({}) -> {}{}\n",
                report.turn,
                report.tool_name,
                report.tool_args_summary,
                report.result_preview,
                if report.had_error { " [error]" } else { "" },
            ));
        }
        context.push_str(&format!(
            "errors: {} total, {} consecutive; elapsed: {}s; drafted: {} chars; model: {}\n",
            total_errors,
            consecutive_errors,
            elapsed.as_secs(),
            response_len,
            current_model,
        ));

        let prompt = format!(
            "You monitor an agent run. Reply with exactly one letter:\n\
             C continue, I intervene with guidance, R replan, E escalate \
             model, A ask the user, X abort.\n\n{}",
            context
        );

        self.rate_limiter
            .acquire_model(&self.model_id, Duration::from_secs(10))
            .await;
        let request = ChatRequest::new(
            self.model_id.clone(),
            vec![ChatMessage::user(prompt)],
        )
        .with_temperature(0.0)
        .with_max_tokens(4);

        match self.model.chat(&request).await {
            Ok(reply) => {
                let decision = parse_decision(&reply.content);
                debug!(?decision, "supervisor checkpoint");
                decision
            }
            Err(err) => {
                warn!("supervisor evaluation failed, continuing: {}", err);
                Decision::Continue
            }
        }
    }
}

fn fallback_plan(message: &str) -> TaskPlan {
    TaskPlan {
        goal: clip(message, 200),
        steps: vec![PlanStep {
            description: "Work the request end to end".to_string(),
            expected_tool: None,
        }],
        success_criteria: "The user's ask is answered with verified results".to_string(),
    }
}

/// Pull a JSON object out of a model reply, tolerating code fences and
/// prose around it.
fn parse_plan(reply: &str, message: &str) -> TaskPlan {
    let candidate = reply
        .split("```json")
        .nth(1)
        .and_then(|s| s.split("```").next())
        .map(str::trim)
        .or_else(|| {
            let start = reply.find('{')?;
            let end = reply.rfind('}')?;
            (end > start).then(|| reply[start..=end].trim())
        });

    match candidate.and_then(|c| serde_json::from_str::<TaskPlan>(c).ok()) {
        Some(plan) if !plan.goal.is_empty() => plan,
        _ => fallback_plan(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_letters_parse() {
        assert_eq!(parse_decision("C"), Decision::Continue);
        assert_eq!(parse_decision("  e\n"), Decision::Escalate);
        assert_eq!(parse_decision("X: hopeless"), Decision::Abort);
        assert_eq!(parse_decision("R"), Decision::Replan);
        assert_eq!(parse_decision("A"), Decision::AskUser);
        assert_eq!(parse_decision("I"), Decision::Intervene);
    }

    #[test]
    fn garbage_decisions_default_to_continue() {
        assert_eq!(parse_decision(""), Decision::Continue);
        assert_eq!(parse_decision("???"), Decision::Continue);
        assert_eq!(parse_decision("Well, the agent seems fine"), Decision::Continue);
    }

    #[test]
    fn checkpoint_cadence() {
        assert!(!checkpoint_due(1, Duration::from_secs(120)));
        assert!(!checkpoint_due(2, Duration::from_secs(10)));
        assert!(checkpoint_due(3, Duration::ZERO));
        assert!(checkpoint_due(4, Duration::from_secs(61)));
        assert!(!checkpoint_due(4, Duration::from_secs(10)));
        assert!(checkpoint_due(6, Duration::ZERO));
    }

    #[test]
    fn trivial_intents_skip_planning() {
        assert!(!needs_plan(Intent::Greeting, "hi there my friend how are you today"));
        assert!(!needs_plan(Intent::Followup, "and what about the other one too?"));
        assert!(!needs_plan(
            Intent::Reasoning,
            "compare these please"
        ));
        assert!(needs_plan(
            Intent::Reasoning,
            "compare vendor A and vendor B on price support and reliability"
        ));
    }

    #[test]
    fn plan_parses_from_fenced_json() {
        let reply = "Here you go:\n```json\n{\"goal\":\"g\",\"steps\":[{\"description\":\"s1\"}],\"success_criteria\":\"done\"}\n```";
        let plan = parse_plan(reply, "msg");
        assert_eq!(plan.goal, "g");
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn unparseable_plan_falls_back() {
        let plan = parse_plan("no json here", "do the thing");
        assert_eq!(plan.goal, "do the thing");
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn turn_report_clips_fields() {
        let report = TurnReport::new(3, "search", &"a".repeat(200), &"b".repeat(300), true);
        assert_eq!(report.tool_args_summary.len(), 80);
        assert_eq!(report.result_preview.len(), 100);
        assert!(report.error_summary.is_some());
    }
}
