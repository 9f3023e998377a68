//! Per-request trace records
//!
//! One Trace per Task: spans for every LLM call, tool call and checkpoint,
//! the model chain as escalation happened, token totals, and the tool names
//! touched. Serialized as one JSON line per record into the workspace's
//! thread log.

use crate::llm::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// One timed unit inside a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Observability record for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: Uuid,
    pub task_id: Uuid,
    pub workspace_id: String,
    pub intent: String,
    /// Models actually used, in order of first use
    pub model_chain: Vec<String>,
    /// Tool names invoked, in call order
    pub tool_calls: Vec<String>,
    pub spans: Vec<Span>,
    pub usage: TokenUsage,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(task_id: Uuid, workspace_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            workspace_id: workspace_id.into(),
            intent: intent.into(),
            model_chain: Vec::new(),
            tool_calls: Vec::new(),
            spans: Vec::new(),
            usage: TokenUsage::default(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Record a model the run used; consecutive duplicates collapse.
    pub fn note_model(&mut self, model: &str) {
        if self.model_chain.last().map(String::as_str) != Some(model) {
            self.model_chain.push(model.to_string());
        }
    }

    pub fn note_tool(&mut self, name: &str) {
        self.tool_calls.push(name.to_string());
    }

    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.usage.add(usage);
    }

    /// Record a completed span measured from `start`
    pub fn record_span(&mut self, name: &str, start: Instant, ok: bool, detail: Option<String>) {
        self.spans.push(Span {
            name: name.to_string(),
            started_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            ok,
            detail,
        });
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Single JSONL line for the thread log
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_chain_collapses_consecutive_duplicates() {
        let mut trace = Trace::new(Uuid::new_v4(), "T01", "lookup");
        trace.note_model("fast-1");
        trace.note_model("fast-1");
        trace.note_model("big-1");
        trace.note_model("fast-1");
        assert_eq!(trace.model_chain, vec!["fast-1", "big-1", "fast-1"]);
    }

    #[test]
    fn json_line_is_single_line() {
        let mut trace = Trace::new(Uuid::new_v4(), "T01", "chat");
        trace.record_span("llm_call", Instant::now(), true, None);
        trace.finish();
        let line = trace.to_json_line();
        assert!(!line.contains('\n'));
        let parsed: Trace = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.spans.len(), 1);
    }
}
