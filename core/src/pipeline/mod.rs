//! Message pipeline
//!
//! Turns a raw inbound event into one of: an immediate fast-path reply, a
//! no-op (duplicate or cancellation), an independent aside, or an admitted
//! task classification. Background-task signals outrank everything else;
//! the fast path runs only when no edge case claimed the message.

pub mod classifier;
pub mod dedup;
pub mod edge_case;
pub mod fast_path;

pub use classifier::{classify, Classification, Intent, PromptModule};
pub use dedup::{should_deduplicate_tool_call, RecentCalls, DEDUP_WINDOW};
pub use edge_case::{decide_edge_case, EdgeCase};
pub use fast_path::{evaluate_fast_path, FastCategory, FastPathDecision, VariationPool};

use crate::error::{ErrorKind, LucyError};

/// Final routing decision for an inbound message
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Reply immediately with this text, create no task
    FastReply(String),
    /// Answer with a progress summary of the running task
    StatusReply,
    /// Cancel the running background task
    CancelTask,
    /// Answer independently while the background task keeps running
    RespondIndependently(Classification),
    /// Admit as a task with this classification
    Admit(Classification),
}

/// Route one message. Edge cases win over the fast path when both match.
pub fn decide(
    message: &str,
    thread_depth: u32,
    prior_had_tools: bool,
    has_active_background_task: bool,
    pool: &VariationPool,
) -> Disposition {
    match decide_edge_case(message, has_active_background_task, thread_depth) {
        EdgeCase::StatusReply => return Disposition::StatusReply,
        EdgeCase::CancelTask => return Disposition::CancelTask,
        EdgeCase::RespondIndependently => {
            return Disposition::RespondIndependently(classify(
                message,
                thread_depth,
                prior_had_tools,
            ))
        }
        EdgeCase::Queue => {}
    }

    let fast = evaluate_fast_path(message, thread_depth, thread_depth > 0, pool);
    if fast.is_fast {
        if let Some(response) = fast.response {
            return Disposition::FastReply(response);
        }
    }

    Disposition::Admit(classify(message, thread_depth, prior_had_tools))
}

/// Coarse bucket for the user-facing degradation message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationKind {
    RateLimited,
    ToolTimeout,
    ServiceUnavailable,
    ContextOverflow,
    Unknown,
}

/// Map an error to the degradation bucket that picks the user message
pub fn classify_error_for_degradation(err: &LucyError) -> DegradationKind {
    match err.kind() {
        ErrorKind::RateLimited => DegradationKind::RateLimited,
        ErrorKind::ToolTransient => DegradationKind::ToolTimeout,
        ErrorKind::LlmTransient | ErrorKind::ServiceUnavailable => {
            DegradationKind::ServiceUnavailable
        }
        ErrorKind::ContextOverflow => DegradationKind::ContextOverflow,
        _ => DegradationKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_case_wins_over_fast_path() {
        // "are you done" is short enough for the fast path, but with an
        // active task it is a status query
        let pool = VariationPool::new();
        let d = decide("are you done?", 0, false, true, &pool);
        assert!(matches!(d, Disposition::StatusReply));
    }

    #[test]
    fn greeting_fast_replies_without_task() {
        let pool = VariationPool::new();
        let d = decide("hi", 0, false, false, &pool);
        match d {
            Disposition::FastReply(text) => assert!(!text.is_empty()),
            other => panic!("expected fast reply, got {:?}", other),
        }
    }

    #[test]
    fn normal_work_is_admitted() {
        let pool = VariationPool::new();
        let d = decide(
            "pull the signups from last week and compare to the week before",
            0,
            false,
            false,
            &pool,
        );
        assert!(matches!(d, Disposition::Admit(_)));
    }

    #[test]
    fn degradation_mapping() {
        assert_eq!(
            classify_error_for_degradation(&LucyError::LlmRateLimited {
                message: "429".into(),
                retry_after: None
            }),
            DegradationKind::RateLimited
        );
        assert_eq!(
            classify_error_for_degradation(&LucyError::ContextOverflow {
                used_chars: 1,
                cap_chars: 1
            }),
            DegradationKind::ContextOverflow
        );
        assert_eq!(
            classify_error_for_degradation(&LucyError::Internal {
                message: "x".into()
            }),
            DegradationKind::Unknown
        );
    }
}
