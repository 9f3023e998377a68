//! Edge cases around an active background task
//!
//! When the agent is already working for this thread, an incoming message
//! may be a status question, a cancellation, or an unrelated aside that
//! deserves an independent answer. These signals outrank both the fast
//! path and intent classification.

use lazy_static::lazy_static;
use regex::Regex;

/// What to do with a message given background-task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCase {
    /// Answer with a progress summary of the running task
    StatusReply,
    /// Cancel the running task
    CancelTask,
    /// Answer this message on its own, leaving the task running
    RespondIndependently,
    /// Nothing special: go through normal admission
    Queue,
}

lazy_static! {
    static ref STATUS: Regex = Regex::new(
        r"(?i)\b(what are you working on|how('s| is) it going|any (update|progress)|status|are you done|still (working|going)|eta)\b"
    )
    .unwrap();
    static ref CANCEL: Regex = Regex::new(
        r"(?i)^(cancel( that| it)?|stop( that| it)?|abort|never ?mind|forget it|don't bother)[\s!,.]*$"
    )
    .unwrap();
    static ref QUESTION: Regex = Regex::new(r"(?i)^(what|who|when|where|which|why|how|is|are|can|could|do|does)\b").unwrap();
}

/// Decide how to treat a message relative to background work
pub fn decide_edge_case(
    message: &str,
    has_active_background_task: bool,
    _thread_depth: u32,
) -> EdgeCase {
    if !has_active_background_task {
        return EdgeCase::Queue;
    }
    let trimmed = message.trim();
    if CANCEL.is_match(trimmed) {
        return EdgeCase::CancelTask;
    }
    if STATUS.is_match(trimmed) {
        return EdgeCase::StatusReply;
    }
    // An unrelated question can be answered without disturbing the task.
    if QUESTION.is_match(trimmed) {
        return EdgeCase::RespondIndependently;
    }
    EdgeCase::Queue
}
