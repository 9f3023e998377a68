//! Post-loop quality and verification gates
//!
//! Two zero-cost heuristic checks on the final text. The quality gate
//! scores confidence 1 to 10 by penalty; a score at or under 6 triggers an
//! escalated re-run for non-frontier results. The verification gate
//! detects multi-part deliverables that came back incomplete and feeds the
//! issue list into one retry at the next tier.

use crate::pipeline::Intent;
use lazy_static::lazy_static;
use regex::Regex;

/// Scores at or below this trigger an escalated re-run
pub const QUALITY_RERUN_THRESHOLD: i32 = 6;

const SERVICE_WORDS: &[&str] = &[
    "gmail", "email", "calendar", "github", "linear", "jira", "slack", "drive", "sheets",
    "notion",
];

lazy_static! {
    static ref CANT_FIND: Regex = Regex::new(
        r"(?i)\b(I (can't|couldn't|cannot) find|no results|nothing (came up|turned up)|couldn't locate)\b"
    )
    .unwrap();
    static ref ASKS_FOR_ALL: Regex =
        Regex::new(r"(?i)\b(all|every|each|the (full|complete|entire))\b").unwrap();
    static ref READS_LIKE_SAMPLE: Regex = Regex::new(
        r"(?i)\b(a few|some of|for (example|instance)|here are \d+ of|a sample|among others)\b"
    )
    .unwrap();
}

fn is_actionable(intent: Intent) -> bool {
    matches!(
        intent,
        Intent::ToolUse | Intent::Lookup | Intent::Data | Intent::Code | Intent::Document
    )
}

fn is_complex(intent: Intent, message: &str) -> bool {
    message.len() > 150
        || matches!(
            intent,
            Intent::Reasoning | Intent::Code | Intent::Data | Intent::Document
        )
}

/// Confidence score from 1 to 10
pub fn quality_score(message: &str, response: &str, intent: Intent) -> i32 {
    let mut score = 10i32;
    let message_lower = message.to_lowercase();
    let response_lower = response.to_lowercase();

    // mentioning services the user never asked about
    let unrequested = SERVICE_WORDS.iter().any(|service| {
        response_lower.contains(service) && !message_lower.contains(service)
    });
    if unrequested {
        score -= 3;
    }

    // generic "can't find" on an actionable ask
    if is_actionable(intent) && CANT_FIND.is_match(response) {
        score -= 2;
    }

    // very short answer to a complex question
    if is_complex(intent, message) && response.trim().len() < 80 {
        score -= 2;
    }

    score.clamp(1, 10)
}

/// Should the quality gate trigger a re-run?
pub fn quality_needs_rerun(score: i32, is_frontier: bool) -> bool {
    score <= QUALITY_RERUN_THRESHOLD && !is_frontier
}

/// Deliverable nouns used to spot multi-part asks
const DELIVERABLES: &[&str] = &[
    "report", "summary", "list", "email", "doc", "document", "chart", "spreadsheet", "draft",
    "ticket", "issue",
];

/// Detect incomplete multi-part deliverables. Empty result means the
/// response passes.
pub fn verify_completeness(message: &str, response: &str, intent: Intent) -> Vec<String> {
    let mut issues = Vec::new();
    let message_lower = message.to_lowercase();
    let response_lower = response.to_lowercase();

    // asked for "all X", answer reads like a sample
    if ASKS_FOR_ALL.is_match(message) && READS_LIKE_SAMPLE.is_match(response) {
        issues.push("the user asked for everything but the answer reads like a sample".to_string());
    }

    // asked for several artifacts, fewer made it into the answer
    let asked: Vec<&str> = DELIVERABLES
        .iter()
        .copied()
        .filter(|noun| message_lower.contains(noun))
        .collect();
    if asked.len() >= 2 {
        let delivered = asked
            .iter()
            .filter(|noun| response_lower.contains(*noun))
            .count();
        if delivered < asked.len() {
            issues.push(format!(
                "the user asked for {} artifacts but the answer covers {}",
                asked.len(),
                delivered
            ));
        }
    }

    // data work that came back suspiciously thin
    if intent == Intent::Data && response.trim().len() < 200 {
        issues.push("a data task produced a very short answer".to_string());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_answer_scores_high() {
        let score = quality_score(
            "what's our deploy cadence?",
            "You ship every Tuesday and Thursday, with hotfixes as needed.",
            Intent::Lookup,
        );
        assert_eq!(score, 10);
    }

    #[test]
    fn unrequested_service_penalty() {
        let score = quality_score(
            "what's our deploy cadence?",
            "I checked your gmail and calendar; you ship Tuesdays.",
            Intent::Lookup,
        );
        assert_eq!(score, 7);
    }

    #[test]
    fn cant_find_penalty_on_actionable_ask() {
        let score = quality_score(
            "pull the signup numbers",
            "I couldn't find anything.",
            Intent::Data,
        );
        // -2 for can't-find, -2 for short answer to a complex (data) ask
        assert_eq!(score, 6);
        assert!(quality_needs_rerun(score, false));
        assert!(!quality_needs_rerun(score, true));
    }

    #[test]
    fn all_vs_sample_detection() {
        let issues = verify_completeness(
            "list all open incidents from last quarter",
            "Here are a few of the incidents I found.",
            Intent::Lookup,
        );
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn missing_artifact_detection() {
        let issues = verify_completeness(
            "write the summary and draft the email",
            "Here's the summary of the launch.",
            Intent::Document,
        );
        assert!(!issues.is_empty());
    }

    #[test]
    fn complete_answers_pass() {
        let issues = verify_completeness(
            "write the summary and draft the email",
            "Summary: launch went well. Email draft: Hi team, ...",
            Intent::Document,
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn thin_data_answers_flagged() {
        let issues = verify_completeness("crunch the churn dataset", "done", Intent::Data);
        assert!(issues.iter().any(|i| i.contains("short answer")));
    }
}
