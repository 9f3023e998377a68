//! Partial-result collection
//!
//! When a run breaks early (loop detection, timeout, abort, empty final),
//! the user gets a human-readable status: what was being attempted, how
//! much ground was covered, and a plain hint about what went wrong. Raw
//! tool names, paths and JSON never appear.

use crate::output::humanize_tool_name;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TIMEOUT: Regex = Regex::new(r"(?i)\b(timed? ?out|deadline exceeded)\b").unwrap();
    static ref RATE_LIMIT: Regex = Regex::new(r"(?i)\b(rate.?limit|too many requests|429)\b").unwrap();
    static ref CONNECTION: Regex =
        Regex::new(r"(?i)\b(connection (refused|reset|failed)|network error|unreachable|dns)\b")
            .unwrap();
    static ref PERMISSION: Regex =
        Regex::new(r"(?i)\b(permission|unauthorized|forbidden|access denied|401|403)\b").unwrap();
    static ref NOT_FOUND: Regex = Regex::new(r"(?i)\b(not found|no such|404|does not exist)\b").unwrap();
}

/// Infer a plain-English hint from the last tool result
pub fn error_hint(last_result: &str) -> Option<&'static str> {
    if TIMEOUT.is_match(last_result) {
        Some("a timeout")
    } else if RATE_LIMIT.is_match(last_result) {
        Some("a rate limit")
    } else if CONNECTION.is_match(last_result) {
        Some("a connection problem")
    } else if PERMISSION.is_match(last_result) {
        Some("a permissions issue")
    } else if NOT_FOUND.is_match(last_result) {
        Some("something that couldn't be found")
    } else {
        None
    }
}

/// Build the user-facing partial status
pub fn collect_partial(
    last_tool: Option<&str>,
    total_tool_calls: usize,
    last_result: Option<&str>,
) -> String {
    let mut out = String::from("I got partway through but had to stop.");

    if let Some(tool) = last_tool {
        out.push_str(&format!(
            " The last thing I was doing was trying to {}.",
            humanize_tool_name(tool)
        ));
    }
    if total_tool_calls > 0 {
        out.push_str(&format!(
            " I made {} attempt{} along the way.",
            total_tool_calls,
            if total_tool_calls == 1 { "" } else { "s" }
        ));
    }
    if let Some(hint) = last_result.and_then(error_hint) {
        out.push_str(&format!(" It looks like {} got in the way.", hint));
    }
    out.push_str(" Want me to pick it back up from there?");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_match_common_failures() {
        assert_eq!(error_hint("request timed out after 30s"), Some("a timeout"));
        assert_eq!(error_hint("HTTP 429 Too Many Requests"), Some("a rate limit"));
        assert_eq!(
            error_hint("connection refused by host"),
            Some("a connection problem")
        );
        assert_eq!(error_hint("403 Forbidden"), Some("a permissions issue"));
        assert_eq!(error_hint("all good"), None);
    }

    #[test]
    fn partial_message_is_humanized() {
        let msg = collect_partial(Some("GMAIL_FETCH_EMAILS"), 7, Some("socket timed out"));
        assert!(msg.contains("check email"));
        assert!(msg.contains("7 attempts"));
        assert!(msg.contains("a timeout"));
        assert!(!msg.contains("GMAIL"));
    }

    #[test]
    fn hint_only_appears_when_pattern_matches() {
        let msg = collect_partial(Some("search_tools"), 2, Some("no matching tools"));
        assert!(!msg.contains("got in the way"));
    }

    #[test]
    fn no_tools_case_stays_clean() {
        let msg = collect_partial(None, 0, None);
        assert!(msg.contains("partway"));
        assert!(!msg.contains("attempt"));
    }
}
