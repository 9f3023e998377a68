//! Layer 1: sanitization
//!
//! Redacts everything internal before a message can reach chat: filesystem
//! paths, raw tool names, API keys, opaque identifiers and internal tags.
//! Known tool names are replaced with plain-English phrases; unknown
//! SHOUTING_CASE tool tokens fall back to a mechanical humanization.

use lazy_static::lazy_static;
use regex::Regex;

/// Plain-English phrases for tool names users might otherwise see
const HUMANIZED_TOOLS: &[(&str, &str)] = &[
    ("COMPOSIO_SEARCH_TOOLS", "search for tools"),
    ("COMPOSIO_MULTI_EXECUTE", "run several actions at once"),
    ("GMAIL_SEND_EMAIL", "send an email"),
    ("GMAIL_FETCH_EMAILS", "check email"),
    ("GOOGLECALENDAR_CREATE_EVENT", "put something on the calendar"),
    ("GITHUB_CREATE_ISSUE", "file an issue"),
    ("LINEAR_CREATE_ISSUE", "file a ticket"),
    ("SLACK_SEND_MESSAGE", "post a message"),
    ("remote_workbench", "run some code"),
    ("remote_bash", "run a command"),
    ("search_tools", "search for tools"),
    ("manage_connections", "check connections"),
    ("multi_execute", "run several actions at once"),
];

lazy_static! {
    /// SHOUTING_CASE tool tokens, e.g. NOTION_CREATE_PAGE
    static ref TOOL_TOKEN: Regex = Regex::new(r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b").unwrap();
    /// Internal lucy_ and delegate_to_ tool names
    static ref INTERNAL_TOOL: Regex =
        Regex::new(r"\b(lucy_[a-z0-9_]+|delegate_to_[a-z0-9_]+_agent)\b").unwrap();
    /// Absolute filesystem paths two or more segments deep
    static ref FS_PATH: Regex = Regex::new(r"(?:^|[\s(])(/[\w.-]+(?:/[\w.-]+)+)").unwrap();
    /// Provider API keys and bot tokens
    static ref API_KEY: Regex =
        Regex::new(r"\b(?:sk|xox[a-z]|ghp|gho|glpat)[-_][A-Za-z0-9_-]{8,}\b").unwrap();
    /// UUID-shaped opaque identifiers
    static ref OPAQUE_ID: Regex = Regex::new(
        r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b"
    )
    .unwrap();
    /// XML-like internal tags the model sometimes echoes
    static ref INTERNAL_TAG: Regex =
        Regex::new(r"</?(?:plan|scratchpad|thinking|internal|tool_result|system)[^>]*>").unwrap();
}

/// Humanize a single tool name for user-facing text
pub fn humanize_tool_name(name: &str) -> String {
    for (tool, phrase) in HUMANIZED_TOOLS {
        if name.eq_ignore_ascii_case(tool) {
            return (*phrase).to_string();
        }
    }
    if let Some(rest) = name.strip_prefix("delegate_to_") {
        let who = rest.trim_end_matches("_agent").replace('_', " ");
        return format!("hand off to the {} specialist", who);
    }
    if let Some(rest) = name.strip_prefix("lucy_") {
        return rest.replace('_', " ");
    }
    name.replace('_', " ").to_lowercase()
}

/// Apply the sanitize layer
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();

    out = INTERNAL_TAG.replace_all(&out, "").to_string();
    out = API_KEY.replace_all(&out, "[redacted]").to_string();
    out = OPAQUE_ID.replace_all(&out, "[id]").to_string();
    out = FS_PATH
        .replace_all(&out, |caps: &regex::Captures| {
            let whole = caps.get(0).unwrap().as_str();
            let path = caps.get(1).unwrap().as_str();
            whole.replace(path, "a local file")
        })
        .to_string();
    out = INTERNAL_TOOL
        .replace_all(&out, |caps: &regex::Captures| {
            humanize_tool_name(caps.get(0).unwrap().as_str())
        })
        .to_string();
    out = TOOL_TOKEN
        .replace_all(&out, |caps: &regex::Captures| {
            humanize_tool_name(caps.get(0).unwrap().as_str())
        })
        .to_string();

    out
}
