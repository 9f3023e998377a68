//! Layer 2: markdown to chat formatting
//!
//! The chat dialect has no headings, no double-asterisk bold, no markdown
//! links and no tables. Headings and bold collapse to single-asterisk
//! emphasis, links become `<url|text>`, and tables become bullet lists.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HEADING: Regex = Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*$").unwrap();
    static ref BOLD: Regex = Regex::new(r"\*\*([^*\n]+)\*\*").unwrap();
    static ref LINK: Regex = Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").unwrap();
    static ref TABLE_ROW: Regex = Regex::new(r"^\s*\|(.+)\|\s*$").unwrap();
    static ref TABLE_SEPARATOR: Regex = Regex::new(r"^\s*\|[\s:|-]+\|\s*$").unwrap();
}

/// Apply the formatting layer
pub fn to_chat_format(text: &str) -> String {
    let mut out_lines: Vec<String> = Vec::new();
    for line in text.lines() {
        if TABLE_SEPARATOR.is_match(line) {
            continue;
        }
        if let Some(caps) = TABLE_ROW.captures(line) {
            let cells: Vec<&str> = caps
                .get(1)
                .unwrap()
                .as_str()
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            if !cells.is_empty() {
                out_lines.push(format!("• {}", cells.join(", ")));
            }
            continue;
        }
        out_lines.push(line.to_string());
    }
    let mut out = out_lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }

    out = HEADING.replace_all(&out, "*$1*").to_string();
    out = BOLD.replace_all(&out, "*$1*").to_string();
    out = LINK.replace_all(&out, "<$2|$1>").to_string();
    out
}
