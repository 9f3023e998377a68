//! Layer 4: de-AI pass
//!
//! Regex scrubbing of the tells: em and en dashes, a blacklisted
//! vocabulary, sycophantic openers and chatbot closers. A second,
//! LLM-based contextual rewrite tier exists in the design but is off;
//! this pass is the whole layer.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMERIC_EN_DASH: Regex = Regex::new(r"(\d)\s*\u{2013}\s*(\d)").unwrap();
    static ref ANY_DASH: Regex = Regex::new(r"\s*[\u{2014}\u{2013}]\s*").unwrap();

    static ref VOCABULARY: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\bdelve (into|in)\b").unwrap(), "dig into"),
        (Regex::new(r"(?i)\bdelves (into|in)\b").unwrap(), "digs into"),
        (Regex::new(r"(?i)\bdelving (into|in)\b").unwrap(), "digging into"),
        (Regex::new(r"(?i)\btapestry\b").unwrap(), "mix"),
        (Regex::new(r"(?i)\bmoreover,?\s*").unwrap(), "also, "),
        (Regex::new(r"(?i)\bfurthermore,?\s*").unwrap(), "also, "),
        (Regex::new(r"(?i)\butilize\b").unwrap(), "use"),
        (Regex::new(r"(?i)\butilizes\b").unwrap(), "uses"),
        (Regex::new(r"(?i)\butilizing\b").unwrap(), "using"),
        (Regex::new(r"(?i)\bit('s| is) worth noting that\s*").unwrap(), "note that "),
        (Regex::new(r"(?i)\bseamlessly\b").unwrap(), "smoothly"),
    ];

    static ref OPENER: Regex = Regex::new(
        r"^(Absolutely|Certainly|Of course|Sure thing|Great|Excellent|Perfect)!\s*"
    )
    .unwrap();
    static ref CLOSER: Regex = Regex::new(
        r"(?i)\s*(let me know if (you have any other questions|there'?s anything else)[^\n]*|is there anything else I can help( you)? with\??|feel free to (reach out|ask)[^\n]*|happy to help[!.]?)\s*$"
    )
    .unwrap();
}

/// Apply the de-AI layer
pub fn de_ai(text: &str) -> String {
    let mut out = text.to_string();

    out = NUMERIC_EN_DASH.replace_all(&out, "$1-$2").to_string();
    out = ANY_DASH.replace_all(&out, ", ").to_string();

    for (pattern, replacement) in VOCABULARY.iter() {
        out = pattern.replace_all(&out, *replacement).to_string();
    }

    // Openers and closers can stack; strip to a fixpoint.
    loop {
        let next = OPENER.replace(&out, "").to_string();
        let next = CLOSER.replace(&next, "").to_string();
        if next == out {
            break;
        }
        out = next;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn em_dashes_become_commas() {
        assert_eq!(de_ai("fast\u{2014}very fast"), "fast, very fast");
    }

    #[test]
    fn numeric_ranges_keep_a_plain_dash() {
        assert_eq!(de_ai("see items 3\u{2013}5"), "see items 3-5");
    }

    #[test]
    fn blacklisted_vocabulary_is_replaced() {
        assert_eq!(
            de_ai("Let's delve into the data. Moreover, we utilize caching."),
            "Let's dig into the data. also, we use caching."
        );
    }

    #[test]
    fn stacked_openers_are_fully_stripped() {
        assert_eq!(de_ai("Absolutely! Certainly! Here it is."), "Here it is.");
    }

    #[test]
    fn chatbot_closers_are_dropped() {
        assert_eq!(
            de_ai("Done. Let me know if you have any other questions!"),
            "Done."
        );
    }

    #[test]
    fn de_ai_is_idempotent() {
        let input = "Absolutely! We delve into results\u{2014}then report. Feel free to ask more.";
        let once = de_ai(input);
        assert_eq!(de_ai(&once), once);
    }
}
