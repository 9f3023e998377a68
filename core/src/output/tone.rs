//! Layer 3: tone validation
//!
//! Replaces phrase classes that break the coworker register: defeatist
//! refusals, internal leaks, vague errors, sycophancy. Replacements are
//! neutral text that no other layer will touch again.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref REPLACEMENTS: Vec<(Regex, &'static str)> = vec![
        // defeatist
        (
            Regex::new(r"(?i)\bI (cannot|can't) help with that\b").unwrap(),
            "here's what I can do instead",
        ),
        (
            Regex::new(r"(?i)\bI am unable to\b").unwrap(),
            "I wasn't able to",
        ),
        (
            Regex::new(r"(?i)\bthat('s| is) (simply )?impossible\b").unwrap(),
            "that's out of reach right now",
        ),
        // internal-leak
        (
            Regex::new(r"(?i)\bas an AI( language model| assistant)?,?\s*").unwrap(),
            "",
        ),
        (
            Regex::new(r"(?i)\bmy (system prompt|instructions|training data)\b").unwrap(),
            "my setup",
        ),
        // vague-error
        (
            Regex::new(r"(?i)\bsomething went wrong\b").unwrap(),
            "that didn't go through",
        ),
        (
            Regex::new(r"(?i)\ban (unknown|unexpected) error occurred\b").unwrap(),
            "that didn't go through",
        ),
        // sycophantic
        (
            Regex::new(r"(?i)\b(what a |that's a )?(great|excellent|fantastic) (question|idea|point)[!.]?\s*").unwrap(),
            "",
        ),
        (
            Regex::new(r"(?i)\bI'd be (absolutely )?(happy|delighted|thrilled) to help( with that)?[!.]?\s*").unwrap(),
            "",
        ),
    ];
}

/// Apply the tone layer
pub fn validate_tone(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in REPLACEMENTS.iter() {
        out = pattern.replace_all(&out, *replacement).to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defeatist_phrases_are_reframed() {
        let out = validate_tone("I cannot help with that.");
        assert!(out.contains("here's what I can do instead"));
    }

    #[test]
    fn internal_leaks_are_removed() {
        let out = validate_tone("As an AI language model, I checked my system prompt.");
        assert!(!out.to_lowercase().contains("as an ai"));
        assert!(out.contains("my setup"));
    }

    #[test]
    fn sycophancy_is_dropped() {
        let out = validate_tone("Great question! The answer is 4.");
        assert_eq!(out, "The answer is 4.");
    }

    #[test]
    fn tone_is_idempotent() {
        let input = "Great question! Something went wrong, I am unable to continue.";
        let once = validate_tone(input);
        assert_eq!(validate_tone(&once), once);
    }
}
