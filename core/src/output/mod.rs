//! Output processing
//!
//! Every LLM-produced string passes through four deterministic layers, in
//! order, before it can reach chat: sanitize, markdown-to-chat, tone
//! validation, de-AI scrub. Running the pipeline on its own output yields
//! the same string.

pub mod deai;
pub mod format;
pub mod sanitize;
pub mod tone;

pub use sanitize::humanize_tool_name;

/// Apply all four layers in order
pub fn process(text: &str) -> String {
    let out = sanitize::sanitize(text);
    let out = format::to_chat_format(&out);
    let out = tone::validate_tone(&out);
    deai::de_ai(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pipeline_is_idempotent() {
        let samples = [
            "Great question! I ran GMAIL_FETCH_EMAILS\u{2014}found 3 new threads.",
            "## Results\n| metric | value |\n|---|---|\n| signups | 42 |",
            "As an AI, I delve into /var/data/x/y. Let me know if you have any other questions!",
            "plain text stays plain",
            "",
        ];
        for sample in samples {
            let once = process(sample);
            assert_eq!(process(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn layers_compose() {
        let out = process("Absolutely! **Done**, ran GMAIL_SEND_EMAIL\u{2014}all good.");
        assert!(!out.contains("GMAIL"));
        assert!(!out.contains("**"));
        assert!(!out.contains('\u{2014}'));
        assert!(!out.starts_with("Absolutely"));
    }

    #[test]
    fn no_internals_survive() {
        let out = process(
            "<thinking>use lucy_read_skill</thinking> checked /home/lucy/ws/T01/state.json with sk-abc12345678",
        );
        assert!(!out.contains("lucy_"));
        assert!(!out.contains("/home/"));
        assert!(!out.contains("sk-abc"));
        assert!(!out.contains("<thinking>"));
    }
}
