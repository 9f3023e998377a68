//! Prompt assembly
//!
//! The system prompt is a static prefix plus a dynamic suffix, in that
//! order, so provider-side prompt caches can hit on the prefix. The prefix
//! holds personality, behavior, the two common modules and the
//! connected-services block; the suffix holds intent modules, relevant
//! skills and permanent workspace knowledge.

use crate::pipeline::PromptModule;
use crate::workspace::{Skill, Workspace};

/// At most this many skills are injected per request
pub const MAX_SKILLS: usize = 3;
/// Total character cap across injected skill content
pub const SKILL_CONTENT_CAP: usize = 8_000;

const PERSONALITY: &str = "\
You are Lucy, a sharp, warm, direct AI coworker embedded in this team's chat. \
You talk like a trusted colleague: plain sentences, no corporate filler, no \
hedging. You do real work rather than describing work.";

const BEHAVIOR: &str = "\
Ground rules: answer the question that was asked. Use tools when the task \
needs live data or side effects; never claim you did something you did not \
do. If something fails, say what you tried in plain terms. Keep replies \
tight; expand only when the task genuinely needs it.";

const TOOL_USE_MODULE: &str = "\
Tool use: call tools instead of narrating intentions. Batch independent \
calls in one turn. After a destructive action is confirmed, report the \
outcome in one sentence.";

const MEMORY_MODULE: &str = "\
Memory: you may be given remembered facts about this team. Trust them as \
context, not gospel; prefer live data when they conflict.";

const CAPABILITY_LINES: &str = "\
You can send email through connected accounts and publish small web pages \
when asked.";

const CODING_MODULE: &str = "\
Coding tasks: read before you write, keep diffs minimal, run what you \
changed when a sandbox is available, and report results with the exact \
commands used.";

const RESEARCH_MODULE: &str = "\
Research tasks: consult more than one source, weigh disagreement explicitly, \
and separate what you verified from what you infer.";

const DATA_MODULE: &str = "\
Data tasks: state row counts and date ranges you actually processed. Never \
invent sample rows; if data is missing say so.";

const INTEGRATIONS_MODULE: &str = "\
Integrations: check connection state before acting. If a service is not \
connected, ask for the connection rather than guessing credentials.";

/// Builds system prompts for one workspace
pub struct PromptAssembler;

impl PromptAssembler {
    /// Cache-stable prefix: identical for every request in a workspace
    /// until its connected services change.
    pub fn static_prefix(connected_services: &[String]) -> String {
        let services_block = if connected_services.is_empty() {
            "Connected services: none yet.".to_string()
        } else {
            format!("Connected services: {}.", connected_services.join(", "))
        };
        [
            PERSONALITY,
            BEHAVIOR,
            TOOL_USE_MODULE,
            MEMORY_MODULE,
            &services_block,
            CAPABILITY_LINES,
        ]
        .join("\n\n")
    }

    /// Per-request suffix: intent modules, then skills, then permanent
    /// workspace knowledge.
    pub fn dynamic_suffix(
        workspace: &Workspace,
        modules: &[PromptModule],
        message: &str,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        for module in modules {
            parts.push(
                match module {
                    PromptModule::Coding => CODING_MODULE,
                    PromptModule::Research => RESEARCH_MODULE,
                    PromptModule::DataTasks => DATA_MODULE,
                    PromptModule::Integrations => INTEGRATIONS_MODULE,
                }
                .to_string(),
            );
        }

        let skills = workspace.load_skills().unwrap_or_default();
        let relevant = detect_relevant_skills(message, &skills);
        let mut used = 0usize;
        for skill in relevant {
            let rendered = skill.render();
            if used + rendered.len() > SKILL_CONTENT_CAP {
                break;
            }
            used += rendered.len();
            parts.push(rendered);
        }

        if let Some(company) = workspace.company_knowledge() {
            parts.push(format!("# Company knowledge\n{}", company));
        }
        if let Some(team) = workspace.team_knowledge() {
            parts.push(format!("# Team knowledge\n{}", team));
        }

        parts.join("\n\n")
    }

    /// Full system prompt: prefix then suffix
    pub fn assemble(
        workspace: &Workspace,
        connected_services: &[String],
        modules: &[PromptModule],
        message: &str,
    ) -> String {
        let prefix = Self::static_prefix(connected_services);
        let suffix = Self::dynamic_suffix(workspace, modules, message);
        if suffix.is_empty() {
            prefix
        } else {
            format!("{}\n\n{}", prefix, suffix)
        }
    }
}

/// Up to [`MAX_SKILLS`] skills whose trigger keywords appear in the
/// message, ranked by match count descending.
pub fn detect_relevant_skills<'a>(message: &str, skills: &'a [Skill]) -> Vec<&'a Skill> {
    let mut scored: Vec<(usize, &Skill)> = skills
        .iter()
        .map(|s| (s.match_count(message), s))
        .filter(|(count, _)| *count > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.slug.cmp(&b.1.slug)));
    scored.into_iter().take(MAX_SKILLS).map(|(_, s)| s).collect()
}
