//! Skills
//!
//! A skill is a plaintext SKILL.md with a small frontmatter block (name,
//! description, trigger keywords) and a free-form body teaching the agent
//! a capability. Parsing is lenient: a missing or malformed frontmatter
//! yields a skill with no triggers rather than an error.

use super::store::Workspace;
use super::validate_slug;
use crate::error::Result;

/// A parsed skill document
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub slug: String,
    pub name: String,
    pub description: String,
    /// Lowercased trigger keywords
    pub triggers: Vec<String>,
    pub body: String,
}

impl Skill {
    /// Parse a SKILL.md document. Frontmatter is a `---` fenced block of
    /// `key: value` lines; `triggers` is comma-separated.
    pub fn parse(slug: &str, raw: &str) -> Self {
        let mut name = slug.to_string();
        let mut description = String::new();
        let mut triggers = Vec::new();
        let mut body = raw;

        let trimmed = raw.trim_start();
        if let Some(rest) = trimmed.strip_prefix("---") {
            if let Some(end) = rest.find("\n---") {
                let frontmatter = &rest[..end];
                body = rest[end + 4..].trim_start_matches('\n');
                for line in frontmatter.lines() {
                    let Some((key, value)) = line.split_once(':') else {
                        continue;
                    };
                    let value = value.trim();
                    match key.trim() {
                        "name" => name = value.to_string(),
                        "description" => description = value.to_string(),
                        "triggers" => {
                            triggers = value
                                .split(',')
                                .map(|t| t.trim().to_lowercase())
                                .filter(|t| !t.is_empty())
                                .collect();
                        }
                        _ => {}
                    }
                }
            }
        }

        Skill {
            slug: slug.to_string(),
            name,
            description,
            triggers,
            body: body.to_string(),
        }
    }

    /// Number of trigger keywords present in the message
    pub fn match_count(&self, message: &str) -> usize {
        let lower = message.to_lowercase();
        self.triggers.iter().filter(|t| lower.contains(*t)).count()
    }

    /// Render for prompt inclusion
    pub fn render(&self) -> String {
        format!("## Skill: {}\n{}\n\n{}", self.name, self.description, self.body)
    }
}

impl Workspace {
    /// All skills under `skills/<slug>/SKILL.md`
    pub fn load_skills(&self) -> Result<Vec<Skill>> {
        let mut skills = Vec::new();
        for slug in self.list_dirs("skills")? {
            let path = format!("skills/{}/SKILL.md", slug);
            if let Ok(raw) = self.read_document(&path) {
                skills.push(Skill::parse(&slug, &raw));
            }
        }
        Ok(skills)
    }

    /// Write or replace a skill document. Callers hold the write lock.
    pub fn save_skill(&self, slug: &str, content: &str) -> Result<()> {
        validate_slug(slug)?;
        self.write_document(&format!("skills/{}/SKILL.md", slug), content)
    }

    /// Permanent company knowledge document, if present
    pub fn company_knowledge(&self) -> Option<String> {
        self.read_document("company/SKILL.md").ok()
    }

    /// Permanent team knowledge document, if present
    pub fn team_knowledge(&self) -> Option<String> {
        self.read_document("team/SKILL.md").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\nname: Weekly report\ndescription: Builds the weekly report\ntriggers: report, weekly, summary\n---\nSteps: gather, compile, post.";

    #[test]
    fn frontmatter_parses() {
        let skill = Skill::parse("weekly-report", DOC);
        assert_eq!(skill.name, "Weekly report");
        assert_eq!(skill.triggers, vec!["report", "weekly", "summary"]);
        assert_eq!(skill.body, "Steps: gather, compile, post.");
    }

    #[test]
    fn missing_frontmatter_is_tolerated() {
        let skill = Skill::parse("plain", "just a body");
        assert_eq!(skill.name, "plain");
        assert!(skill.triggers.is_empty());
        assert_eq!(skill.body, "just a body");
    }

    #[test]
    fn match_count_is_case_insensitive() {
        let skill = Skill::parse("weekly-report", DOC);
        assert_eq!(skill.match_count("Send me the WEEKLY report"), 2);
        assert_eq!(skill.match_count("unrelated"), 0);
    }

    #[test]
    fn workspace_skill_round_trip() {
        let dir = tempfile::tempdir().expect("tmp");
        let manager = super::super::WorkspaceManager::new(dir.path().to_path_buf());
        let ws = manager.workspace("T01").expect("ws");
        ws.save_skill("weekly-report", DOC).expect("save");
        let skills = ws.load_skills().expect("load");
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "Weekly report");
    }
}
