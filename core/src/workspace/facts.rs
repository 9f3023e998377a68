//! Session facts
//!
//! Short remembered strings with a category tag, kept as a FIFO ring of at
//! most 50 entries per workspace in `data/session_memory`. Adding a
//! duplicate refreshes nothing; inserting the 51st fact evicts the oldest.

use super::store::Workspace;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FACT_CAPACITY: usize = 50;
const FACTS_PATH: &str = "data/session_memory";

/// Where a fact belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Company,
    Team,
    Session,
}

/// One remembered string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFact {
    pub content: String,
    pub category: FactCategory,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionFact {
    pub fn new(
        content: impl Into<String>,
        category: FactCategory,
        source: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            category,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

impl Workspace {
    /// Load the full fact ring, oldest first
    pub fn session_facts(&self) -> Result<Vec<SessionFact>> {
        if !self.document_exists(FACTS_PATH) {
            return Ok(Vec::new());
        }
        let raw = self.read_document(FACTS_PATH)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Append a fact, dropping exact-content duplicates and evicting the
    /// oldest entry past capacity. Callers hold the workspace write lock.
    pub fn add_session_fact(&self, fact: SessionFact) -> Result<()> {
        let mut facts = self.session_facts()?;
        if facts.iter().any(|f| f.content == fact.content) {
            return Ok(());
        }
        facts.push(fact);
        while facts.len() > FACT_CAPACITY {
            facts.remove(0);
        }
        self.write_document(FACTS_PATH, &serde_json::to_string_pretty(&facts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> (tempfile::TempDir, std::sync::Arc<Workspace>) {
        let dir = tempfile::tempdir().expect("tmp");
        let manager = super::super::WorkspaceManager::new(dir.path().to_path_buf());
        let ws = manager.workspace("T01").expect("ws");
        (dir, ws)
    }

    #[test]
    fn ring_caps_at_fifty_keeping_recent() {
        let (_dir, ws) = ws();
        for i in 0..55 {
            ws.add_session_fact(SessionFact::new(
                format!("fact {}", i),
                FactCategory::Session,
                "test",
            ))
            .expect("add");
        }
        let facts = ws.session_facts().expect("load");
        assert_eq!(facts.len(), FACT_CAPACITY);
        assert_eq!(facts[0].content, "fact 5");
        assert_eq!(facts.last().unwrap().content, "fact 54");
    }

    #[test]
    fn duplicates_do_not_grow_the_ring() {
        let (_dir, ws) = ws();
        for _ in 0..3 {
            ws.add_session_fact(SessionFact::new("same", FactCategory::Team, "test"))
                .expect("add");
        }
        assert_eq!(ws.session_facts().expect("load").len(), 1);
    }

    #[test]
    fn empty_file_reads_as_no_facts() {
        let (_dir, ws) = ws();
        ws.write_document("data/session_memory", "").expect("write");
        assert!(ws.session_facts().expect("load").is_empty());
    }
}
