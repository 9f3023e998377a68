//! Cron job persistence
//!
//! The workspace filesystem is the source of truth: one directory per job
//! under `crons/<slug>/` holding the `task` document and its LEARNINGS
//! text. Run bookkeeping (fire counts, last success day) lives in the
//! workspace key-value state so the documents stay human-editable.

use super::model::CronJobSpec;
use crate::error::Result;
use crate::workspace::{validate_slug, Workspace};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Storage operations for one workspace's cron jobs
pub struct CronStore<'a> {
    workspace: &'a Workspace,
}

impl<'a> CronStore<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    fn task_path(slug: &str) -> String {
        format!("crons/{}/task", slug)
    }

    fn learnings_path(slug: &str) -> String {
        format!("crons/{}/LEARNINGS", slug)
    }

    pub fn save(&self, spec: &CronJobSpec) -> Result<()> {
        validate_slug(&spec.path)?;
        self.workspace.write_document(
            &Self::task_path(&spec.path),
            &serde_json::to_string_pretty(spec)?,
        )
    }

    pub fn load(&self, slug: &str) -> Result<CronJobSpec> {
        validate_slug(slug)?;
        let raw = self.workspace.read_document(&Self::task_path(slug))?;
        serde_json::from_str(&raw).map_err(|e| crate::error::LucyError::JobCorrupted {
            path: format!("crons/{}/task: {}", slug, e),
        })
    }

    /// Every parseable job in the workspace; corrupted documents are
    /// skipped, not fatal.
    pub fn list(&self) -> Result<Vec<CronJobSpec>> {
        let mut jobs = Vec::new();
        for slug in self.workspace.list_dirs("crons")? {
            match self.load(&slug) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(slug, "skipping unparseable cron document: {}", err);
                }
            }
        }
        Ok(jobs)
    }

    pub fn delete(&self, slug: &str) -> Result<()> {
        validate_slug(slug)?;
        self.workspace.remove_dir(&format!("crons/{}", slug))
    }

    pub fn exists(&self, slug: &str) -> bool {
        self.workspace.document_exists(&Self::task_path(slug))
    }

    // =========================================================================
    // LEARNINGS
    // =========================================================================

    pub fn learnings(&self, slug: &str) -> String {
        self.workspace
            .read_document(&Self::learnings_path(slug))
            .unwrap_or_default()
    }

    /// Append one observation from a successful run
    pub fn append_learning(&self, slug: &str, note: &str) -> Result<()> {
        validate_slug(slug)?;
        let mut current = self.learnings(slug);
        if !current.is_empty() && !current.ends_with('\n') {
            current.push('\n');
        }
        current.push_str(&format!("{} {}\n", Utc::now().format("%Y-%m-%d"), note));
        self.workspace
            .write_document(&Self::learnings_path(slug), &current)
    }

    // =========================================================================
    // Run bookkeeping
    // =========================================================================

    pub fn run_count(&self, slug: &str) -> u32 {
        self.workspace
            .state_get(&format!("cron:{}:runs", slug))
            .ok()
            .flatten()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }

    pub fn record_run(&self, slug: &str, succeeded: bool) -> Result<u32> {
        let count = self.run_count(slug) + 1;
        self.workspace
            .state_set(&format!("cron:{}:runs", slug), json!(count))?;
        if succeeded {
            self.workspace.state_set(
                &format!("cron:{}:last_success", slug),
                json!(Utc::now().format("%Y-%m-%d").to_string()),
            )?;
        }
        Ok(count)
    }

    /// Did this job succeed today? Drives dependsOn gating.
    pub fn succeeded_today(&self, slug: &str) -> bool {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.workspace
            .state_get(&format!("cron:{}:last_success", slug))
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(|s| s == today))
            .unwrap_or(false)
    }

    pub fn last_fire(&self, slug: &str) -> Option<DateTime<Utc>> {
        self.workspace
            .state_get(&format!("cron:{}:last_fire", slug))
            .ok()
            .flatten()
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
    }

    pub fn record_fire(&self, slug: &str, at: DateTime<Utc>) -> Result<()> {
        self.workspace
            .state_set(&format!("cron:{}:last_fire", slug), json!(at.to_rfc3339()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::model::{DeliveryMode, JobType};
    use crate::workspace::WorkspaceManager;

    fn job(slug: &str) -> CronJobSpec {
        let now = Utc::now();
        CronJobSpec {
            path: slug.to_string(),
            cron: "*/30 8-22 * * *".to_string(),
            title: "Proactive Heartbeat".to_string(),
            description: "look around".to_string(),
            job_type: JobType::Agent,
            delivery_mode: DeliveryMode::Channel,
            delivery_channel: "C01234".to_string(),
            requesting_user: "U09876".to_string(),
            max_runs: 0,
            timezone: "UTC".to_string(),
            depends_on: String::new(),
            condition_script: String::new(),
            retries: 3,
            notify_on_failure: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn ws() -> (tempfile::TempDir, std::sync::Arc<Workspace>) {
        let dir = tempfile::tempdir().expect("tmp");
        let ws = WorkspaceManager::new(dir.path().to_path_buf())
            .workspace("T01")
            .expect("ws");
        (dir, ws)
    }

    #[test]
    fn save_load_list_delete() {
        let (_dir, ws) = ws();
        let store = CronStore::new(&ws);
        store.save(&job("heartbeat")).expect("save");
        store.save(&job("digest")).expect("save");

        let loaded = store.load("heartbeat").expect("load");
        assert_eq!(loaded.title, "Proactive Heartbeat");
        assert_eq!(store.list().expect("list").len(), 2);

        store.delete("digest").expect("delete");
        assert_eq!(store.list().expect("list").len(), 1);
        assert!(!store.exists("digest"));
    }

    #[test]
    fn corrupted_documents_are_skipped() {
        let (_dir, ws) = ws();
        let store = CronStore::new(&ws);
        store.save(&job("good")).expect("save");
        ws.write_document("crons/bad/task", "{ not json").expect("write");
        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[test]
    fn learnings_accumulate() {
        let (_dir, ws) = ws();
        let store = CronStore::new(&ws);
        assert_eq!(store.learnings("heartbeat"), "");
        store
            .append_learning("heartbeat", "standup channel is quiet on Fridays")
            .expect("append");
        store
            .append_learning("heartbeat", "deploys land around 10am")
            .expect("append");
        let learnings = store.learnings("heartbeat");
        assert_eq!(learnings.lines().count(), 2);
        assert!(learnings.contains("quiet on Fridays"));
    }

    #[test]
    fn run_bookkeeping() {
        let (_dir, ws) = ws();
        let store = CronStore::new(&ws);
        assert_eq!(store.run_count("heartbeat"), 0);
        assert!(!store.succeeded_today("heartbeat"));
        assert_eq!(store.record_run("heartbeat", true).expect("record"), 1);
        assert_eq!(store.run_count("heartbeat"), 1);
        assert!(store.succeeded_today("heartbeat"));
    }

    #[test]
    fn fire_times_round_trip() {
        let (_dir, ws) = ws();
        let store = CronStore::new(&ws);
        assert!(store.last_fire("heartbeat").is_none());
        let at = Utc::now();
        store.record_fire("heartbeat", at).expect("record");
        let back = store.last_fire("heartbeat").expect("some");
        assert!((back - at).num_seconds().abs() < 1);
    }
}
