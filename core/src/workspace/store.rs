//! One tenant's directory tree
//!
//! Layout, stable on disk:
//!
//! ```text
//! company/SKILL.md
//! team/SKILL.md
//! skills/<slug>/SKILL.md
//! crons/<slug>/task                 job document (JSON)
//! crons/<slug>/LEARNINGS            free text
//! heartbeats/<slug>.json
//! data/session_memory               JSON array, max 50 entries
//! data/snapshots/<category>/<date>.json
//! logs/<date>.md                    append-only activity log
//! logs/threads/<threadId>.jsonl     trace records
//! slack_logs/<channel>/<date>.md
//! state.json                        workspace key-value
//! ```

use crate::error::{LucyError, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::validate_slug;

/// Handle to one workspace's subtree
pub struct Workspace {
    id: String,
    root: PathBuf,
    /// Logical write lock for session-fact and skill mutations
    write_lock: Mutex<()>,
}

impl Workspace {
    /// Open the workspace directory, creating the skeleton if absent
    pub(super) fn create(root: PathBuf, id: String) -> Result<Self> {
        for sub in [
            "company", "team", "skills", "crons", "heartbeats", "data", "data/snapshots", "logs",
            "logs/threads", "slack_logs",
        ] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self {
            id,
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serialize mutations of facts and skills for this workspace
    pub async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    // =========================================================================
    // Raw document access
    // =========================================================================

    /// Resolve a relative document path, refusing anything that escapes
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if relative.starts_with('/') || relative.split('/').any(|part| part == "..") {
            return Err(LucyError::TenantIsolation {
                detail: format!("path escapes workspace: {}", relative),
            });
        }
        Ok(self.root.join(relative))
    }

    pub fn read_document(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        fs::read_to_string(&path).map_err(|_| LucyError::WorkspaceNotFound {
            path: relative.to_string(),
        })
    }

    pub fn document_exists(&self, relative: &str) -> bool {
        self.resolve(relative).map(|p| p.exists()).unwrap_or(false)
    }

    /// Atomic write: stage then rename, so a reader never observes a prefix
    pub fn write_document(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        atomic_write(&path, content.as_bytes())
    }

    pub fn remove_document(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn remove_dir(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    /// Subdirectory names under a relative path
    pub fn list_dirs(&self, relative: &str) -> Result<Vec<String>> {
        let path = self.resolve(relative)?;
        let mut names = Vec::new();
        if !path.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list_files(&self, relative: &str) -> Result<Vec<String>> {
        let path = self.resolve(relative)?;
        let mut names = Vec::new();
        if !path.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    // =========================================================================
    // Workspace key-value state
    // =========================================================================

    pub fn state_get(&self, key: &str) -> Result<Option<Value>> {
        let state = self.load_state()?;
        Ok(state.get(key).cloned())
    }

    pub fn state_set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.load_state()?;
        state.insert(key.to_string(), value);
        let serialized = serde_json::to_string_pretty(&state)?;
        atomic_write(&self.root.join("state.json"), serialized.as_bytes())
    }

    fn load_state(&self) -> Result<HashMap<String, Value>> {
        let path = self.root.join("state.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    // =========================================================================
    // Append-only logs
    // =========================================================================

    /// One line into today's activity log
    pub fn log_activity(&self, line: &str) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d");
        let path = self.root.join("logs").join(format!("{}.md", date));
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "- {} {}", Utc::now().format("%H:%M:%S"), line)?;
        Ok(())
    }

    /// One JSON record into a thread's trace log
    pub fn append_thread_record(&self, thread_id: &str, json_line: &str) -> Result<()> {
        validate_slug(thread_id)?;
        let path = self
            .root
            .join("logs/threads")
            .join(format!("{}.jsonl", thread_id));
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json_line)?;
        Ok(())
    }

    /// Dated snapshot of cron-produced data, by category
    pub fn write_snapshot(&self, category: &str, value: &Value) -> Result<()> {
        validate_slug(category)?;
        let dir = self.root.join("data/snapshots").join(category);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", Utc::now().format("%Y-%m-%d")));
        atomic_write(&path, serde_json::to_string_pretty(value)?.as_bytes())
    }

    /// Read today's activity log, if any
    pub fn activity_log_today(&self) -> Result<String> {
        let date = Utc::now().format("%Y-%m-%d");
        let path = self.root.join("logs").join(format!("{}.md", date));
        if !path.exists() {
            return Ok(String::new());
        }
        Ok(fs::read_to_string(path)?)
    }
}

/// Staging-file-plus-rename write. Readers see the old content or the new
/// content, never a prefix.
pub fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest.parent().ok_or_else(|| LucyError::Internal {
        message: format!("destination has no parent: {}", dest.display()),
    })?;
    fs::create_dir_all(parent)?;

    let tmp = dest.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes)?;

    // Best-effort cleanup on failure.
    if let Err(rename_err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(rename_err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().expect("tmp");
        let ws = Workspace::create(dir.path().join("T01"), "T01".to_string()).expect("ws");
        (dir, ws)
    }

    #[test]
    fn skeleton_is_created() {
        let (_dir, ws) = ws();
        assert!(ws.root().join("skills").is_dir());
        assert!(ws.root().join("logs/threads").is_dir());
        assert!(ws.root().join("data/snapshots").is_dir());
    }

    #[test]
    fn document_round_trip() {
        let (_dir, ws) = ws();
        ws.write_document("crons/daily/task", "{\"title\":\"x\"}")
            .expect("write");
        assert_eq!(
            ws.read_document("crons/daily/task").expect("read"),
            "{\"title\":\"x\"}"
        );
    }

    #[test]
    fn path_escape_is_isolation_error() {
        let (_dir, ws) = ws();
        assert!(matches!(
            ws.write_document("../T02/state.json", "{}"),
            Err(LucyError::TenantIsolation { .. })
        ));
        assert!(matches!(
            ws.read_document("/etc/passwd"),
            Err(LucyError::TenantIsolation { .. })
        ));
    }

    #[test]
    fn state_kv_round_trip() {
        let (_dir, ws) = ws();
        ws.state_set("pool_version", serde_json::json!(3)).expect("set");
        assert_eq!(
            ws.state_get("pool_version").expect("get"),
            Some(serde_json::json!(3))
        );
        assert_eq!(ws.state_get("missing").expect("get"), None);
    }

    #[test]
    fn activity_log_appends() {
        let (_dir, ws) = ws();
        ws.log_activity("Ran Proactive Heartbeat").expect("log");
        ws.log_activity("Completed task").expect("log");
        let log = ws.activity_log_today().expect("read");
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("Ran Proactive Heartbeat"));
    }

    #[test]
    fn atomic_write_replaces_whole_content() {
        let (_dir, ws) = ws();
        ws.write_document("state.json", "first version").expect("w1");
        ws.write_document("state.json", "second").expect("w2");
        assert_eq!(ws.read_document("state.json").expect("read"), "second");
        // no staging files left behind
        let leftovers: Vec<_> = fs::read_dir(ws.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
