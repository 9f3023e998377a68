//! Per-workspace filesystem substrate
//!
//! Each tenant owns one directory tree under the configured root. Every
//! mutation goes through an atomic staging-file-plus-rename write, and
//! session-fact or skill mutations additionally serialize on the
//! workspace's logical write lock. Nothing in this module ever touches a
//! path outside the workspace's own subtree.

pub mod facts;
pub mod integrations;
pub mod skills;
pub mod store;

pub use facts::{FactCategory, SessionFact};
pub use integrations::{IntegrationRecord, IntegrationStatus};
pub use skills::Skill;
pub use store::Workspace;

use crate::error::{LucyError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Validate an externally supplied workspace or document slug. Anything
/// that could escape the tenant subtree is a hard isolation failure.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 128 {
        return Err(LucyError::TenantIsolation {
            detail: format!("bad slug length: {:?}", slug.len()),
        });
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        || slug.contains("..")
    {
        return Err(LucyError::TenantIsolation {
            detail: format!("slug contains path characters: {}", slug),
        });
    }
    Ok(())
}

/// Lazily creates and hands out per-tenant [`Workspace`] handles
pub struct WorkspaceManager {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<Workspace>>>,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Get or create the workspace for an external team id
    pub fn workspace(&self, workspace_id: &str) -> Result<Arc<Workspace>> {
        validate_slug(workspace_id)?;
        let mut open = self.open.lock();
        if let Some(ws) = open.get(workspace_id) {
            return Ok(Arc::clone(ws));
        }
        let ws = Arc::new(Workspace::create(
            self.root.join(workspace_id),
            workspace_id.to_string(),
        )?);
        open.insert(workspace_id.to_string(), Arc::clone(&ws));
        Ok(ws)
    }

    /// Workspace ids that already exist on disk
    pub fn discover(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.root.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if validate_slug(name).is_ok() {
                        ids.push(name.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation_blocks_traversal() {
        assert!(validate_slug("T0123AB").is_ok());
        assert!(validate_slug("team-one_2").is_ok());
        assert!(validate_slug("../other").is_err());
        assert!(validate_slug("a/b").is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn workspaces_are_created_lazily_and_cached() {
        let dir = tempfile::tempdir().expect("tmp");
        let manager = WorkspaceManager::new(dir.path().to_path_buf());
        let a = manager.workspace("T01").expect("ws");
        let b = manager.workspace("T01").expect("ws");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(dir.path().join("T01").is_dir());
    }

    #[test]
    fn discover_lists_existing_tenants() {
        let dir = tempfile::tempdir().expect("tmp");
        let manager = WorkspaceManager::new(dir.path().to_path_buf());
        manager.workspace("T02").expect("ws");
        manager.workspace("T01").expect("ws");
        assert_eq!(manager.discover().expect("discover"), vec!["T01", "T02"]);
    }

    #[test]
    fn cross_tenant_ids_are_rejected() {
        let dir = tempfile::tempdir().expect("tmp");
        let manager = WorkspaceManager::new(dir.path().to_path_buf());
        assert!(matches!(
            manager.workspace("../T99"),
            Err(LucyError::TenantIsolation { .. })
        ));
    }
}
