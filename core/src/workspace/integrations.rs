//! Integration records
//!
//! Per-workspace OAuth bindings to external services, tracked as documents
//! in the workspace state. Credentials themselves live with the gateway;
//! the workspace only records which services exist and where each one is
//! in its lifecycle.

use super::store::Workspace;
use crate::error::{LucyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const STATE_KEY: &str = "integrations";

/// Lifecycle of a service binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Pending,
    Active,
    Refreshing,
    Error,
    Revoked,
}

impl IntegrationStatus {
    /// Legal forward edges: Pending activates; an active binding may
    /// refresh, error out or be revoked; refresh settles back to active
    /// or error.
    pub fn can_transition_to(&self, next: IntegrationStatus) -> bool {
        use IntegrationStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Error)
                | (Pending, Revoked)
                | (Active, Refreshing)
                | (Active, Error)
                | (Active, Revoked)
                | (Refreshing, Active)
                | (Refreshing, Error)
                | (Error, Refreshing)
                | (Error, Revoked)
        )
    }
}

/// One service binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub service: String,
    pub status: IntegrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// All known integration records for this workspace
    pub fn integrations(&self) -> Result<Vec<IntegrationRecord>> {
        match self.state_get(STATE_KEY)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Create a binding in Pending, or return the existing record
    pub fn integration_begin(&self, service: &str) -> Result<IntegrationRecord> {
        let mut records = self.integrations()?;
        if let Some(existing) = records.iter().find(|r| r.service == service) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let record = IntegrationRecord {
            service: service.to_string(),
            status: IntegrationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        self.state_set(STATE_KEY, serde_json::to_value(&records)?)?;
        Ok(record)
    }

    /// Move a binding along its lifecycle
    pub fn integration_set_status(
        &self,
        service: &str,
        status: IntegrationStatus,
    ) -> Result<IntegrationRecord> {
        let mut records = self.integrations()?;
        let record = records
            .iter_mut()
            .find(|r| r.service == service)
            .ok_or_else(|| LucyError::WorkspaceNotFound {
                path: format!("integration {}", service),
            })?;
        if !record.status.can_transition_to(status) {
            return Err(LucyError::Validation {
                message: format!(
                    "integration {} cannot move {:?} -> {:?}",
                    service, record.status, status
                ),
            });
        }
        record.status = status;
        record.updated_at = Utc::now();
        let updated = record.clone();
        self.state_set(STATE_KEY, serde_json::to_value(&records)?)?;
        Ok(updated)
    }

    /// Service names currently active
    pub fn active_services(&self) -> Result<Vec<String>> {
        Ok(self
            .integrations()?
            .into_iter()
            .filter(|r| r.status == IntegrationStatus::Active)
            .map(|r| r.service)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceManager;

    fn ws() -> (tempfile::TempDir, std::sync::Arc<Workspace>) {
        let dir = tempfile::tempdir().expect("tmp");
        let ws = WorkspaceManager::new(dir.path().to_path_buf())
            .workspace("T01")
            .expect("ws");
        (dir, ws)
    }

    #[test]
    fn binding_lifecycle() {
        let (_dir, ws) = ws();
        let record = ws.integration_begin("gmail").expect("begin");
        assert_eq!(record.status, IntegrationStatus::Pending);

        ws.integration_set_status("gmail", IntegrationStatus::Active)
            .expect("activate");
        assert_eq!(ws.active_services().expect("list"), vec!["gmail"]);

        ws.integration_set_status("gmail", IntegrationStatus::Refreshing)
            .expect("refresh");
        ws.integration_set_status("gmail", IntegrationStatus::Active)
            .expect("settle");
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let (_dir, ws) = ws();
        ws.integration_begin("github").expect("begin");
        // pending cannot refresh
        assert!(ws
            .integration_set_status("github", IntegrationStatus::Refreshing)
            .is_err());
        ws.integration_set_status("github", IntegrationStatus::Active)
            .expect("activate");
        ws.integration_set_status("github", IntegrationStatus::Revoked)
            .expect("revoke");
        // revoked is terminal
        assert!(ws
            .integration_set_status("github", IntegrationStatus::Active)
            .is_err());
    }

    #[test]
    fn begin_is_idempotent() {
        let (_dir, ws) = ws();
        ws.integration_begin("linear").expect("begin");
        ws.integration_begin("linear").expect("begin again");
        assert_eq!(ws.integrations().expect("list").len(), 1);
    }
}
