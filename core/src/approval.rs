//! Human-in-the-loop approvals
//!
//! Destructive tool calls suspend the agent loop behind an approval
//! record. The hub is process-wide, keyed by approval id, guarded by one
//! mutex, and TTL-swept: a request nobody answers inside 300 seconds
//! expires and fails the task with `approval-expired`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Default approval TTL
pub const APPROVAL_TTL: Duration = Duration::from_secs(300);

/// Verbs that mark a tool call as destructive
const DESTRUCTIVE_VERBS: &[&str] = &[
    "delete",
    "remove",
    "cancel",
    "send",
    "forward",
    "archive",
    "destroy",
    "revoke",
    "unsubscribe",
];

/// Does this tool name require human approval?
pub fn is_destructive(tool_name: &str) -> bool {
    let lower = tool_name.to_lowercase();
    DESTRUCTIVE_VERBS
        .iter()
        .any(|verb| lower.split(['_', '-']).any(|part| part == *verb))
}

/// Outcome of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Expired,
}

/// What the requester sees about a pending approval
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub workspace_id: String,
    pub tool: String,
    pub summary: String,
    pub created_at: Instant,
}

struct PendingEntry {
    record: ApprovalRecord,
    responder: oneshot::Sender<ApprovalDecision>,
}

/// Process-wide pending-approval map
#[derive(Default)]
pub struct ApprovalHub {
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl ApprovalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval; the receiver resolves when a human
    /// answers or the caller times it out.
    pub fn request(
        &self,
        workspace_id: &str,
        tool: &str,
        summary: &str,
    ) -> (ApprovalRecord, oneshot::Receiver<ApprovalDecision>) {
        let record = ApprovalRecord {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.to_string(),
            tool: tool.to_string(),
            summary: summary.to_string(),
            created_at: Instant::now(),
        };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            record.id,
            PendingEntry {
                record: record.clone(),
                responder: tx,
            },
        );
        debug!(approval_id = %record.id, tool, "approval requested");
        (record, rx)
    }

    /// Resolve a pending approval. Unknown ids (already expired or
    /// answered) return false.
    pub fn resolve(&self, id: Uuid, decision: ApprovalDecision) -> bool {
        let entry = self.pending.lock().remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.responder.send(decision);
                true
            }
            None => false,
        }
    }

    /// Drop a request the caller timed out on
    pub fn expire(&self, id: Uuid) {
        if self.pending.lock().remove(&id).is_some() {
            debug!(approval_id = %id, "approval expired");
        }
    }

    /// Sweep entries older than the TTL. Dropping the sender resolves the
    /// paired receiver with an error, which callers treat as expiry.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.record.created_at.elapsed() < ttl);
        before - pending.len()
    }

    pub fn pending_for(&self, workspace_id: &str) -> Vec<ApprovalRecord> {
        self.pending
            .lock()
            .values()
            .filter(|e| e.record.workspace_id == workspace_id)
            .map(|e| e.record.clone())
            .collect()
    }
}
