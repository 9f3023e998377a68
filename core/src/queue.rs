//! Request queue
//!
//! Bounded admission for agent work: three priority lanes, FIFO within a
//! lane, tenant round-robin so no single workspace starves the rest, and a
//! fixed pool of worker tasks draining it. Enqueue rejects on depth breach
//! (per-workspace 50, global 200) and silently drops duplicate request ids.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueueSettings;

/// Admission priority. High drains before Normal, Normal before Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    const ORDER: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

struct QueueItem {
    workspace_id: String,
    request_id: String,
    handler: BoxFuture<'static, ()>,
}

/// One priority lane: per-tenant FIFO queues plus a rotation of tenants
#[derive(Default)]
struct Lane {
    rotation: VecDeque<String>,
    per_tenant: HashMap<String, VecDeque<QueueItem>>,
}

impl Lane {
    fn push(&mut self, item: QueueItem) {
        let tenant = item.workspace_id.clone();
        let queue = self.per_tenant.entry(tenant.clone()).or_default();
        if queue.is_empty() && !self.rotation.contains(&tenant) {
            self.rotation.push_back(tenant);
        }
        queue.push_back(item);
    }

    /// Pop the next item fairly: front tenant in the rotation gives up one
    /// item and moves to the back if it still has work.
    fn pop(&mut self) -> Option<QueueItem> {
        while let Some(tenant) = self.rotation.pop_front() {
            if let Some(queue) = self.per_tenant.get_mut(&tenant) {
                if let Some(item) = queue.pop_front() {
                    if queue.is_empty() {
                        self.per_tenant.remove(&tenant);
                    } else {
                        self.rotation.push_back(tenant);
                    }
                    return Some(item);
                }
                self.per_tenant.remove(&tenant);
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.rotation.is_empty()
    }
}

struct QueueState {
    lanes: HashMap<Priority, Lane>,
    pending_ids: HashSet<String>,
    per_workspace: HashMap<String, usize>,
    total: usize,
    closed: bool,
}

impl QueueState {
    fn new() -> Self {
        let mut lanes = HashMap::new();
        for p in Priority::ORDER {
            lanes.insert(p, Lane::default());
        }
        Self {
            lanes,
            pending_ids: HashSet::new(),
            per_workspace: HashMap::new(),
            total: 0,
            closed: false,
        }
    }

    fn pop_next(&mut self) -> Option<QueueItem> {
        for p in Priority::ORDER {
            if let Some(item) = self.lanes.get_mut(&p).and_then(Lane::pop) {
                self.total -= 1;
                self.pending_ids.remove(&item.request_id);
                if let Some(count) = self.per_workspace.get_mut(&item.workspace_id) {
                    *count -= 1;
                    if *count == 0 {
                        self.per_workspace.remove(&item.workspace_id);
                    }
                }
                return Some(item);
            }
        }
        None
    }

    fn is_drained(&self) -> bool {
        self.lanes.values().all(Lane::is_empty)
    }
}

/// Bounded, fair, priority request queue
pub struct RequestQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    settings: QueueSettings,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RequestQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            notify: Arc::new(Notify::new()),
            settings,
            workers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the worker pool. Idempotent only in the sense that calling it
    /// twice doubles the pool; call once at startup.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for worker_id in 0..self.settings.workers {
            let state = Arc::clone(&self.state);
            let notify = Arc::clone(&self.notify);
            let shutdown = self.shutdown.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let item = state.lock().pop_next();
                    match item {
                        Some(item) => {
                            debug!(worker_id, request_id = %item.request_id, "queue worker picked up request");
                            item.handler.await;
                        }
                        None => {
                            if shutdown.is_cancelled() {
                                break;
                            }
                            tokio::select! {
                                _ = notify.notified() => {}
                                _ = shutdown.cancelled() => {}
                            }
                        }
                    }
                }
            }));
        }
        info!(workers = self.settings.workers, "request queue started");
    }

    /// Admit a request. Returns false on backpressure (depth breach) or
    /// after shutdown began. A request id already pending is silently
    /// dropped and reported as admitted.
    pub fn enqueue(
        &self,
        workspace_id: &str,
        priority: Priority,
        request_id: &str,
        handler: BoxFuture<'static, ()>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if state.pending_ids.contains(request_id) {
            debug!(request_id, "duplicate request id dropped");
            return true;
        }
        if state.total >= self.settings.global_depth {
            warn!(request_id, "queue rejected request: global depth reached");
            return false;
        }
        let tenant_depth = state.per_workspace.get(workspace_id).copied().unwrap_or(0);
        if tenant_depth >= self.settings.per_workspace_depth {
            warn!(workspace_id, request_id, "queue rejected request: workspace depth reached");
            return false;
        }

        state.pending_ids.insert(request_id.to_string());
        *state
            .per_workspace
            .entry(workspace_id.to_string())
            .or_insert(0) += 1;
        state.total += 1;
        state
            .lanes
            .get_mut(&priority)
            .expect("lane exists for every priority")
            .push(QueueItem {
                workspace_id: workspace_id.to_string(),
                request_id: request_id.to_string(),
                handler,
            });
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Pending work at or beyond twice the worker pool
    pub fn is_busy(&self) -> bool {
        self.state.lock().total >= 2 * self.settings.workers
    }

    pub fn pending(&self) -> usize {
        self.state.lock().total
    }

    /// Stop accepting, let workers drain what is queued, then stop them.
    /// In-flight handlers get until `deadline` to finish.
    pub async fn shutdown(&self, deadline: Duration) {
        self.state.lock().closed = true;

        let drained = tokio::time::timeout(deadline, async {
            loop {
                if self.state.lock().is_drained() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("queue drain deadline passed with work still pending");
        }

        self.shutdown.cancel();
        self.notify.notify_waiters();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = tokio::time::timeout(deadline, worker).await;
        }
        info!("request queue stopped");
    }
}
