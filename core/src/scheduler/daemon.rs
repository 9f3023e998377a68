//! Scheduler daemon
//!
//! One background loop ticks every 30 seconds, discovers workspace
//! directories, fires due cron jobs and evaluates due heartbeats. Job
//! documents are re-read from disk on every tick, so CRUD done anywhere
//! (agent tools, manual edits) is picked up without coordination. Fires
//! that land together run concurrently.

use super::heartbeat::{apply_check, HeartbeatEvaluator, HeartbeatStore};
use super::model::{CronJobSpec, JobType};
use super::store::CronStore;
use crate::config::SchedulerSettings;
use crate::error::Result;
use crate::output;
use crate::sandbox::Sandbox;
use crate::transport::{ChatTransport, OutboundMessage};
use crate::workspace::{Workspace, WorkspaceManager};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Framing prepended to every scheduled agent instruction
const SCHEDULED_FRAMING: &str = "You are running a scheduled task on behalf of this team. \
                                 Nobody is present to answer questions.";

/// Rules appended after the job description and learnings
const SCHEDULED_RULES: &str = "\
Rules for this run:\n\
- Do not ask clarifying questions; decide and proceed.\n\
- Never fabricate sample data; report only what you actually found.\n\
- Validate your own output before finishing.\n\
- If there is genuinely nothing worth reporting, reply exactly HEARTBEAT_OK.\n\
- Do not create or modify scheduled tasks from inside this run.";

/// Always-registered process jobs, alongside the per-workspace crons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemJob {
    /// Mirror recent channel messages into the workspace log
    MessageSync,
    /// Regenerate fast-path and progress variation pools
    PoolRefresh,
    /// Fold stale session facts into permanent knowledge
    MemoryConsolidation,
}

impl SystemJob {
    fn cadence_secs(&self) -> u64 {
        match self {
            SystemJob::MessageSync => 300,
            SystemJob::PoolRefresh => 6 * 3600,
            SystemJob::MemoryConsolidation => 24 * 3600,
        }
    }

    const ALL: [SystemJob; 3] = [
        SystemJob::MessageSync,
        SystemJob::PoolRefresh,
        SystemJob::MemoryConsolidation,
    ];
}

/// How the daemon hands work to the agent side without owning it
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run a scheduled instruction through the agent loop with
    /// is-scheduled context; returns the agent's final text.
    async fn run_scheduled_instruction(
        &self,
        workspace: Arc<Workspace>,
        job: &CronJobSpec,
        instruction: &str,
    ) -> Result<String>;

    /// Run one system job. Implementations may no-op what they don't carry.
    async fn run_system_job(&self, job: SystemJob);
}

/// The background scheduler
pub struct Scheduler {
    workspaces: Arc<WorkspaceManager>,
    executor: Arc<dyn JobExecutor>,
    sandbox: Arc<dyn Sandbox>,
    transport: Arc<dyn ChatTransport>,
    evaluator: HeartbeatEvaluator,
    settings: SchedulerSettings,
    shutdown: CancellationToken,
    system_last_fire: Mutex<HashMap<SystemJob, chrono::DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        executor: Arc<dyn JobExecutor>,
        sandbox: Arc<dyn Sandbox>,
        transport: Arc<dyn ChatTransport>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            workspaces,
            executor,
            sandbox: Arc::clone(&sandbox),
            transport,
            evaluator: HeartbeatEvaluator::new(sandbox),
            settings,
            shutdown: CancellationToken::new(),
            system_last_fire: Mutex::new(HashMap::new()),
        }
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Main loop. Runs until the shutdown token fires.
    pub async fn run(self: Arc<Self>) {
        info!(
            tick_secs = self.settings.heartbeat_tick_secs,
            "scheduler started"
        );
        self.prime_new_jobs();

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.heartbeat_tick_secs));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = Self::tick(&self).await {
                        error!("scheduler tick failed: {}", err);
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("scheduler stopped");
                    break;
                }
            }
        }
    }

    /// Jobs never fired before start counting from now, not from epoch
    fn prime_new_jobs(&self) {
        let Ok(ids) = self.workspaces.discover() else {
            return;
        };
        let now = Utc::now();
        for id in ids {
            let Ok(ws) = self.workspaces.workspace(&id) else {
                continue;
            };
            let store = CronStore::new(&ws);
            let Ok(jobs) = store.list() else { continue };
            for job in jobs {
                if store.last_fire(&job.path).is_none() {
                    let _ = store.record_fire(&job.path, now);
                }
            }
        }
    }

    async fn tick(scheduler: &Arc<Self>) -> Result<()> {
        let now = Utc::now();

        scheduler.run_due_system_jobs(now).await;

        for id in scheduler.workspaces.discover()? {
            let workspace = match scheduler.workspaces.workspace(&id) {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(workspace = id, "skipping workspace: {}", err);
                    continue;
                }
            };
            Self::fire_due_crons(scheduler, &workspace, now);
            scheduler.check_due_heartbeats(&workspace, now).await;
        }
        Ok(())
    }

    async fn run_due_system_jobs(&self, now: chrono::DateTime<Utc>) {
        for job in SystemJob::ALL {
            let due = {
                let mut last = self.system_last_fire.lock();
                let fire = match last.get(&job) {
                    None => true,
                    Some(at) => (now - *at).num_seconds() as u64 >= job.cadence_secs(),
                };
                if fire {
                    last.insert(job, now);
                }
                fire
            };
            if due {
                debug!(?job, "running system job");
                self.executor.run_system_job(job).await;
            }
        }
    }

    fn fire_due_crons(scheduler: &Arc<Self>, workspace: &Arc<Workspace>, now: chrono::DateTime<Utc>) {
        let store = CronStore::new(workspace);
        let jobs = match store.list() {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(workspace = workspace.id(), "cannot list jobs: {}", err);
                return;
            }
        };
        for job in jobs {
            let due = match store.last_fire(&job.path) {
                None => {
                    let _ = store.record_fire(&job.path, now);
                    false
                }
                Some(last) => match job.next_fire(last) {
                    Ok(Some(next)) => next <= now,
                    Ok(None) => false,
                    Err(err) => {
                        warn!(slug = job.path, "unschedulable job: {}", err);
                        false
                    }
                },
            };
            if !due {
                continue;
            }
            let _ = store.record_fire(&job.path, now);
            let scheduler = Arc::clone(scheduler);
            let workspace = Arc::clone(workspace);
            tokio::spawn(async move {
                scheduler.run_job(workspace, job).await;
            });
        }
    }

    /// Execute one job end to end: gates, instruction build, run, deliver.
    pub async fn run_job(&self, workspace: Arc<Workspace>, job: CronJobSpec) {
        let store = CronStore::new(&workspace);

        // dependency gate: only run after the dependency succeeded today
        if !job.depends_on.is_empty() && !store.succeeded_today(&job.depends_on) {
            debug!(slug = job.path, dep = job.depends_on, "dependency not met, skipping");
            return;
        }

        // condition gate: a falsy predicate skips the run
        if !job.condition_script.is_empty() {
            match self
                .sandbox
                .run_script(&job.condition_script, &HashMap::new())
                .await
            {
                Ok(result) if result.ok() && is_truthy(&result.stdout) => {}
                Ok(_) => {
                    debug!(slug = job.path, "condition false, skipping");
                    return;
                }
                Err(err) => {
                    warn!(slug = job.path, "condition script failed, skipping: {}", err);
                    return;
                }
            }
        }

        let mut attempt = 0u32;
        loop {
            match self.execute_job_once(&workspace, &job).await {
                Ok(()) => {
                    let count = store.record_run(&job.path, true).unwrap_or(0);
                    if job.max_runs > 0 && count >= job.max_runs {
                        info!(slug = job.path, "max runs reached, removing job");
                        let _ = store.delete(&job.path);
                    }
                    return;
                }
                Err(err) => {
                    warn!(slug = job.path, attempt, "job run failed: {}", err);
                    if attempt >= job.retries {
                        let _ = store.record_run(&job.path, false);
                        if job.notify_on_failure {
                            let note = format!(
                                "Heads up: the scheduled task \"{}\" failed after {} attempts. \
                                 I'll try again at its next scheduled time.",
                                job.title,
                                attempt + 1
                            );
                            let _ = self
                                .transport
                                .post_direct(workspace.id(), &job.requesting_user, &note)
                                .await;
                        }
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(1 << attempt.min(6))).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn execute_job_once(&self, workspace: &Arc<Workspace>, job: &CronJobSpec) -> Result<()> {
        let store = CronStore::new(workspace);
        let response = match job.job_type {
            JobType::Agent => {
                let instruction = build_instruction(job, &store.learnings(&job.path));
                self.executor
                    .run_scheduled_instruction(Arc::clone(workspace), job, &instruction)
                    .await?
            }
            JobType::Script => {
                let result = self
                    .sandbox
                    .run_script(&job.description, &HashMap::new())
                    .await?;
                if !result.ok() {
                    return Err(crate::error::LucyError::ToolFatal {
                        tool: format!("cron:{}", job.path),
                        message: result.stderr,
                    });
                }
                result.stdout
            }
        };

        let _ = workspace.log_activity(&format!("Ran {}", job.title));

        if is_suppressed(&response) {
            debug!(slug = job.path, "response suppressed, nothing to deliver");
            return Ok(());
        }

        let processed = output::process(&response);
        match job.delivery_mode {
            super::model::DeliveryMode::Channel => {
                self.transport
                    .post_message(OutboundMessage::text_reply(
                        workspace.id(),
                        job.delivery_channel.clone(),
                        None,
                        processed,
                    ))
                    .await?;
            }
            super::model::DeliveryMode::DirectMessage => {
                self.transport
                    .post_direct(workspace.id(), &job.requesting_user, &processed)
                    .await?;
            }
        }
        Ok(())
    }

    async fn check_due_heartbeats(&self, workspace: &Arc<Workspace>, now: chrono::DateTime<Utc>) {
        let store = HeartbeatStore::new(workspace);
        let specs = match store.list() {
            Ok(specs) => specs,
            Err(err) => {
                warn!(workspace = workspace.id(), "cannot list heartbeats: {}", err);
                return;
            }
        };
        for mut spec in specs {
            if !spec.is_due(now) {
                continue;
            }
            let outcome = self.evaluator.evaluate(&spec.kind).await;
            let alert = apply_check(&mut spec, outcome, now);
            if let Err(err) = store.save(&spec) {
                warn!(slug = spec.slug, "failed to persist heartbeat state: {}", err);
            }
            if let Some(alert_text) = alert {
                info!(slug = spec.slug, "heartbeat triggered");
                let _ = self
                    .transport
                    .post_message(OutboundMessage::text_reply(
                        workspace.id(),
                        spec.alert_channel.clone(),
                        None,
                        alert_text,
                    ))
                    .await;
            }
        }
    }
}

/// Build the full agent instruction for a scheduled run
pub fn build_instruction(job: &CronJobSpec, learnings: &str) -> String {
    let mut out = format!("{}\n\n{}", SCHEDULED_FRAMING, job.description);
    if !learnings.trim().is_empty() {
        out.push_str(&format!(
            "\n\nWhat previous runs of this task learned:\n{}",
            learnings.trim()
        ));
    }
    out.push_str(&format!("\n\n{}", SCHEDULED_RULES));
    out
}

/// HEARTBEAT_OK suppression: nothing worth delivering
pub fn is_suppressed(response: &str) -> bool {
    let normalized = response.trim().to_uppercase();
    normalized.is_empty()
        || normalized == "SKIP"
        || normalized == "HEARTBEAT_OK"
        || normalized.starts_with("HEARTBEAT_OK")
}

/// Condition predicate truthiness: empty, "false", "0", JSON false or
/// null all skip the run.
fn is_truthy(stdout: &str) -> bool {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return false;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Bool(b)) => b,
        Ok(serde_json::Value::Null) => false,
        Ok(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Ok(serde_json::Value::String(s)) => !s.is_empty() && s != "false" && s != "0",
        Ok(_) => true,
        Err(_) => !trimmed.eq_ignore_ascii_case("false") && trimmed != "0",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerSettings;
    use crate::sandbox::NoopSandbox;
    use crate::scheduler::model::{DeliveryMode, JobType};
    use crate::workspace::WorkspaceManager;

    struct FakeExecutor {
        response: String,
        fail: bool,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl JobExecutor for FakeExecutor {
        async fn run_scheduled_instruction(
            &self,
            _workspace: Arc<Workspace>,
            _job: &CronJobSpec,
            _instruction: &str,
        ) -> Result<String> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(crate::error::LucyError::LlmTransient {
                    message: "down".to_string(),
                });
            }
            Ok(self.response.clone())
        }

        async fn run_system_job(&self, _job: SystemJob) {}
    }

    #[derive(Default)]
    struct RecordingTransport {
        messages: Mutex<Vec<OutboundMessage>>,
        directs: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn post_message(&self, message: OutboundMessage) -> Result<()> {
            self.messages.lock().push(message);
            Ok(())
        }

        async fn post_direct(&self, _team: &str, user: &str, text: &str) -> Result<()> {
            self.directs.lock().push((user.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn job(slug: &str) -> CronJobSpec {
        let now = Utc::now();
        CronJobSpec {
            path: slug.to_string(),
            cron: "*/30 8-22 * * *".to_string(),
            title: "Proactive Heartbeat".to_string(),
            description: "look around and report anything notable".to_string(),
            job_type: JobType::Agent,
            delivery_mode: DeliveryMode::Channel,
            delivery_channel: "C01234".to_string(),
            requesting_user: "U09876".to_string(),
            max_runs: 0,
            timezone: "UTC".to_string(),
            depends_on: String::new(),
            condition_script: String::new(),
            retries: 0,
            notify_on_failure: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn scheduler(
        response: &str,
        fail: bool,
    ) -> (
        tempfile::TempDir,
        Arc<Scheduler>,
        Arc<Workspace>,
        Arc<RecordingTransport>,
        Arc<FakeExecutor>,
    ) {
        let dir = tempfile::tempdir().expect("tmp");
        let manager = Arc::new(WorkspaceManager::new(dir.path().to_path_buf()));
        let workspace = manager.workspace("T01").expect("ws");
        let transport = Arc::new(RecordingTransport::default());
        let executor = Arc::new(FakeExecutor {
            response: response.to_string(),
            fail,
            calls: Mutex::new(0),
        });
        let scheduler = Arc::new(Scheduler::new(
            manager,
            executor.clone(),
            Arc::new(NoopSandbox),
            transport.clone(),
            SchedulerSettings::default(),
        ));
        (dir, scheduler, workspace, transport, executor)
    }

    #[test]
    fn suppression_sentinels() {
        assert!(is_suppressed(""));
        assert!(is_suppressed("   "));
        assert!(is_suppressed("skip"));
        assert!(is_suppressed("HEARTBEAT_OK"));
        assert!(is_suppressed("heartbeat_ok"));
        assert!(is_suppressed("HEARTBEAT_OK nothing new today"));
        assert!(!is_suppressed("two deploys failed overnight"));
    }

    #[test]
    fn truthiness_of_condition_output() {
        assert!(is_truthy("true"));
        assert!(is_truthy("1"));
        assert!(is_truthy("{\"run\": true}"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("null"));
    }

    #[test]
    fn instruction_contains_framing_learnings_and_rules() {
        let instruction = build_instruction(&job("heartbeat"), "deploys land around 10am\n");
        assert!(instruction.starts_with(SCHEDULED_FRAMING));
        assert!(instruction.contains("look around"));
        assert!(instruction.contains("deploys land around 10am"));
        assert!(instruction.contains("HEARTBEAT_OK"));
        assert!(instruction.contains("Do not create or modify scheduled tasks"));
    }

    #[tokio::test]
    async fn heartbeat_ok_suppresses_delivery_but_logs() {
        let (_dir, scheduler, workspace, transport, _) = scheduler("HEARTBEAT_OK", false);
        scheduler.run_job(Arc::clone(&workspace), job("heartbeat")).await;
        assert!(transport.messages.lock().is_empty());
        assert!(transport.directs.lock().is_empty());
        let log = workspace.activity_log_today().expect("log");
        assert!(log.contains("Ran Proactive Heartbeat"));
    }

    #[tokio::test]
    async fn real_output_is_processed_and_delivered() {
        let (_dir, scheduler, workspace, transport, _) =
            scheduler("Great question! Two deploys failed\u{2014}check the pipeline.", false);
        scheduler.run_job(Arc::clone(&workspace), job("heartbeat")).await;
        let messages = transport.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel_id, "C01234");
        // output processor ran
        assert!(!messages[0].text.contains('\u{2014}'));
        assert!(!messages[0].text.starts_with("Great question"));
    }

    #[tokio::test]
    async fn direct_message_delivery_mode() {
        let (_dir, scheduler, workspace, transport, _) = scheduler("found something", false);
        let mut j = job("digest");
        j.delivery_mode = DeliveryMode::DirectMessage;
        scheduler.run_job(Arc::clone(&workspace), j).await;
        let directs = transport.directs.lock();
        assert_eq!(directs.len(), 1);
        assert_eq!(directs[0].0, "U09876");
    }

    #[tokio::test]
    async fn exhausted_retries_notify_the_owner() {
        let (_dir, scheduler, workspace, transport, executor) = scheduler("", true);
        scheduler.run_job(Arc::clone(&workspace), job("heartbeat")).await;
        assert_eq!(*executor.calls.lock(), 1);
        let directs = transport.directs.lock();
        assert_eq!(directs.len(), 1);
        assert!(directs[0].1.contains("Proactive Heartbeat"));
    }

    #[tokio::test]
    async fn max_runs_self_deletes() {
        let (_dir, scheduler, workspace, _, _) = scheduler("done", false);
        let store = CronStore::new(&workspace);
        let mut j = job("once");
        j.max_runs = 1;
        store.save(&j).expect("save");
        scheduler.run_job(Arc::clone(&workspace), j).await;
        assert!(!store.exists("once"));
    }

    #[tokio::test]
    async fn depends_on_gates_until_dependency_succeeds() {
        let (_dir, scheduler, workspace, transport, executor) = scheduler("report", false);
        let mut j = job("dependent");
        j.depends_on = "upstream".to_string();
        scheduler.run_job(Arc::clone(&workspace), j.clone()).await;
        assert_eq!(*executor.calls.lock(), 0);
        assert!(transport.messages.lock().is_empty());

        // mark the dependency green today, then it runs
        CronStore::new(&workspace)
            .record_run("upstream", true)
            .expect("record");
        scheduler.run_job(Arc::clone(&workspace), j).await;
        assert_eq!(*executor.calls.lock(), 1);
    }
}
