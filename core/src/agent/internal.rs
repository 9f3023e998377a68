//! Internal tools
//!
//! The `lucy_*` handler registry: workspace-local capabilities for memory,
//! skills and schedule CRUD. Argument parsing failures surface as
//! parse-error outcomes the model can correct; nothing here panics on bad
//! model output.

use super::tool::{Tool, ToolContext, ToolOutcome, ToolRegistry};
use crate::error::ErrorKind;
use crate::scheduler::model::{validate_job, CronJobSpec, DeliveryMode, JobType};
use crate::scheduler::store::CronStore;
use crate::workspace::{FactCategory, SessionFact};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

fn parse_args<'a, T: Deserialize<'a>>(tool: &str, args: &'a str) -> Result<T, ToolOutcome> {
    serde_json::from_str(args).map_err(|e| {
        ToolOutcome::failure(
            ErrorKind::ArgumentParse,
            format!("{} arguments did not parse: {}", tool, e),
            false,
        )
    })
}

// =============================================================================
// Memory
// =============================================================================

pub struct RememberTool;

#[derive(Deserialize)]
struct RememberArgs {
    fact: String,
    #[serde(default)]
    category: Option<String>,
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "lucy_remember"
    }

    fn description(&self) -> &str {
        "Store a short fact about this team for later sessions"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "fact": { "type": "string" },
                "category": { "type": "string", "enum": ["company", "team", "session"] }
            },
            "required": ["fact"]
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        let parsed: RememberArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        let category = match parsed.category.as_deref() {
            Some("company") => FactCategory::Company,
            Some("team") => FactCategory::Team,
            _ => FactCategory::Session,
        };
        let _guard = ctx.workspace.lock_writes().await;
        match ctx
            .workspace
            .add_session_fact(SessionFact::new(parsed.fact, category, &ctx.user_id))
        {
            Ok(()) => ToolOutcome::success("remembered"),
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

pub struct RecallTool;

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "lucy_recall"
    }

    fn description(&self) -> &str {
        "List the facts currently remembered for this team"
    }

    async fn call(&self, _args: &str, ctx: &ToolContext) -> ToolOutcome {
        match ctx.workspace.session_facts() {
            Ok(facts) if facts.is_empty() => ToolOutcome::success("nothing remembered yet"),
            Ok(facts) => {
                let lines: Vec<String> = facts
                    .iter()
                    .map(|f| format!("[{:?}] {}", f.category, f.content))
                    .collect();
                ToolOutcome::success(lines.join("\n"))
            }
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

// =============================================================================
// Skills
// =============================================================================

pub struct ListSkillsTool;

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "lucy_list_skills"
    }

    fn description(&self) -> &str {
        "List the skills saved in this workspace"
    }

    async fn call(&self, _args: &str, ctx: &ToolContext) -> ToolOutcome {
        match ctx.workspace.load_skills() {
            Ok(skills) if skills.is_empty() => ToolOutcome::success("no skills saved"),
            Ok(skills) => {
                let lines: Vec<String> = skills
                    .iter()
                    .map(|s| format!("{}: {}", s.slug, s.description))
                    .collect();
                ToolOutcome::success(lines.join("\n"))
            }
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

pub struct ReadSkillTool;

#[derive(Deserialize)]
struct SlugArgs {
    slug: String,
}

#[async_trait]
impl Tool for ReadSkillTool {
    fn name(&self) -> &str {
        "lucy_read_skill"
    }

    fn description(&self) -> &str {
        "Read the full body of one saved skill"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "slug": { "type": "string" } },
            "required": ["slug"]
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        let parsed: SlugArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        match ctx
            .workspace
            .read_document(&format!("skills/{}/SKILL.md", parsed.slug))
        {
            Ok(body) => ToolOutcome::success(body),
            Err(_) => ToolOutcome::failure(
                ErrorKind::ToolFatal,
                format!("no skill named {}", parsed.slug),
                false,
            ),
        }
    }
}

pub struct SaveSkillTool;

#[derive(Deserialize)]
struct SaveSkillArgs {
    slug: String,
    content: String,
}

#[async_trait]
impl Tool for SaveSkillTool {
    fn name(&self) -> &str {
        "lucy_save_skill"
    }

    fn description(&self) -> &str {
        "Create or replace a skill document"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["slug", "content"]
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        let parsed: SaveSkillArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        let _guard = ctx.workspace.lock_writes().await;
        match ctx.workspace.save_skill(&parsed.slug, &parsed.content) {
            Ok(()) => ToolOutcome::success(format!("saved skill {}", parsed.slug)),
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

// =============================================================================
// Cron CRUD
// =============================================================================

pub struct ListCronsTool;

#[async_trait]
impl Tool for ListCronsTool {
    fn name(&self) -> &str {
        "lucy_list_crons"
    }

    fn description(&self) -> &str {
        "List the scheduled jobs in this workspace"
    }

    async fn call(&self, _args: &str, ctx: &ToolContext) -> ToolOutcome {
        let store = CronStore::new(&ctx.workspace);
        match store.list() {
            Ok(jobs) if jobs.is_empty() => ToolOutcome::success("no scheduled jobs"),
            Ok(jobs) => {
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| format!("{} [{}] {}", j.path, j.cron, j.title))
                    .collect();
                ToolOutcome::success(lines.join("\n"))
            }
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

pub struct CreateCronTool {
    /// Daily-fire count above which creation warns
    pub warn_threshold: u32,
}

#[derive(Deserialize)]
struct CreateCronArgs {
    slug: String,
    cron: String,
    title: String,
    description: String,
    #[serde(default)]
    delivery_channel: Option<String>,
    #[serde(default)]
    direct_message: bool,
    #[serde(default)]
    max_runs: u32,
    #[serde(default)]
    depends_on: Option<String>,
}

#[async_trait]
impl Tool for CreateCronTool {
    fn name(&self) -> &str {
        "lucy_create_cron"
    }

    fn description(&self) -> &str {
        "Create a recurring scheduled job (cron expression, five fields)"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "cron": { "type": "string" },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "delivery_channel": { "type": "string" },
                "direct_message": { "type": "boolean" },
                "max_runs": { "type": "integer" },
                "depends_on": { "type": "string" }
            },
            "required": ["slug", "cron", "title", "description"]
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        if ctx.is_scheduled {
            return ToolOutcome::failure(
                ErrorKind::ToolFatal,
                "scheduled runs may not create or modify schedules",
                false,
            );
        }
        let parsed: CreateCronArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        let now = Utc::now();
        let spec = CronJobSpec {
            path: parsed.slug.clone(),
            cron: parsed.cron,
            title: parsed.title,
            description: parsed.description,
            job_type: JobType::Agent,
            delivery_mode: if parsed.direct_message {
                DeliveryMode::DirectMessage
            } else {
                DeliveryMode::Channel
            },
            delivery_channel: parsed.delivery_channel.unwrap_or_default(),
            requesting_user: ctx.user_id.clone(),
            max_runs: parsed.max_runs,
            timezone: "UTC".to_string(),
            depends_on: parsed.depends_on.unwrap_or_default(),
            condition_script: String::new(),
            retries: 3,
            notify_on_failure: true,
            created_at: now,
            updated_at: now,
        };
        let validation = match validate_job(&spec, self.warn_threshold) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::failure(ErrorKind::ValidationError, e.to_string(), false),
        };
        let store = CronStore::new(&ctx.workspace);
        match store.save(&spec) {
            Ok(()) => {
                let mut note = format!("scheduled {} ({})", spec.title, spec.cron);
                if validation.warn_high_frequency {
                    note.push_str(&format!(
                        "; heads up: that's about {} runs a day",
                        validation.daily_fires
                    ));
                }
                ToolOutcome::success(note)
            }
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

pub struct DeleteCronTool;

#[async_trait]
impl Tool for DeleteCronTool {
    fn name(&self) -> &str {
        "lucy_delete_cron"
    }

    fn description(&self) -> &str {
        "Remove a scheduled job by slug"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "slug": { "type": "string" } },
            "required": ["slug"]
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        if ctx.is_scheduled {
            return ToolOutcome::failure(
                ErrorKind::ToolFatal,
                "scheduled runs may not create or modify schedules",
                false,
            );
        }
        let parsed: SlugArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        let store = CronStore::new(&ctx.workspace);
        if !store.exists(&parsed.slug) {
            return ToolOutcome::failure(
                ErrorKind::ToolFatal,
                format!("no job named {}", parsed.slug),
                false,
            );
        }
        match store.delete(&parsed.slug) {
            Ok(()) => ToolOutcome::success(format!("removed {}", parsed.slug)),
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

// =============================================================================
// Connections and snapshots
// =============================================================================

pub struct ConnectionsTool;

#[derive(Deserialize)]
struct ConnectionsArgs {
    #[serde(default)]
    service: Option<String>,
}

#[async_trait]
impl Tool for ConnectionsTool {
    fn name(&self) -> &str {
        "lucy_connections"
    }

    fn description(&self) -> &str {
        "List connected services, or start authorizing a new one"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "service": { "type": "string" } }
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        let parsed: ConnectionsArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        match parsed.service {
            Some(service) => match ctx.workspace.integration_begin(&service) {
                Ok(record) => ToolOutcome::success(format!(
                    "{} authorization is {:?}; the user needs to finish connecting it",
                    record.service, record.status
                )),
                Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
            },
            None => match ctx.workspace.integrations() {
                Ok(records) if records.is_empty() => {
                    ToolOutcome::success("no services connected yet")
                }
                Ok(records) => {
                    let lines: Vec<String> = records
                        .iter()
                        .map(|r| format!("{}: {:?}", r.service, r.status))
                        .collect();
                    ToolOutcome::success(lines.join("\n"))
                }
                Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
            },
        }
    }
}

pub struct SnapshotTool;

#[derive(Deserialize)]
struct SnapshotArgs {
    category: String,
    data: serde_json::Value,
}

#[async_trait]
impl Tool for SnapshotTool {
    fn name(&self) -> &str {
        "lucy_snapshot"
    }

    fn description(&self) -> &str {
        "Save a dated data snapshot for this workspace, by category"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "category": { "type": "string" },
                "data": { "type": "object" }
            },
            "required": ["category", "data"]
        })
    }

    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome {
        let parsed: SnapshotArgs = match parse_args(self.name(), args) {
            Ok(v) => v,
            Err(out) => return out,
        };
        match ctx.workspace.write_snapshot(&parsed.category, &parsed.data) {
            Ok(()) => ToolOutcome::success(format!("snapshot saved under {}", parsed.category)),
            Err(e) => ToolOutcome::failure(ErrorKind::Unknown, e.to_string(), false),
        }
    }
}

/// The default internal registry
pub fn default_registry(cron_warn_threshold: u32) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(RememberTool));
    registry.register(Box::new(RecallTool));
    registry.register(Box::new(ListSkillsTool));
    registry.register(Box::new(ReadSkillTool));
    registry.register(Box::new(SaveSkillTool));
    registry.register(Box::new(ListCronsTool));
    registry.register(Box::new(CreateCronTool {
        warn_threshold: cron_warn_threshold,
    }));
    registry.register(Box::new(DeleteCronTool));
    registry.register(Box::new(ConnectionsTool));
    registry.register(Box::new(SnapshotTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceManager;
    use std::sync::Arc;

    fn ctx(is_scheduled: bool) -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().expect("tmp");
        let ws = WorkspaceManager::new(dir.path().to_path_buf())
            .workspace("T01")
            .expect("ws");
        (
            dir,
            ToolContext {
                workspace: Arc::clone(&ws),
                user_id: "U01".into(),
                is_scheduled,
            },
        )
    }

    #[tokio::test]
    async fn remember_then_recall() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_remember",
                r#"{"fact":"standup is at 9:30","category":"team"}"#,
                &ctx,
            )
            .await;
        assert!(out.ok);
        let out = registry.dispatch("lucy_recall", "{}", &ctx).await;
        assert!(out.payload.contains("standup is at 9:30"));
    }

    #[tokio::test]
    async fn bad_args_are_parse_errors() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry.dispatch("lucy_remember", "not json", &ctx).await;
        assert_eq!(out.error_kind, Some(ErrorKind::ArgumentParse));
        assert!(out.render().starts_with("[parse-error]"));
    }

    #[tokio::test]
    async fn cron_create_list_delete() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_create_cron",
                r#"{"slug":"digest","cron":"0 9 * * 1-5","title":"Morning digest","description":"summarize overnight activity"}"#,
                &ctx,
            )
            .await;
        assert!(out.ok, "{}", out.payload);
        let out = registry.dispatch("lucy_list_crons", "{}", &ctx).await;
        assert!(out.payload.contains("digest"));
        let out = registry
            .dispatch("lucy_delete_cron", r#"{"slug":"digest"}"#, &ctx)
            .await;
        assert!(out.ok);
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_create_cron",
                r#"{"slug":"bad","cron":"banana","title":"x","description":"y"}"#,
                &ctx,
            )
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn high_frequency_cron_warns_but_saves() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_create_cron",
                r#"{"slug":"busy","cron":"*/5 * * * *","title":"x","description":"y"}"#,
                &ctx,
            )
            .await;
        assert!(out.ok);
        assert!(out.payload.contains("heads up"));
    }

    #[tokio::test]
    async fn scheduled_runs_cannot_touch_schedules() {
        let (_dir, ctx) = ctx(true);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_create_cron",
                r#"{"slug":"sneaky","cron":"0 9 * * *","title":"x","description":"y"}"#,
                &ctx,
            )
            .await;
        assert!(!out.ok);
        let out = registry
            .dispatch("lucy_delete_cron", r#"{"slug":"whatever"}"#, &ctx)
            .await;
        assert!(!out.ok);
    }

    #[tokio::test]
    async fn connections_listing_and_begin() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry.dispatch("lucy_connections", "{}", &ctx).await;
        assert!(out.payload.contains("no services"));
        let out = registry
            .dispatch("lucy_connections", r#"{"service":"gmail"}"#, &ctx)
            .await;
        assert!(out.payload.contains("gmail"));
        let out = registry.dispatch("lucy_connections", "{}", &ctx).await;
        assert!(out.payload.contains("Pending"));
    }

    #[tokio::test]
    async fn snapshot_writes_dated_file() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_snapshot",
                r#"{"category":"signups","data":{"count": 42}}"#,
                &ctx,
            )
            .await;
        assert!(out.ok);
        let files = ctx.workspace.list_files("data/snapshots/signups").expect("list");
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn skills_round_trip() {
        let (_dir, ctx) = ctx(false);
        let registry = default_registry(50);
        let out = registry
            .dispatch(
                "lucy_save_skill",
                r#"{"slug":"deploys","content":"---\nname: Deploys\ntriggers: deploy\n---\nUse the blue button."}"#,
                &ctx,
            )
            .await;
        assert!(out.ok);
        let out = registry
            .dispatch("lucy_read_skill", r#"{"slug":"deploys"}"#, &ctx)
            .await;
        assert!(out.payload.contains("blue button"));
        let out = registry
            .dispatch("lucy_read_skill", r#"{"slug":"missing"}"#, &ctx)
            .await;
        assert!(!out.ok);
    }
}
