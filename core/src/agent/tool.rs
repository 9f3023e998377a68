//! Tools
//!
//! A tool is a named capability the model may invoke. Outcomes are values,
//! never exceptions: the model has to be able to see a failure and adapt.
//! Dispatch is three-way by name shape: internal (`lucy_*`), delegation
//! (`delegate_to_*_agent`), external (everything else, routed through the
//! integration gateway).

use crate::error::ErrorKind;
use crate::workspace::Workspace;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::ToolSpec;

/// How a tool call is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Workspace-local handler behind the `lucy_` prefix
    Internal,
    /// Sub-agent behind `delegate_to_{x}_agent`
    Delegation,
    /// Third-party action through the integration gateway
    External,
}

lazy_static! {
    static ref DELEGATE: Regex = Regex::new(r"^delegate_to_[a-z0-9_]+_agent$").unwrap();
}

/// Classify a tool name by shape
pub fn kind_of(name: &str) -> ToolKind {
    if name.starts_with("lucy_") {
        ToolKind::Internal
    } else if DELEGATE.is_match(name) {
        ToolKind::Delegation
    } else {
        ToolKind::External
    }
}

/// Typed tool result the model can read and adapt to
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub payload: String,
    pub error_kind: Option<ErrorKind>,
    pub retryable: bool,
}

impl ToolOutcome {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            ok: true,
            payload: payload.into(),
            error_kind: None,
            retryable: false,
        }
    }

    pub fn failure(kind: ErrorKind, payload: impl Into<String>, retryable: bool) -> Self {
        Self {
            ok: false,
            payload: payload.into(),
            error_kind: Some(kind),
            retryable,
        }
    }

    /// Render as the content of a tool-role message. Failures carry a
    /// bracketed marker the stuck detector and the model both recognize.
    pub fn render(&self) -> String {
        if self.ok {
            self.payload.clone()
        } else {
            let kind = match self.error_kind {
                Some(ErrorKind::ToolAuth) => "connection-required",
                Some(ErrorKind::ArgumentParse) => "parse-error",
                Some(ErrorKind::UnknownTool) => "unknown-tool",
                Some(ErrorKind::ToolTransient) => "retryable-error",
                _ => "error",
            };
            format!("[{}] {}", kind, self.payload)
        }
    }

    /// Does this rendered result read as an error to the stuck detector?
    pub fn is_error_marker(content: &str) -> bool {
        content.starts_with("[error]")
            || content.starts_with("[retryable-error]")
            || content.starts_with("[connection-required]")
            || content.starts_with("[parse-error]")
            || content.starts_with("[unknown-tool]")
    }
}

/// Execution context handed to internal tools
pub struct ToolContext {
    pub workspace: Arc<Workspace>,
    pub user_id: String,
    pub is_scheduled: bool,
}

/// A workspace-local capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool name the model calls, e.g. "lucy_remember"
    fn name(&self) -> &str;

    /// A brief description of what the tool does
    fn description(&self) -> &str;

    /// JSON schema for tool parameters
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "args": { "type": "string" }
            },
            "required": ["args"]
        })
    }

    /// Execute. Failures are values, not errors.
    async fn call(&self, args: &str, ctx: &ToolContext) -> ToolOutcome;
}

/// Gateway to third-party actions and the five meta-tools
#[async_trait]
pub trait IntegrationClient: Send + Sync {
    /// Execute an external tool by name with raw JSON arguments
    async fn execute(&self, workspace_id: &str, tool: &str, args: &str) -> ToolOutcome;

    /// Services currently connected for a workspace
    async fn connected_services(&self, workspace_id: &str) -> Vec<String>;

    /// Tool schemas to offer the model for this workspace
    async fn available_tools(&self, workspace_id: &str) -> Vec<ToolSpec>;
}

/// Gateway that has nothing connected. Every action reports the missing
/// connection so the model can tell the user.
#[derive(Debug, Default)]
pub struct NullIntegrationClient;

#[async_trait]
impl IntegrationClient for NullIntegrationClient {
    async fn execute(&self, _workspace_id: &str, tool: &str, _args: &str) -> ToolOutcome {
        ToolOutcome::failure(
            ErrorKind::ToolAuth,
            format!("no connection available for {}", tool),
            false,
        )
    }

    async fn connected_services(&self, _workspace_id: &str) -> Vec<String> {
        Vec::new()
    }

    async fn available_tools(&self, _workspace_id: &str) -> Vec<ToolSpec> {
        Vec::new()
    }
}

/// Registry of internal tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Wire schemas for everything registered
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec::function(t.name(), t.description(), t.parameters()))
            .collect();
        specs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        specs
    }

    pub async fn dispatch(&self, name: &str, args: &str, ctx: &ToolContext) -> ToolOutcome {
        match self.get(name) {
            Some(tool) => tool.call(args, ctx).await,
            None => ToolOutcome::failure(
                ErrorKind::UnknownTool,
                format!("{} is not a registered tool", name),
                false,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(kind_of("lucy_remember"), ToolKind::Internal);
        assert_eq!(kind_of("delegate_to_email_agent"), ToolKind::Delegation);
        assert_eq!(kind_of("GMAIL_SEND_EMAIL"), ToolKind::External);
        assert_eq!(kind_of("search_tools"), ToolKind::External);
        // malformed delegation names fall through to external
        assert_eq!(kind_of("delegate_to_agent"), ToolKind::External);
    }

    #[test]
    fn outcome_rendering_carries_markers() {
        let ok = ToolOutcome::success("42 rows");
        assert_eq!(ok.render(), "42 rows");

        let auth = ToolOutcome::failure(ErrorKind::ToolAuth, "gmail not connected", false);
        assert_eq!(auth.render(), "[connection-required] gmail not connected");
        assert!(ToolOutcome::is_error_marker(&auth.render()));
        assert!(!ToolOutcome::is_error_marker(&ok.render()));
    }

    #[test]
    fn parse_error_marker() {
        let parse = ToolOutcome::failure(ErrorKind::ArgumentParse, "bad json", false);
        assert!(parse.render().starts_with("[parse-error]"));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_immediately() {
        let registry = ToolRegistry::new();
        let dir = tempfile::tempdir().expect("tmp");
        let ws = crate::workspace::WorkspaceManager::new(dir.path().to_path_buf())
            .workspace("T01")
            .expect("ws");
        let ctx = ToolContext {
            workspace: ws,
            user_id: "U01".into(),
            is_scheduled: false,
        };
        let out = registry.dispatch("lucy_nope", "{}", &ctx).await;
        assert!(!out.ok);
        assert_eq!(out.error_kind, Some(ErrorKind::UnknownTool));
    }
}
