//! Configuration management
//!
//! One flat, defaulted settings surface loaded from `lucy.toml` with
//! `LUCY_*` environment overrides. A missing file never fails startup;
//! only the LLM gateway credentials are required, and those are checked
//! at client construction rather than here.

use crate::error::{LucyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::llm::ModelTier;

/// Top-level settings for the Lucy process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory holding one subdirectory per workspace
    pub workspace_root: PathBuf,
    /// LLM gateway settings
    pub llm: LlmSettings,
    /// Request queue settings
    pub queue: QueueSettings,
    /// Agent loop governance
    pub agent: AgentSettings,
    /// Scheduler settings
    pub scheduler: SchedulerSettings,
    /// Chat transport credentials (consumed by the transport adapter)
    pub transport: TransportSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            llm: LlmSettings::default(),
            queue: QueueSettings::default(),
            agent: AgentSettings::default(),
            scheduler: SchedulerSettings::default(),
            transport: TransportSettings::default(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lucy")
        .join("workspaces")
}

/// LLM gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible chat completions base URL
    pub base_url: String,
    /// API key; empty means "read from env at client construction"
    pub api_key: String,
    /// Model id per capability tier
    pub models: HashMap<String, String>,
    /// Sampling temperature for agent calls
    pub temperature: f32,
    /// Completion token cap per call
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert("fast".to_string(), "gemini-2.5-flash".to_string());
        models.insert("default".to_string(), "gpt-5-mini".to_string());
        models.insert("code".to_string(), "claude-sonnet-4-5".to_string());
        models.insert("research".to_string(), "gpt-5".to_string());
        models.insert("document".to_string(), "gemini-2.5-pro".to_string());
        models.insert("frontier".to_string(), "claude-opus-4-5".to_string());
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            models,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl LlmSettings {
    /// Resolve the model id for a tier, falling back to the default tier
    pub fn model_for(&self, tier: ModelTier) -> String {
        self.models
            .get(tier.as_str())
            .or_else(|| self.models.get("default"))
            .cloned()
            .unwrap_or_else(|| "gpt-5-mini".to_string())
    }
}

/// Request queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Number of worker contexts draining the queue
    pub workers: usize,
    /// Maximum pending items per workspace
    pub per_workspace_depth: usize,
    /// Maximum pending items across all workspaces
    pub global_depth: usize,
    /// Seconds granted to in-flight handlers at shutdown
    pub drain_deadline_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            per_workspace_depth: 50,
            global_depth: 200,
            drain_deadline_secs: 30,
        }
    }
}

/// Agent loop governance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Catastrophic wall-clock cap for a single run, in seconds
    pub absolute_max_seconds: u64,
    /// Wall-clock cap for a delegated sub-agent, in seconds
    pub subagent_max_seconds: u64,
    /// Approval TTL for destructive tool calls, in seconds
    pub approval_ttl_secs: u64,
    /// Soft per-tool-call budget, in seconds
    pub tool_budget_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            absolute_max_seconds: 14_400,
            subagent_max_seconds: 120,
            approval_ttl_secs: 300,
            tool_budget_secs: 60,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Heartbeat system tick, in seconds
    pub heartbeat_tick_secs: u64,
    /// Daily-fire estimate above which cron validation warns
    pub daily_fire_warning: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            heartbeat_tick_secs: 30,
            daily_fire_warning: 50,
        }
    }
}

/// Chat transport credentials. The core never reads these itself; they are
/// passed through to whichever transport adapter the binary wires in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub bot_token: String,
    pub signing_secret: String,
}

impl Settings {
    /// Load settings from the given TOML file, then apply env overrides.
    /// A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| LucyError::Validation {
                message: format!("bad config file {}: {}", path.display(), e),
            })?
        } else {
            Self::default()
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Load from `LUCY_CONFIG` or `./lucy.toml`
    pub fn load() -> Result<Self> {
        let path = std::env::var("LUCY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("lucy.toml"));
        Self::load_from(&path)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("LUCY_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LUCY_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("LUCY_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("LUCY_BOT_TOKEN") {
            self.transport.bot_token = v;
        }
        if let Ok(v) = std::env::var("LUCY_SIGNING_SECRET") {
            self.transport.signing_secret = v;
        }
        if let Ok(v) = std::env::var("LUCY_QUEUE_WORKERS") {
            if let Ok(n) = v.parse() {
                self.queue.workers = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.queue.workers, 10);
        assert_eq!(s.queue.global_depth, 200);
        assert_eq!(s.agent.absolute_max_seconds, 14_400);
        assert_eq!(s.agent.approval_ttl_secs, 300);
        assert_eq!(s.scheduler.heartbeat_tick_secs, 30);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let s = Settings::load_from(Path::new("/definitely/not/here/lucy.toml")).expect("load");
        assert_eq!(s.queue.workers, 10);
    }

    #[test]
    fn partial_file_fills_gaps() {
        let mut f = tempfile::NamedTempFile::new().expect("tmp");
        writeln!(f, "[queue]\nworkers = 4").expect("write");
        let s = Settings::load_from(f.path()).expect("load");
        assert_eq!(s.queue.workers, 4);
        // untouched sections keep defaults
        assert_eq!(s.queue.global_depth, 200);
        assert_eq!(s.agent.subagent_max_seconds, 120);
    }

    #[test]
    fn model_lookup_falls_back_to_default_tier() {
        let mut llm = LlmSettings::default();
        llm.models.remove("research");
        let model = llm.model_for(ModelTier::Research);
        assert_eq!(model, llm.models["default"]);
    }
}
