//! Structured error types for Lucy
//!
//! Every failure the core can produce is classified here. The agent loop
//! absorbs most of these into tool results or intervention messages; the
//! ones that escape are mapped to a friendly user sentence by
//! [`LucyError::user_message`] before anything reaches chat.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for Lucy operations
#[derive(Error, Debug)]
pub enum LucyError {
    // =========================================================================
    // LLM / Provider Errors
    // =========================================================================
    /// Rate limit or overload from the LLM gateway (429/529)
    #[error("llm rate limited: {message}")]
    LlmRateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Gateway returned a 5xx or the connection dropped mid-call
    #[error("llm transient failure: {message}")]
    LlmTransient { message: String },

    /// Empty or unparseable model output
    #[error("llm returned malformed output: {detail}")]
    LlmMalformed { detail: String },

    /// Gateway rejected the request body (400)
    #[error("llm rejected request: {message}")]
    LlmBadRequest { message: String },

    /// Authentication with the LLM gateway failed
    #[error("llm unauthorized: {message}")]
    LlmUnauthorized { message: String },

    /// Conversation no longer fits the model context window
    #[error("context overflow: {used_chars} chars against cap {cap_chars}")]
    ContextOverflow { used_chars: usize, cap_chars: usize },

    // =========================================================================
    // Tool Errors
    // =========================================================================
    /// Tool requires a connection the workspace does not have
    #[error("tool unauthorized: {tool}")]
    ToolAuth { tool: String },

    /// Tool failed in a way worth retrying (5xx, connection, timeout)
    #[error("tool transient failure: {tool}: {message}")]
    ToolTransient { tool: String, message: String },

    /// Tool rejected the call outright (non-auth 4xx)
    #[error("tool fatal failure: {tool}: {message}")]
    ToolFatal { tool: String, message: String },

    /// Tool arguments did not parse as the declared schema
    #[error("tool argument parse failure: {tool}: {reason}")]
    ArgumentParse { tool: String, reason: String },

    /// The model called a tool name outside the allow-list
    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },

    /// Tool exceeded its soft time budget
    #[error("tool timeout: {tool} after {duration:?}")]
    ToolTimeout { tool: String, duration: Duration },

    // =========================================================================
    // Loop / Governance Errors
    // =========================================================================
    /// Loop or stuck detection fired and the run was cut short
    #[error("stuck loop broken after {turns} turns")]
    StuckLoop { turns: usize },

    /// User, supervisor or wall clock cancelled the run
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// Human approval was not given within the TTL
    #[error("approval expired for: {action}")]
    ApprovalExpired { action: String },

    /// Human explicitly rejected the action
    #[error("approval rejected for: {action}")]
    ApprovalRejected { action: String },

    // =========================================================================
    // Scheduling / Configuration Errors
    // =========================================================================
    /// Invalid cron expression, bad heartbeat config, etc.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A scheduled job document could not be parsed
    #[error("job document corrupted: {path}")]
    JobCorrupted { path: String },

    /// Missing required configuration
    #[error("missing required configuration: {key}")]
    MissingConfig { key: String },

    // =========================================================================
    // Workspace / Isolation Errors
    // =========================================================================
    /// An operation tried to cross a tenant boundary
    #[error("tenant isolation violation: {detail}")]
    TenantIsolation { detail: String },

    /// Workspace document was missing where one was required
    #[error("workspace document not found: {path}")]
    WorkspaceNotFound { path: String },

    // =========================================================================
    // Queue / Backpressure Errors
    // =========================================================================
    /// Queue rejected the request (per-tenant or global depth breached)
    #[error("queue full: {scope}")]
    QueueFull { scope: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Unexpected programming error caught at the task boundary
    #[error("internal error: {message}")]
    Internal { message: String },

    // =========================================================================
    // External Error Wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Coarse classification used by the degradation formatter and the
/// stuck/retry machinery. Mirrors the error table users never see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LlmTransient,
    LlmMalformed,
    ToolAuth,
    ToolTransient,
    ToolFatal,
    ArgumentParse,
    UnknownTool,
    StuckLoop,
    Cancelled,
    ApprovalExpired,
    ValidationError,
    TenantIsolation,
    ContextOverflow,
    RateLimited,
    ServiceUnavailable,
    Unknown,
}

impl LucyError {
    /// Map to the coarse taxonomy kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LlmRateLimited { .. } => ErrorKind::RateLimited,
            Self::LlmTransient { .. } => ErrorKind::LlmTransient,
            Self::LlmMalformed { .. } => ErrorKind::LlmMalformed,
            Self::LlmBadRequest { .. } => ErrorKind::LlmMalformed,
            Self::LlmUnauthorized { .. } => ErrorKind::ServiceUnavailable,
            Self::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            Self::ToolAuth { .. } => ErrorKind::ToolAuth,
            Self::ToolTransient { .. } | Self::ToolTimeout { .. } => ErrorKind::ToolTransient,
            Self::ToolFatal { .. } => ErrorKind::ToolFatal,
            Self::ArgumentParse { .. } => ErrorKind::ArgumentParse,
            Self::UnknownTool { .. } => ErrorKind::UnknownTool,
            Self::StuckLoop { .. } => ErrorKind::StuckLoop,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::ApprovalExpired { .. } | Self::ApprovalRejected { .. } => {
                ErrorKind::ApprovalExpired
            }
            Self::Validation { .. } | Self::JobCorrupted { .. } | Self::MissingConfig { .. } => {
                ErrorKind::ValidationError
            }
            Self::TenantIsolation { .. } => ErrorKind::TenantIsolation,
            Self::QueueFull { .. } => ErrorKind::ServiceUnavailable,
            Self::WorkspaceNotFound { .. } => ErrorKind::Unknown,
            Self::Internal { .. } | Self::Io(_) | Self::Json(_) | Self::Http(_) => {
                ErrorKind::Unknown
            }
        }
    }

    /// Check if error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LlmRateLimited { .. }
            | Self::LlmTransient { .. }
            | Self::ToolTransient { .. }
            | Self::ToolTimeout { .. } => true,

            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            _ => false,
        }
    }

    /// Suggested retry delay for retryable errors
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::LlmRateLimited { retry_after, .. } => {
                Some(retry_after.unwrap_or(Duration::from_secs(5)))
            }
            Self::LlmTransient { .. } => Some(Duration::from_secs(1)),
            Self::ToolTransient { .. } => Some(Duration::from_secs(2)),
            Self::ToolTimeout { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// A user-safe sentence. Never leaks tool names, paths, models or IDs.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::RateLimited => {
                "I'm handling a lot of requests right now. Give me a minute and try again."
                    .to_string()
            }
            ErrorKind::LlmTransient | ErrorKind::ServiceUnavailable => {
                "Something upstream is having a moment. I'll be back shortly.".to_string()
            }
            ErrorKind::ContextOverflow => {
                "This conversation got too long for me to hold at once. Mind starting a fresh thread?"
                    .to_string()
            }
            ErrorKind::ToolAuth => {
                "I need access to one of your connected services before I can do that. Check your connections and I'll pick it back up."
                    .to_string()
            }
            ErrorKind::ToolTransient => {
                "One of the services I rely on timed out. I'll retry in a bit.".to_string()
            }
            ErrorKind::Cancelled => "Stopped. Let me know if you want me to pick it back up.".to_string(),
            ErrorKind::ApprovalExpired => {
                "I waited for your go-ahead but didn't hear back, so I stopped. Ask again whenever you're ready."
                    .to_string()
            }
            ErrorKind::ValidationError => self.to_string(),
            _ => "I ran into a problem finishing that. I've noted what happened; try asking again."
                .to_string(),
        }
    }
}

/// Result type alias using LucyError
pub type Result<T> = std::result::Result<T, LucyError>;
