//! Script execution seam
//!
//! Cron jobs of type `script`, cron condition predicates and custom
//! heartbeat evaluators all run through this contract. The core never
//! executes anything itself; the binary wires in a real sandbox.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Result of one sandboxed execution
#[derive(Debug, Clone, Default)]
pub struct SandboxResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
}

impl SandboxResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Sandboxed execution of untrusted source text
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run_script(&self, source: &str, env: &HashMap<String, String>) -> Result<SandboxResult>;
}

/// Sandbox that refuses to run anything. Scripted jobs fail cleanly when
/// no execution environment is configured.
#[derive(Debug, Default)]
pub struct NoopSandbox;

#[async_trait]
impl Sandbox for NoopSandbox {
    async fn run_script(
        &self,
        _source: &str,
        _env: &HashMap<String, String>,
    ) -> Result<SandboxResult> {
        Ok(SandboxResult {
            stdout: String::new(),
            stderr: "no execution environment configured".to_string(),
            exit_code: 1,
            elapsed_ms: 0,
        })
    }
}
