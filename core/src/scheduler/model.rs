//! Scheduled job documents
//!
//! One JSON document per cron job under `crons/<slug>/task`, plus a
//! sibling LEARNINGS text that successful runs append to. Expressions are
//! standard five-field cron, normalized to the six-field form the parser
//! expects. Validation rejects bad expressions outright and warns when a
//! job would fire more than fifty times a day.

use crate::error::{LucyError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the job executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Full agent run with the job description as instruction
    Agent,
    /// Sandboxed script
    Script,
}

/// Where the output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    Channel,
    DirectMessage,
}

/// Persisted cron job document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobSpec {
    /// Logical path slug, unique within the workspace
    pub path: String,
    /// Five-field cron expression
    pub cron: String,
    pub title: String,
    /// Instruction text handed to the agent (or script source for script jobs)
    pub description: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub delivery_mode: DeliveryMode,
    pub delivery_channel: String,
    pub requesting_user: String,
    /// 0 means unlimited
    #[serde(default)]
    pub max_runs: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub depends_on: String,
    #[serde(default)]
    pub condition_script: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub notify_on_failure: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_retries() -> u32 {
    3
}

impl CronJobSpec {
    /// Parsed schedule for this job
    pub fn schedule(&self) -> Result<Schedule> {
        parse_cron(&self.cron)
    }

    /// Next fire strictly after `after`
    pub fn next_fire(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        Ok(self.schedule()?.after(&after).next())
    }
}

/// Normalize a five-field expression to the six-field (seconds-first) form
/// the parser wants. Six- and seven-field expressions pass through.
fn normalize_expression(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

/// Parse and validate a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let normalized = normalize_expression(expr);
    Schedule::from_str(&normalized).map_err(|e| LucyError::Validation {
        message: format!("invalid cron expression {:?}: {}", expr, e),
    })
}

/// Estimate fires per day by counting occurrences in the next 24 hours
pub fn estimate_daily_fires(expr: &str) -> Result<u32> {
    let schedule = parse_cron(expr)?;
    let now = Utc::now();
    let horizon = now + ChronoDuration::hours(24);
    let mut count = 0u32;
    for fire in schedule.after(&now) {
        if fire > horizon {
            break;
        }
        count += 1;
        if count > 10_000 {
            break;
        }
    }
    Ok(count)
}

/// Validation outcome: hard errors reject, the estimate may warn
#[derive(Debug, Clone)]
pub struct CronValidation {
    pub daily_fires: u32,
    pub warn_high_frequency: bool,
}

/// Validate a job document before accepting it
pub fn validate_job(spec: &CronJobSpec, warn_threshold: u32) -> Result<CronValidation> {
    if spec.path.is_empty() || spec.title.is_empty() {
        return Err(LucyError::Validation {
            message: "cron job needs a path and a title".to_string(),
        });
    }
    let daily_fires = estimate_daily_fires(&spec.cron)?;
    Ok(CronValidation {
        daily_fires,
        warn_high_frequency: daily_fires > warn_threshold,
    })
}
