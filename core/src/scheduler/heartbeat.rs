//! Heartbeat monitors
//!
//! Cheap, periodic, non-LLM condition checks. Each monitor is a tagged
//! variant with its own evaluator; a system tick selects due monitors,
//! evaluates them, and alerts with a cooldown. Three consecutive evaluator
//! errors park the monitor in the error status until someone reactivates
//! it.

use crate::error::Result;
use crate::sandbox::Sandbox;
use crate::workspace::{validate_slug, Workspace};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Evaluator errors park the monitor after this many in a row
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Monitor condition, one evaluator per kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HeartbeatKind {
    /// HTTP status probe: triggers on unexpected status or connection error
    ApiHealth {
        url: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
    /// Page text probe
    PageContent {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contains_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_contains_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    /// JSON metric compared against a threshold
    MetricThreshold {
        url: String,
        json_path: String,
        operator: ThresholdOperator,
        threshold: f64,
    },
    /// Workspace script returning `{"triggered": bool, ...}`
    Custom { script: String },
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl ThresholdOperator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Lte => value <= threshold,
            ThresholdOperator::Eq => (value - threshold).abs() < f64::EPSILON,
            ThresholdOperator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Active,
    Paused,
    Error,
}

/// Persisted monitor document at `heartbeats/<slug>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSpec {
    pub slug: String,
    pub title: String,
    #[serde(flatten)]
    pub kind: HeartbeatKind,
    pub interval_secs: u64,
    pub cooldown_secs: u64,
    #[serde(rename = "_alert_channel")]
    pub alert_channel: String,
    pub status: HeartbeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alerted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

impl HeartbeatSpec {
    /// Is this monitor due for a check at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != HeartbeatStatus::Active {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(last) => last + ChronoDuration::seconds(self.interval_secs as i64) <= now,
        }
    }

    /// May we alert at `now` without violating the cooldown?
    pub fn cooldown_clear(&self, now: DateTime<Utc>) -> bool {
        match self.last_alerted {
            None => true,
            Some(last) => now - last >= ChronoDuration::seconds(self.cooldown_secs as i64),
        }
    }
}

/// One evaluation's result
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub triggered: bool,
    pub detail: String,
}

/// Evaluator error, distinct from a triggered condition
pub type EvalError = String;

/// Runs the non-LLM condition checks
pub struct HeartbeatEvaluator {
    http: reqwest::Client,
    sandbox: Arc<dyn Sandbox>,
}

impl HeartbeatEvaluator {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            http: reqwest::Client::new(),
            sandbox,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).timeout(Duration::from_secs(10))
    }

    pub async fn evaluate(&self, kind: &HeartbeatKind) -> std::result::Result<CheckOutcome, EvalError> {
        match kind {
            HeartbeatKind::ApiHealth {
                url,
                expected_status,
            } => match self.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    Ok(CheckOutcome {
                        triggered: status != *expected_status,
                        detail: format!("status {}", status),
                    })
                }
                // unreachable endpoints are exactly what this probe exists
                // to catch
                Err(err) => Ok(CheckOutcome {
                    triggered: true,
                    detail: format!("connection failed: {}", err),
                }),
            },
            HeartbeatKind::PageContent {
                url,
                contains_text,
                not_contains_text,
                pattern,
            } => {
                let body = self
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| format!("fetch failed: {}", e))?
                    .text()
                    .await
                    .map_err(|e| format!("read failed: {}", e))?;
                evaluate_page_content(&body, contains_text.as_deref(), not_contains_text.as_deref(), pattern.as_deref())
            }
            HeartbeatKind::MetricThreshold {
                url,
                json_path,
                operator,
                threshold,
            } => {
                let value: serde_json::Value = self
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| format!("fetch failed: {}", e))?
                    .json()
                    .await
                    .map_err(|e| format!("bad json: {}", e))?;
                evaluate_metric(&value, json_path, *operator, *threshold)
            }
            HeartbeatKind::Custom { script } => {
                let result = self
                    .sandbox
                    .run_script(script, &HashMap::new())
                    .await
                    .map_err(|e| format!("script failed: {}", e))?;
                if !result.ok() {
                    return Err(format!("script exit {}: {}", result.exit_code, result.stderr));
                }
                let parsed: serde_json::Value = serde_json::from_str(result.stdout.trim())
                    .map_err(|e| format!("script output not json: {}", e))?;
                let triggered = parsed
                    .get("triggered")
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| "script output missing boolean 'triggered'".to_string())?;
                Ok(CheckOutcome {
                    triggered,
                    detail: parsed
                        .get("detail")
                        .and_then(|v| v.as_str())
                        .unwrap_or("custom check")
                        .to_string(),
                })
            }
        }
    }
}

fn evaluate_page_content(
    body: &str,
    contains_text: Option<&str>,
    not_contains_text: Option<&str>,
    pattern: Option<&str>,
) -> std::result::Result<CheckOutcome, EvalError> {
    if let Some(needle) = contains_text {
        if body.contains(needle) {
            return Ok(CheckOutcome {
                triggered: true,
                detail: format!("page contains {:?}", needle),
            });
        }
    }
    if let Some(needle) = not_contains_text {
        if !body.contains(needle) {
            return Ok(CheckOutcome {
                triggered: true,
                detail: format!("page is missing {:?}", needle),
            });
        }
    }
    if let Some(pattern) = pattern {
        let re = regex::Regex::new(pattern).map_err(|e| format!("bad pattern: {}", e))?;
        if re.is_match(body) {
            return Ok(CheckOutcome {
                triggered: true,
                detail: format!("pattern {:?} matched", pattern),
            });
        }
    }
    Ok(CheckOutcome {
        triggered: false,
        detail: "content as expected".to_string(),
    })
}

fn evaluate_metric(
    value: &serde_json::Value,
    json_path: &str,
    operator: ThresholdOperator,
    threshold: f64,
) -> std::result::Result<CheckOutcome, EvalError> {
    let mut current = value;
    for part in json_path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map
                .get(part)
                .ok_or_else(|| format!("json path missing key {:?}", part))?,
            serde_json::Value::Array(items) => {
                let idx: usize = part
                    .parse()
                    .map_err(|_| format!("json path {:?} is not an index", part))?;
                items
                    .get(idx)
                    .ok_or_else(|| format!("json path index {} out of range", idx))?
            }
            _ => return Err(format!("json path dead-ends at {:?}", part)),
        };
    }
    let number = current
        .as_f64()
        .ok_or_else(|| format!("value at json path is not a number: {}", current))?;
    Ok(CheckOutcome {
        triggered: operator.compare(number, threshold),
        detail: format!("value {} vs threshold {}", number, threshold),
    })
}

/// Fold one evaluation into the monitor document. Returns the alert text
/// to deliver, if any.
pub fn apply_check(
    spec: &mut HeartbeatSpec,
    outcome: std::result::Result<CheckOutcome, EvalError>,
    now: DateTime<Utc>,
) -> Option<String> {
    spec.last_checked = Some(now);
    match outcome {
        Ok(check) => {
            spec.consecutive_failures = 0;
            spec.last_result = Some(check.detail.clone());
            if check.triggered && spec.cooldown_clear(now) {
                spec.last_alerted = Some(now);
                Some(format!("{}: {}", spec.title, check.detail))
            } else {
                None
            }
        }
        Err(err) => {
            spec.consecutive_failures += 1;
            spec.last_result = Some(format!("check error: {}", err));
            if spec.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                spec.status = HeartbeatStatus::Error;
            }
            None
        }
    }
}

/// Storage for one workspace's monitors
pub struct HeartbeatStore<'a> {
    workspace: &'a Workspace,
}

impl<'a> HeartbeatStore<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    fn path(slug: &str) -> String {
        format!("heartbeats/{}.json", slug)
    }

    pub fn save(&self, spec: &HeartbeatSpec) -> Result<()> {
        validate_slug(&spec.slug)?;
        self.workspace
            .write_document(&Self::path(&spec.slug), &serde_json::to_string_pretty(spec)?)
    }

    pub fn load(&self, slug: &str) -> Result<HeartbeatSpec> {
        validate_slug(slug)?;
        let raw = self.workspace.read_document(&Self::path(slug))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn list(&self) -> Result<Vec<HeartbeatSpec>> {
        let mut specs = Vec::new();
        for file in self.workspace.list_files("heartbeats")? {
            let Some(slug) = file.strip_suffix(".json") else {
                continue;
            };
            match self.load(slug) {
                Ok(spec) => specs.push(spec),
                Err(err) => tracing::warn!(slug, "skipping unparseable heartbeat: {}", err),
            }
        }
        Ok(specs)
    }

    pub fn delete(&self, slug: &str) -> Result<()> {
        validate_slug(slug)?;
        self.workspace.remove_document(&Self::path(slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: HeartbeatKind) -> HeartbeatSpec {
        HeartbeatSpec {
            slug: "api-up".to_string(),
            title: "API up".to_string(),
            kind,
            interval_secs: 60,
            cooldown_secs: 600,
            alert_channel: "C0123".to_string(),
            status: HeartbeatStatus::Active,
            last_checked: None,
            last_alerted: None,
            consecutive_failures: 0,
            last_result: None,
        }
    }

    fn api_kind() -> HeartbeatKind {
        HeartbeatKind::ApiHealth {
            url: "https://example.com/health".to_string(),
            expected_status: 200,
        }
    }

    #[test]
    fn due_respects_interval_and_status() {
        let now = Utc::now();
        let mut s = spec(api_kind());
        assert!(s.is_due(now));
        s.last_checked = Some(now - ChronoDuration::seconds(30));
        assert!(!s.is_due(now));
        s.last_checked = Some(now - ChronoDuration::seconds(61));
        assert!(s.is_due(now));
        s.status = HeartbeatStatus::Error;
        assert!(!s.is_due(now));
    }

    #[test]
    fn trigger_alert_and_cooldown() {
        let now = Utc::now();
        let mut s = spec(api_kind());
        let alert = apply_check(
            &mut s,
            Ok(CheckOutcome {
                triggered: true,
                detail: "status 503".to_string(),
            }),
            now,
        );
        assert_eq!(alert.as_deref(), Some("API up: status 503"));

        // a second trigger inside the cooldown is swallowed
        let alert = apply_check(
            &mut s,
            Ok(CheckOutcome {
                triggered: true,
                detail: "status 503".to_string(),
            }),
            now + ChronoDuration::seconds(300),
        );
        assert!(alert.is_none());

        // past the cooldown it alerts again
        let alert = apply_check(
            &mut s,
            Ok(CheckOutcome {
                triggered: true,
                detail: "status 503".to_string(),
            }),
            now + ChronoDuration::seconds(601),
        );
        assert!(alert.is_some());
    }

    #[test]
    fn evaluator_errors_park_the_monitor() {
        let now = Utc::now();
        let mut s = spec(api_kind());
        for _ in 0..2 {
            assert!(apply_check(&mut s, Err("boom".to_string()), now).is_none());
            assert_eq!(s.status, HeartbeatStatus::Active);
        }
        apply_check(&mut s, Err("boom".to_string()), now);
        assert_eq!(s.status, HeartbeatStatus::Error);
        assert_eq!(s.consecutive_failures, 3);
    }

    #[test]
    fn success_resets_failure_streak() {
        let now = Utc::now();
        let mut s = spec(api_kind());
        apply_check(&mut s, Err("boom".to_string()), now);
        apply_check(
            &mut s,
            Ok(CheckOutcome {
                triggered: false,
                detail: "status 200".to_string(),
            }),
            now,
        );
        assert_eq!(s.consecutive_failures, 0);
    }

    #[test]
    fn page_content_conditions() {
        let out = evaluate_page_content("all systems go", Some("outage"), None, None).unwrap();
        assert!(!out.triggered);
        let out = evaluate_page_content("major outage now", Some("outage"), None, None).unwrap();
        assert!(out.triggered);
        let out = evaluate_page_content("hello", None, Some("heartbeat-ok"), None).unwrap();
        assert!(out.triggered);
        let out = evaluate_page_content("error 502 upstream", None, None, Some(r"error \d+")).unwrap();
        assert!(out.triggered);
    }

    #[test]
    fn metric_threshold_navigation() {
        let value = serde_json::json!({"queues": {"jobs": [{"depth": 42.0}]}});
        let out = evaluate_metric(&value, "queues.jobs.0.depth", ThresholdOperator::Gt, 40.0).unwrap();
        assert!(out.triggered);
        let out = evaluate_metric(&value, "queues.jobs.0.depth", ThresholdOperator::Lt, 40.0).unwrap();
        assert!(!out.triggered);
        assert!(evaluate_metric(&value, "queues.missing", ThresholdOperator::Gt, 0.0).is_err());
    }

    #[test]
    fn document_round_trip_includes_alert_channel_key() {
        let s = spec(api_kind());
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"_alert_channel\""));
        assert!(json.contains("\"kind\":\"api-health\""));
        let back: HeartbeatSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, s.kind);
    }

    #[test]
    fn store_round_trip() {
        let dir = tempfile::tempdir().expect("tmp");
        let ws = crate::workspace::WorkspaceManager::new(dir.path().to_path_buf())
            .workspace("T01")
            .expect("ws");
        let store = HeartbeatStore::new(&ws);
        store.save(&spec(api_kind())).expect("save");
        assert_eq!(store.list().expect("list").len(), 1);
        store.delete("api-up").expect("delete");
        assert!(store.list().expect("list").is_empty());
    }
}
