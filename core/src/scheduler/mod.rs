//! Scheduling fabric
//!
//! Cron jobs are full agent (or script) runs fired on a schedule;
//! heartbeats are cheap non-LLM condition checks with alert cooldowns.
//! Both are persisted per workspace and picked up by one daemon loop.

pub mod daemon;
pub mod heartbeat;
pub mod model;
pub mod store;

pub use daemon::{build_instruction, is_suppressed, JobExecutor, Scheduler, SystemJob};
pub use heartbeat::{
    HeartbeatEvaluator, HeartbeatKind, HeartbeatSpec, HeartbeatStatus, HeartbeatStore,
};
pub use model::{estimate_daily_fires, parse_cron, validate_job, CronJobSpec, DeliveryMode, JobType};
pub use store::CronStore;
