//! The alert-rule scheduler: a tick-driven evaluation loop with bounded
//! concurrency, bounded retries, and exactly-once-per-tick dispatch across
//! every organization sharing the process.
//!
//! [`service::AlertService`] owns the whole pipeline (scheduler, state
//! manager, per-org notification fan-out) and is the only object an
//! embedding process needs to construct. Call [`service::AlertService::warm`]
//! once, then [`service::AlertService::run`] until shutdown.

pub mod config;
pub mod scheduler;
pub mod service;

pub use config::SchedulerConfig;
pub use scheduler::Scheduler;
pub use service::AlertService;
