//! Storage boundaries of the alerting core.
//!
//! The scheduler and state manager never talk to a database directly; they
//! consume the capability traits defined here. Production deployments back
//! them with whatever persistence they run; the in-memory implementations
//! in [`memory`] serve tests and embedders.

pub mod error;
pub mod memory;

pub use error::{Result, StoreError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_common::types::{AlertInstance, AlertRule, AlertmanagerConfig, OrgId};

/// Read model over persisted rule definitions, organized per organization.
///
/// Polled by the scheduler at a bounded staleness; transient failure is
/// tolerated (the affected org is skipped for the tick, never fatal).
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All organizations that currently have rules.
    async fn list_orgs(&self) -> Result<Vec<OrgId>>;

    /// All rules of one organization, paused ones included.
    async fn list_rules(&self, org_id: OrgId) -> Result<Vec<AlertRule>>;
}

/// Per-organization notification fan-out configuration, polled on a slower
/// cadence than rule evaluation.
#[async_trait]
pub trait AdminConfigStore: Send + Sync {
    async fn get_admin_config(&self, org_id: OrgId) -> Result<Option<AlertmanagerConfig>>;

    async fn list_admin_configs(&self) -> Result<Vec<AlertmanagerConfig>>;
}

/// Durable mapping from (rule identity, label set) to the last known alert
/// state. Loaded once at warm start; written back eventually on every
/// evaluation (a failed write never blocks the in-memory transition).
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<AlertInstance>>;

    async fn upsert(&self, instance: &AlertInstance) -> Result<()>;

    /// Drop all instances of a deleted rule.
    async fn delete_rule(&self, org_id: OrgId, rule_uid: &str) -> Result<()>;

    /// Drop Normal instances not evaluated since `cutoff`. Returns how many
    /// rows were removed.
    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
