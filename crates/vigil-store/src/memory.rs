//! In-memory store implementations, used by tests and embedders that do not
//! need durability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use vigil_common::types::{AlertInstance, AlertRule, AlertmanagerConfig, AlertState, OrgId};

use crate::{AdminConfigStore, InstanceStore, Result, RuleStore};

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<BTreeMap<OrgId, Vec<AlertRule>>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule (matched by org and UID).
    pub fn put_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.lock().unwrap();
        let org = rules.entry(rule.org_id).or_default();
        if let Some(existing) = org.iter_mut().find(|r| r.uid == rule.uid) {
            *existing = rule;
        } else {
            org.push(rule);
        }
    }

    pub fn remove_rule(&self, org_id: OrgId, uid: &str) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(org) = rules.get_mut(&org_id) {
            org.retain(|r| r.uid != uid);
            if org.is_empty() {
                rules.remove(&org_id);
            }
        }
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_orgs(&self) -> Result<Vec<OrgId>> {
        Ok(self.rules.lock().unwrap().keys().copied().collect())
    }

    async fn list_rules(&self, org_id: OrgId) -> Result<Vec<AlertRule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .get(&org_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryAdminConfigStore {
    configs: Mutex<BTreeMap<OrgId, AlertmanagerConfig>>,
}

impl MemoryAdminConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_config(&self, config: AlertmanagerConfig) {
        self.configs.lock().unwrap().insert(config.org_id, config);
    }

    pub fn remove_config(&self, org_id: OrgId) {
        self.configs.lock().unwrap().remove(&org_id);
    }
}

#[async_trait]
impl AdminConfigStore for MemoryAdminConfigStore {
    async fn get_admin_config(&self, org_id: OrgId) -> Result<Option<AlertmanagerConfig>> {
        Ok(self.configs.lock().unwrap().get(&org_id).cloned())
    }

    async fn list_admin_configs(&self) -> Result<Vec<AlertmanagerConfig>> {
        Ok(self.configs.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryInstanceStore {
    // keyed by (org, rule uid, label fingerprint)
    instances: Mutex<HashMap<(OrgId, String, String), AlertInstance>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an instance directly, bypassing the trait. Used by warm-start
    /// tests to simulate state persisted by a previous process.
    pub fn seed(&self, instance: AlertInstance) {
        let key = (
            instance.org_id,
            instance.rule_uid.clone(),
            instance.labels.fingerprint(),
        );
        self.instances.lock().unwrap().insert(key, instance);
    }

    pub fn len(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().unwrap().is_empty()
    }

    pub fn get(&self, org_id: OrgId, rule_uid: &str, fingerprint: &str) -> Option<AlertInstance> {
        self.instances
            .lock()
            .unwrap()
            .get(&(org_id, rule_uid.to_string(), fingerprint.to_string()))
            .cloned()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn load_all(&self) -> Result<Vec<AlertInstance>> {
        Ok(self.instances.lock().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, instance: &AlertInstance) -> Result<()> {
        self.seed(instance.clone());
        Ok(())
    }

    async fn delete_rule(&self, org_id: OrgId, rule_uid: &str) -> Result<()> {
        self.instances
            .lock()
            .unwrap()
            .retain(|(org, uid, _), _| !(*org == org_id && uid == rule_uid));
        Ok(())
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut instances = self.instances.lock().unwrap();
        let before = instances.len();
        instances
            .retain(|_, inst| !(inst.state == AlertState::Normal && inst.last_eval_at < cutoff));
        Ok(before - instances.len())
    }
}
