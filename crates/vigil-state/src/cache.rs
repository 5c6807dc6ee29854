use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use vigil_common::types::{AlertInstance, AlertRule, AlertState, LabelSet, OrgId, RuleKey};

/// In-memory table of all tracked instances, keyed by rule and label
/// fingerprint. Mutated exclusively by the state manager while holding its
/// lock.
#[derive(Default)]
pub(crate) struct InstanceCache {
    // fingerprint → instance, per rule; BTreeMap keeps iteration stable
    inner: HashMap<RuleKey, BTreeMap<String, AlertInstance>>,
}

impl InstanceCache {
    pub fn insert(&mut self, instance: AlertInstance) {
        let fingerprint = instance.labels.fingerprint();
        self.inner
            .entry(instance.key())
            .or_default()
            .insert(fingerprint, instance);
    }

    pub fn get(&self, key: &RuleKey, fingerprint: &str) -> Option<&AlertInstance> {
        self.inner.get(key)?.get(fingerprint)
    }

    /// Existing instance for (rule, labels), or a fresh one in Normal state.
    pub fn get_mut_or_create(
        &mut self,
        rule: &AlertRule,
        labels: &LabelSet,
        now: DateTime<Utc>,
    ) -> &mut AlertInstance {
        self.inner
            .entry(rule.key())
            .or_default()
            .entry(labels.fingerprint())
            .or_insert_with(|| AlertInstance {
                org_id: rule.org_id,
                rule_uid: rule.uid.clone(),
                labels: labels.clone(),
                state: AlertState::Normal,
                state_since: now,
                last_eval_at: now,
                last_value: None,
                annotations: rule.annotations.clone(),
            })
    }

    /// Label sets currently tracked for a rule, in stable order.
    pub fn labels_for(&self, key: &RuleKey) -> Vec<LabelSet> {
        self.inner
            .get(key)
            .map(|instances| instances.values().map(|i| i.labels.clone()).collect())
            .unwrap_or_default()
    }

    pub fn rule_keys_for_org(&self, org_id: OrgId) -> Vec<RuleKey> {
        self.inner
            .keys()
            .filter(|k| k.org_id == org_id)
            .cloned()
            .collect()
    }

    /// Orgs with at least one tracked instance.
    pub fn orgs(&self) -> Vec<OrgId> {
        let mut orgs: Vec<OrgId> = self.inner.keys().map(|k| k.org_id).collect();
        orgs.sort_unstable();
        orgs.dedup();
        orgs
    }

    /// Remove every instance of a rule. Returns how many were dropped.
    pub fn remove_rule(&mut self, key: &RuleKey) -> usize {
        self.inner.remove(key).map(|m| m.len()).unwrap_or(0)
    }

    /// Drop Normal instances whose last evaluation predates `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.inner.retain(|_, instances| {
            instances.retain(|_, inst| {
                let stale = inst.state == AlertState::Normal && inst.last_eval_at < cutoff;
                if stale {
                    removed += 1;
                }
                !stale
            });
            !instances.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.values().map(BTreeMap::len).sum()
    }
}
