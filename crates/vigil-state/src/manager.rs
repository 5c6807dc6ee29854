use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use vigil_common::types::{
    AlertInstance, AlertRule, AlertState, EvalResult, Evaluation, LabelSet, OrgId, RuleKey,
    TransitionEvent, Verdict,
};
use vigil_store::{InstanceStore, StoreError};

use crate::cache::InstanceCache;
use crate::transition;

/// Authoritative state machine over all alert instances.
///
/// One per process. Ingests one [`Evaluation`] at a time per rule (the
/// scheduler guarantees per-rule serialization) and returns the transition
/// events the caller must fan out.
pub struct StateManager {
    store: Arc<dyn InstanceStore>,
    cache: Mutex<InstanceCache>,
    base_interval: Duration,
    stale_after: Duration,
}

impl StateManager {
    pub fn new(store: Arc<dyn InstanceStore>, base_interval_secs: u64, stale_after_secs: u64) -> Self {
        Self {
            store,
            cache: Mutex::new(InstanceCache::default()),
            base_interval: Duration::seconds(base_interval_secs as i64),
            stale_after: Duration::seconds(stale_after_secs as i64),
        }
    }

    /// Load all persisted instances into the cache. Must complete before
    /// the scheduler's first tick so hysteresis state survives a restart.
    pub async fn warm(&self) -> Result<usize, StoreError> {
        let instances = self.store.load_all().await?;
        let count = instances.len();
        let mut cache = self.cache.lock().unwrap();
        for instance in instances {
            cache.insert(instance);
        }
        tracing::info!(instances = count, "state manager warmed from instance store");
        Ok(count)
    }

    /// Apply one evaluation to the instances of its rule and return the
    /// boundary-crossing transition events, in label order.
    pub async fn process(&self, rule: &AlertRule, evaluation: &Evaluation) -> Vec<TransitionEvent> {
        let at = evaluation.evaluated_at;
        let mut events = Vec::new();
        let mut dirty = Vec::new();
        {
            let mut cache = self.cache.lock().unwrap();

            // A NoData/Error evaluation describes the whole rule, not one
            // series: apply its verdict to every label set currently tracked,
            // or create the rule's first instance when none exist yet.
            let results: Vec<EvalResult> = match evaluation.results.as_slice() {
                [single] if matches!(single.verdict, Verdict::NoData | Verdict::Error) => {
                    let existing = cache.labels_for(&rule.key());
                    if existing.is_empty() {
                        vec![single.clone()]
                    } else {
                        existing
                            .into_iter()
                            .map(|labels| EvalResult {
                                labels,
                                ..single.clone()
                            })
                            .collect()
                    }
                }
                _ => evaluation.results.clone(),
            };

            for result in &results {
                let instance = cache.get_mut_or_create(rule, &result.labels, at);
                let prev = instance.state;
                let next = transition::next_state(
                    rule,
                    self.base_interval,
                    prev,
                    instance.state_since,
                    result.verdict,
                    at,
                );

                if next != prev {
                    instance.state = next;
                    instance.state_since = at;
                    tracing::debug!(
                        org_id = rule.org_id,
                        rule_uid = %rule.uid,
                        labels = %instance.labels,
                        prev = %prev,
                        next = %next,
                        "alert instance changed state"
                    );
                }
                instance.last_eval_at = at;
                instance.last_value = result.value;
                instance.annotations = rule.annotations.clone();

                let fired = next == AlertState::Alerting && prev != AlertState::Alerting;
                let resolved = prev == AlertState::Alerting && next == AlertState::Normal;
                if fired || resolved {
                    events.push(TransitionEvent {
                        org_id: rule.org_id,
                        rule_uid: rule.uid.clone(),
                        labels: result.labels.merged_over(&rule.labels),
                        state: next,
                        annotations: instance.annotations.clone(),
                        evaluated_at: at,
                    });
                }

                dirty.push(instance.clone());
            }
        }

        // Eventual persistence: a failed write-back never undoes the
        // in-memory transition above.
        for instance in &dirty {
            if let Err(e) = self.store.upsert(instance).await {
                tracing::warn!(
                    org_id = instance.org_id,
                    rule_uid = %instance.rule_uid,
                    error = %e,
                    "failed to persist alert instance"
                );
            }
        }

        events
    }

    /// Current snapshot of one instance, if tracked.
    pub fn get(&self, org_id: OrgId, rule_uid: &str, labels: &LabelSet) -> Option<AlertInstance> {
        let key = RuleKey {
            org_id,
            rule_uid: rule_uid.to_string(),
        };
        self.cache
            .lock()
            .unwrap()
            .get(&key, &labels.fingerprint())
            .cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Orgs with at least one tracked instance. Lets the scheduler notice
    /// orgs whose last rule disappeared from the rule store.
    pub fn cached_orgs(&self) -> Vec<OrgId> {
        self.cache.lock().unwrap().orgs()
    }

    /// Drop instances of rules that no longer exist in the rule store.
    pub async fn sync_rules(&self, org_id: OrgId, live_uids: &HashSet<String>) {
        let stale: Vec<RuleKey> = {
            let cache = self.cache.lock().unwrap();
            cache
                .rule_keys_for_org(org_id)
                .into_iter()
                .filter(|k| !live_uids.contains(&k.rule_uid))
                .collect()
        };
        for key in stale {
            self.forget_rule(&key).await;
        }
    }

    /// Remove all state of a deleted rule, cache and store.
    pub async fn forget_rule(&self, key: &RuleKey) {
        let removed = { self.cache.lock().unwrap().remove_rule(key) };
        if removed > 0 {
            tracing::info!(rule = %key, removed, "dropped instances of deleted rule");
        }
        if let Err(e) = self.store.delete_rule(key.org_id, &key.rule_uid).await {
            tracing::warn!(rule = %key, error = %e, "failed to delete rule instances from store");
        }
    }

    /// Garbage-collect instances that have sat in Normal state longer than
    /// the retention window. Returns how many were dropped from the cache.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.stale_after;
        let removed = { self.cache.lock().unwrap().prune(cutoff) };
        if removed > 0 {
            tracing::debug!(removed, "pruned stale alert instances");
        }
        if let Err(e) = self.store.delete_stale(cutoff).await {
            tracing::warn!(error = %e, "failed to prune stale instances from store");
        }
        removed
    }
}
