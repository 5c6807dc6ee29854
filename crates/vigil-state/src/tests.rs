use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use vigil_common::types::{
    AlertInstance, AlertRule, AlertState, CompareOp, Condition, EvalResult, Evaluation,
    ExecErrPolicy, LabelSet, NoDataPolicy, QuerySpec, Verdict,
};
use vigil_store::memory::MemoryInstanceStore;
use vigil_store::{InstanceStore, StoreError};

use crate::manager::StateManager;
use crate::transition;

const BASE_SECS: u64 = 10;

fn rule(pending_secs: u64) -> AlertRule {
    let mut annotations = HashMap::new();
    annotations.insert("summary".to_string(), "CPU is high".to_string());
    AlertRule {
        org_id: 1,
        uid: "cpu-high".to_string(),
        title: "High CPU".to_string(),
        interval_secs: BASE_SECS,
        pending_secs,
        query: QuerySpec {
            expr: "avg(cpu_usage) by (host)".to_string(),
            condition: Condition {
                op: CompareOp::GreaterThan,
                threshold: 90.0,
            },
        },
        no_data_policy: NoDataPolicy::NoData,
        exec_err_policy: ExecErrPolicy::Error,
        labels: LabelSet::from_pairs([("team", "infra")]),
        annotations,
        paused: false,
        updated_at: Utc::now(),
    }
}

fn manager(store: Arc<dyn InstanceStore>) -> StateManager {
    StateManager::new(store, BASE_SECS, 900)
}

fn host_labels(host: &str) -> LabelSet {
    LabelSet::from_pairs([("host", host)])
}

fn eval(rule: &AlertRule, at: DateTime<Utc>, entries: &[(&str, Verdict, f64)]) -> Evaluation {
    Evaluation {
        org_id: rule.org_id,
        rule_uid: rule.uid.clone(),
        evaluated_at: at,
        results: entries
            .iter()
            .map(|(host, verdict, value)| EvalResult {
                labels: host_labels(host),
                verdict: *verdict,
                value: Some(*value),
                message: None,
            })
            .collect(),
    }
}

fn whole_rule_eval(rule: &AlertRule, at: DateTime<Utc>, verdict: Verdict) -> Evaluation {
    Evaluation {
        org_id: rule.org_id,
        rule_uid: rule.uid.clone(),
        evaluated_at: at,
        results: vec![EvalResult {
            labels: LabelSet::new(),
            verdict,
            value: None,
            message: (verdict == Verdict::Error).then(|| "boom".to_string()),
        }],
    }
}

#[tokio::test]
async fn firing_run_promotes_through_pending() {
    // pending 30s with 10s ticks: the third consecutive firing tick alerts
    let rule = rule(30);
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    let events = sm
        .process(&rule, &eval(&rule, t0, &[("web-01", Verdict::Firing, 95.0)]))
        .await;
    assert!(events.is_empty());
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("web-01")).unwrap().state,
        AlertState::Pending
    );

    let t1 = t0 + Duration::seconds(10);
    let events = sm
        .process(&rule, &eval(&rule, t1, &[("web-01", Verdict::Firing, 96.0)]))
        .await;
    assert!(events.is_empty());
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("web-01")).unwrap().state,
        AlertState::Pending
    );

    let t2 = t0 + Duration::seconds(20);
    let events = sm
        .process(&rule, &eval(&rule, t2, &[("web-01", Verdict::Firing, 97.0)]))
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, AlertState::Alerting);
    assert_eq!(events[0].evaluated_at, t2);

    let instance = sm.get(1, "cpu-high", &host_labels("web-01")).unwrap();
    assert_eq!(instance.state, AlertState::Alerting);
    assert_eq!(instance.state_since, t2);
}

#[tokio::test]
async fn short_firing_run_returns_to_normal_without_alerting() {
    // two firing ticks accrue 20s < 30s pending, then the condition clears
    let rule = rule(30);
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    let mut all_events = Vec::new();
    for (secs, verdict) in [(0, Verdict::Firing), (10, Verdict::Firing), (20, Verdict::Normal)] {
        let at = t0 + Duration::seconds(secs);
        all_events.extend(sm.process(&rule, &eval(&rule, at, &[("web-01", verdict, 50.0)])).await);
    }

    assert!(all_events.is_empty(), "no fan-out for Pending excursions");
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("web-01")).unwrap().state,
        AlertState::Normal
    );
}

#[tokio::test]
async fn fan_out_fires_once_and_resolves_once() {
    // zero pending duration: first firing tick alerts immediately
    let rule = rule(0);
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    let events = sm
        .process(&rule, &eval(&rule, t0, &[("web-01", Verdict::Firing, 95.0)]))
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, AlertState::Alerting);
    // template labels are merged under the query's label set
    assert_eq!(events[0].labels.get("team"), Some("infra"));
    assert_eq!(events[0].labels.get("host"), Some("web-01"));
    assert_eq!(events[0].annotations.get("summary").unwrap(), "CPU is high");

    // re-affirming ticks while already Alerting never fan out
    for secs in [10, 20, 30] {
        let at = t0 + Duration::seconds(secs);
        let events = sm
            .process(&rule, &eval(&rule, at, &[("web-01", Verdict::Firing, 95.0)]))
            .await;
        assert!(events.is_empty());
    }

    let t_clear = t0 + Duration::seconds(40);
    let events = sm
        .process(&rule, &eval(&rule, t_clear, &[("web-01", Verdict::Normal, 10.0)]))
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, AlertState::Normal);

    // and a repeated all-clear stays silent
    let t_again = t0 + Duration::seconds(50);
    let events = sm
        .process(&rule, &eval(&rule, t_again, &[("web-01", Verdict::Normal, 10.0)]))
        .await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn no_data_policy_alerting_follows_the_firing_path() {
    let mut rule = rule(20);
    rule.no_data_policy = NoDataPolicy::Alerting;
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    let events = sm.process(&rule, &whole_rule_eval(&rule, t0, Verdict::NoData)).await;
    assert!(events.is_empty());
    assert_eq!(
        sm.get(1, "cpu-high", &LabelSet::new()).unwrap().state,
        AlertState::Pending
    );

    let t1 = t0 + Duration::seconds(10);
    let events = sm.process(&rule, &whole_rule_eval(&rule, t1, Verdict::NoData)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, AlertState::Alerting);
}

#[tokio::test]
async fn keep_last_policy_holds_the_current_state() {
    let mut rule = rule(60);
    rule.no_data_policy = NoDataPolicy::KeepLast;
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    sm.process(&rule, &eval(&rule, t0, &[("web-01", Verdict::Firing, 95.0)]))
        .await;
    let entered = sm.get(1, "cpu-high", &host_labels("web-01")).unwrap();
    assert_eq!(entered.state, AlertState::Pending);

    let t1 = t0 + Duration::seconds(10);
    let events = sm.process(&rule, &whole_rule_eval(&rule, t1, Verdict::NoData)).await;
    assert!(events.is_empty());

    let held = sm.get(1, "cpu-high", &host_labels("web-01")).unwrap();
    assert_eq!(held.state, AlertState::Pending);
    assert_eq!(held.state_since, entered.state_since, "pending clock not reset");
    assert_eq!(held.last_eval_at, t1);
}

#[tokio::test]
async fn exec_error_parks_in_error_and_recovers_by_verdict() {
    let rule = rule(0);
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    sm.process(&rule, &eval(&rule, t0, &[("web-01", Verdict::Firing, 95.0)]))
        .await;

    let t1 = t0 + Duration::seconds(10);
    let events = sm.process(&rule, &whole_rule_eval(&rule, t1, Verdict::Error)).await;
    assert!(events.is_empty(), "leaving Alerting for Error is not a resolve");
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("web-01")).unwrap().state,
        AlertState::Error
    );

    // once evaluation succeeds again the usual verdict-driven rules apply
    let t2 = t0 + Duration::seconds(20);
    let events = sm
        .process(&rule, &eval(&rule, t2, &[("web-01", Verdict::Normal, 10.0)]))
        .await;
    assert!(events.is_empty());
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("web-01")).unwrap().state,
        AlertState::Normal
    );
}

#[tokio::test]
async fn whole_rule_error_applies_to_every_tracked_label_set() {
    let rule = rule(0);
    let sm = manager(Arc::new(MemoryInstanceStore::new()));
    let t0 = Utc::now();

    sm.process(
        &rule,
        &eval(
            &rule,
            t0,
            &[("web-01", Verdict::Firing, 95.0), ("web-02", Verdict::Normal, 20.0)],
        ),
    )
    .await;
    assert_eq!(sm.instance_count(), 2);

    let t1 = t0 + Duration::seconds(10);
    sm.process(&rule, &whole_rule_eval(&rule, t1, Verdict::Error)).await;

    assert_eq!(sm.instance_count(), 2, "no synthetic empty-label instance");
    for host in ["web-01", "web-02"] {
        assert_eq!(
            sm.get(1, "cpu-high", &host_labels(host)).unwrap().state,
            AlertState::Error
        );
    }
}

#[tokio::test]
async fn warm_start_restores_pending_hysteresis() {
    let rule = rule(30);
    let store = Arc::new(MemoryInstanceStore::new());
    let now = Utc::now();

    // state persisted by a previous process: Pending since 40s ago
    let entered = now - Duration::seconds(40);
    store.seed(AlertInstance {
        org_id: 1,
        rule_uid: "cpu-high".to_string(),
        labels: host_labels("web-01"),
        state: AlertState::Pending,
        state_since: entered,
        last_eval_at: entered,
        last_value: Some(93.0),
        annotations: HashMap::new(),
    });

    let sm = manager(store);
    assert_eq!(sm.warm().await.unwrap(), 1);

    // the first post-restart firing tick sees the pending duration elapsed
    let events = sm
        .process(&rule, &eval(&rule, now, &[("web-01", Verdict::Firing, 95.0)]))
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, AlertState::Alerting);
}

#[test]
fn transition_is_a_pure_function() {
    let rule = rule(30);
    let base = Duration::seconds(BASE_SECS as i64);
    let since = Utc::now();
    let at = since + Duration::seconds(10);

    let a = transition::next_state(&rule, base, AlertState::Pending, since, Verdict::Firing, at);
    let b = transition::next_state(&rule, base, AlertState::Pending, since, Verdict::Firing, at);
    assert_eq!(a, b);
    assert_eq!(a, AlertState::Pending);

    // re-application from the same starting state cannot compound: the
    // promoted state is derived from entry time, not from call count
    let at_done = since + Duration::seconds(20);
    let c = transition::next_state(&rule, base, AlertState::Pending, since, Verdict::Firing, at_done);
    let d = transition::next_state(&rule, base, AlertState::Pending, since, Verdict::Firing, at_done);
    assert_eq!(c, AlertState::Alerting);
    assert_eq!(c, d);
}

#[tokio::test]
async fn prune_drops_only_stale_normal_instances() {
    let rule = rule(0);
    let store = Arc::new(MemoryInstanceStore::new());
    let sm = StateManager::new(store.clone(), BASE_SECS, 60);
    let t0 = Utc::now() - Duration::seconds(300);

    sm.process(
        &rule,
        &eval(
            &rule,
            t0,
            &[("idle", Verdict::Normal, 1.0), ("busy", Verdict::Firing, 99.0)],
        ),
    )
    .await;
    assert_eq!(sm.instance_count(), 2);

    let removed = sm.prune(Utc::now()).await;
    assert_eq!(removed, 1);
    assert!(sm.get(1, "cpu-high", &host_labels("idle")).is_none());
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("busy")).unwrap().state,
        AlertState::Alerting
    );
    assert_eq!(store.len(), 1, "store pruned alongside the cache");
}

#[tokio::test]
async fn sync_rules_forgets_deleted_rules() {
    let rule = rule(0);
    let store = Arc::new(MemoryInstanceStore::new());
    let sm = StateManager::new(store.clone(), BASE_SECS, 900);
    let t0 = Utc::now();

    sm.process(&rule, &eval(&rule, t0, &[("web-01", Verdict::Firing, 95.0)]))
        .await;
    assert_eq!(sm.instance_count(), 1);

    let live: HashSet<String> = HashSet::new();
    sm.sync_rules(1, &live).await;

    assert_eq!(sm.instance_count(), 0);
    assert!(store.is_empty());
}

struct FailingInstanceStore;

#[async_trait]
impl InstanceStore for FailingInstanceStore {
    async fn load_all(&self) -> Result<Vec<AlertInstance>, StoreError> {
        Err(StoreError::Unavailable("db down".to_string()))
    }
    async fn upsert(&self, _instance: &AlertInstance) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("db down".to_string()))
    }
    async fn delete_rule(&self, _org_id: i64, _rule_uid: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("db down".to_string()))
    }
    async fn delete_stale(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("db down".to_string()))
    }
}

#[tokio::test]
async fn store_failure_never_blocks_the_in_memory_transition() {
    let rule = rule(0);
    let sm = manager(Arc::new(FailingInstanceStore));
    let t0 = Utc::now();

    let events = sm
        .process(&rule, &eval(&rule, t0, &[("web-01", Verdict::Firing, 95.0)]))
        .await;

    assert_eq!(events.len(), 1);
    assert_eq!(
        sm.get(1, "cpu-high", &host_labels("web-01")).unwrap().state,
        AlertState::Alerting
    );
}
