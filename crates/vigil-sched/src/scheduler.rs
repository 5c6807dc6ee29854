use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vigil_common::types::{AlertRule, Evaluation, OrgId, RuleKey};
use vigil_eval::QueryExecutor;
use vigil_notify::MultiOrgNotifier;
use vigil_state::StateManager;
use vigil_store::{AdminConfigStore, RuleStore};

use crate::config::SchedulerConfig;

/// Instance garbage collection runs every this many base ticks.
const GC_EVERY_TICKS: u64 = 6;

/// Deterministic phase offset spreading rules with the same interval across
/// base ticks instead of evaluating them all on the same one.
pub fn phase_offset(rule_uid: &str, ratio: u64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    rule_uid.hash(&mut hasher);
    hasher.finish() % ratio
}

/// Registry of evaluations currently running, keyed by rule. Dispatch takes
/// a guard; the guard's drop releases the slot, so a panicking task can
/// never leave its rule permanently blocked.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<RuleKey>>>);

impl InFlight {
    fn try_begin(&self, key: RuleKey) -> Option<InFlightGuard> {
        let mut running = self.0.lock().unwrap();
        if running.insert(key.clone()) {
            Some(InFlightGuard {
                running: self.0.clone(),
                key,
            })
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

struct InFlightGuard {
    running: Arc<Mutex<HashSet<RuleKey>>>,
    key: RuleKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running.lock().unwrap().remove(&self.key);
    }
}

/// The tick loop. Owns dispatch, per-rule mutual exclusion, the retry
/// budget, and the admin-configuration poller.
pub struct Scheduler {
    cfg: SchedulerConfig,
    rule_store: Arc<dyn RuleStore>,
    admin_store: Arc<dyn AdminConfigStore>,
    executor: Arc<dyn QueryExecutor>,
    state: Arc<StateManager>,
    notifier: Arc<MultiOrgNotifier>,
    in_flight: InFlight,
    eval_slots: Arc<Semaphore>,
    misaligned: Mutex<HashSet<RuleKey>>,
}

impl Scheduler {
    pub fn new(
        cfg: SchedulerConfig,
        rule_store: Arc<dyn RuleStore>,
        admin_store: Arc<dyn AdminConfigStore>,
        executor: Arc<dyn QueryExecutor>,
        state: Arc<StateManager>,
        notifier: Arc<MultiOrgNotifier>,
    ) -> Self {
        let eval_slots = Arc::new(Semaphore::new(cfg.max_concurrent_evals));
        Self {
            cfg,
            rule_store,
            admin_store,
            executor,
            state,
            notifier,
            in_flight: InFlight::default(),
            eval_slots,
            misaligned: Mutex::new(HashSet::new()),
        }
    }

    /// Run until the token is cancelled. Both the evaluation loop and the
    /// admin-config poller are joined before this returns; a single rule's
    /// failure never surfaces here.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            base_interval_secs = self.cfg.base_interval_secs,
            max_attempts = self.cfg.max_attempts,
            max_concurrent_evals = self.cfg.max_concurrent_evals,
            admin_config_poll_secs = self.cfg.admin_config_poll_secs,
            "alert scheduler started"
        );

        let (eval, admin) = tokio::join!(
            self.eval_loop(shutdown.clone()),
            self.admin_config_loop(shutdown)
        );
        eval?;
        admin?;

        tracing::info!("alert scheduler stopped");
        Ok(())
    }

    async fn eval_loop(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let period = Duration::from_secs(self.cfg.base_interval_secs);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut counter: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    counter += 1;
                    let now = Utc::now();
                    self.tick(counter, now).await;
                    if counter % GC_EVERY_TICKS == 0 {
                        self.state.prune(now).await;
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// One base-interval tick: re-read the rule set, drop state of deleted
    /// rules, and dispatch every due rule.
    async fn tick(&self, counter: u64, now: DateTime<Utc>) {
        let orgs = match self.rule_store.list_orgs().await {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::warn!(tick = counter, error = %e, "rule store unavailable, skipping tick");
                return;
            }
        };

        // An org whose last rule was deleted no longer shows up in the rule
        // store at all; its instances still have to be dropped.
        let listed: HashSet<OrgId> = orgs.iter().copied().collect();
        for org_id in self.state.cached_orgs() {
            if !listed.contains(&org_id) {
                self.state.sync_rules(org_id, &HashSet::new()).await;
            }
        }

        for org_id in orgs {
            let rules = match self.rule_store.list_rules(org_id).await {
                Ok(rules) => rules,
                Err(e) => {
                    tracing::warn!(org_id, error = %e, "failed to list rules, skipping org for this tick");
                    continue;
                }
            };

            let live: HashSet<String> = rules.iter().map(|r| r.uid.clone()).collect();
            self.state.sync_rules(org_id, &live).await;

            for rule in rules {
                if rule.paused {
                    continue;
                }

                let interval = if rule.interval_secs == 0 {
                    self.cfg.default_rule_interval_secs
                } else {
                    rule.interval_secs
                };
                if interval % self.cfg.base_interval_secs != 0 {
                    self.warn_misaligned(&rule, interval);
                    continue;
                }

                let ratio = interval / self.cfg.base_interval_secs;
                if counter % ratio != phase_offset(&rule.uid, ratio) {
                    continue;
                }

                self.dispatch(rule, now);
            }
        }
    }

    /// Spawn one evaluation task, unless the rule's previous tick is still
    /// running, in which case the rule misses this tick rather than
    /// double-evaluating.
    fn dispatch(&self, rule: AlertRule, now: DateTime<Utc>) {
        let Some(guard) = self.in_flight.try_begin(rule.key()) else {
            tracing::debug!(
                org_id = rule.org_id,
                rule_uid = %rule.uid,
                "previous evaluation still in flight, skipping tick"
            );
            return;
        };

        let slots = self.eval_slots.clone();
        let executor = self.executor.clone();
        let state = self.state.clone();
        let notifier = self.notifier.clone();
        let max_attempts = self.cfg.max_attempts;

        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };

            let evaluation =
                evaluate_with_retry(executor.as_ref(), &rule, now, max_attempts).await;
            let events = state.process(&rule, &evaluation).await;
            for event in &events {
                notifier.notify(event).await;
            }
        });
    }

    fn warn_misaligned(&self, rule: &AlertRule, interval: u64) {
        let mut seen = self.misaligned.lock().unwrap();
        if seen.insert(rule.key()) {
            tracing::warn!(
                org_id = rule.org_id,
                rule_uid = %rule.uid,
                interval_secs = interval,
                base_interval_secs = self.cfg.base_interval_secs,
                "rule interval is not a multiple of the base interval, rule will never be evaluated"
            );
        }
    }

    async fn admin_config_loop(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let period = Duration::from_secs(self.cfg.admin_config_poll_secs);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.admin_store.list_admin_configs().await {
                        Ok(configs) => self.notifier.sync(&configs),
                        Err(e) => {
                            tracing::warn!(error = %e, "admin configuration poll failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Give in-flight evaluations a bounded grace period to finish.
    async fn drain(&self) {
        if self.in_flight.is_empty() {
            return;
        }
        tracing::info!("waiting for in-flight evaluations to finish");
        let deadline = Instant::now() + Duration::from_secs(self.cfg.shutdown_grace_secs);
        while !self.in_flight.is_empty() {
            if Instant::now() >= deadline {
                tracing::warn!("shutdown grace period elapsed with evaluations still in flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Execute a rule's query with the bounded retry budget and reduce the
/// outcome. Exhausting the budget downgrades to an Error-verdict evaluation
/// instead of propagating: a persistently failing rule costs `max_attempts`
/// executions per tick and nothing more.
pub async fn evaluate_with_retry(
    executor: &dyn QueryExecutor,
    rule: &AlertRule,
    eval_time: DateTime<Utc>,
    max_attempts: u32,
) -> Evaluation {
    let mut last_error = String::new();
    for attempt in 1..=max_attempts.max(1) {
        match executor.execute(&rule.query, eval_time).await {
            Ok(series) => return vigil_eval::reduce(rule, &series, eval_time),
            Err(e) => {
                tracing::warn!(
                    org_id = rule.org_id,
                    rule_uid = %rule.uid,
                    attempt,
                    error = %e,
                    "query execution attempt failed"
                );
                last_error = e.to_string();
            }
        }
    }

    tracing::error!(
        org_id = rule.org_id,
        rule_uid = %rule.uid,
        attempts = max_attempts,
        "evaluation failed after exhausting the retry budget"
    );
    vigil_eval::execution_error(rule, eval_time, last_error)
}
