use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_eval::QueryExecutor;
use vigil_notify::{MultiOrgNotifier, NotifierFactory};
use vigil_state::StateManager;
use vigil_store::{AdminConfigStore, InstanceStore, RuleStore};

use crate::config::SchedulerConfig;
use crate::scheduler::Scheduler;

/// The alerting core as one owned object: scheduler, state manager, and
/// per-org notification fan-out, wired together from injected collaborators.
///
/// The embedding process constructs exactly one of these, calls [`warm`]
/// once, then [`run`] until shutdown. The API and notification layers reach
/// the live state through [`state_manager`] and [`notifier`] handles rather
/// than process-wide globals.
///
/// [`warm`]: AlertService::warm
/// [`run`]: AlertService::run
/// [`state_manager`]: AlertService::state_manager
/// [`notifier`]: AlertService::notifier
pub struct AlertService {
    state: Arc<StateManager>,
    notifier: Arc<MultiOrgNotifier>,
    scheduler: Arc<Scheduler>,
    admin_store: Arc<dyn AdminConfigStore>,
}

impl AlertService {
    pub fn new(
        cfg: SchedulerConfig,
        rule_store: Arc<dyn RuleStore>,
        admin_store: Arc<dyn AdminConfigStore>,
        instance_store: Arc<dyn InstanceStore>,
        executor: Arc<dyn QueryExecutor>,
        notifier_factory: Box<dyn NotifierFactory>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;

        let state = Arc::new(StateManager::new(
            instance_store,
            cfg.base_interval_secs,
            cfg.stale_after_secs,
        ));
        let notifier = Arc::new(MultiOrgNotifier::new(notifier_factory));
        let scheduler = Arc::new(Scheduler::new(
            cfg,
            rule_store,
            admin_store.clone(),
            executor,
            state.clone(),
            notifier.clone(),
        ));

        Ok(Self {
            state,
            notifier,
            scheduler,
            admin_store,
        })
    }

    /// Complete the initial sync before the first tick is allowed to
    /// dispatch: per-org notifier configurations, then persisted alert
    /// instances. Failure here is a startup failure, not a per-rule one.
    pub async fn warm(&self) -> anyhow::Result<()> {
        let configs = self
            .admin_store
            .list_admin_configs()
            .await
            .context("initial alertmanager configuration sync failed")?;
        self.notifier.sync(&configs);

        self.state
            .warm()
            .await
            .context("warm start from the instance store failed")?;
        Ok(())
    }

    /// Run the scheduler and admin-config poller until the token is
    /// cancelled. Blocks; returns after both loops have been joined.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.scheduler.run(shutdown).await
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn notifier(&self) -> &Arc<MultiOrgNotifier> {
        &self.notifier
    }
}
