use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use vigil_common::types::{AlertmanagerConfig, OrgId, TransitionEvent};

use crate::{Notifier, NotifierFactory};

struct OrgEntry {
    config: AlertmanagerConfig,
    notifier: Arc<dyn Notifier>,
}

/// Per-organization fan-out router.
///
/// Holds one notifier per org, built from that org's polled Alertmanager
/// configuration, and reconciles the set whenever the admin-config poller
/// observes a change. Events for an org without a configured sink are
/// logged and dropped.
pub struct MultiOrgNotifier {
    factory: Box<dyn NotifierFactory>,
    orgs: Mutex<HashMap<OrgId, OrgEntry>>,
}

impl MultiOrgNotifier {
    pub fn new(factory: Box<dyn NotifierFactory>) -> Self {
        Self {
            factory,
            orgs: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile the per-org notifiers against the polled configurations:
    /// new orgs are built, changed configs rebuilt, removed orgs dropped.
    /// A build failure keeps the org's previous notifier (if any) in place.
    pub fn sync(&self, configs: &[AlertmanagerConfig]) {
        let mut orgs = self.orgs.lock().unwrap();

        for config in configs {
            let unchanged = orgs
                .get(&config.org_id)
                .is_some_and(|entry| entry.config == *config);
            if unchanged {
                continue;
            }
            match self.factory.build(config) {
                Ok(notifier) => {
                    tracing::info!(org_id = config.org_id, "alertmanager configuration applied");
                    orgs.insert(
                        config.org_id,
                        OrgEntry {
                            config: config.clone(),
                            notifier,
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(
                        org_id = config.org_id,
                        error = %e,
                        "failed to build notifier from alertmanager configuration"
                    );
                }
            }
        }

        let before = orgs.len();
        orgs.retain(|org_id, _| configs.iter().any(|c| c.org_id == *org_id));
        let dropped = before - orgs.len();
        if dropped > 0 {
            tracing::info!(dropped, "removed notifiers for deconfigured orgs");
        }
    }

    /// Route one transition event to its organization's sink.
    pub async fn notify(&self, event: &TransitionEvent) {
        let notifier = {
            let orgs = self.orgs.lock().unwrap();
            match orgs.get(&event.org_id) {
                Some(entry) => entry.notifier.clone(),
                None => {
                    tracing::warn!(
                        org_id = event.org_id,
                        rule_uid = %event.rule_uid,
                        "dropping transition event for org without notifier configuration"
                    );
                    return;
                }
            }
        };

        if let Err(e) = notifier.send(event).await {
            tracing::error!(
                org_id = event.org_id,
                rule_uid = %event.rule_uid,
                channel = notifier.name(),
                error = %e,
                "failed to deliver notification"
            );
        }
    }

    pub fn org_count(&self) -> usize {
        self.orgs.lock().unwrap().len()
    }
}
