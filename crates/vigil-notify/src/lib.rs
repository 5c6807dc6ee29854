//! Notification fan-out boundary.
//!
//! From the alerting core's perspective delivery is a pure sink: whenever
//! the state manager signals a boundary-crossing transition, the event is
//! routed to the owning organization's [`Notifier`]. Rendering, transport,
//! and delivery retry live entirely behind that trait.

pub mod error;
pub mod multiorg;


pub use error::{NotifyError, Result};
pub use multiorg::MultiOrgNotifier;

use async_trait::async_trait;
use vigil_common::types::{AlertmanagerConfig, TransitionEvent};

/// A notification sink for one organization.
///
/// Implementations are created by the [`NotifierFactory`] from that org's
/// polled Alertmanager configuration and swapped atomically when the
/// configuration changes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one transition event.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails. The caller logs and drops it;
    /// delivery failure never propagates into the scheduler loop.
    async fn send(&self, event: &TransitionEvent) -> Result<()>;

    /// Returns the sink name for logging (e.g. `"webhook"`).
    fn name(&self) -> &str;
}

/// Builds a [`Notifier`] from an organization's fan-out configuration.
pub trait NotifierFactory: Send + Sync {
    fn build(&self, config: &AlertmanagerConfig) -> Result<std::sync::Arc<dyn Notifier>>;
}
