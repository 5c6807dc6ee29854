//! The transition table of the alert-instance automaton.

use chrono::{DateTime, Duration, Utc};
use vigil_common::types::{AlertRule, AlertState, ExecErrPolicy, NoDataPolicy, Verdict};

/// Compute the next state of an instance.
///
/// Pure function of (current state, state-entry time, verdict, rule
/// policies, evaluation time): re-applying it from the same starting point
/// with the same verdict yields the same result, so a duplicated evaluation
/// cannot compound.
///
/// Pending accrual counts the tick that entered Pending as a full base
/// interval: a run of k consecutive Firing ticks spaced `base_interval`
/// apart promotes to Alerting exactly when `k * base_interval >=
/// pending_secs`. A rule with `pending_secs == 0` (or below the base
/// interval) goes straight to Alerting.
pub fn next_state(
    rule: &AlertRule,
    base_interval: Duration,
    current: AlertState,
    state_since: DateTime<Utc>,
    verdict: Verdict,
    at: DateTime<Utc>,
) -> AlertState {
    // Resolve NoData/Error verdicts through the rule's policies first; the
    // surviving verdict is always Firing or Normal.
    let effective = match verdict {
        Verdict::Firing | Verdict::Normal => verdict,
        Verdict::NoData => match rule.no_data_policy {
            NoDataPolicy::Alerting => Verdict::Firing,
            NoDataPolicy::Normal => Verdict::Normal,
            NoDataPolicy::NoData => return AlertState::NoData,
            NoDataPolicy::Error => return AlertState::Error,
            NoDataPolicy::KeepLast => return current,
        },
        Verdict::Error => match rule.exec_err_policy {
            ExecErrPolicy::Alerting => Verdict::Firing,
            ExecErrPolicy::Error => return AlertState::Error,
            ExecErrPolicy::KeepLast => return current,
        },
    };

    let pending = Duration::seconds(rule.pending_secs as i64);

    match (current, effective) {
        (AlertState::Alerting, Verdict::Firing) => AlertState::Alerting,
        (AlertState::Pending, Verdict::Firing) => {
            if at - state_since + base_interval >= pending {
                AlertState::Alerting
            } else {
                AlertState::Pending
            }
        }
        // Normal, NoData, and Error all enter the firing path the same way.
        (_, Verdict::Firing) => {
            if base_interval >= pending {
                AlertState::Alerting
            } else {
                AlertState::Pending
            }
        }
        (_, Verdict::Normal) => AlertState::Normal,
        // NoData/Error were resolved above.
        (_, Verdict::NoData) | (_, Verdict::Error) => unreachable!("policy-resolved verdict"),
    }
}
