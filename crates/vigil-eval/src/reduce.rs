use chrono::{DateTime, Utc};
use vigil_common::types::{AlertRule, EvalResult, Evaluation, Verdict};

use crate::Series;

/// Reduce a successful query result into one verdict per distinct label set.
///
/// Series order is preserved. An empty result yields a single NoData entry
/// under an empty label set; how that maps onto alert state is the rule's
/// no-data policy, resolved later by the state manager.
pub fn reduce(rule: &AlertRule, series: &[Series], evaluated_at: DateTime<Utc>) -> Evaluation {
    let results = if series.is_empty() {
        vec![EvalResult {
            labels: Default::default(),
            verdict: Verdict::NoData,
            value: None,
            message: None,
        }]
    } else {
        series
            .iter()
            .map(|s| EvalResult {
                labels: s.labels.clone(),
                verdict: if rule.query.condition.holds(s.value) {
                    Verdict::Firing
                } else {
                    Verdict::Normal
                },
                value: Some(s.value),
                message: None,
            })
            .collect()
    };

    Evaluation {
        org_id: rule.org_id,
        rule_uid: rule.uid.clone(),
        evaluated_at,
        results,
    }
}

/// The evaluation produced when query execution failed after the retry
/// budget: a single Error entry carrying the last attempt's message.
pub fn execution_error(
    rule: &AlertRule,
    evaluated_at: DateTime<Utc>,
    message: String,
) -> Evaluation {
    Evaluation {
        org_id: rule.org_id,
        rule_uid: rule.uid.clone(),
        evaluated_at,
        results: vec![EvalResult {
            labels: Default::default(),
            verdict: Verdict::Error,
            value: None,
            message: Some(message),
        }],
    }
}
