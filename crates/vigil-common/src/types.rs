use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Organization (tenant) identifier.
pub type OrgId = i64;

/// Composite identity of a rule: one scheduler process serves many orgs,
/// and rule UIDs are only unique within an org.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub org_id: OrgId,
    pub rule_uid: String,
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org_id, self.rule_uid)
    }
}

/// The key/value tags identifying one distinct series returned by a query.
///
/// Backed by a `BTreeMap` so iteration order, equality, and the fingerprint
/// are stable regardless of insertion order. Each label set under one rule
/// tracks independent alert state.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Convenience constructor, mostly for tests and fixtures.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Stable identity string, usable as a map key: sorted `k=v` pairs
    /// joined by `,`.
    pub fn fingerprint(&self) -> String {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.join(",")
    }

    /// Returns `self` layered over `base`: every label of `base` plus every
    /// label of `self`, with `self` winning on conflicts. Used to merge a
    /// rule's template labels under the labels a query returned.
    pub fn merged_over(&self, base: &LabelSet) -> LabelSet {
        let mut out = base.0.clone();
        for (k, v) in &self.0 {
            out.insert(k.clone(), v.clone());
        }
        LabelSet(out)
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", pairs.join(", "))
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Comparison operator of a rule's threshold condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
        }
    }
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" => Ok(Self::GreaterThan),
            "less_than" | "lt" => Ok(Self::LessThan),
            "greater_equal" | "gte" => Ok(Self::GreaterEqual),
            "less_equal" | "lte" => Ok(Self::LessEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "greater_than"),
            Self::LessThan => write!(f, "less_than"),
            Self::GreaterEqual => write!(f, "greater_equal"),
            Self::LessEqual => write!(f, "less_equal"),
        }
    }
}

/// Threshold condition applied to every series a query returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: CompareOp,
    pub threshold: f64,
}

impl Condition {
    pub fn holds(&self, value: f64) -> bool {
        self.op.check(value, self.threshold)
    }
}

/// A rule's query definition. The expression is opaque to the core and is
/// handed verbatim to the external query executor; only the condition is
/// interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub expr: String,
    pub condition: Condition,
}

/// How a NoData query outcome (successful execution, zero series) maps onto
/// alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// Treat missing data as a firing condition.
    Alerting,
    /// Treat missing data as a healthy condition.
    Normal,
    /// Park the instance in the dedicated NoData state.
    NoData,
    /// Park the instance in the Error state.
    Error,
    /// Hold whatever state the instance is currently in.
    KeepLast,
}

impl Default for NoDataPolicy {
    fn default() -> Self {
        Self::NoData
    }
}

impl std::fmt::Display for NoDataPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alerting => write!(f, "alerting"),
            Self::Normal => write!(f, "normal"),
            Self::NoData => write!(f, "no_data"),
            Self::Error => write!(f, "error"),
            Self::KeepLast => write!(f, "keep_last"),
        }
    }
}

impl std::str::FromStr for NoDataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alerting" => Ok(Self::Alerting),
            "normal" => Ok(Self::Normal),
            "no_data" | "nodata" => Ok(Self::NoData),
            "error" => Ok(Self::Error),
            "keep_last" => Ok(Self::KeepLast),
            _ => Err(format!("unknown no-data policy: {s}")),
        }
    }
}

/// How a failed query execution (after the retry budget) maps onto alert
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecErrPolicy {
    /// Treat execution failure as a firing condition.
    Alerting,
    /// Park the instance in the Error state.
    Error,
    /// Hold whatever state the instance is currently in.
    KeepLast,
}

impl Default for ExecErrPolicy {
    fn default() -> Self {
        Self::Error
    }
}

impl std::fmt::Display for ExecErrPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alerting => write!(f, "alerting"),
            Self::Error => write!(f, "error"),
            Self::KeepLast => write!(f, "keep_last"),
        }
    }
}

impl std::str::FromStr for ExecErrPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alerting" => Ok(Self::Alerting),
            "error" => Ok(Self::Error),
            "keep_last" => Ok(Self::KeepLast),
            _ => Err(format!("unknown exec-error policy: {s}")),
        }
    }
}

/// A user-defined alerting rule, read-only to the scheduler. Owned and
/// mutated by the external rule-authoring surface through the rule store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub org_id: OrgId,
    /// Unique within the org; stable across edits.
    pub uid: String,
    pub title: String,
    /// Evaluation interval. Must be an integer multiple of the scheduler's
    /// base interval; `0` means "use the configured default interval".
    pub interval_secs: u64,
    /// Time a firing condition must persist before the instance is
    /// considered actually Alerting.
    pub pending_secs: u64,
    pub query: QuerySpec,
    pub no_data_policy: NoDataPolicy,
    pub exec_err_policy: ExecErrPolicy,
    /// Template labels layered under every label set the query returns.
    pub labels: LabelSet,
    pub annotations: HashMap<String, String>,
    pub paused: bool,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn key(&self) -> RuleKey {
        RuleKey {
            org_id: self.org_id,
            rule_uid: self.uid.clone(),
        }
    }
}

/// Per-label-set outcome of evaluating one rule at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The condition held for this series.
    Firing,
    /// The condition did not hold for this series.
    Normal,
    /// The query executed successfully but returned no series.
    NoData,
    /// Query execution itself failed after the retry budget.
    Error,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Firing => write!(f, "firing"),
            Self::Normal => write!(f, "normal"),
            Self::NoData => write!(f, "no_data"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One (label set, verdict) entry of an [`Evaluation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub labels: LabelSet,
    pub verdict: Verdict,
    /// The series value, absent for NoData/Error entries.
    pub value: Option<f64>,
    /// Execution error message, set only when the verdict is Error.
    pub message: Option<String>,
}

/// Everything one evaluation of one rule produced: an ordered sequence of
/// per-label-set results tagged with the tick's evaluation timestamp.
/// Immutable once produced; consumed exactly once by the state manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub org_id: OrgId,
    pub rule_uid: String,
    pub evaluated_at: DateTime<Utc>,
    pub results: Vec<EvalResult>,
}

/// Alert state of one (rule, label set) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Normal,
    Pending,
    Alerting,
    NoData,
    Error,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Pending => write!(f, "pending"),
            Self::Alerting => write!(f, "alerting"),
            Self::NoData => write!(f, "no_data"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "pending" => Ok(Self::Pending),
            "alerting" => Ok(Self::Alerting),
            "no_data" | "nodata" => Ok(Self::NoData),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// The tracked state of one (rule, label set) pair. At most one instance
/// exists per pair at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub org_id: OrgId,
    pub rule_uid: String,
    /// The label set as returned by the query; the instance key.
    pub labels: LabelSet,
    pub state: AlertState,
    /// When the instance entered its current state.
    pub state_since: DateTime<Utc>,
    pub last_eval_at: DateTime<Utc>,
    pub last_value: Option<f64>,
    pub annotations: HashMap<String, String>,
}

impl AlertInstance {
    pub fn key(&self) -> RuleKey {
        RuleKey {
            org_id: self.org_id,
            rule_uid: self.rule_uid.clone(),
        }
    }
}

/// Payload handed to the notification fan-out when an instance crosses the
/// Normal/Alerting boundary. `state == Alerting` means the alert fired;
/// `state == Normal` means it resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub org_id: OrgId,
    pub rule_uid: String,
    pub labels: LabelSet,
    pub state: AlertState,
    pub annotations: HashMap<String, String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Per-organization notification fan-out configuration, polled from the
/// admin-configuration store and reconciled on its own cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertmanagerConfig {
    pub org_id: OrgId,
    pub receivers: Vec<String>,
    pub updated_at: DateTime<Utc>,
}
