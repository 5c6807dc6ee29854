use serde::{Deserialize, Serialize};

/// Configuration surface consumed by the alerting core. Loaded from TOML;
/// every field has a default so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Base tick interval in seconds. Every rule interval must be an
    /// integer multiple of this. Changing it on an existing deployment is
    /// discouraged: rules whose interval no longer divides evenly stop
    /// being evaluated.
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,

    /// Interval applied to rules that do not specify one.
    #[serde(default = "default_rule_interval_secs")]
    pub default_rule_interval_secs: u64,

    /// Query executions attempted per evaluation before the tick is
    /// recorded as an Error verdict.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Cadence of the admin-configuration poll reconciling per-org
    /// notification fan-out.
    #[serde(default = "default_admin_config_poll_secs")]
    pub admin_config_poll_secs: u64,

    /// Upper bound on simultaneously running evaluation tasks.
    #[serde(default = "default_max_concurrent_evals")]
    pub max_concurrent_evals: usize,

    /// Retention window: instances in Normal state longer than this are
    /// garbage-collected.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// How long shutdown waits for in-flight evaluations to finish.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval_secs(),
            default_rule_interval_secs: default_rule_interval_secs(),
            max_attempts: default_max_attempts(),
            admin_config_poll_secs: default_admin_config_poll_secs(),
            max_concurrent_evals: default_max_concurrent_evals(),
            stale_after_secs: default_stale_after_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_base_interval_secs() -> u64 {
    10
}

fn default_rule_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_admin_config_poll_secs() -> u64 {
    60
}

fn default_max_concurrent_evals() -> usize {
    10
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl SchedulerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.base_interval_secs > 0, "base_interval_secs must be positive");
        anyhow::ensure!(
            self.default_rule_interval_secs > 0,
            "default_rule_interval_secs must be positive"
        );
        anyhow::ensure!(self.max_attempts > 0, "max_attempts must be at least 1");
        anyhow::ensure!(
            self.max_concurrent_evals > 0,
            "max_concurrent_evals must be at least 1"
        );
        anyhow::ensure!(
            self.default_rule_interval_secs % self.base_interval_secs == 0,
            "default_rule_interval_secs ({}) must be a multiple of base_interval_secs ({})",
            self.default_rule_interval_secs,
            self.base_interval_secs
        );
        Ok(())
    }
}
