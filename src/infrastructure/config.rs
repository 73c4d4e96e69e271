use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub requests: RequestPolicy,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub certification: CertificationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Policy around request creation and auto-approval.
#[derive(Debug, Deserialize, Clone)]
pub struct RequestPolicy {
    #[serde(default = "default_min_justification")]
    pub min_justification_length: usize,
    #[serde(default = "default_max_temporary_days")]
    pub max_temporary_days: i64,
    #[serde(default = "default_default_temporary_days")]
    pub default_temporary_days: i64,
    #[serde(default)]
    pub auto_approve_low_risk: bool,
    #[serde(default = "default_low_risk_threshold")]
    pub low_risk_threshold: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_sla_hours")]
    pub default_sla_hours: u32,
    #[serde(default = "default_max_approval_levels")]
    pub max_approval_levels: usize,
    #[serde(default = "default_true")]
    pub require_manager_approval: bool,
    /// Floor for the SLA sweep interval; overlapping sweeps short-circuit.
    #[serde(default = "default_sweep_interval")]
    pub sla_sweep_min_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CertificationConfig {
    #[serde(default = "default_campaign_days")]
    pub default_campaign_days: i64,
    #[serde(default = "default_reminder_days")]
    pub reminder_days: Vec<i64>,
    #[serde(default)]
    pub auto_revoke_on_timeout: bool,
    #[serde(default = "default_true")]
    pub require_comments_for_revoke: bool,
    #[serde(default = "default_max_items_per_reviewer")]
    pub max_items_per_reviewer: usize,
}

/// Bounded retry for transient external failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// Concurrency ceiling for batch evaluation.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

/// Logging configuration consumed by [`crate::telemetry::init`].
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Level for this crate's spans and events; `RUST_LOG` overrides.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines for structured ingestion; plain text otherwise.
    #[serde(default = "default_true")]
    pub json: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            min_justification_length: default_min_justification(),
            max_temporary_days: default_max_temporary_days(),
            default_temporary_days: default_default_temporary_days(),
            auto_approve_low_risk: false,
            low_risk_threshold: default_low_risk_threshold(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_sla_hours: default_sla_hours(),
            max_approval_levels: default_max_approval_levels(),
            require_manager_approval: true,
            sla_sweep_min_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self {
            default_campaign_days: default_campaign_days(),
            reminder_days: default_reminder_days(),
            auto_revoke_on_timeout: false,
            require_comments_for_revoke: true,
            max_items_per_reviewer: default_max_items_per_reviewer(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("GOVERNOR").separator("__"));
        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

fn default_min_justification() -> usize {
    20
}

fn default_max_temporary_days() -> i64 {
    90
}

fn default_default_temporary_days() -> i64 {
    30
}

fn default_low_risk_threshold() -> u32 {
    20
}

fn default_sla_hours() -> u32 {
    48
}

fn default_max_approval_levels() -> usize {
    5
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_campaign_days() -> i64 {
    14
}

fn default_reminder_days() -> Vec<i64> {
    vec![7, 3, 1]
}

fn default_max_items_per_reviewer() -> usize {
    500
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    250
}

fn default_retry_max_ms() -> u64 {
    5_000
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::Config;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        env::remove_var("GOVERNOR__REQUESTS__MIN_JUSTIFICATION_LENGTH");
        env::remove_var("GOVERNOR__WORKFLOW__DEFAULT_SLA_HOURS");
    }

    #[test]
    #[serial]
    fn defaults_apply_without_environment() {
        clear_env_vars();

        let config = Config::from_env().expect("expected configuration to load");

        assert_eq!(config.requests.min_justification_length, 20);
        assert_eq!(config.requests.max_temporary_days, 90);
        assert_eq!(config.workflow.default_sla_hours, 48);
        assert_eq!(config.workflow.max_approval_levels, 5);
        assert!(config.workflow.require_manager_approval);
        assert_eq!(config.certification.reminder_days, vec![7, 3, 1]);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.evaluation.batch_concurrency, 8);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.telemetry.json);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear_env_vars();
        env::set_var("GOVERNOR__REQUESTS__MIN_JUSTIFICATION_LENGTH", "40");
        env::set_var("GOVERNOR__WORKFLOW__DEFAULT_SLA_HOURS", "24");

        let config = Config::from_env().expect("expected configuration to load");

        assert_eq!(config.requests.min_justification_length, 40);
        assert_eq!(config.workflow.default_sla_hours, 24);

        clear_env_vars();
    }
}
