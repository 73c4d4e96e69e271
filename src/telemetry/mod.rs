//! Structured logging for the governance engines.
//!
//! The engines attach governance identifiers (`request_id`, `campaign_id`,
//! `rule_id`, `step_id`) to their events at transition points; [`init`]
//! installs the process-wide subscriber that renders them, driven by the
//! [`TelemetryConfig`] section of the crate configuration.

use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::infrastructure::config::TelemetryConfig;

static TELEMETRY: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber from the configured telemetry section.
///
/// The configured `log_level` scopes this crate's output; a `RUST_LOG`
/// environment filter takes precedence when set. `json` selects between
/// structured JSON lines and plain text. Re-initialization is a no-op, so
/// embedders and tests may both call this freely.
pub fn init(config: &TelemetryConfig) {
    let directive = format!("access_governor={}", config.log_level);
    let json = config.json;
    TELEMETRY.get_or_init(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
        let fmt_layer = if json {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = TelemetryConfig {
            log_level: "debug".to_string(),
            json: false,
        };
        init(&config);
        init(&config);
    }
}
