//! Environment-shaped configuration (§6 Configuration surface), loaded the
//! way the teacher's `conf::Settings` is: `envy::from_env` into a
//! `#[derive(Deserialize)]` struct for the parts of the surface that are
//! naturally environment-shaped. Subscriber/backoff/serialization wiring has
//! no natural env-var shape and stays on [`crate::pump::MessagePumpBuilder`].

use std::env;

use anyhow::Context;
use serde::Deserialize;

fn default_visibility_timeout_seconds() -> u32 {
    30
}

fn default_visibility_extension_threshold_seconds() -> u32 {
    5
}

fn default_visibility_extension_heartbeat_seconds() -> u32 {
    1
}

fn default_wait_time_seconds() -> u32 {
    20
}

fn default_max_concurrent() -> usize {
    10
}

/// The environment-driven portion of the pump's configuration surface.
#[derive(Debug, Deserialize)]
pub struct Settings {
    pub sqs_queue_url: String,

    #[serde(default = "default_max_concurrent")]
    pub sqs_max_concurrent: usize,

    #[serde(default = "default_visibility_timeout_seconds")]
    pub sqs_visibility_timeout_seconds: u32,

    #[serde(default = "default_visibility_extension_threshold_seconds")]
    pub sqs_visibility_extension_threshold_seconds: u32,

    #[serde(default = "default_visibility_extension_heartbeat_seconds")]
    pub sqs_visibility_extension_heartbeat_seconds: u32,

    #[serde(default = "default_wait_time_seconds")]
    pub sqs_wait_time_seconds: u32,

    /// Whether to include raw payload content in logs/errors. Defaults off
    /// for data-privacy (§7); may be overridden by `AWSMESSAGING_LOGMESSAGECONTENT`
    /// even when this struct is constructed from a config file rather than
    /// straight from `envy::from_env`.
    #[serde(default)]
    pub log_message_content: bool,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings: Settings = envy::from_env().context("failed to load settings from the environment")?;
        if let Ok(raw) = env::var("AWSMESSAGING_LOGMESSAGECONTENT") {
            settings.log_message_content = parse_bool_env(&raw)
                .with_context(|| format!("AWSMESSAGING_LOGMESSAGECONTENT has an invalid boolean value: {raw:?}"))?;
        }
        Ok(settings)
    }

    pub fn poller_config(&self) -> Result<crate::config::PollerConfig, crate::error::ConfigError> {
        crate::config::PollerConfig::builder(&self.sqs_queue_url)
            .max_concurrent(self.sqs_max_concurrent)
            .visibility_timeout_seconds(self.sqs_visibility_timeout_seconds)
            .visibility_extension_threshold_seconds(self.sqs_visibility_extension_threshold_seconds)
            .visibility_extension_heartbeat_seconds(self.sqs_visibility_extension_heartbeat_seconds)
            .wait_time_seconds(self.sqs_wait_time_seconds)
            .build()
    }
}

fn parse_bool_env(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("{other:?} is not a recognized boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_boolean_spellings() {
        assert!(parse_bool_env("true").unwrap());
        assert!(parse_bool_env("1").unwrap());
        assert!(!parse_bool_env("false").unwrap());
        assert!(!parse_bool_env("0").unwrap());
        assert!(parse_bool_env("nonsense").is_err());
    }
}
