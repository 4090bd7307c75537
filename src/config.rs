//! Tracker configuration with environment overrides

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Settings for the tracker and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Chat-completion endpoint URL
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Wall-clock budget for the network call, measured from request start
    pub request_timeout_ms: u64,
    /// Characters of input text included in the prompt
    pub prompt_input_limit: usize,
    /// Characters of input text kept on the active record for diagnostics
    pub digest_limit: usize,
    pub history_capacity: usize,
    /// Characters of input text stored per history entry
    pub history_text_limit: usize,
    /// How long a settled analysis stays answerable via `last_outcome`
    pub settled_grace_secs: u64,
    /// Capacity of the progress event channel
    pub event_buffer: usize,
    pub chat_max_tokens: u32,
    pub chat_temperature: f32,
    /// Earlier chat messages sent along with a new one
    pub chat_context_messages: usize,
    pub chat_history_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2000,
            temperature: 0.3,
            request_timeout_ms: 30_000,
            prompt_input_limit: 4000,
            digest_limit: 100,
            history_capacity: 50,
            history_text_limit: 500,
            settled_grace_secs: 60,
            event_buffer: 64,
            chat_max_tokens: 4000,
            chat_temperature: 0.7,
            chat_context_messages: 10,
            chat_history_capacity: 20,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `VACLIVE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("VACLIVE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(model) = lookup("VACLIVE_MODEL") {
            config.model = model;
        }
        if let Some(raw) = lookup("VACLIVE_MAX_TOKENS") {
            config.max_tokens = parse_var("VACLIVE_MAX_TOKENS", &raw)?;
        }
        if let Some(raw) = lookup("VACLIVE_TEMPERATURE") {
            config.temperature = parse_var("VACLIVE_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = lookup("VACLIVE_TIMEOUT_SECS") {
            let secs: u64 = parse_var("VACLIVE_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "VACLIVE_TIMEOUT_SECS",
                    value: raw,
                });
            }
            config.request_timeout_ms = secs.saturating_mul(1000);
        }

        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sub-millisecond budgets round up to one millisecond.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn with_settled_grace(mut self, grace: Duration) -> Self {
        self.settled_grace_secs = grace.as_secs();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn settled_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settled_grace_secs as i64)
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_match_observed_behavior() {
        let config = TrackerConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.max_tokens, 2000);
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.chat_max_tokens, 4000);
        assert_eq!(config.chat_history_capacity, 20);
    }

    #[test]
    fn env_overrides_apply() {
        let config = TrackerConfig::from_lookup(lookup_from(&[
            ("VACLIVE_MODEL", "deepseek-reasoner"),
            ("VACLIVE_TIMEOUT_SECS", "45"),
        ]))
        .unwrap();
        assert_eq!(config.model, "deepseek-reasoner");
        assert_eq!(config.request_timeout(), Duration::from_secs(45));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn unparsable_override_is_rejected() {
        let err = TrackerConfig::from_lookup(lookup_from(&[("VACLIVE_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "VACLIVE_TIMEOUT_SECS", .. }
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = TrackerConfig::from_lookup(lookup_from(&[("VACLIVE_TIMEOUT_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "VACLIVE_TIMEOUT_SECS", ref value } if value == "0"
        ));
    }

    #[test]
    fn sub_second_timeouts_survive() {
        let config = TrackerConfig::default().with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));

        let config = TrackerConfig::default().with_request_timeout(Duration::from_micros(10));
        assert_eq!(config.request_timeout(), Duration::from_millis(1));
    }
}
