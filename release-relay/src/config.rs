//! Runtime configuration.
//!
//! Loaded from `RELAY_*` environment variables (plus `DATABASE_URL`), after
//! a `.env` file if one is present. Unset variables fall back to defaults.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::notification::{WebhookAuth, WebhookConfig};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:release-relay.db";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub database_url: String,
    pub scheduler: SchedulerConfig,
    pub source: SourceConfig,
    pub dispatch: DispatchConfig,
    pub webhook: WebhookConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            scheduler: SchedulerConfig::default(),
            source: SourceConfig::default(),
            dispatch: DispatchConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// Poll cycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of buckets resources are spread over.
    pub shard_count: u32,
    /// Cadence at which `poll` is invoked externally.
    pub cycle_interval_secs: u64,
    /// Resources polled concurrently per batch.
    pub batch_size: usize,
    /// Consecutive failures after which a resource leaves its shard.
    pub error_ceiling: i32,
    /// How long a failing resource waits between re-probes.
    pub failure_cooldown_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            cycle_interval_secs: 300,
            batch_size: 10,
            error_ceiling: 5,
            failure_cooldown_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }
}

/// Upstream API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            request_timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Delivery and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Ceiling for a single channel call.
    pub request_timeout_secs: u64,
    /// Attempts after which an errored notification is left alone.
    pub max_attempts: i32,
    /// Minimum age of the last failure before the sweep retries it.
    pub retry_cooldown_secs: u64,
    /// Rows examined per sweep.
    pub sweep_limit: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_attempts: 5,
            retry_cooldown_secs: 600,
            sweep_limit: 100,
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }
}

/// Parse `name` if it is set to a non-blank value.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("{name}={raw:?}: {e}"))),
        _ => Ok(None),
    }
}

impl RelayConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source, then validate it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = parse_var::<String>(&lookup, "DATABASE_URL")? {
            config.database_url = url;
        }

        let scheduler = &mut config.scheduler;
        if let Some(v) = parse_var(&lookup, "RELAY_SHARD_COUNT")? {
            scheduler.shard_count = v;
        }
        if let Some(v) = parse_var(&lookup, "RELAY_CYCLE_INTERVAL_SECS")? {
            scheduler.cycle_interval_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "RELAY_BATCH_SIZE")? {
            scheduler.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "RELAY_ERROR_CEILING")? {
            scheduler.error_ceiling = v;
        }
        if let Some(v) = parse_var(&lookup, "RELAY_FAILURE_COOLDOWN_SECS")? {
            scheduler.failure_cooldown_secs = v;
        }

        let source = &mut config.source;
        if let Some(v) = parse_var(&lookup, "RELAY_API_BASE")? {
            source.api_base = v;
        }
        source.token = parse_var(&lookup, "RELAY_GITHUB_TOKEN")?;
        source.user_agent = parse_var(&lookup, "RELAY_USER_AGENT")?;
        if let Some(v) = parse_var(&lookup, "RELAY_REQUEST_TIMEOUT_SECS")? {
            source.request_timeout_secs = v;
            config.dispatch.request_timeout_secs = v;
            config.webhook.timeout_secs = v;
        }

        let dispatch = &mut config.dispatch;
        if let Some(v) = parse_var(&lookup, "RELAY_MAX_ATTEMPTS")? {
            dispatch.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "RELAY_RETRY_COOLDOWN_SECS")? {
            dispatch.retry_cooldown_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "RELAY_SWEEP_LIMIT")? {
            dispatch.sweep_limit = v;
        }

        if let Some(token) = parse_var::<String>(&lookup, "RELAY_WEBHOOK_TOKEN")? {
            config.webhook.auth = Some(WebhookAuth::Bearer { token });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.shard_count == 0 {
            return Err(Error::config("shard count must be at least 1"));
        }
        if s.cycle_interval_secs == 0 {
            return Err(Error::config("cycle interval must be positive"));
        }
        if s.batch_size == 0 {
            return Err(Error::config("batch size must be at least 1"));
        }
        if s.error_ceiling < 0 {
            return Err(Error::config("error ceiling must not be negative"));
        }

        if self.source.request_timeout_secs == 0 || self.dispatch.request_timeout_secs == 0 {
            return Err(Error::config("request timeout must be positive"));
        }
        let api_base = Url::parse(&self.source.api_base)
            .map_err(|e| Error::config(format!("invalid API base {}: {e}", self.source.api_base)))?;
        if !matches!(api_base.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "API base must be http(s): {}",
                self.source.api_base
            )));
        }

        if self.dispatch.max_attempts < 1 {
            return Err(Error::config("max attempts must be at least 1"));
        }
        if self.dispatch.sweep_limit == 0 {
            return Err(Error::config("sweep limit must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.scheduler.shard_count, 1);
        assert_eq!(config.scheduler.cycle_interval_secs, 300);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.error_ceiling, 5);
        assert_eq!(config.scheduler.failure_cooldown(), Duration::from_secs(3600));
        assert_eq!(config.source.api_base, DEFAULT_API_BASE);
        assert!(config.source.token.is_none());
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.dispatch.retry_cooldown(), Duration::from_secs(600));
        assert_eq!(config.dispatch.sweep_limit, 100);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("RELAY_SHARD_COUNT", "4"),
            ("RELAY_REQUEST_TIMEOUT_SECS", "5"),
            ("RELAY_GITHUB_TOKEN", "ghp_x"),
            ("RELAY_WEBHOOK_TOKEN", "hook"),
            ("RELAY_MAX_ATTEMPTS", " 3 "),
            ("RELAY_USER_AGENT", ""),
        ])
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.scheduler.shard_count, 4);
        assert_eq!(config.source.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.dispatch.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.webhook.timeout_secs, 5);
        assert_eq!(config.source.token.as_deref(), Some("ghp_x"));
        assert!(matches!(config.webhook.auth, Some(WebhookAuth::Bearer { .. })));
        assert_eq!(config.dispatch.max_attempts, 3);
        assert!(config.source.user_agent.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("RELAY_BATCH_SIZE", "ten")]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            load(&[("RELAY_SHARD_COUNT", "0")]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            load(&[("RELAY_API_BASE", "ftp://example.com")]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            load(&[("RELAY_MAX_ATTEMPTS", "0")]),
            Err(Error::Configuration(_))
        ));
    }
}
