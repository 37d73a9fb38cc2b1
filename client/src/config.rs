use crate::{
    channel::DEFAULT_RECONNECT_INTERVAL, fallback::DEFAULT_POLL_INTERVAL,
    inbox::DEFAULT_LIMIT, Credentials, RetryPolicy, SessionOptions,
};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

/// Configuration for a [crate::Session], usually read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub base_url: String,
    pub user_id: String,
    pub token: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_get_attempts")]
    pub max_get_attempts: usize,
    #[serde(default = "default_notification_limit")]
    pub notification_limit: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid yaml: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("invalid base_url {value}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base_url must be http or https (got {value})")]
    InvalidScheme { value: String },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub base_url: Url,
    pub credentials: Credentials,

    pub log_level: Level,
    pub log_json: bool,

    pub reconnect_interval: Duration,
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub notification_limit: usize,
}

impl ValidatedConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reconnect_interval: self.reconnect_interval,
            poll_interval: self.poll_interval,
            notification_limit: self.notification_limit,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL.as_millis() as u64
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_max_get_attempts() -> usize {
    RetryPolicy::default().max_attempts
}

fn default_notification_limit() -> usize {
    DEFAULT_LIMIT
}

fn non_zero(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(value)
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(yaml: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl Config {
    /// Config for `user_id` against `base_url` with every default.
    pub fn new(base_url: &str, user_id: &str, token: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            user_id: user_id.to_string(),
            token: token.to_string(),
            log_level: default_log_level(),
            log_json: false,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            max_get_attempts: default_max_get_attempts(),
            notification_limit: default_notification_limit(),
        }
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let base_url = Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            value: self.base_url.clone(),
            source,
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidScheme {
                value: self.base_url,
            });
        }
        if self.user_id.is_empty() {
            return Err(ConfigError::Empty { field: "user_id" });
        }
        if self.token.is_empty() {
            return Err(ConfigError::Empty { field: "token" });
        }

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        let reconnect_interval = Duration::from_millis(non_zero(
            "reconnect_interval_ms",
            self.reconnect_interval_ms,
        )?);
        let poll_interval =
            Duration::from_secs(non_zero("poll_interval_secs", self.poll_interval_secs)?);
        let max_attempts = non_zero("max_get_attempts", self.max_get_attempts as u64)? as usize;
        let notification_limit =
            non_zero("notification_limit", self.notification_limit as u64)? as usize;

        Ok(ValidatedConfig {
            base_url,
            credentials: Credentials::new(self.user_id, self.token),
            log_level,
            log_json: self.log_json,
            reconnect_interval,
            poll_interval,
            retry_policy: RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
            notification_limit,
        })
    }
}
