use std::ops::RangeInclusive;
use std::time::Duration;

use crate::api::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};

/// Default push-channel connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default spacing between status polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Default poll budget (60 × 5 s ≈ 5 minutes).
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;
/// Default clock-skew allowance when matching history entries.
pub const DEFAULT_MATCH_SKEW_SECS: u64 = 30;
/// Default silence tolerated on an open push channel.
pub const DEFAULT_CHANNEL_IDLE_SECS: u64 = 60;
/// Upper bound for every configured duration (one day).
pub const MAX_CONFIG_SECS: u64 = 86_400;
/// Upper bound for the poll budget.
pub const MAX_POLL_ATTEMPTS: u32 = 100_000;

/// Timing policy for one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long to wait for the push channel before polling instead.
    pub connect_timeout: Duration,
    /// Fixed cadence between polls.
    pub poll_interval: Duration,
    /// Polls allowed before the job fails with a timeout.
    pub max_poll_attempts: u32,
    /// Tolerated clock difference between this host and the analyzer.
    pub match_skew: Duration,
    /// Silence on an open push channel after which the job polls instead.
    pub channel_idle_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            match_skew: Duration::from_secs(DEFAULT_MATCH_SKEW_SECS),
            channel_idle_timeout: Duration::from_secs(DEFAULT_CHANNEL_IDLE_SECS),
        }
    }
}

impl CoordinatorConfig {
    /// Longest the polling fallback can run: attempts × interval,
    /// saturating at [`Duration::MAX`].
    pub fn poll_ceiling(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_poll_attempts)
    }
}

/// Tracker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// HTTP base URL of the analyzer.
    pub api_url: String,
    /// WebSocket base URL of the analyzer.
    pub ws_url: String,
    /// Recent analyses requested per poll (`1..=50`).
    pub history_limit: u32,
    pub coordinator: CoordinatorConfig,
}

/// Errors from loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `WEBAUDIT_API_URL`              | `http://localhost:8000` |
    /// | `WEBAUDIT_WS_URL`               | derived from API URL    |
    /// | `WEBAUDIT_CONNECT_TIMEOUT_SECS` | `10`                    |
    /// | `WEBAUDIT_POLL_INTERVAL_SECS`   | `5`                     |
    /// | `WEBAUDIT_MAX_POLL_ATTEMPTS`    | `60`                    |
    /// | `WEBAUDIT_HISTORY_LIMIT`        | `10`                    |
    /// | `WEBAUDIT_MATCH_SKEW_SECS`      | `30`                    |
    /// | `WEBAUDIT_CHANNEL_IDLE_SECS`    | `60`                    |
    ///
    /// Durations are capped at one day and the poll budget at 100 000.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("WEBAUDIT_API_URL")
            .unwrap_or_else(|| "http://localhost:8000".into())
            .trim_end_matches('/')
            .to_string();

        let ws_url = match lookup("WEBAUDIT_WS_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => derive_ws_url(&api_url).ok_or_else(|| ConfigError::Invalid {
                key: "WEBAUDIT_API_URL",
                expected: "an http:// or https:// URL",
                value: api_url.clone(),
            })?,
        };

        let connect_timeout_secs = bounded(
            "WEBAUDIT_CONNECT_TIMEOUT_SECS",
            parse_or(&lookup, "WEBAUDIT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
            0..=MAX_CONFIG_SECS,
            "at most 86400 seconds",
        )?;
        let poll_interval_secs = bounded(
            "WEBAUDIT_POLL_INTERVAL_SECS",
            parse_or(&lookup, "WEBAUDIT_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            1..=MAX_CONFIG_SECS,
            "between 1 and 86400 seconds",
        )?;
        let max_poll_attempts = bounded(
            "WEBAUDIT_MAX_POLL_ATTEMPTS",
            parse_or(&lookup, "WEBAUDIT_MAX_POLL_ATTEMPTS", DEFAULT_MAX_POLL_ATTEMPTS)?,
            1..=MAX_POLL_ATTEMPTS,
            "between 1 and 100000",
        )?;
        let history_limit = bounded(
            "WEBAUDIT_HISTORY_LIMIT",
            parse_or(&lookup, "WEBAUDIT_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            1..=MAX_HISTORY_LIMIT,
            "between 1 and 50",
        )?;
        let match_skew_secs = bounded(
            "WEBAUDIT_MATCH_SKEW_SECS",
            parse_or(&lookup, "WEBAUDIT_MATCH_SKEW_SECS", DEFAULT_MATCH_SKEW_SECS)?,
            0..=MAX_CONFIG_SECS,
            "at most 86400 seconds",
        )?;
        let channel_idle_secs = bounded(
            "WEBAUDIT_CHANNEL_IDLE_SECS",
            parse_or(&lookup, "WEBAUDIT_CHANNEL_IDLE_SECS", DEFAULT_CHANNEL_IDLE_SECS)?,
            1..=MAX_CONFIG_SECS,
            "between 1 and 86400 seconds",
        )?;

        Ok(Self {
            api_url,
            ws_url,
            history_limit,
            coordinator: CoordinatorConfig {
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                poll_interval: Duration::from_secs(poll_interval_secs),
                max_poll_attempts,
                match_skew: Duration::from_secs(match_skew_secs),
                channel_idle_timeout: Duration::from_secs(channel_idle_secs),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected: "a non-negative integer",
            value: raw,
        }),
    }
}

fn bounded<T>(
    key: &'static str,
    value: T,
    range: RangeInclusive<T>,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    T: PartialOrd + ToString,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            expected,
            value: value.to_string(),
        })
    }
}

/// `http://host` → `ws://host`, `https://host` → `wss://host`.
fn derive_ws_url(api_url: &str) -> Option<String> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Some(format!("wss://{rest}"))
    } else {
        api_url
            .strip_prefix("http://")
            .map(|rest| format!("ws://{rest}"))
    }
}
