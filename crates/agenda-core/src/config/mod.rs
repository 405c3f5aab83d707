//! Client configuration

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::sync::DEFAULT_MAX_ATTEMPTS;
use crate::util::is_http_url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which real-time broadcasts a client subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RealtimeScope {
    /// Only the caller's own events
    #[default]
    User,
    /// Every broadcast the caller may see
    All,
}

impl RealtimeScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::All => "all",
        }
    }
}

impl FromStr for RealtimeScope {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "all" => Ok(Self::All),
            other => Err(ConfigError::Invalid(format!(
                "AGENDA_REALTIME_SCOPE must be `user` or `all`, got `{other}`"
            ))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub access_token: Option<String>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
    pub max_sync_attempts: u32,
    pub realtime_scope: RealtimeScope,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("probe_interval", &self.probe_interval)
            .field("probe_timeout", &self.probe_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_sync_attempts", &self.max_sync_attempts)
            .field("realtime_scope", &self.realtime_scope)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = required_trimmed(&lookup, "AGENDA_API_URL")?;
        if !is_http_url(&api_url) {
            return Err(ConfigError::Invalid(
                "AGENDA_API_URL must start with http:// or https://".to_string(),
            ));
        }
        let api_url = api_url.trim_end_matches('/').to_string();

        let access_token = optional_trimmed(&lookup, "AGENDA_ACCESS_TOKEN");

        let probe_interval_secs =
            ranged_u64(&lookup, "AGENDA_PROBE_INTERVAL_SECS", 5, 1..=3_600)?;
        let probe_timeout_secs = ranged_u64(&lookup, "AGENDA_PROBE_TIMEOUT_SECS", 3, 1..=600)?;
        if probe_timeout_secs >= probe_interval_secs {
            return Err(ConfigError::Invalid(
                "AGENDA_PROBE_TIMEOUT_SECS must be less than AGENDA_PROBE_INTERVAL_SECS"
                    .to_string(),
            ));
        }

        let request_timeout_secs =
            ranged_u64(&lookup, "AGENDA_REQUEST_TIMEOUT_SECS", 10, 1..=300)?;

        let max_sync_attempts = ranged_u64(
            &lookup,
            "AGENDA_MAX_SYNC_ATTEMPTS",
            u64::from(DEFAULT_MAX_ATTEMPTS),
            1..=100,
        )?;

        let realtime_scope = optional_trimmed(&lookup, "AGENDA_REALTIME_SCOPE")
            .map(|value| value.parse::<RealtimeScope>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            api_url,
            access_token,
            probe_interval: Duration::from_secs(probe_interval_secs),
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_sync_attempts: u32::try_from(max_sync_attempts).unwrap_or(DEFAULT_MAX_ATTEMPTS),
            realtime_scope,
        })
    }

    /// Configuration with defaults for everything but the API URL.
    pub fn for_url(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = api_url.to_string();
        Self::from_lookup(|name| (name == "AGENDA_API_URL").then(|| api_url.clone()))
    }

    /// WebSocket URL of the real-time channel for the configured scope
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.api_url.clone()
        };
        format!(
            "{ws_base}/v1/realtime?scope={}",
            self.realtime_scope.as_str()
        )
    }
}

fn ranged_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<u64>().map_err(|_| invalid())?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
