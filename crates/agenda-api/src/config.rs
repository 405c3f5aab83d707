use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// SQLite path for the event store; `:memory:` keeps everything in memory
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub mutation_rate_limit_per_window: u32,
    pub batch_sync_rate_limit_per_window: u32,
    pub fanout_channel_capacity: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "mutation_rate_limit_per_window",
                &self.mutation_rate_limit_per_window,
            )
            .field(
                "batch_sync_rate_limit_per_window",
                &self.batch_sync_rate_limit_per_window,
            )
            .field("fanout_channel_capacity", &self.fanout_channel_capacity)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "AGENDA_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "AGENDA_DATABASE_PATH", "agenda.db");

        let jwt_secret = required_trimmed(&lookup, "AGENDA_JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "AGENDA_JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        let jwt_issuer = value_or_default(&lookup, "AGENDA_JWT_ISSUER", "agenda");

        let auth_clock_skew_secs =
            ranged::<u64>(&lookup, "AUTH_CLOCK_SKEW_SECS", 60, 0, 300)?;
        let rate_limit_window_secs =
            ranged::<u64>(&lookup, "RATE_LIMIT_WINDOW_SECS", 60, 10, 3_600)?;
        let mutation_rate_limit_per_window =
            ranged::<u32>(&lookup, "MUTATION_RATE_LIMIT_PER_WINDOW", 240, 1, 5_000)?;
        let batch_sync_rate_limit_per_window =
            ranged::<u32>(&lookup, "BATCH_SYNC_RATE_LIMIT_PER_WINDOW", 30, 1, 1_000)?;
        let fanout_channel_capacity =
            ranged::<usize>(&lookup, "FANOUT_CHANNEL_CAPACITY", 1_024, 16, 65_536)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            mutation_rate_limit_per_window,
            batch_sync_rate_limit_per_window,
            fanout_channel_capacity,
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == ":memory:"
    }
}

fn ranged<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    let invalid = || ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"));
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<T>().map_err(|_| invalid())?,
        None => default,
    };
    if value < min || value > max {
        return Err(invalid());
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
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

#[cfg(test)]
pub(crate) const TEST_SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    let mut map = HashMap::new();
    map.insert("AGENDA_JWT_SECRET", TEST_SECRET);
    map.insert("AGENDA_DATABASE_PATH", ":memory:");
    AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("AGENDA_JWT_SECRET"));

        let err = config_from(&[("AGENDA_JWT_SECRET", "short")]).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn config_applies_defaults() {
        let config = test_config();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.jwt_issuer, "agenda");
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
        assert_eq!(config.mutation_rate_limit_per_window, 240);
        assert_eq!(config.batch_sync_rate_limit_per_window, 30);
        assert_eq!(config.fanout_channel_capacity, 1_024);
        assert!(config.is_in_memory());
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let err = config_from(&[
            ("AGENDA_JWT_SECRET", TEST_SECRET),
            ("RATE_LIMIT_WINDOW_SECS", "5"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_WINDOW_SECS"));

        let err = config_from(&[
            ("AGENDA_JWT_SECRET", TEST_SECRET),
            ("FANOUT_CHANNEL_CAPACITY", "lots"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("[16, 65536]"));
    }

    #[test]
    fn config_redacts_jwt_secret() {
        let debug_output = format!("{:?}", test_config());
        assert!(!debug_output.contains(TEST_SECRET));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
