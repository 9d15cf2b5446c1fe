use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const MIN_JWT_SECRET_BYTES: usize = 32;

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
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub invite_rate_limit_per_window: u32,
    /// Audit entries older than this are deleted daily; `None` keeps everything
    pub audit_retention_days: Option<u32>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "invite_rate_limit_per_window",
                &self.invite_rate_limit_per_window,
            )
            .field("audit_retention_days", &self.audit_retention_days)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "TODOLISTI_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "DATABASE_PATH", "todolisti.db");

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }
        let jwt_issuer = optional_trimmed(&lookup, "JWT_ISSUER");
        let jwt_audience = optional_trimmed(&lookup, "JWT_AUDIENCE");

        let auth_clock_skew_secs: u64 =
            bounded(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0..=300)?;
        let rate_limit_window_secs: u64 =
            bounded(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10..=3_600)?;
        let sync_rate_limit_per_window =
            bounded(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "60", 1..=1_000)?;
        let invite_rate_limit_per_window =
            bounded(&lookup, "INVITE_RATE_LIMIT_PER_WINDOW", "10", 1..=1_000)?;

        let audit_retention_days = match optional_trimmed(&lookup, "AUDIT_RETENTION_DAYS") {
            Some(raw) => Some(parse_in_range("AUDIT_RETENTION_DAYS", &raw, 1..=3_650)?),
            None => None,
        };

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            invite_rate_limit_per_window,
            audit_retention_days,
        })
    }
}

fn bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display,
{
    parse_in_range(name, &value_or_default(lookup, name, default), range)
}

fn parse_in_range<T>(name: &str, raw: &str, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display,
{
    let out_of_range = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = raw.parse::<T>().map_err(|_| out_of_range())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(out_of_range())
    }
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
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    pub(crate) const TEST_SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    pub(crate) fn config_with(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let mut map: HashMap<&str, &str> = HashMap::new();
        map.insert("JWT_SECRET", TEST_SECRET);
        for (key, value) in pairs {
            map.insert(key, value);
        }
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn config_rejects_short_secret() {
        let err = config_with(&[("JWT_SECRET", "short")]).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn config_applies_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, "todolisti.db");
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
        assert_eq!(config.sync_rate_limit_per_window, 60);
        assert_eq!(config.invite_rate_limit_per_window, 10);
        assert_eq!(config.audit_retention_days, None);
    }

    #[test]
    fn config_validates_ranges() {
        let err = config_with(&[("RATE_LIMIT_WINDOW_SECS", "5")]).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_WINDOW_SECS"));

        let err = config_with(&[("AUDIT_RETENTION_DAYS", "0")]).unwrap_err();
        assert!(err.to_string().contains("AUDIT_RETENTION_DAYS"));

        let config = config_with(&[("AUDIT_RETENTION_DAYS", "90")]).unwrap();
        assert_eq!(config.audit_retention_days, Some(90));
    }

    #[test]
    fn config_redacts_secret_in_debug() {
        let config = config_with(&[]).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(TEST_SECRET));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
