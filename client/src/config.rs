use crate::{
    game::{BalancePolicy, GameConfig},
    RetryPolicy,
};
use kumasi_types::{DEFAULT_STAKE, RESET_DELAY_MS};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

/// Client configuration, usually read from a YAML file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_session_path")]
    pub session_path: String,

    #[serde(default = "default_stake")]
    pub stake: u64,
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
    #[serde(default)]
    pub balance_policy: BalancePolicy,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid url: {value}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
}

pub struct ValidatedConfig {
    pub url: Url,
    pub session_path: PathBuf,
    pub game: GameConfig,
    pub log_level: Level,
    pub log_json: bool,
    pub retry_policy: RetryPolicy,
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_session_path() -> String {
    ".kumasi/session.json".to_string()
}

fn default_stake() -> u64 {
    DEFAULT_STAKE
}

fn default_reset_delay_ms() -> u64 {
    RESET_DELAY_MS
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_max_attempts() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            session_path: default_session_path(),
            stake: default_stake(),
            reset_delay_ms: default_reset_delay_ms(),
            balance_policy: BalancePolicy::default(),
            log_level: default_log_level(),
            log_json: false,
            max_attempts: default_max_attempts(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            value: self.url.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidScheme(url.scheme().to_string()));
        }
        if self.stake == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "stake",
                value: self.stake,
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "max_attempts",
                value: 0,
            });
        }
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            url,
            session_path: PathBuf::from(self.session_path),
            game: GameConfig {
                stake: self.stake,
                reset_delay: Duration::from_millis(self.reset_delay_ms),
                policy: self.balance_policy,
            },
            log_level,
            log_json: self.log_json,
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("{}").unwrap().validate().unwrap();
        assert_eq!(config.url.as_str(), "http://localhost:8080/");
        assert_eq!(config.game, GameConfig::default());
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
url: https://project-k-backend-1.onrender.com
session_path: /tmp/kumasi.json
stake: 20
reset_delay_ms: 4000
balance_policy: optimistic
log_level: debug
log_json: true
max_attempts: 3
"#;
        let config = Config::parse(raw).unwrap().validate().unwrap();
        assert_eq!(config.url.scheme(), "https");
        assert_eq!(config.session_path, PathBuf::from("/tmp/kumasi.json"));
        assert_eq!(config.game.stake, 20);
        assert_eq!(config.game.reset_delay, Duration::from_secs(4));
        assert_eq!(config.game.policy, BalancePolicy::Optimistic);
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.log_json);
        assert_eq!(config.retry_policy.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config {
            url: "ftp://example.com".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScheme(scheme)) if scheme == "ftp"
        ));

        let config = Config {
            stake: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero { field: "stake", .. })
        ));

        let config = Config {
            log_level: "loud".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        assert!(matches!(
            Config::parse("balance_policy: reload"),
            Err(ConfigError::Parse(_))
        ));
    }
}
