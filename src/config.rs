// ⚙️ Runtime configuration
// Read from the environment (optionally seeded from a `.env` file).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DATABASE_PATH: &str = "timebank.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_ALERT_WINDOW_DAYS: i64 = 30;
/// Longest alert window accepted anywhere (about ten years)
pub const MAX_ALERT_WINDOW_DAYS: i64 = 3660;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// What to do when a report yields zero entries.
///
/// `Wipe` treats the empty report as the new truth and clears the roster's
/// entries. `Reject` refuses the upload and leaves the snapshot untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyReportPolicy {
    #[default]
    Wipe,
    Reject,
}

impl FromStr for EmptyReportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wipe" => Ok(EmptyReportPolicy::Wipe),
            "reject" => Ok(EmptyReportPolicy::Reject),
            other => Err(format!("expected `wipe` or `reject`, got `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    pub empty_report_policy: EmptyReportPolicy,
    pub alert_window_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            empty_report_policy: EmptyReportPolicy::default(),
            alert_window_days: DEFAULT_ALERT_WINDOW_DAYS,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read `TIMEBANK_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Read `TIMEBANK_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Used by `from_env` and tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let database_path = lookup("TIMEBANK_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let bind_addr = lookup("TIMEBANK_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let max_upload_bytes = parse_var(&lookup, "TIMEBANK_MAX_UPLOAD_BYTES")?
            .unwrap_or(defaults.max_upload_bytes);
        if max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TIMEBANK_MAX_UPLOAD_BYTES",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let empty_report_policy = parse_var(&lookup, "TIMEBANK_EMPTY_REPORT_POLICY")?
            .unwrap_or(defaults.empty_report_policy);

        let alert_window_days = parse_var(&lookup, "TIMEBANK_ALERT_WINDOW_DAYS")?
            .unwrap_or(defaults.alert_window_days);
        if !(0..=MAX_ALERT_WINDOW_DAYS).contains(&alert_window_days) {
            return Err(ConfigError::InvalidValue {
                key: "TIMEBANK_ALERT_WINDOW_DAYS",
                value: alert_window_days.to_string(),
                reason: format!("must be between 0 and {}", MAX_ALERT_WINDOW_DAYS),
            });
        }

        Ok(Config {
            database_path,
            bind_addr,
            max_upload_bytes,
            empty_report_policy,
            alert_window_days,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
                value,
            }),
    }
}
