//! Configuration loading from environment variables.

use chrono_tz::Tz;
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the graph files, the state store and lock files
    pub data_dir: PathBuf,
    /// Zone for Clock nodes and price window days
    pub timezone: Tz,
    /// Two-letter bidding zone country, uppercase
    pub country_code: Option<String>,
    pub entsoe_api_key: Option<String>,
    /// Propagation pass budget
    pub max_iterations: usize,
    pub lock_timeout: Duration,
    pub melcloud_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `EPOWER_DATA_DIR`: data directory (default: ./data)
    /// - `EPOWER_TIMEZONE`: IANA zone name (default: Europe/Helsinki)
    /// - `EPOWER_COUNTRY_CODE`: bidding zone country, price feed off when unset
    /// - `EPOWER_ENTSOE_API_KEY`: price feed token, price feed off when unset
    /// - `EPOWER_MAX_ITERATIONS`: propagation passes per cycle (default: 10)
    /// - `EPOWER_LOCK_TIMEOUT_SECS`: stale lock threshold (default: 14400)
    /// - `EPOWER_MELCLOUD_URL`: heat pump cloud endpoint
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(var("EPOWER_DATA_DIR").unwrap_or_else(|| "./data".to_string()));

        let timezone: Tz = var("EPOWER_TIMEZONE")
            .unwrap_or_else(|| "Europe/Helsinki".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("EPOWER_TIMEZONE", "must be an IANA zone name"))?;

        let country_code = match var("EPOWER_COUNTRY_CODE") {
            Some(code) if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
                Some(code.to_ascii_uppercase())
            }
            Some(_) => {
                return Err(ConfigError::Invalid(
                    "EPOWER_COUNTRY_CODE",
                    "must be a two-letter country code",
                ))
            }
            None => None,
        };

        let max_iterations: usize = var("EPOWER_MAX_ITERATIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .ok()
            .filter(|&n| n > 0)
            .ok_or(ConfigError::Invalid(
                "EPOWER_MAX_ITERATIONS",
                "must be a positive integer",
            ))?;

        let lock_timeout_secs: u64 = var("EPOWER_LOCK_TIMEOUT_SECS")
            .unwrap_or_else(|| "14400".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("EPOWER_LOCK_TIMEOUT_SECS", "must be a number of seconds")
            })?;

        Ok(Self {
            data_dir,
            timezone,
            country_code,
            entsoe_api_key: var("EPOWER_ENTSOE_API_KEY"),
            max_iterations,
            lock_timeout: Duration::from_secs(lock_timeout_secs),
            melcloud_url: var("EPOWER_MELCLOUD_URL")
                .unwrap_or_else(|| device_core::melcloud::DEFAULT_BASE_URL.to_string()),
        })
    }

    /// API key and country when both are set
    pub fn price_feed(&self) -> Option<(&str, &str)> {
        Some((self.entsoe_api_key.as_deref()?, self.country_code.as_deref()?))
    }
}

/// Non-empty value of an environment variable
fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
