//! Process configuration, extracted once from the environment at startup.
//!
//! The hot-reloadable flywheel knobs live in [`settings`].

pub mod settings;

use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::Env;
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};

use crate::flywheel::PoolSizes;

pub use settings::{FlywheelSettings, SettingsError, SettingsHandle, SettingsSource};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_url: String,
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Base URL of the site-management service performing bulk refreshes.
    pub site_management_url: String,
    /// Base URL of the service issuing per-user service credentials.
    pub credentials_url: String,

    /// Optional TOML file with [`FlywheelSettings`], re-read periodically.
    #[serde(default)]
    pub flywheel_settings_path: Option<PathBuf>,
    #[serde(
        default = "default_settings_reload_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub settings_reload_interval: Duration,

    /// Tick the minute pass from inside the process instead of waiting for an
    /// external `POST /flywheel/internal`.
    #[serde(default)]
    pub internal_clock: bool,

    #[serde(default = "default_pass_workers")]
    pub pass_workers: usize,
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    /// Queued per-user jobs allowed on top of the busy dispatch workers. Sized
    /// to absorb one minute's burst of candidates.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    #[serde(default = "default_forced_workers")]
    pub forced_workers: usize,
    #[serde(default = "default_forced_queue_capacity")]
    pub forced_queue_capacity: usize,
}

impl Config {
    /// Read the process configuration from the environment.
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::raw()).extract()
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        PoolSizes {
            pass_workers: self.pass_workers,
            dispatch_workers: self.dispatch_workers,
            dispatch_queue_capacity: self.dispatch_queue_capacity,
            forced_workers: self.forced_workers,
            forced_queue_capacity: self.forced_queue_capacity,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_settings_reload_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_pass_workers() -> usize {
    2
}

fn default_dispatch_workers() -> usize {
    20
}

fn default_dispatch_queue_capacity() -> usize {
    50_000
}

fn default_forced_workers() -> usize {
    2
}

fn default_forced_queue_capacity() -> usize {
    100
}

/// Parse a duration such as `8s`, `1500ms` or `2m`. Bare numbers are seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ]);
    let parsed = parser
        .parse(value.trim())
        .map_err(|e| format!("invalid duration {value:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {value:?}: {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    // figment hands numeric env values over as integers.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationValue {
        Seconds(u64),
        Text(String),
    }

    match DurationValue::deserialize(deserializer)? {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationValue::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
