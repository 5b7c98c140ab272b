//! Process configuration, read once from the environment

use crate::state_machine::SessionTiming;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PRESETS_PATH: &str = "presets.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("STORYAI_BACKEND_URL is not set")]
    MissingBackendUrl,
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the dialogue backend
    pub backend_url: String,
    pub presets_path: PathBuf,
    /// Signed-in user; `None` means every story start is refused
    pub user_id: Option<String>,
    pub port: u16,
    pub request_timeout: Duration,
    /// Sessions nobody touched or watched for this long are closed
    pub session_idle_timeout: Duration,
    pub timing: SessionTiming,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend_url = lookup("STORYAI_BACKEND_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingBackendUrl)?;

        let port = parse_or("STORYAI_PORT", lookup("STORYAI_PORT"), DEFAULT_PORT)?;
        let timeout_secs = parse_or(
            "STORYAI_REQUEST_TIMEOUT_SECS",
            lookup("STORYAI_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let idle_secs = parse_or(
            "STORYAI_SESSION_IDLE_SECS",
            lookup("STORYAI_SESSION_IDLE_SECS"),
            DEFAULT_SESSION_IDLE_SECS,
        )?;

        Ok(Self {
            backend_url,
            presets_path: lookup("STORYAI_PRESETS_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_PRESETS_PATH), PathBuf::from),
            user_id: lookup("STORYAI_USER_ID"),
            port,
            request_timeout: Duration::from_secs(timeout_secs),
            session_idle_timeout: Duration::from_secs(idle_secs),
            timing: SessionTiming::default(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: v }),
    }
}
