use clap::ValueEnum;
use std::time::Duration;
use url::Url;

use crate::client::parse_base_url;
use crate::error::ClientError;
use crate::events::EventMode;
use crate::events::poll::{DEFAULT_HEARTBEAT_EVERY, DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_TIMEOUT};
use crate::events::stream::DEFAULT_RETRY;

pub const DEFAULT_BASE_URL: &str = "http://localhost:4096";
pub const DEFAULT_LOG_FILTER: &str = "warn";

pub const ENV_BASE_URL: &str = "OPENCODE_URL";
pub const ENV_EVENT_MODE: &str = "OPENCODE_EVENTS";
pub const ENV_POLL_INTERVAL_MS: &str = "OPENCODE_POLL_INTERVAL_MS";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    BaseUrl(#[from] ClientError),
    #[error("unknown event mode '{0}' (expected auto, stream or poll)")]
    EventMode(String),
    #[error("invalid poll interval '{0}': expected a positive number of milliseconds")]
    PollInterval(String),
}

/// Values picked up from the process environment. Kept as raw strings so a
/// bad value is reported only when nothing overrides it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    pub base_url: Option<String>,
    pub event_mode: Option<String>,
    pub poll_interval_ms: Option<String>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Self {
        let mut env = Self::default();
        for (key, value) in vars {
            if value.trim().is_empty() {
                continue;
            }
            match key.as_str() {
                ENV_BASE_URL => env.base_url = Some(value),
                ENV_EVENT_MODE => env.event_mode = Some(value),
                ENV_POLL_INTERVAL_MS => env.poll_interval_ms = Some(value),
                _ => {}
            }
        }
        env
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub event_mode: Option<EventMode>,
    pub poll_interval_ms: Option<u64>,
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub base_url: Url,
    pub event_mode: EventMode,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub heartbeat_every: u64,
    pub stream_retry: Duration,
    pub log_filter: String,
}

impl EffectiveSettings {
    pub fn for_base_url(base_url: Url) -> Self {
        Self {
            base_url,
            event_mode: EventMode::Auto,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            heartbeat_every: DEFAULT_HEARTBEAT_EVERY,
            stream_retry: DEFAULT_RETRY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Command-line flags win over the environment, which wins over built-in
/// defaults.
pub fn resolve_effective_settings(
    env: &EnvDefaults,
    cli: &CliOverrides,
) -> Result<EffectiveSettings, SettingsError> {
    let raw_url = cli
        .base_url
        .as_deref()
        .or(env.base_url.as_deref())
        .unwrap_or(DEFAULT_BASE_URL);
    let base_url = parse_base_url(raw_url.trim())?;

    let event_mode = match (cli.event_mode, env.event_mode.as_deref()) {
        (Some(mode), _) => mode,
        (None, Some(raw)) => EventMode::from_str(raw.trim(), true)
            .map_err(|_| SettingsError::EventMode(raw.to_string()))?,
        (None, None) => EventMode::Auto,
    };

    let poll_interval_ms = match (cli.poll_interval_ms, env.poll_interval_ms.as_deref()) {
        (Some(ms), _) => Some(ms),
        (None, Some(raw)) => Some(
            raw.trim()
                .parse::<u64>()
                .map_err(|_| SettingsError::PollInterval(raw.to_string()))?,
        ),
        (None, None) => None,
    };
    let poll_interval = match poll_interval_ms {
        Some(0) => return Err(SettingsError::PollInterval("0".into())),
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_POLL_INTERVAL,
    };

    let mut settings = EffectiveSettings::for_base_url(base_url);
    settings.event_mode = event_mode;
    settings.poll_interval = poll_interval;
    if let Some(filter) = &cli.log_filter {
        settings.log_filter = filter.clone();
    }
    Ok(settings)
}
