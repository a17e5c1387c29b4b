//! Sync engine configuration.
//!
//! Every setting has a default; `from_env` overrides them from `ACSYNC_*`
//! variables. Durations are given in whole seconds unless the variable name
//! says otherwise.
//!
//! | Variable                              | Default          |
//! |---------------------------------------|------------------|
//! | `ACSYNC_DATABASE_PATH`                | `acsync.db`      |
//! | `ACSYNC_DATABASE_MAX_CONNECTIONS`     | `10`             |
//! | `ACSYNC_INITIAL_SYNC_DAYS`            | `30`             |
//! | `ACSYNC_POLLING_ENABLED`              | `true`           |
//! | `ACSYNC_POLLING_INTERVAL_SECS`        | `30`             |
//! | `ACSYNC_INITIAL_POLL_DELAY_SECS`      | `5`              |
//! | `ACSYNC_INCREMENTAL_WINDOW_SECS`      | `300`            |
//! | `ACSYNC_STREAM_ENABLED`               | `true`           |
//! | `ACSYNC_REQUEST_TIMEOUT_SECS`         | `30`             |
//! | `ACSYNC_STREAM_IDLE_TIMEOUT_SECS`     | `120`            |
//! | `ACSYNC_MAX_RECONNECT_ATTEMPTS`       | `5`              |
//! | `ACSYNC_RECONNECT_DELAY_SECS`         | `5`              |
//! | `ACSYNC_PAGE_SIZE`                    | `100`            |
//! | `ACSYNC_MAX_SEARCH_PAGES`             | `100`            |
//! | `ACSYNC_MAX_POLL_RESULTS`             | `5000`           |
//! | `ACSYNC_PAGE_DELAY_MS`                | `100`            |
//! | `ACSYNC_SEARCH_VARIANT`               | `json`           |
//! | `ACSYNC_UTC_OFFSET`                   | `+05:00`         |
//! | `ACSYNC_SYNC_PRIVATE_ADDRESSES`       | `false`          |
//! | `ACSYNC_IMAGE_DIR`                    | `uploads/faces`  |
//! | `ACSYNC_IMAGE_PUBLIC_PREFIX`          | `/uploads/faces` |
//! | `ACSYNC_IMAGE_RETENTION`              | `10`             |

use acsync_core::constants::{
    DEFAULT_INCREMENTAL_WINDOW, DEFAULT_INITIAL_POLL_DELAY, DEFAULT_INITIAL_SYNC_DAYS,
    DEFAULT_MAX_POLL_RESULTS, DEFAULT_MAX_SEARCH_PAGES, DEFAULT_PAGE_DELAY, DEFAULT_PAGE_SIZE,
    DEFAULT_POLLING_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STREAM_IDLE_TIMEOUT,
};
use acsync_core::{Error, Result, default_utc_offset};
use acsync_network::{DeviceClientConfig, ReconnectPolicy, SearchVariant};
use acsync_protocol::EventNormalizer;
use acsync_storage::models::Terminal;
use acsync_storage::{ArchiveConfig, DatabaseConfig};
use chrono::FixedOffset;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for `ACSYNC_INITIAL_SYNC_DAYS`, ten years.
pub const MAX_INITIAL_SYNC_DAYS: i64 = 3650;

const SECS_PER_DAY: u64 = 24 * 3600;

/// Settings shared by every terminal's sync.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Lookback of the startup backfill, in days
    pub initial_sync_days: i64,
    pub polling_enabled: bool,
    pub polling_interval: Duration,
    /// Delay before the one-shot startup poll
    pub initial_poll_delay: Duration,
    /// Minimum window covered by an incremental poll
    pub incremental_window: Duration,
    pub stream_enabled: bool,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub page_size: u32,
    pub max_search_pages: u32,
    /// Cap on records collected by one incremental poll
    pub max_poll_results: u32,
    pub page_delay: Duration,
    /// Search variant tried first
    pub search_variant: SearchVariant,
    /// Offset assumed for device timestamps without one
    pub utc_offset: FixedOffset,
    /// Actively sync terminals on private addresses too
    pub sync_private_addresses: bool,
    pub archive: ArchiveConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_sync_days: DEFAULT_INITIAL_SYNC_DAYS,
            polling_enabled: true,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            initial_poll_delay: DEFAULT_INITIAL_POLL_DELAY,
            incremental_window: DEFAULT_INCREMENTAL_WINDOW,
            stream_enabled: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_search_pages: DEFAULT_MAX_SEARCH_PAGES,
            max_poll_results: DEFAULT_MAX_POLL_RESULTS,
            page_delay: DEFAULT_PAGE_DELAY,
            search_variant: SearchVariant::Json,
            utc_offset: default_utc_offset(),
            sync_private_addresses: false,
            archive: ArchiveConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first malformed variable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first malformed variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let reconnect = ReconnectPolicy {
            base_delay: parse_secs(&var, "ACSYNC_RECONNECT_DELAY_SECS")?
                .unwrap_or(defaults.reconnect.base_delay),
            max_attempts: parse(&var, "ACSYNC_MAX_RECONNECT_ATTEMPTS")?
                .unwrap_or(defaults.reconnect.max_attempts),
        };

        let search_variant = match var("ACSYNC_SEARCH_VARIANT") {
            None => defaults.search_variant,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "json" => SearchVariant::Json,
                "xml" => SearchVariant::Xml,
                other => {
                    return Err(Error::Config(format!(
                        "ACSYNC_SEARCH_VARIANT must be either 'json' or 'xml', got '{other}'"
                    )));
                }
            },
        };

        let utc_offset = match var("ACSYNC_UTC_OFFSET") {
            None => defaults.utc_offset,
            Some(value) => parse_utc_offset(&value).ok_or_else(|| {
                Error::Config(format!("invalid ACSYNC_UTC_OFFSET: '{value}'"))
            })?,
        };

        let archive = ArchiveConfig {
            directory: var("ACSYNC_IMAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive.directory),
            public_prefix: var("ACSYNC_IMAGE_PUBLIC_PREFIX")
                .map(|p| p.trim_end_matches('/').to_string())
                .unwrap_or(defaults.archive.public_prefix),
            retention: parse(&var, "ACSYNC_IMAGE_RETENTION")?
                .unwrap_or(defaults.archive.retention),
        };

        let config = Self {
            initial_sync_days: parse(&var, "ACSYNC_INITIAL_SYNC_DAYS")?
                .unwrap_or(defaults.initial_sync_days),
            polling_enabled: parse_bool(&var, "ACSYNC_POLLING_ENABLED")?
                .unwrap_or(defaults.polling_enabled),
            polling_interval: parse_secs(&var, "ACSYNC_POLLING_INTERVAL_SECS")?
                .unwrap_or(defaults.polling_interval),
            initial_poll_delay: parse_secs(&var, "ACSYNC_INITIAL_POLL_DELAY_SECS")?
                .unwrap_or(defaults.initial_poll_delay),
            incremental_window: parse_secs(&var, "ACSYNC_INCREMENTAL_WINDOW_SECS")?
                .unwrap_or(defaults.incremental_window),
            stream_enabled: parse_bool(&var, "ACSYNC_STREAM_ENABLED")?
                .unwrap_or(defaults.stream_enabled),
            request_timeout: parse_secs(&var, "ACSYNC_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout),
            stream_idle_timeout: parse_secs(&var, "ACSYNC_STREAM_IDLE_TIMEOUT_SECS")?
                .unwrap_or(defaults.stream_idle_timeout),
            reconnect,
            page_size: parse(&var, "ACSYNC_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            max_search_pages: parse(&var, "ACSYNC_MAX_SEARCH_PAGES")?
                .unwrap_or(defaults.max_search_pages),
            max_poll_results: parse(&var, "ACSYNC_MAX_POLL_RESULTS")?
                .unwrap_or(defaults.max_poll_results),
            page_delay: parse(&var, "ACSYNC_PAGE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.page_delay),
            search_variant,
            utc_offset,
            sync_private_addresses: parse_bool(&var, "ACSYNC_SYNC_PRIVATE_ADDRESSES")?
                .unwrap_or(defaults.sync_private_addresses),
            archive,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable a sync path silently.
    ///
    /// # Errors
    /// Returns `Error::Config` describing the offending setting.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_INITIAL_SYNC_DAYS).contains(&self.initial_sync_days) {
            return Err(Error::Config(format!(
                "ACSYNC_INITIAL_SYNC_DAYS must be between 1 and {MAX_INITIAL_SYNC_DAYS}"
            )));
        }
        if self.polling_interval.is_zero() {
            return Err(Error::Config(
                "ACSYNC_POLLING_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.max_search_pages == 0 {
            return Err(Error::Config(
                "ACSYNC_PAGE_SIZE and ACSYNC_MAX_SEARCH_PAGES must be at least 1".to_string(),
            ));
        }
        if self.incremental_window > self.initial_lookback() {
            return Err(Error::Config(
                "ACSYNC_INCREMENTAL_WINDOW_SECS must not exceed the initial sync lookback"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Backfill lookback as a duration.
    #[must_use]
    pub fn initial_lookback(&self) -> Duration {
        let days = u64::try_from(self.initial_sync_days).unwrap_or(0);
        days.checked_mul(SECS_PER_DAY)
            .map_or(Duration::MAX, Duration::from_secs)
    }

    /// Client settings for one terminal.
    #[must_use]
    pub fn client_config(&self, terminal: &Terminal) -> DeviceClientConfig {
        let mut config = DeviceClientConfig::new(terminal.address.clone(), terminal.credentials());
        config.request_timeout = self.request_timeout;
        config.stream_idle_timeout = self.stream_idle_timeout;
        config.page_size = self.page_size;
        config.max_search_pages = self.max_search_pages;
        config.page_delay = self.page_delay;
        config.utc_offset = self.utc_offset;
        config
    }

    #[must_use]
    pub fn normalizer(&self) -> EventNormalizer {
        EventNormalizer::new(self.utc_offset)
    }
}

/// Database settings from `ACSYNC_DATABASE_*`.
///
/// # Errors
/// Returns `Error::Config` for a malformed connection count.
pub fn database_config_from_env() -> Result<DatabaseConfig> {
    database_config_from_lookup(|name| env::var(name).ok())
}

/// Database settings from an arbitrary variable source.
///
/// # Errors
/// Returns `Error::Config` for a malformed connection count.
pub fn database_config_from_lookup<F>(lookup: F) -> Result<DatabaseConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut config = var("ACSYNC_DATABASE_PATH")
        .map(DatabaseConfig::new)
        .unwrap_or_default();
    if let Some(max) = parse::<u32>(&var, "ACSYNC_DATABASE_MAX_CONNECTIONS")? {
        config = config.max_connections(max);
    }
    Ok(config)
}

/// Parse `+05:00`, `-0330`, `+05` or `Z`.
#[must_use]
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {name}: {e}")))
        })
        .transpose()
}

fn parse_secs(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Duration>> {
    Ok(parse::<u64>(var, name)?.map(Duration::from_secs))
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<bool>> {
    var(name)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!(
                "{name} must be true or false, got '{other}'"
            ))),
        })
        .transpose()
}
