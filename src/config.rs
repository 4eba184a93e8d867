//! Channel configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).
//!
//! | Key                             | Default                 |
//! |---------------------------------|-------------------------|
//! | `CHANNEL_ORIGIN`                | `http://localhost:8000` |
//! | `CHANNEL_ADDRESS`               | unset (bare origin)     |
//! | `CHANNEL_DEBUG`                 | `false`                 |
//! | `CHANNEL_RECONNECT_INTERVAL_MS` | `1000`                  |
//! | `CHANNEL_EVENT_CAPACITY`        | `1024`                  |
//! | `CHANNEL_CONNECT_TIMEOUT_MS`    | `10000`                 |
//! | `CHANNEL_PROTOCOLS`             | none (comma-separated)  |
//! | `LOG_FORMAT`                    | `text` (or `json`)      |

use std::time::Duration;

use crate::domain::options::{DEFAULT_EVENT_CAPACITY, DEFAULT_RECONNECT_INTERVAL};
use crate::domain::{ChannelOptions, ConnectionAddress, Origin};
use crate::error::ChannelError;
use crate::transport::websocket::CONNECT_TIMEOUT_OPTION;

const DEFAULT_ORIGIN: &str = "http://localhost:8000";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Top-level channel configuration.
///
/// Loaded once at startup via [`ChannelConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Origin relative addresses are resolved against.
    pub origin: Origin,

    /// Address the binary listens on.
    pub address: ConnectionAddress,

    /// Options the facade is installed with.
    pub options: ChannelOptions,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,
}

impl ChannelConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set. Calls
    /// `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidOrigin`] if `CHANNEL_ORIGIN` is set
    /// but is not an `http(s)`/`ws(s)` URL, and
    /// [`ChannelError::InvalidConfig`] if `CHANNEL_ADDRESS` cannot be
    /// resolved against it.
    pub fn from_env() -> Result<Self, ChannelError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChannelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let origin_raw = lookup("CHANNEL_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        let origin = Origin::parse(&origin_raw)?;

        let address = lookup("CHANNEL_ADDRESS")
            .map(ConnectionAddress::from)
            .unwrap_or_default();
        address
            .resolve(&origin)
            .map_err(|e| ChannelError::InvalidConfig {
                key: "CHANNEL_ADDRESS",
                reason: e.to_string(),
            })?;

        let reconnect_interval = parse_var(
            &lookup,
            "CHANNEL_RECONNECT_INTERVAL_MS",
            u64::try_from(DEFAULT_RECONNECT_INTERVAL.as_millis()).unwrap_or(1_000),
        );
        let connect_timeout_ms = parse_var(
            &lookup,
            "CHANNEL_CONNECT_TIMEOUT_MS",
            DEFAULT_CONNECT_TIMEOUT_MS,
        );
        let protocols: Vec<String> = lookup("CHANNEL_PROTOCOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let options = ChannelOptions::default()
            .with_debug(parse_var_bool(&lookup, "CHANNEL_DEBUG", false))
            .with_reconnect_interval(Duration::from_millis(reconnect_interval))
            .with_event_capacity(parse_var(
                &lookup,
                "CHANNEL_EVENT_CAPACITY",
                DEFAULT_EVENT_CAPACITY,
            ))
            .with_protocols(protocols)
            .with_transport_option(CONNECT_TIMEOUT_OPTION, connect_timeout_ms);

        let json_logs = lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"));

        Ok(Self {
            origin,
            address,
            options,
            json_logs,
        })
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_var_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
