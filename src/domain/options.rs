//! Channel options passed to the facade at construction time.
//!
//! Only a handful of keys are interpreted by the channel itself; every
//! other key lands in [`ChannelOptions::transport`] and is handed to the
//! transport unmodified.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1_000);

/// Default capacity of the multicast ring buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// Configuration record for a channel installation.
///
/// Deserializes from JSON such as
/// `{"debug": true, "reconnectInterval": 500, "connect_timeout_ms": 3000}`;
/// keys the channel does not know are kept in `transport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Enables verbose per-frame diagnostic logging.
    #[serde(default)]
    pub debug: bool,

    /// Delay before the transport retries a dropped connection.
    #[serde(
        rename = "reconnect_interval_ms",
        alias = "reconnectInterval",
        with = "duration_ms",
        default = "default_reconnect_interval"
    )]
    pub reconnect_interval: Duration,

    /// Ring buffer size of the multicast stream. Subscribers lagging more
    /// than this many events behind skip the oldest ones.
    #[serde(default = "default_event_capacity", alias = "eventCapacity")]
    pub event_capacity: usize,

    /// WebSocket sub-protocols requested on connect.
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Pass-through options for the transport.
    #[serde(flatten)]
    pub transport: Map<String, Value>,
}

impl ChannelOptions {
    /// Enables or disables verbose diagnostics.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the fixed reconnect interval.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the multicast buffer capacity. Zero is bumped to one.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Sets the requested WebSocket sub-protocols.
    #[must_use]
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a pass-through transport option.
    #[must_use]
    pub fn with_transport_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.transport.insert(key.into(), value.into());
        self
    }

    /// Reads a pass-through option as an unsigned integer.
    #[must_use]
    pub fn transport_u64(&self, key: &str) -> Option<u64> {
        self.transport.get(key).and_then(Value::as_u64)
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            debug: false,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            protocols: Vec::new(),
            transport: Map::new(),
        }
    }
}

const fn default_reconnect_interval() -> Duration {
    DEFAULT_RECONNECT_INTERVAL
}

const fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
