//! Lifecycle of the shared event stream.
//!
//! ```text
//! Uncreated ─listen─▶ Connecting ─▶ Open ⇄ Reconnecting
//!                                    │
//!                                    └──▶ Closed | Errored   (terminal)
//! ```
//!
//! Reconnects are invisible to subscribers; the state is exposed only to
//! callers that explicitly watch it.

use std::fmt;

use serde::Serialize;

/// State of the channel's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No stream exists yet (before the first `listen`, or after `reset`).
    #[default]
    Uncreated,
    /// First connection attempt in progress.
    Connecting,
    /// Socket is open and frames are flowing.
    Open,
    /// Connection dropped; the transport is retrying.
    Reconnecting,
    /// Stream completed after a clean close.
    Closed,
    /// Stream ended with an error (malformed frame or fatal transport fault).
    Errored,
}

impl ChannelState {
    /// Returns `true` once the stream can no longer deliver events.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Uncreated, Self::Connecting)
            | (Self::Connecting | Self::Reconnecting, Self::Open)
            | (Self::Connecting | Self::Open, Self::Reconnecting)
            | (Self::Reconnecting, Self::Reconnecting) => true,
            (Self::Closed | Self::Errored | Self::Uncreated, _) => false,
            (_, Self::Closed | Self::Errored) => true,
            _ => false,
        }
    }

    /// Lower-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uncreated => "uncreated",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
