//! Channel error types.
//!
//! [`ChannelError`] is the central error type for the channel subsystem.
//! Transport-level failures never reach callers as errors: the reconnect
//! loop absorbs them. Only the variants below are surfaced, either as a
//! `Result` from a facade call or through [`crate::Observer::on_error`].

/// Channel-side error enum.
///
/// # Error categories
///
/// | Variant          | Raised by                      | Terminal for stream |
/// |------------------|--------------------------------|---------------------|
/// | `InvalidAddress` | `listen`, address resolution   | no                  |
/// | `InvalidOrigin`  | origin parsing, config         | no                  |
/// | `InvalidConfig`  | `ChannelConfig::from_env`      | no                  |
/// | `NotListening`   | `subscribe` before `listen`    | no                  |
/// | `NoRuntime`      | any call outside Tokio         | no                  |
/// | `Decode`         | malformed inbound frame        | yes                 |
/// | `Transport`      | unrecoverable transport fault  | yes                 |
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection address could not be resolved to a `ws(s)://` URL.
    #[error("invalid connection address `{address}`: {reason}")]
    InvalidAddress {
        /// Address as given by the caller.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The origin used to resolve relative addresses is malformed.
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// A configuration value could not be parsed.
    #[error("invalid configuration for {key}: {reason}")]
    InvalidConfig {
        /// Environment key that failed.
        key: &'static str,
        /// Parse failure detail.
        reason: String,
    },

    /// An inbound frame was not valid JSON. Ends the stream.
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The transport gave up on a connection that can never succeed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// `subscribe` was called before `listen` created a stream.
    #[error("channel is not listening; call listen() first")]
    NotListening,

    /// The call needs a Tokio runtime and none is running.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl ChannelError {
    /// Returns `true` if this error ends the event stream it was raised on.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Transport(_))
    }

    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}
