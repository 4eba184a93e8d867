//! Socket transport: one physical connection, reconnecting on drop.
//!
//! A [`Transport`] turns a resolved URL into a [`SocketHandle`]. The
//! connection itself runs on a background task and reports what happens
//! as a sequence of [`TransportSignal`]s, handed to a [`SignalSink`] on
//! that task the moment they occur. Drops are retried forever at a fixed
//! interval; only a clean close or an unrecoverable fault ends the
//! sequence.

pub mod memory;
pub mod websocket;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::domain::ChannelOptions;
use crate::error::ChannelError;

pub use memory::{MemorySocket, MemoryTransport};
pub use websocket::WsTransport;

/// What a live connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// First connection attempt started.
    Connecting,
    /// Handshake completed (initially or after a reconnect).
    Open,
    /// Connection dropped or failed; retry number `attempt` is scheduled.
    Reconnecting {
        /// Consecutive failed attempts since the last successful open.
        attempt: u32,
    },
    /// One inbound text frame.
    Message(String),
    /// The peer closed the connection cleanly. Terminal.
    Closed {
        /// WebSocket close code (1005 when the frame carried none).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The connection can never succeed. Terminal.
    Failed(String),
}

impl TransportSignal {
    /// Returns `true` if no signal follows this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed(_))
    }
}

/// Receives the signals of one connection.
///
/// `deliver` runs synchronously on whatever task produced the signal, so a
/// signal is fully handled before the transport reads the next frame. It
/// must not block.
pub trait SignalSink: Send + Sync + fmt::Debug + 'static {
    /// Handles one signal. Returns `false` once the owner stopped
    /// listening; the transport then winds the connection down.
    fn deliver(&self, signal: TransportSignal) -> bool;
}

impl SignalSink for mpsc::UnboundedSender<TransportSignal> {
    fn deliver(&self, signal: TransportSignal) -> bool {
        self.send(signal).is_ok()
    }
}

/// Connects to a channel endpoint.
///
/// Implementations must return immediately and report progress through
/// `sink`. Options the implementation does not understand are ignored.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a reconnecting connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NoRuntime`] if the implementation needs a
    /// Tokio runtime and none is running.
    fn connect(
        &self,
        url: &Url,
        protocols: &[String],
        options: &ChannelOptions,
        sink: Arc<dyn SignalSink>,
    ) -> Result<SocketHandle, ChannelError>;
}

/// Closes the connection it was created with.
///
/// Dropping the closer closes the connection as well.
#[derive(Debug)]
pub struct SocketCloser {
    shutdown: Option<oneshot::Sender<()>>,
}

impl SocketCloser {
    /// Wraps the shutdown side of a connection task.
    #[must_use]
    pub const fn new(shutdown: oneshot::Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// Asks the connection to close. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Returns `true` once `close` was called or the connection task ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.as_ref().is_none_or(oneshot::Sender::is_closed)
    }
}

/// A live, reconnecting connection.
#[derive(Debug)]
pub struct SocketHandle {
    url: Url,
    closer: SocketCloser,
}

impl SocketHandle {
    /// Assembles a handle from its parts.
    #[must_use]
    pub const fn new(url: Url, closer: SocketCloser) -> Self {
        Self { url, closer }
    }

    /// URL the connection targets.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Gives up the URL and keeps only the closer.
    #[must_use]
    pub fn into_closer(self) -> SocketCloser {
        self.closer
    }
}
