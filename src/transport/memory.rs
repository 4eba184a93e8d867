//! In-process transport driven by hand.
//!
//! [`MemoryTransport`] never touches the network. Each `connect` records
//! the call; the matching [`MemorySocket`] pushes signals straight into
//! the sink from the calling task. Useful for tests and for feeding a
//! channel from a non-WebSocket source.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use url::Url;

use super::{SignalSink, SocketCloser, SocketHandle, Transport, TransportSignal};
use crate::domain::ChannelOptions;
use crate::error::ChannelError;
use crate::sync::lock;

/// Transport whose connections are controlled through [`MemorySocket`]s.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sockets: Mutex<Vec<MemorySocket>>,
}

impl MemoryTransport {
    /// Creates a transport with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `connect` was called.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.sockets).len()
    }

    /// Controller of the `index`-th connection, oldest first.
    #[must_use]
    pub fn socket(&self, index: usize) -> Option<MemorySocket> {
        lock(&self.sockets).get(index).cloned()
    }

    /// Controller of the most recent connection.
    #[must_use]
    pub fn last_socket(&self) -> Option<MemorySocket> {
        lock(&self.sockets).last().cloned()
    }
}

impl Transport for MemoryTransport {
    fn connect(
        &self,
        url: &Url,
        protocols: &[String],
        options: &ChannelOptions,
        sink: Arc<dyn SignalSink>,
    ) -> Result<SocketHandle, ChannelError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let socket = MemorySocket {
            url: url.clone(),
            protocols: protocols.to_vec(),
            options: options.clone(),
            sink,
            shutdown: Arc::new(Mutex::new(shutdown_rx)),
        };
        let _ = socket.emit(TransportSignal::Connecting);
        lock(&self.sockets).push(socket);

        Ok(SocketHandle::new(url.clone(), SocketCloser::new(shutdown_tx)))
    }
}

/// Remote control for one in-memory connection.
///
/// Every emitting method runs the sink on the caller's task and returns
/// `false` once the owner stopped listening.
#[derive(Debug, Clone)]
pub struct MemorySocket {
    url: Url,
    protocols: Vec<String>,
    options: ChannelOptions,
    sink: Arc<dyn SignalSink>,
    shutdown: Arc<Mutex<oneshot::Receiver<()>>>,
}

impl MemorySocket {
    /// URL passed to `connect`.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Sub-protocols passed to `connect`.
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Options passed to `connect`.
    #[must_use]
    pub const fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Emits an arbitrary signal.
    pub fn emit(&self, signal: TransportSignal) -> bool {
        self.sink.deliver(signal)
    }

    /// Reports a completed handshake.
    pub fn open(&self) -> bool {
        self.emit(TransportSignal::Open)
    }

    /// Delivers one text frame.
    pub fn send_text(&self, frame: impl Into<String>) -> bool {
        self.emit(TransportSignal::Message(frame.into()))
    }

    /// Simulates an unexpected drop followed by a scheduled retry.
    pub fn drop_connection(&self, attempt: u32) -> bool {
        self.emit(TransportSignal::Reconnecting { attempt })
    }

    /// Simulates a clean close by the server.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportSignal::Closed {
            code,
            reason: reason.into(),
        })
    }

    /// Simulates an unrecoverable transport fault.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportSignal::Failed(reason.into()))
    }

    /// Returns `true` once the owner closed or dropped the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !matches!(
            lock(&self.shutdown).try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}
