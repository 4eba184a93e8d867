//! tokio-tungstenite transport with a fixed-interval reconnect loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{SignalSink, SocketCloser, SocketHandle, Transport, TransportSignal};
use crate::domain::ChannelOptions;
use crate::error::ChannelError;

/// Pass-through option: handshake timeout in milliseconds.
pub const CONNECT_TIMEOUT_OPTION: &str = "connect_timeout_ms";

/// Pass-through option: largest accepted inbound message in bytes.
pub const MAX_MESSAGE_SIZE_OPTION: &str = "max_message_size";

/// Close code reported when the peer's Close frame carried no status.
const NO_STATUS_CODE: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by `tokio-tungstenite`.
///
/// Every `connect` spawns one task that owns one socket at a time.
/// Handshake failures, I/O errors and streams ending without a Close frame
/// are retried after `reconnect_interval`, with no attempt ceiling. A Close
/// frame from the server ends the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn connect(
        &self,
        url: &Url,
        protocols: &[String],
        options: &ChannelOptions,
        sink: Arc<dyn SignalSink>,
    ) -> Result<SocketHandle, ChannelError> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        let settings = SocketSettings::new(url, protocols, options);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        runtime.spawn(run_socket(settings, sink, shutdown_rx));

        Ok(SocketHandle::new(url.clone(), SocketCloser::new(shutdown_tx)))
    }
}

/// Everything the connection task needs, resolved once.
#[derive(Debug, Clone)]
struct SocketSettings {
    url: String,
    protocols: Vec<String>,
    reconnect_interval: Duration,
    connect_timeout: Option<Duration>,
    max_message_size: Option<usize>,
    debug: bool,
}

impl SocketSettings {
    fn new(url: &Url, protocols: &[String], options: &ChannelOptions) -> Self {
        if options.debug {
            for key in options.transport.keys() {
                if key != CONNECT_TIMEOUT_OPTION && key != MAX_MESSAGE_SIZE_OPTION {
                    tracing::debug!(option = %key, "ignoring transport option");
                }
            }
        }

        Self {
            url: url.to_string(),
            protocols: protocols.to_vec(),
            reconnect_interval: options.reconnect_interval,
            connect_timeout: options
                .transport_u64(CONNECT_TIMEOUT_OPTION)
                .map(Duration::from_millis),
            max_message_size: options
                .transport_u64(MAX_MESSAGE_SIZE_OPTION)
                .and_then(|n| usize::try_from(n).ok()),
            debug: options.debug,
        }
    }

    fn request(&self) -> Result<Request, String> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| e.to_string())?;
        if !self.protocols.is_empty() {
            let value = HeaderValue::from_str(&self.protocols.join(", "))
                .map_err(|e| format!("invalid sub-protocol list: {e}"))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        Ok(request)
    }

    fn websocket_config(&self) -> Option<WebSocketConfig> {
        self.max_message_size
            .map(|max| WebSocketConfig::default().max_message_size(Some(max)))
    }
}

/// How one connected session ended.
enum SessionEnd {
    /// Owner asked to close, or stopped listening.
    Shutdown,
    /// Peer sent a Close frame.
    Closed,
    /// Connection broke; worth retrying.
    Dropped(String),
}

/// Connection task: connect, pump frames, reconnect, repeat.
async fn run_socket(
    settings: SocketSettings,
    sink: Arc<dyn SignalSink>,
    mut shutdown: oneshot::Receiver<()>,
) {
    if !sink.deliver(TransportSignal::Connecting) {
        return;
    }

    let mut attempt: u32 = 0;
    loop {
        let request = match settings.request() {
            Ok(request) => request,
            Err(reason) => {
                tracing::error!(url = %settings.url, %reason, "cannot build websocket request");
                let _ = sink.deliver(TransportSignal::Failed(reason));
                return;
            }
        };

        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = open(request, &settings) => result,
        };

        match connected {
            Ok(ws) => {
                attempt = 0;
                tracing::info!(url = %settings.url, "channel socket open");
                if !sink.deliver(TransportSignal::Open) {
                    return;
                }
                match pump_frames(ws, sink.as_ref(), &mut shutdown, settings.debug).await {
                    SessionEnd::Shutdown | SessionEnd::Closed => return,
                    SessionEnd::Dropped(reason) => {
                        tracing::warn!(url = %settings.url, %reason, "channel socket dropped");
                    }
                }
            }
            Err(reason) => {
                tracing::warn!(url = %settings.url, attempt, %reason, "channel connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        if !sink.deliver(TransportSignal::Reconnecting { attempt }) {
            return;
        }
        tracing::debug!(
            url = %settings.url,
            attempt,
            delay_ms = u64::try_from(settings.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );

        tokio::select! {
            _ = &mut shutdown => return,
            () = tokio::time::sleep(settings.reconnect_interval) => {}
        }
    }
}

/// Performs one handshake, honoring the optional connect timeout.
async fn open(request: Request, settings: &SocketSettings) -> Result<WsStream, String> {
    let handshake =
        tokio_tungstenite::connect_async_with_config(request, settings.websocket_config(), false);

    let result = match settings.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| format!("handshake timed out after {} ms", limit.as_millis()))?,
        None => handshake.await,
    };

    result.map(|(ws, _response)| ws).map_err(|e| e.to_string())
}

/// Forwards frames until the session ends.
async fn pump_frames(
    ws: WsStream,
    sink: &dyn SignalSink,
    shutdown: &mut oneshot::Receiver<()>,
    debug: bool,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                if ws_tx.send(Message::Close(None)).await.is_err() {
                    tracing::debug!("close frame not delivered");
                }
                tracing::info!("channel socket closed by owner");
                return SessionEnd::Shutdown;
            }
            frame = ws_rx.next() => {
                let signal = match frame {
                    Some(Ok(Message::Text(text))) => TransportSignal::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => {
                        TransportSignal::Message(String::from_utf8_lossy(&data).into_owned())
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((NO_STATUS_CODE, String::new()), |f| {
                            (u16::from(f.code), f.reason.as_str().to_owned())
                        });
                        tracing::info!(code, %reason, "channel socket closed by server");
                        // Flushes the Close reply tungstenite queued.
                        if let Err(e) = ws_tx.close().await {
                            tracing::debug!(error = %e, "close reply not delivered");
                        }
                        let _ = sink.deliver(TransportSignal::Closed { code, reason });
                        return SessionEnd::Closed;
                    }
                    // Pings are answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("stream ended without close frame".to_string()),
                };

                if debug && let TransportSignal::Message(text) = &signal {
                    tracing::debug!(bytes = text.len(), "frame received");
                }
                if !sink.deliver(signal) {
                    if ws_tx.send(Message::Close(None)).await.is_err() {
                        tracing::debug!("close frame not delivered");
                    }
                    tracing::info!("channel socket released by owner");
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
