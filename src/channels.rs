//! Channel facade: the only surface application code talks to.
//!
//! [`Channels`] is built once at startup and cloned into every component
//! that needs real-time updates. All clones share one lazily created
//! [`EventStream`] (one physical socket) and one [`SubscriptionRegistry`].

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use url::Url;

use crate::domain::{ChannelOptions, ChannelState, ConnectionAddress, Origin, SubscriptionKey};
use crate::error::ChannelError;
use crate::observer::Observer;
use crate::registry::SubscriptionRegistry;
use crate::stream::EventStream;
use crate::sync::lock;
use crate::transport::{Transport, WsTransport};

/// Shared channel capability.
///
/// Cheap to clone. Only one physical channel exists per instance: once
/// [`Self::listen`] created the stream, further `listen` calls are ignored
/// until [`Self::reset`].
#[derive(Debug, Clone)]
pub struct Channels {
    inner: Arc<ChannelsInner>,
}

#[derive(Debug)]
struct ChannelsInner {
    origin: Origin,
    options: ChannelOptions,
    transport: Arc<dyn Transport>,
    stream: Mutex<Option<EventStream>>,
    registry: SubscriptionRegistry,
}

impl Channels {
    /// Creates a facade using the WebSocket transport.
    #[must_use]
    pub fn new(origin: Origin, options: ChannelOptions) -> Self {
        Self::with_transport(origin, options, Arc::new(WsTransport::new()))
    }

    /// Creates a facade using a custom transport.
    #[must_use]
    pub fn with_transport(
        origin: Origin,
        options: ChannelOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelsInner {
                origin,
                options,
                transport,
                stream: Mutex::new(None),
                registry: SubscriptionRegistry::new(),
            }),
        }
    }

    /// Starts listening on `address` unless a stream already exists.
    ///
    /// The first call resolves the address against the origin and opens
    /// the socket. Later calls do nothing, even with a different address.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidAddress`] if the address cannot be
    /// resolved, or [`ChannelError::NoRuntime`] outside a Tokio runtime.
    pub fn listen(&self, address: impl Into<ConnectionAddress>) -> Result<(), ChannelError> {
        let address = address.into();
        let mut slot = lock(&self.inner.stream);

        if let Some(existing) = slot.as_ref() {
            match address.resolve(&self.inner.origin) {
                Ok(url) if url != *existing.url() => tracing::warn!(
                    requested = %url,
                    active = %existing.url(),
                    "already listening on another address; only one channel is supported"
                ),
                _ => tracing::debug!(active = %existing.url(), "already listening"),
            }
            return Ok(());
        }

        let url = address.resolve(&self.inner.origin)?;
        let stream = EventStream::from_socket(self.inner.transport.as_ref(), url, &self.inner.options)?;
        tracing::info!(url = %stream.url(), debug = self.inner.options.debug, "channel listening");
        *slot = Some(stream);
        Ok(())
    }

    /// Subscribes `observer` under `key`, replacing any subscription
    /// already stored there.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotListening`] if [`Self::listen`] has not
    /// been called (or the channel was reset since).
    pub fn subscribe(
        &self,
        observer: impl Observer,
        key: impl Into<SubscriptionKey>,
    ) -> Result<(), ChannelError> {
        let handle = {
            let slot = lock(&self.inner.stream);
            let Some(stream) = slot.as_ref() else {
                return Err(ChannelError::NotListening);
            };
            stream.subscribe(observer)
        };
        self.inner.registry.insert(key.into(), handle);
        Ok(())
    }

    /// Cancels the subscription under `key`. Unknown keys are ignored.
    ///
    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, key: &str) -> bool {
        self.inner.registry.unsubscribe(key)
    }

    /// Cancels every subscription and closes the stream so that the next
    /// [`Self::listen`] starts over.
    ///
    /// Returns `true` if a stream existed.
    pub fn reset(&self) -> bool {
        let stream = lock(&self.inner.stream).take();
        let cancelled = self.inner.registry.cancel_all();
        match stream {
            Some(stream) => {
                tracing::info!(url = %stream.url(), cancelled, "channel reset");
                true
            }
            None => false,
        }
    }

    /// Lifecycle state of the current stream.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        lock(&self.inner.stream)
            .as_ref()
            .map_or(ChannelState::Uncreated, EventStream::state)
    }

    /// Watches the current stream's state, including silent reconnects.
    ///
    /// Returns `None` before `listen`. The receiver belongs to the current
    /// stream and stops updating after a reset.
    #[must_use]
    pub fn state_changes(&self) -> Option<watch::Receiver<ChannelState>> {
        lock(&self.inner.stream)
            .as_ref()
            .map(EventStream::state_changes)
    }

    /// Returns `true` if a stream exists.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        lock(&self.inner.stream).is_some()
    }

    /// URL of the current stream.
    #[must_use]
    pub fn url(&self) -> Option<Url> {
        lock(&self.inner.stream)
            .as_ref()
            .map(|stream| stream.url().clone())
    }

    /// Returns `true` if `key` holds a subscription.
    #[must_use]
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.inner.registry.contains(key)
    }

    /// Registered subscription keys, sorted.
    #[must_use]
    pub fn subscription_keys(&self) -> Vec<SubscriptionKey> {
        self.inner.registry.keys()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Origin relative addresses are resolved against.
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Options the channel was installed with.
    #[must_use]
    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn channels() -> (Channels, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let channels = Channels::with_transport(
            Origin::new("reportek.example", true),
            ChannelOptions::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        (channels, transport)
    }

    #[tokio::test]
    async fn listen_is_idempotent() {
        let (channels, transport) = channels();
        assert_eq!(channels.state(), ChannelState::Uncreated);

        assert!(channels.listen("/ws/envelopes/16").is_ok());
        assert!(channels.listen("/ws/envelopes/16").is_ok());
        assert!(channels.listen("/ws/envelopes/99").is_ok());

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(
            channels.url().map(|u| u.to_string()),
            Some("wss://reportek.example/ws/envelopes/16".to_string())
        );
        assert_eq!(channels.state(), ChannelState::Connecting);
    }

    #[tokio::test]
    async fn subscribe_before_listen_fails() {
        let (channels, _transport) = channels();
        let result = channels.subscribe(|_: &crate::DomainEvent| {}, "envelope");
        assert!(matches!(result, Err(ChannelError::NotListening)));
        assert_eq!(channels.subscription_count(), 0);
    }

    #[tokio::test]
    async fn invalid_address_creates_nothing() {
        let (channels, transport) = channels();
        let result = channels.listen("gopher://host/");
        assert!(matches!(result, Err(ChannelError::InvalidAddress { .. })));
        assert!(!channels.is_listening());
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn unset_address_uses_origin() {
        let (channels, transport) = channels();
        assert!(channels.listen(ConnectionAddress::Unset).is_ok());
        let Some(socket) = transport.last_socket() else {
            panic!("socket recorded");
        };
        assert_eq!(socket.url().as_str(), "wss://reportek.example/");
    }

    #[tokio::test]
    async fn reset_allows_fresh_listen() {
        let (channels, transport) = channels();
        assert!(channels.listen("/ws/envelopes/1").is_ok());
        assert!(
            channels
                .subscribe(|_: &crate::DomainEvent| {}, "envelope")
                .is_ok()
        );
        let Some(first) = transport.last_socket() else {
            panic!("socket recorded");
        };

        assert!(channels.reset());
        assert!(first.is_closed());
        assert_eq!(channels.subscription_count(), 0);
        assert_eq!(channels.state(), ChannelState::Uncreated);
        assert!(!channels.reset());

        assert!(channels.listen("/ws/envelopes/2").is_ok());
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(
            channels.url().map(|u| u.path().to_string()),
            Some("/ws/envelopes/2".to_string())
        );
    }

    #[tokio::test]
    async fn clones_share_one_channel() {
        let (channels, transport) = channels();
        let view = channels.clone();
        assert!(channels.listen("/ws/envelopes/3").is_ok());
        assert!(view.listen("/ws/envelopes/3").is_ok());
        assert!(view.subscribe(|_: &crate::DomainEvent| {}, "envelope").is_ok());

        assert_eq!(transport.connect_count(), 1);
        assert!(channels.is_subscribed("envelope"));
        assert!(channels.unsubscribe("envelope"));
        assert!(!view.unsubscribe("envelope"));
    }
}
