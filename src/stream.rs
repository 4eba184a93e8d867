//! Hot multicast stream of decoded domain events.
//!
//! [`EventStream`] owns exactly one transport connection. Every inbound
//! frame is decoded and published on a [`tokio::sync::broadcast`] channel
//! from the transport's own task, as soon as it arrives; each subscription
//! reads its own receiver on its own delivery task. Nothing is replayed: a
//! subscriber sees only frames received after it attached.
//!
//! A malformed frame, a clean close or a fatal transport fault ends the
//! stream for every current subscriber and closes the socket. Subscribers
//! arriving later receive that terminal signal immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::domain::{ChannelOptions, ChannelState, DomainEvent};
use crate::error::ChannelError;
use crate::observer::Observer;
use crate::sync::lock;
use crate::transport::{SignalSink, SocketCloser, Transport, TransportSignal};

tokio::task_local! {
    /// Subscription whose callback is running on the current task.
    static DELIVERING: Uuid;
}

/// Item travelling over the broadcast channel.
#[derive(Debug, Clone)]
enum StreamItem {
    Event(DomainEvent),
    Error(Arc<ChannelError>),
    Complete,
}

/// State shared between the stream handle and the transport sink.
#[derive(Debug)]
struct StreamShared {
    sender: broadcast::Sender<StreamItem>,
    /// Set once; guards the race between finishing and late subscribers.
    terminal: Mutex<Option<StreamItem>>,
    state: watch::Sender<ChannelState>,
    closer: Mutex<Option<SocketCloser>>,
    debug: bool,
}

impl StreamShared {
    /// Applies one transport signal. Returns `false` once the stream ended.
    fn handle(&self, signal: TransportSignal) -> bool {
        match signal {
            TransportSignal::Connecting => self.set_state(ChannelState::Connecting),
            TransportSignal::Open => self.set_state(ChannelState::Open),
            TransportSignal::Reconnecting { attempt } => {
                if self.debug {
                    tracing::debug!(attempt, "stream waiting for reconnect");
                }
                self.set_state(ChannelState::Reconnecting);
            }
            TransportSignal::Message(frame) => match DomainEvent::decode(&frame) {
                Ok(event) => self.publish(event),
                Err(err) => {
                    tracing::warn!(error = %err, "malformed frame; ending event stream");
                    self.finish(StreamItem::Error(Arc::new(err)), ChannelState::Errored);
                }
            },
            TransportSignal::Closed { code, reason } => {
                tracing::info!(code, %reason, "event stream completed");
                self.finish(StreamItem::Complete, ChannelState::Closed);
            }
            TransportSignal::Failed(reason) => {
                tracing::error!(%reason, "transport failed; ending event stream");
                self.finish(
                    StreamItem::Error(Arc::new(ChannelError::Transport(reason))),
                    ChannelState::Errored,
                );
            }
        }
        !self.is_finished()
    }

    fn publish(&self, event: DomainEvent) {
        if self.is_finished() {
            return;
        }
        // No receivers means nobody is listening; the event is dropped.
        let delivered = self.sender.send(StreamItem::Event(event)).unwrap_or(0);
        if self.debug {
            tracing::debug!(listeners = delivered, "event published");
        }
    }

    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if *current != next && current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(state = %next, "channel state changed");
        }
    }

    fn finish(&self, item: StreamItem, state: ChannelState) {
        {
            let mut terminal = lock(&self.terminal);
            if terminal.is_some() {
                return;
            }
            *terminal = Some(item.clone());
            let _ = self.sender.send(item);
            self.set_state(state);
        }
        self.close_socket();
    }

    fn is_finished(&self) -> bool {
        lock(&self.terminal).is_some()
    }

    fn close_socket(&self) {
        if let Some(mut closer) = lock(&self.closer).take() {
            closer.close();
        }
    }
}

/// Sink handed to the transport. Holds the stream weakly so that dropping
/// the [`EventStream`] ends every delivery task.
#[derive(Debug)]
struct StreamSink {
    shared: Weak<StreamShared>,
}

impl SignalSink for StreamSink {
    fn deliver(&self, signal: TransportSignal) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.handle(signal))
    }
}

/// Decoded, multicast view of one socket.
#[derive(Debug)]
pub struct EventStream {
    url: Url,
    shared: Arc<StreamShared>,
    runtime: Handle,
}

impl EventStream {
    /// Connects `transport` to `url` and starts decoding its frames.
    ///
    /// Exactly one `Transport::connect` call is made.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NoRuntime`] outside a Tokio runtime, or any
    /// error the transport reports from `connect`.
    pub fn from_socket(
        transport: &dyn Transport,
        url: Url,
        options: &ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let (sender, _) = broadcast::channel(options.event_capacity.max(1));
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(StreamShared {
            sender,
            terminal: Mutex::new(None),
            state,
            closer: Mutex::new(None),
            debug: options.debug,
        });

        let sink = Arc::new(StreamSink {
            shared: Arc::downgrade(&shared),
        });
        let mut closer = transport
            .connect(&url, &options.protocols, options, sink)?
            .into_closer();
        {
            let mut slot = lock(&shared.closer);
            if shared.is_finished() {
                // Ended during connect; `finish` found no closer to use.
                closer.close();
            } else {
                *slot = Some(closer);
            }
        }
        tracing::debug!(url = %url, "event stream created");

        Ok(Self {
            url,
            shared,
            runtime,
        })
    }

    /// Attaches `observer`; it receives every event received from now on.
    ///
    /// If the stream already ended, the observer gets the terminal signal
    /// right away.
    pub fn subscribe(&self, observer: impl Observer) -> SubscriptionHandle {
        self.subscribe_shared(Arc::new(observer))
    }

    /// Same as [`Self::subscribe`] for an observer that is already shared.
    pub fn subscribe_shared(&self, observer: Arc<dyn Observer>) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let gate = Arc::new(Gate::default());

        let source = {
            let terminal = lock(&self.shared.terminal);
            match terminal.as_ref() {
                Some(item) => Source::Finished(item.clone()),
                None => Source::Live(self.shared.sender.subscribe()),
            }
        };

        let task = self
            .runtime
            .spawn(deliver(id, source, observer, Arc::clone(&gate)));
        if self.shared.debug {
            tracing::debug!(subscription = %id, url = %self.url, "listener attached");
        }

        SubscriptionHandle { id, gate, task }
    }

    /// Resolved URL of the underlying socket.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change, reconnects included.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Returns `true` once the stream completed or errored.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.is_finished()
    }

    /// Number of attached, not yet finished listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.sender.receiver_count()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shared.close_socket();
    }
}

/// Per-subscription delivery gate.
///
/// A callback only starts while `running` is held and `active` is set, so
/// once `cancel` has cleared the flag and acquired `running`, no callback
/// is in flight and none will start.
#[derive(Debug)]
struct Gate {
    active: AtomicBool,
    running: Mutex<()>,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(true),
            running: Mutex::new(()),
        }
    }
}

impl Gate {
    fn is_open(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Runs `callback` unless the gate was closed. Returns `false` if it
    /// was.
    fn run(&self, id: Uuid, callback: impl FnOnce()) -> bool {
        let _running = lock(&self.running);
        if !self.is_open() {
            return false;
        }
        DELIVERING.sync_scope(id, callback);
        true
    }
}

/// Cancellable registration of one observer on an [`EventStream`].
///
/// Dropping the handle cancels it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Uuid,
    gate: Arc<Gate>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Unique id, used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns `true` while the observer can still receive deliveries.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gate.is_open() && !self.task.is_finished()
    }

    /// Stops delivery.
    ///
    /// When called outside an observer callback this waits for a callback
    /// already running on this subscription, so none is in flight once it
    /// returns. From inside a callback it only prevents further calls.
    pub fn cancel(&self) {
        self.gate.active.store(false, Ordering::Release);
        self.task.abort();
        if DELIVERING.try_with(|_| ()).is_err() {
            drop(lock(&self.gate.running));
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

enum Source {
    Live(broadcast::Receiver<StreamItem>),
    Finished(StreamItem),
}

async fn deliver(id: Uuid, source: Source, observer: Arc<dyn Observer>, gate: Arc<Gate>) {
    let mut rx = match source {
        Source::Live(rx) => rx,
        Source::Finished(item) => {
            finish_observer(id, &item, observer.as_ref(), &gate);
            return;
        }
    };

    loop {
        match rx.recv().await {
            Ok(StreamItem::Event(event)) => {
                if !gate.run(id, || observer.on_next(&event)) {
                    return;
                }
            }
            Ok(item) => {
                finish_observer(id, &item, observer.as_ref(), &gate);
                return;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(subscription = %id, skipped, "subscriber lagged behind event stream");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn finish_observer(id: Uuid, item: &StreamItem, observer: &dyn Observer, gate: &Gate) {
    gate.run(id, || match item {
        StreamItem::Error(err) => observer.on_error(err),
        StreamItem::Complete => observer.on_complete(),
        StreamItem::Event(_) => {}
    });
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    use super::*;
    use crate::observer::{Delivery, channel_observer};
    use crate::transport::{MemorySocket, MemoryTransport};

    fn stream_on(transport: &MemoryTransport) -> (EventStream, MemorySocket) {
        let Ok(url) = Url::parse("wss://host/ws/envelopes/16") else {
            panic!("valid url");
        };
        let Ok(stream) = EventStream::from_socket(transport, url, &ChannelOptions::default())
        else {
            panic!("stream should start");
        };
        let Some(socket) = transport.last_socket() else {
            panic!("socket recorded");
        };
        (stream, socket)
    }

    async fn next(rx: &mut UnboundedReceiver<Delivery>) -> Delivery {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => panic!("observer dropped"),
            Err(_) => panic!("timed out waiting for delivery"),
        }
    }

    fn event_type(delivery: &Delivery) -> Option<&str> {
        match delivery {
            Delivery::Event(event) => event.str_field("type"),
            _ => None,
        }
    }

    async fn wait_for_state(stream: &EventStream, wanted: ChannelState) {
        let mut changes = stream.state_changes();
        let result = timeout(Duration::from_secs(2), changes.wait_for(|s| *s == wanted)).await;
        assert!(matches!(result, Ok(Ok(_))), "state never became {wanted}");
    }

    #[tokio::test]
    async fn from_socket_connects_once() {
        let transport = MemoryTransport::new();
        let (stream, _socket) = stream_on(&transport);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(stream.url().as_str(), "wss://host/ws/envelopes/16");
        assert_eq!(stream.state(), ChannelState::Connecting);
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_later_events() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (early, mut early_rx) = channel_observer();
        let _early = stream.subscribe(early);

        socket.send_text(r#"{"type":"a"}"#);
        socket.send_text(r#"{"type":"b"}"#);
        let (late, mut late_rx) = channel_observer();
        let _late = stream.subscribe(late);
        socket.send_text(r#"{"type":"c"}"#);

        for expected in ["a", "b", "c"] {
            assert_eq!(event_type(&next(&mut early_rx).await), Some(expected));
        }
        assert_eq!(event_type(&next(&mut late_rx).await), Some("c"));
        tokio::task::yield_now().await;
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn frames_without_listeners_are_dropped() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        socket.send_text(r#"{"type":"unheard"}"#);

        let (observer, mut rx) = channel_observer();
        let _handle = stream.subscribe(observer);
        socket.send_text(r#"{"type":"heard"}"#);
        assert_eq!(event_type(&next(&mut rx).await), Some("heard"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_callback_runs_after_cancel_returns() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let stop = Arc::clone(&stop);
            let socket = socket.clone();
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    socket.send_text(r#"{"type":"tick"}"#);
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let cancelled = Arc::new(AtomicBool::new(false));
            let late_calls = Arc::new(AtomicUsize::new(0));
            let observer = {
                let cancelled = Arc::clone(&cancelled);
                let late_calls = Arc::clone(&late_calls);
                move |_: &DomainEvent| {
                    std::hint::spin_loop();
                    if cancelled.load(Ordering::SeqCst) {
                        late_calls.fetch_add(1, Ordering::SeqCst);
                    }
                }
            };
            let handle = stream.subscribe(observer);
            tokio::task::yield_now().await;
            handle.cancel();
            cancelled.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        }

        stop.store(true, Ordering::SeqCst);
        assert!(producer.await.is_ok());
    }

    #[tokio::test]
    async fn dropping_stream_ends_delivery() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (observer, mut rx) = channel_observer();
        let _handle = stream.subscribe(observer);

        drop(stream);
        assert!(!socket.send_text(r#"{"type":"ghost"}"#));
        let result = timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn malformed_frame_errors_every_listener() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (first, mut first_rx) = channel_observer();
        let (second, mut second_rx) = channel_observer();
        let _first = stream.subscribe(first);
        let _second = stream.subscribe(second);

        socket.send_text("not json");
        socket.send_text(r#"{"type":"after"}"#);

        for rx in [&mut first_rx, &mut second_rx] {
            let Delivery::Error(reason) = next(rx).await else {
                panic!("expected error delivery");
            };
            assert!(reason.starts_with("malformed frame"));
        }
        wait_for_state(&stream, ChannelState::Errored).await;
        assert!(stream.is_terminated());
        assert!(socket.is_closed());

        tokio::task::yield_now().await;
        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clean_close_completes_and_late_subscriber_is_told() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (observer, mut rx) = channel_observer();
        let _handle = stream.subscribe(observer);

        socket.open();
        socket.close(1000, "bye");
        assert_eq!(next(&mut rx).await, Delivery::Complete);
        wait_for_state(&stream, ChannelState::Closed).await;

        let (late, mut late_rx) = channel_observer();
        let _late = stream.subscribe(late);
        assert_eq!(next(&mut late_rx).await, Delivery::Complete);
    }

    #[tokio::test]
    async fn transport_failure_errors_stream() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (observer, mut rx) = channel_observer();
        let _handle = stream.subscribe(observer);

        socket.fail("handshake rejected");
        assert_eq!(
            next(&mut rx).await,
            Delivery::Error("transport failure: handshake rejected".to_string())
        );
        wait_for_state(&stream, ChannelState::Errored).await;
    }

    #[tokio::test]
    async fn reconnect_is_silent_for_subscribers() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (observer, mut rx) = channel_observer();
        let _handle = stream.subscribe(observer);

        socket.open();
        wait_for_state(&stream, ChannelState::Open).await;
        socket.drop_connection(1);
        wait_for_state(&stream, ChannelState::Reconnecting).await;
        socket.open();
        socket.send_text(r#"{"type":"after-reconnect"}"#);

        assert_eq!(event_type(&next(&mut rx).await), Some("after-reconnect"));
        assert_eq!(stream.state(), ChannelState::Open);
        assert!(!stream.is_terminated());
    }

    #[tokio::test]
    async fn cancelled_handle_receives_nothing() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        let (cancelled, mut cancelled_rx) = channel_observer();
        let (witness, mut witness_rx) = channel_observer();
        let handle = stream.subscribe(cancelled);
        let _witness = stream.subscribe(witness);

        assert!(handle.is_active());
        handle.cancel();
        assert!(!handle.is_active());

        socket.send_text(r#"{"type":"a"}"#);
        assert_eq!(event_type(&next(&mut witness_rx).await), Some("a"));
        tokio::task::yield_now().await;
        assert!(cancelled_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_stream_closes_socket() {
        let transport = MemoryTransport::new();
        let (stream, socket) = stream_on(&transport);
        assert!(!socket.is_closed());
        drop(stream);
        assert!(socket.is_closed());
    }

    #[test]
    fn from_socket_needs_runtime() {
        let transport = MemoryTransport::new();
        let Ok(url) = Url::parse("ws://host/") else {
            panic!("valid url");
        };
        let result = EventStream::from_socket(&transport, url, &ChannelOptions::default());
        assert!(matches!(result, Err(ChannelError::NoRuntime)));
        assert_eq!(transport.connect_count(), 0);
    }
}
