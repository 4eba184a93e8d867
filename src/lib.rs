//! # reportek-channels
//!
//! Real-time channel client for the Reportek envelope workflow.
//!
//! One reconnecting WebSocket connection is decoded into a hot, multicast
//! stream of JSON domain events and fanned out to named subscriptions.
//! Application code only sees the [`Channels`] facade: `listen` once,
//! then `subscribe(observer, key)` / `unsubscribe(key)` per feature area.
//!
//! ## Architecture
//!
//! ```text
//! Application components (cloned Channels)
//!     │
//!     ├── Channels facade (channels/)
//!     │
//!     ├── SubscriptionRegistry (registry/)   key → SubscriptionHandle
//!     ├── EventStream (stream/)              broadcast fan-out, JSON decode
//!     │
//!     └── Transport (transport/)             tungstenite, reconnect loop
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use reportek_channels::{ChannelOptions, Channels, ConnectionAddress, DomainEvent, Origin};
//!
//! # async fn run() -> Result<(), reportek_channels::ChannelError> {
//! let channels = Channels::new(Origin::parse("https://reportek.example")?, ChannelOptions::default());
//! channels.listen(ConnectionAddress::envelope(16))?;
//! channels.subscribe(
//!     |event: &DomainEvent| println!("{}", event.payload()),
//!     "envelope",
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod config;
pub mod domain;
pub mod error;
pub mod observer;
pub mod registry;
pub mod stream;
pub mod transport;

mod sync;

pub use channels::Channels;
pub use config::ChannelConfig;
pub use domain::{
    ChannelOptions, ChannelState, ConnectionAddress, DomainEvent, Notification, NotificationKind,
    Origin, SubscriptionKey,
};
pub use error::ChannelError;
pub use observer::{ChannelObserver, Delivery, Observer, channel_observer};
pub use registry::SubscriptionRegistry;
pub use stream::{EventStream, SubscriptionHandle};
pub use transport::{
    MemorySocket, MemoryTransport, SignalSink, Transport, TransportSignal, WsTransport,
};
