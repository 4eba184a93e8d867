//! Domain layer: addresses, options, events, lifecycle state.
//!
//! This module contains the value types shared by the transport, stream,
//! registry and facade layers: how an address is resolved against the
//! origin, the option record a channel is installed with, the decoded
//! domain event, the stream lifecycle, and the subscription key.

pub mod address;
pub mod channel_state;
pub mod event;
pub mod options;
pub mod subscription_key;

pub use address::{ConnectionAddress, Origin};
pub use channel_state::ChannelState;
pub use event::{DomainEvent, Notification, NotificationKind};
pub use options::ChannelOptions;
pub use subscription_key::SubscriptionKey;
