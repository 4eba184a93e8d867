//! Observer callbacks attached to the event stream.
//!
//! Any `Fn(&DomainEvent)` closure is an [`Observer`]. Implement the trait
//! on a type to also receive the terminal error or completion signal, or
//! use [`channel_observer`] to turn deliveries into an async receiver.

use tokio::sync::mpsc;

use crate::domain::DomainEvent;
use crate::error::ChannelError;

/// Receives events from one subscription.
///
/// Callbacks run on the subscription's delivery task, one at a time and in
/// frame order. They may call back into [`crate::Channels`] to subscribe or
/// unsubscribe any key, including their own. After `on_error` or
/// `on_complete` nothing else is delivered.
///
/// Each subscription buffers up to `ChannelOptions::event_capacity`
/// events. An observer that falls further behind skips the oldest
/// buffered events and a warning is logged; it then continues in order
/// with the events still buffered.
pub trait Observer: Send + Sync + 'static {
    /// Called for every event published after the subscription started.
    fn on_next(&self, event: &DomainEvent);

    /// Called once if the stream ends with an error.
    fn on_error(&self, error: &ChannelError) {
        let _ = error;
    }

    /// Called once if the stream completes cleanly.
    fn on_complete(&self) {}
}

impl<F> Observer for F
where
    F: Fn(&DomainEvent) + Send + Sync + 'static,
{
    fn on_next(&self, event: &DomainEvent) {
        self(event);
    }
}

/// One delivery as seen through a [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A domain event.
    Event(DomainEvent),
    /// The stream failed; carries the rendered error.
    Error(String),
    /// The stream completed.
    Complete,
}

/// Observer forwarding every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Observer for ChannelObserver {
    fn on_next(&self, event: &DomainEvent) {
        let _ = self.tx.send(Delivery::Event(event.clone()));
    }

    fn on_error(&self, error: &ChannelError) {
        let _ = self.tx.send(Delivery::Error(error.to_string()));
    }

    fn on_complete(&self) {
        let _ = self.tx.send(Delivery::Complete);
    }
}

/// Creates an observer and the receiver its deliveries arrive on.
#[must_use]
pub fn channel_observer() -> (ChannelObserver, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelObserver { tx }, rx)
}
