//! Type-keyed subscription slots over one shared stream.
//!
//! Tracks which [`SubscriptionKey`]s currently hold a live subscription on
//! the channel's [`EventStream`]. Each key owns at most one handle; a
//! second `subscribe` on the same key cancels the first one.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::SubscriptionKey;
use crate::observer::Observer;
use crate::stream::{EventStream, SubscriptionHandle};
use crate::sync::lock;

/// Manages the keyed subscriptions of one channel.
///
/// The registry does not hold the stream; callers pass it to
/// [`Self::subscribe`]. Observers are never called while the registry is
/// locked, so they may subscribe or unsubscribe from inside a callback.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<SubscriptionKey, SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `observer` to `stream` under `key`.
    ///
    /// A handle already stored under `key` is cancelled before this
    /// returns. If it was still live this is logged as a warning, since
    /// the caller forgot to unsubscribe.
    pub fn subscribe(&self, stream: &EventStream, key: SubscriptionKey, observer: impl Observer) {
        self.insert(key, stream.subscribe(observer));
    }

    /// Stores `handle` under `key`, cancelling the handle it replaces.
    ///
    /// The replaced handle is cancelled after the registry lock is
    /// released, so its observer may still call into the registry while
    /// the cancel waits for it.
    pub fn insert(&self, key: SubscriptionKey, handle: SubscriptionHandle) {
        tracing::debug!(key = %key, subscription = %handle.id(), "subscribed");
        let previous = lock(&self.entries).insert(key.clone(), handle);

        if let Some(previous) = previous {
            if previous.is_active() {
                tracing::warn!(
                    key = %key,
                    subscription = %previous.id(),
                    "key re-subscribed without unsubscribe; cancelling previous subscription"
                );
            } else {
                tracing::debug!(key = %key, "replacing finished subscription");
            }
            previous.cancel();
        }
    }

    /// Cancels and removes the subscription under `key`.
    ///
    /// Returns `false` if there was none; that is not an error.
    pub fn unsubscribe(&self, key: &str) -> bool {
        let removed = lock(&self.entries).remove(key);
        match removed {
            Some(handle) => {
                handle.cancel();
                tracing::debug!(key, subscription = %handle.id(), "unsubscribed");
                true
            }
            None => {
                tracing::debug!(key, "unsubscribe for unknown key ignored");
                false
            }
        }
    }

    /// Cancels every subscription. Returns how many were removed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<SubscriptionHandle> = lock(&self.entries).drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.cancel();
        }
        drained.len()
    }

    /// Returns `true` if `key` holds a subscription (live or finished).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    /// Returns `true` if `key` holds a subscription that can still deliver.
    #[must_use]
    pub fn is_active(&self, key: &str) -> bool {
        lock(&self.entries)
            .get(key)
            .is_some_and(SubscriptionHandle::is_active)
    }

    /// Registered keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = lock(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` if no key is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}
