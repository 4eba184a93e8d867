//! Type-safe subscription key.
//!
//! [`SubscriptionKey`] names one logical subscriber area (e.g.
//! `"envelope"`, `"file_conversion"`) sharing the single channel.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of a slot in the [`crate::SubscriptionRegistry`].
///
/// At most one live subscription exists per key. Keys are plain strings
/// chosen by the caller; the newtype keeps them from being confused with
/// addresses or event names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Creates a key from anything string-like.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SubscriptionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&SubscriptionKey> for SubscriptionKey {
    fn from(key: &SubscriptionKey) -> Self {
        key.clone()
    }
}

impl Borrow<str> for SubscriptionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
