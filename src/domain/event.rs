//! Domain events decoded from inbound channel frames.
//!
//! The channel treats payloads as opaque JSON. [`DomainEvent::notification`]
//! offers an optional typed view for the server's envelope notifications,
//! which are shaped as `{"event": "<name>", "data": <any>}`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// One decoded inbound frame.
///
/// Cheap to clone: the payload is shared behind an [`Arc`] so that every
/// multicast listener sees the same allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    payload: Arc<Value>,
    received_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Wraps an already-decoded payload, stamped with the current time.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload: Arc::new(payload),
            received_at: Utc::now(),
        }
    }

    /// Parses one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decode`] if the frame is not a JSON document.
    pub fn decode(frame: &str) -> Result<Self, ChannelError> {
        Ok(Self::new(serde_json::from_str(frame)?))
    }

    /// Raw JSON payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Local time at which the frame was decoded.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Shortcut for a top-level string field of an object payload.
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Interprets the payload as a server notification, if it has that shape.
    #[must_use]
    pub fn notification(&self) -> Option<Notification> {
        Notification::deserialize(self.payload.as_ref()).ok()
    }
}

/// Event names the envelope channel emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Connection details sent right after the server accepts the socket.
    System,
    /// The envelope workflow moved to a new state.
    EnteredState,
    /// A file was added to the envelope.
    AddedFile,
    /// A file's metadata or content changed.
    ChangedFile,
    /// A file was removed.
    DeletedFile,
    /// An original (pre-conversion) file was added.
    AddedOriginalFile,
    /// An original file changed.
    ChangedOriginalFile,
    /// An original file was removed.
    DeletedOriginalFile,
    /// A support file was added.
    AddedSupportFile,
    /// A support file changed.
    ChangedSupportFile,
    /// A support file was removed.
    DeletedSupportFile,
    /// Feedback from an automatic QA script arrived.
    ReceivedAutoQaFeedback,
    /// All automatic QA scripts finished.
    CompletedAutoQa,
    /// Any event name this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl NotificationKind {
    /// Returns `true` for events touching any kind of envelope file.
    #[must_use]
    pub const fn is_file_event(self) -> bool {
        matches!(
            self,
            Self::AddedFile
                | Self::ChangedFile
                | Self::DeletedFile
                | Self::AddedOriginalFile
                | Self::ChangedOriginalFile
                | Self::DeletedOriginalFile
                | Self::AddedSupportFile
                | Self::ChangedSupportFile
                | Self::DeletedSupportFile
        )
    }
}

/// Typed view of a `{"event": ..., "data": ...}` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Event name.
    pub event: NotificationKind,
    /// Event-specific data, `null` when absent.
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_payload() {
        let Ok(event) = DomainEvent::decode(r#"{"type":"a","n":1}"#) else {
            panic!("valid json");
        };
        assert_eq!(event.str_field("type"), Some("a"));
        assert_eq!(event.payload().get("n"), Some(&Value::from(1)));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = DomainEvent::decode("<html>");
        assert!(matches!(result, Err(ChannelError::Decode(_))));
    }

    #[test]
    fn non_object_json_is_still_an_event() {
        let Ok(event) = DomainEvent::decode("42") else {
            panic!("numbers are valid json");
        };
        assert_eq!(event.payload(), &Value::from(42));
        assert!(event.notification().is_none());
    }

    #[test]
    fn envelope_notification_view() {
        let Ok(event) = DomainEvent::decode(
            r#"{"event":"entered_state","data":{"current_state":"draft","finalized":false}}"#,
        ) else {
            panic!("valid json");
        };
        let Some(note) = event.notification() else {
            panic!("expected notification shape");
        };
        assert_eq!(note.event, NotificationKind::EnteredState);
        assert_eq!(
            note.data.get("current_state").and_then(Value::as_str),
            Some("draft")
        );
    }

    #[test]
    fn unknown_event_name_maps_to_unknown() {
        let Ok(event) = DomainEvent::decode(r#"{"event":"archived"}"#) else {
            panic!("valid json");
        };
        let Some(note) = event.notification() else {
            panic!("expected notification shape");
        };
        assert_eq!(note.event, NotificationKind::Unknown);
        assert_eq!(note.data, Value::Null);
    }

    #[test]
    fn file_event_classification() {
        assert!(NotificationKind::DeletedSupportFile.is_file_event());
        assert!(NotificationKind::AddedFile.is_file_event());
        assert!(!NotificationKind::CompletedAutoQa.is_file_event());
        assert!(!NotificationKind::System.is_file_event());
    }

    #[test]
    fn clones_share_payload() {
        let event = DomainEvent::new(serde_json::json!({"type": "b"}));
        let copy = event.clone();
        assert!(std::ptr::eq(event.payload(), copy.payload()));
    }
}
