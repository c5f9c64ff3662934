//! Wire frames and event names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Locally synthesized when the socket opens.
pub const CONNECT: &str = "connect";
/// Locally synthesized when the socket closes.
pub const DISCONNECT: &str = "disconnect";
/// Locally synthesized on a transport error; payload is the error detail.
pub const ERROR: &str = "error";
/// Locally synthesized when the reconnect attempt ceiling is reached.
pub const RECONNECT_EXHAUSTED: &str = "reconnect_exhausted";
/// Server notification: a message arrived in a subscribed inbox.
pub const NEW_EMAIL: &str = "new_email";
/// Server notification: a message was removed from a subscribed inbox.
pub const EMAIL_DELETED: &str = "email_deleted";

/// Event names that only the client itself may emit.
pub const LOCAL_EVENTS: [&str; 4] = [CONNECT, DISCONNECT, ERROR, RECONNECT_EXHAUSTED];

/// Event names that have a listener bucket from the start.
pub const KNOWN_EVENTS: [&str; 6] = [
    NEW_EMAIL,
    EMAIL_DELETED,
    CONNECT,
    DISCONNECT,
    ERROR,
    RECONNECT_EXHAUSTED,
];

/// The only structure exchanged over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message type discriminator; doubles as the event name.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WireMessage {
    /// `{"type":"subscribe","payload":{"email":...}}`
    #[must_use]
    pub fn subscribe(email: &str) -> Self {
        Self::inbox_command("subscribe", email)
    }

    /// `{"type":"unsubscribe","payload":{"email":...}}`
    #[must_use]
    pub fn unsubscribe(email: &str) -> Self {
        Self::inbox_command("unsubscribe", email)
    }

    fn inbox_command(msg_type: &str, email: &str) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            payload: serde_json::json!({ "email": email }),
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a frame. The `type` field is mandatory.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for malformed JSON or a missing
    /// `type`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Returns `true` for names reserved to locally synthesized events.
    #[must_use]
    pub fn is_local_event(&self) -> bool {
        LOCAL_EVENTS.contains(&self.msg_type.as_str())
    }
}

/// Typed view of a `new_email` / `email_deleted` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxNotice {
    /// Inbox the notification is about.
    pub email: String,
    /// Server-side message identifier, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Message body; plaintext once decrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Whether `body` was decrypted on this client.
    #[serde(default)]
    pub decrypted: bool,
    /// Local receipt time.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboxNotice {
    /// Decodes a notification payload.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if `email` is missing.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(payload)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_matches_wire_format() {
        let Ok(json) = WireMessage::subscribe("a@b.com").to_json() else {
            panic!("serialization failed");
        };
        assert_eq!(json, r#"{"type":"subscribe","payload":{"email":"a@b.com"}}"#);
    }

    #[test]
    fn unsubscribe_frame_matches_wire_format() {
        let Ok(json) = WireMessage::unsubscribe("a@b.com").to_json() else {
            panic!("serialization failed");
        };
        assert_eq!(json, r#"{"type":"unsubscribe","payload":{"email":"a@b.com"}}"#);
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(WireMessage::from_json(r#"{"payload":{}}"#).is_err());
        assert!(WireMessage::from_json("not json").is_err());
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let Ok(msg) = WireMessage::from_json(r#"{"type":"email_deleted"}"#) else {
            panic!("parse failed");
        };
        assert_eq!(msg.msg_type, EMAIL_DELETED);
        assert!(msg.payload.is_null());
    }

    #[test]
    fn local_names_are_flagged() {
        let Ok(msg) = WireMessage::from_json(r#"{"type":"connect"}"#) else {
            panic!("parse failed");
        };
        assert!(msg.is_local_event());
        assert!(!WireMessage::subscribe("a@b.com").is_local_event());
    }

    #[test]
    fn notice_decodes_server_payload() {
        let payload = serde_json::json!({ "email": "a@b.com", "message_id": "m-1" });
        let Ok(notice) = InboxNotice::from_payload(&payload) else {
            panic!("decode failed");
        };
        assert_eq!(notice.email, "a@b.com");
        assert_eq!(notice.message_id.as_deref(), Some("m-1"));
        assert_eq!(notice.body, None);
        assert!(!notice.decrypted);
    }

    #[test]
    fn notice_requires_email() {
        assert!(InboxNotice::from_payload(&serde_json::json!({ "body": "x" })).is_err());
    }
}
