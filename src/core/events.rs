//! Gateway events delivered to application handlers
//!
//! Every lifecycle transition and every inbound message of a connection is
//! turned into an [`Event`] and handed to the dispatcher. The event carries
//! its kind, the path the connection is currently bound to, an optional
//! payload and the connection's header bag.
//!
//! ```text
//! upgrade ──▶ CONNECT
//! text/binary/SEND ──▶ MESSAGE ──▶ handler ──▶ optional response payload
//! transport fault ──▶ ERROR
//! close / DISCONNECT ──▶ CLOSE
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered string map used for handshake headers and frame headers
///
/// Keys are unique; inserting an existing key overwrites its value in place.
pub type HeaderBag = IndexMap<String, String>;

/// Header bag keys collected at handshake time
pub mod header_names {
    /// HTTP version of the upgrade request
    pub const HTTP_VERSION: &str = "Http-Version";
    /// `Origin` request header
    pub const ORIGIN: &str = "Origin";
    /// `Sec-WebSocket-Version` request header
    pub const PROTOCOL_VERSION: &str = "Protocol-Version";
    /// Negotiated sub-protocol name
    pub const SUB_PROTOCOL: &str = "Sub-Protocol";
    /// Raw query string of the upgrade request
    pub const QUERY_STRING: &str = "QueryString";
    /// `true` when the upgrade arrived over TLS
    pub const IS_SECURE: &str = "IsSecure";
    /// Request URI of the upgrade request
    pub const REQUEST_URI: &str = "RequestURI";
    /// Command of the STOMP frame that produced a MESSAGE event
    pub const STOMP_COMMAND: &str = "STOMPCommand";
    /// Offset of a binary payload
    pub const OFFSET: &str = "offset";
    /// Length of a binary payload
    pub const LENGTH: &str = "length";
}

/// Kind of event delivered to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// The transport upgrade completed
    Connect,
    /// A message (plain text/binary or STOMP `SEND`) arrived
    Message,
    /// The transport reported a fault
    Error,
    /// The connection is closing
    Close,
}

impl EventKind {
    /// Wire name of the event kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "CONNECT",
            EventKind::Message => "MESSAGE",
            EventKind::Error => "ERROR",
            EventKind::Close => "CLOSE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message content travelling between clients and handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl Payload {
    /// Build a text payload from any JSON-serializable value
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Payload::Text)
    }

    /// Text view of the payload (lossy for binary content)
    pub fn to_text(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// An event handed to an application handler
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Path the connection is bound to when the event fires
    pub path: Option<String>,
    /// Message content, absent for lifecycle events
    pub payload: Option<Payload>,
    /// Handshake headers, plus frame headers for STOMP messages
    pub headers: HeaderBag,
    /// Values captured by the matching path template
    pub params: IndexMap<String, String>,
}

impl Event {
    /// Create an event without template captures
    pub fn new(
        kind: EventKind,
        path: Option<String>,
        payload: Option<Payload>,
        headers: HeaderBag,
    ) -> Self {
        Self {
            kind,
            path,
            payload,
            headers,
            params: IndexMap::new(),
        }
    }

    /// Look up a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Look up a captured path parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::Connect.to_string(), "CONNECT");
        assert_eq!(EventKind::Message.to_string(), "MESSAGE");
        assert_eq!(EventKind::Error.to_string(), "ERROR");
        assert_eq!(EventKind::Close.to_string(), "CLOSE");
        assert_eq!(
            serde_json::to_value(EventKind::Message).unwrap(),
            serde_json::json!("MESSAGE")
        );
    }

    #[test]
    fn test_payload_json() {
        let payload = Payload::json(&serde_json::json!({"text": "hi"})).unwrap();
        assert_eq!(payload, Payload::Text(r#"{"text":"hi"}"#.to_string()));
    }

    #[test]
    fn test_payload_binary_to_text_is_lossy() {
        let payload = Payload::Binary(vec![b'h', b'i', 0xff]);
        assert_eq!(payload.len(), 3);
        assert!(payload.to_text().starts_with("hi"));
    }

    #[test]
    fn test_header_bag_last_write_wins() {
        let mut headers = HeaderBag::new();
        headers.insert("destination".to_string(), "/a".to_string());
        headers.insert("id".to_string(), "1".to_string());
        headers.insert("destination".to_string(), "/b".to_string());

        let event = Event::new(EventKind::Message, None, None, headers);
        assert_eq!(event.header("destination"), Some("/b"));
        assert_eq!(event.headers.get_index(0).unwrap().0, "destination");
        assert_eq!(event.param("room"), None);
    }
}
