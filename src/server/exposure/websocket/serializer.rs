//! Serializer strategies selected at handshake time

#[cfg(feature = "stomp")]
use super::protocol::{Command, Frame, Version};
use crate::core::error::GatewayError;
use crate::core::events::Payload;
use crate::core::serializer::{MessageMeta, Outbound, ResponseSerializer};
#[cfg(feature = "stomp")]
use uuid::Uuid;

/// Plain mode: payloads go out unchanged, errors as JSON
pub struct PlainSerializer;

impl ResponseSerializer for PlainSerializer {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn message(&self, payload: Payload, _meta: &MessageMeta) -> Outbound {
        match payload {
            Payload::Text(text) => Outbound::Text(text),
            Payload::Binary(bytes) => Outbound::Binary(bytes),
        }
    }

    fn error(&self, error: &GatewayError) -> Outbound {
        match serde_json::to_string(&error.to_response()) {
            Ok(json) => Outbound::Text(json),
            Err(_) => Outbound::Text(error.to_string()),
        }
    }
}

/// STOMP mode: messages become `MESSAGE` frames, errors `ERROR` frames
///
/// Text payloads go out as text messages. Binary payloads keep their bytes
/// and go out as binary messages.
#[cfg(feature = "stomp")]
pub struct StompSerializer {
    version: Version,
}

#[cfg(feature = "stomp")]
impl StompSerializer {
    /// Serializer writing frames with the rules of `version`
    pub fn new(version: Version) -> Self {
        Self { version }
    }
}

#[cfg(feature = "stomp")]
impl ResponseSerializer for StompSerializer {
    fn name(&self) -> &'static str {
        "stomp"
    }

    fn message(&self, payload: Payload, meta: &MessageMeta) -> Outbound {
        let content_type = match payload {
            Payload::Text(_) => "text/plain",
            Payload::Binary(_) => "application/octet-stream",
        };

        let mut frame = Frame::new(Command::Message);
        if let Some(destination) = &meta.destination {
            frame = frame.with_header("destination", destination.as_str());
        }
        if let Some(subscription) = &meta.subscription {
            frame = frame.with_header("subscription", subscription.as_str());
        }
        let frame = frame
            .with_header("message-id", format!("msg_{}", Uuid::new_v4().simple()))
            .with_header("content-type", content_type);

        match payload {
            Payload::Text(text) => Outbound::Text(frame.with_body(text).to_text_as(self.version)),
            Payload::Binary(bytes) => Outbound::Binary(frame.to_bytes_as(self.version, &bytes)),
        }
    }

    fn error(&self, error: &GatewayError) -> Outbound {
        let frame = Frame::new(Command::Error)
            .with_header("message", error.error_code())
            .with_header("content-type", "text/plain")
            .with_body(error.to_string());
        Outbound::Text(frame.to_text_as(self.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_passthrough() {
        let meta = MessageMeta::default();
        assert_eq!(
            PlainSerializer.message(Payload::from("hi"), &meta),
            Outbound::Text("hi".to_string())
        );
        assert_eq!(
            PlainSerializer.message(Payload::Binary(vec![1, 2]), &meta),
            Outbound::Binary(vec![1, 2])
        );
    }

    #[test]
    fn test_plain_error_is_json() {
        let err = GatewayError::NoHandler {
            kind: crate::core::events::EventKind::Message,
            path: "/x".to_string(),
        };
        let Outbound::Text(text) = PlainSerializer.error(&err) else {
            panic!("Expected text");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["code"], "NO_HANDLER");
        assert_eq!(json["status"], 500);
    }

    #[cfg(feature = "stomp")]
    #[test]
    fn test_stomp_message_frame() {
        let meta = MessageMeta {
            destination: Some("/chat".to_string()),
            subscription: Some("s1".to_string()),
        };
        let serializer = StompSerializer::new(Version::V1_2);
        let Outbound::Text(text) = serializer.message(Payload::from("hi"), &meta) else {
            panic!("Expected text");
        };
        let frame = Frame::parse(&text).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("destination"), Some("/chat"));
        assert_eq!(frame.header("subscription"), Some("s1"));
        assert!(frame.header("message-id").unwrap().starts_with("msg_"));
        assert_eq!(frame.header("content-length"), Some("2"));
        assert_eq!(frame.body, "hi");
    }

    #[cfg(feature = "stomp")]
    #[test]
    fn test_stomp_binary_message_keeps_bytes() {
        let meta = MessageMeta {
            destination: Some("/bin".to_string()),
            subscription: None,
        };
        let payload = Payload::Binary(vec![0xde, 0xad, 0x00, 0xbe]);
        let Outbound::Binary(bytes) = StompSerializer::new(Version::V1_2).message(payload, &meta)
        else {
            panic!("Expected binary");
        };

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("MESSAGE\n"));
        assert!(text.contains("content-type:application/octet-stream\n"));
        assert!(text.contains("content-length:4\n"));
        assert!(bytes.ends_with(&[0xde, 0xad, 0x00, 0xbe, 0x00]));
    }

    #[cfg(feature = "stomp")]
    #[test]
    fn test_stomp_error_frame() {
        let err = GatewayError::Header("missing 'id'".to_string());
        let Outbound::Text(text) = StompSerializer::new(Version::V1_2).error(&err) else {
            panic!("Expected text");
        };
        let frame = Frame::parse(&text).unwrap().unwrap();
        assert_eq!(frame.command, Command::Error);
        assert_eq!(frame.header("message"), Some("HEADER_ERROR"));
        assert!(frame.body.contains("missing 'id'"));
    }
}
