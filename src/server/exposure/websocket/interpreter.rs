//! Frame interpreters
//!
//! An interpreter turns inbound WebSocket messages into dispatcher calls and
//! pool operations. It is chosen once per connection from the negotiated
//! sub-protocol and never changes afterwards.

use super::connection::ConnectionCore;
use super::serializer::PlainSerializer;
use crate::config::GatewayConfig;
use crate::core::error::GatewayError;
use crate::core::events::{EventKind, Payload, header_names};
use crate::core::serializer::{MessageMeta, ResponseSerializer};
use async_trait::async_trait;
use std::sync::Arc;

/// Protocol-specific half of a connection
#[async_trait]
pub trait FrameInterpreter: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Serializer matching this interpreter's wire format
    fn serializer(&self) -> Arc<dyn ResponseSerializer>;

    /// Channel the connection joins at open time, `None` for a base registration
    fn registration_channel(&self, path: Option<&str>) -> Option<String>;

    /// Handle one text message
    async fn on_text(&mut self, core: &mut ConnectionCore, text: String) -> Result<(), GatewayError>;

    /// Handle one binary message
    async fn on_binary(&mut self, core: &mut ConnectionCore, data: Vec<u8>)
    -> Result<(), GatewayError>;

    /// Describe a pool delivery so the serializer can address it
    fn delivery_meta(&self, channel: Option<&str>, membership_id: &str) -> MessageMeta;

    /// Drop every registration this interpreter created
    async fn unwind(&mut self, core: &mut ConnectionCore);
}

/// Pick the interpreter for a negotiated sub-protocol
#[cfg_attr(not(feature = "stomp"), allow(unused_variables))]
pub fn select_interpreter(
    config: &GatewayConfig,
    protocol: Option<&str>,
) -> Box<dyn FrameInterpreter> {
    #[cfg(feature = "stomp")]
    if let Some(protocol) = protocol
        && config.stomp.accepts(protocol)
    {
        return Box::new(super::stomp::StompInterpreter::new(
            config.stomp.clone(),
            protocol,
        ));
    }

    Box::new(PlainInterpreter)
}

/// Interpreter for connections without a sub-protocol
///
/// Every message is a `MESSAGE` event on the handshake path.
pub struct PlainInterpreter;

#[async_trait]
impl FrameInterpreter for PlainInterpreter {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn serializer(&self) -> Arc<dyn ResponseSerializer> {
        Arc::new(PlainSerializer)
    }

    fn registration_channel(&self, path: Option<&str>) -> Option<String> {
        path.map(str::to_string)
    }

    async fn on_text(&mut self, core: &mut ConnectionCore, text: String) -> Result<(), GatewayError> {
        let headers = core.headers().clone();
        let meta = MessageMeta {
            destination: core.path().map(str::to_string),
            subscription: None,
        };
        core.deliver_event(EventKind::Message, Some(Payload::Text(text)), headers, meta)
            .await
    }

    async fn on_binary(
        &mut self,
        core: &mut ConnectionCore,
        data: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let mut headers = core.headers().clone();
        headers.insert(header_names::OFFSET.to_string(), "0".to_string());
        headers.insert(header_names::LENGTH.to_string(), data.len().to_string());
        let meta = MessageMeta {
            destination: core.path().map(str::to_string),
            subscription: None,
        };
        core.deliver_event(EventKind::Message, Some(Payload::Binary(data)), headers, meta)
            .await
    }

    fn delivery_meta(&self, channel: Option<&str>, _membership_id: &str) -> MessageMeta {
        MessageMeta {
            destination: channel.map(str::to_string),
            subscription: None,
        }
    }

    async fn unwind(&mut self, _core: &mut ConnectionCore) {}
}
