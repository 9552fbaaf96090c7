//! Serializer strategy for outgoing messages
//!
//! A connection picks its serializer once, at handshake time, from the
//! negotiated sub-protocol. Everything the gateway writes to a client
//! (handler responses, channel deliveries, error reports) goes through it.

use crate::core::error::GatewayError;
use crate::core::events::Payload;

/// A unit of outbound traffic handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text WebSocket message
    Text(String),
    /// Binary WebSocket message
    Binary(Vec<u8>),
    /// Close the transport with the given status
    Close { code: u16, reason: String },
}

/// Addressing information for an outgoing message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// Channel or path the message belongs to
    pub destination: Option<String>,
    /// Client-chosen subscription id the message is delivered under
    pub subscription: Option<String>,
}

/// Formats outgoing traffic for one wire format
pub trait ResponseSerializer: Send + Sync {
    /// Name of the wire format, for logging
    fn name(&self) -> &'static str;

    /// Format an application message
    fn message(&self, payload: Payload, meta: &MessageMeta) -> Outbound;

    /// Format an error report
    fn error(&self, error: &GatewayError) -> Outbound;
}
