//! Transport boundary
//!
//! The connection state machine never touches a socket. It writes through a
//! [`Transport`], which only needs to accept outbound messages and a forced
//! close. [`ChannelTransport`] feeds an `mpsc` channel drained by the socket
//! write loop; tests read the same channel directly.

use crate::core::error::GatewayError;
use crate::core::serializer::Outbound;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Outbound side of a client transport
pub trait Transport: Send + Sync {
    /// Queue a message for the client
    fn send(&self, message: Outbound) -> Result<(), GatewayError>;

    /// Close the transport with a status code and reason
    ///
    /// Only the first call has an effect.
    fn force_close(&self, code: u16, reason: &str);

    /// Whether a close has been requested
    fn is_closed(&self) -> bool;
}

/// Transport writing into an unbounded channel
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Create the transport and the receiver the write loop drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            closed: AtomicBool::new(false),
        };
        (transport, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: Outbound) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::TransportClosed);
        }
        self.tx
            .send(message)
            .map_err(|_| GatewayError::TransportClosed)
    }

    fn force_close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
