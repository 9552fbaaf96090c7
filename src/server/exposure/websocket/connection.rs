//! Per-connection state machine
//!
//! A [`Connection`] is driven by its worker task, one event at a time:
//!
//! ```text
//! Connecting ──open──▶ Open ──DISCONNECT──▶ Closing ──close──▶ Closed
//!      │                 │
//!      │                 └──fatal error / transport error──▶ Error ──close──▶ Closed
//!      └──pool refused──▶ Closed
//! ```
//!
//! The protocol-independent part ([`ConnectionCore`]) owns the pool
//! registration, the dispatcher and the transport. The protocol-specific
//! part is a [`FrameInterpreter`] chosen from the negotiated sub-protocol.

use super::interpreter::{FrameInterpreter, select_interpreter};
use crate::core::error::{CLOSE_INTERNAL_ERROR, GatewayError};
use crate::core::events::{EventKind, HeaderBag, Payload};
use crate::core::handler::ConnectionContext;
use crate::core::serializer::{MessageMeta, Outbound, ResponseSerializer};
use crate::server::dispatcher::Dispatcher;
use crate::server::host::GatewayHost;
use crate::server::pool::{ChannelPool, ClientHandle, Delivery};
use crate::server::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Longest close reason a WebSocket close frame can carry
const MAX_CLOSE_REASON: usize = 123;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

/// Heart-beat intervals agreed with the client
///
/// `None` disables the direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// How often the worker sends a heart-beat
    pub outgoing: Option<Duration>,
    /// How often the client promised to send something
    pub incoming: Option<Duration>,
}

/// What the transport reported at upgrade time
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Request path below the mount point, if any
    pub path: Option<String>,
    /// Negotiated sub-protocol
    pub protocol: Option<String>,
    /// Handshake header bag
    pub headers: HeaderBag,
}

/// Protocol-independent connection state
pub struct ConnectionCore {
    id: String,
    state: ConnectionState,
    protocol: Option<String>,
    path: Option<String>,
    channel: Option<String>,
    headers: HeaderBag,
    handle: Arc<ClientHandle>,
    pool: Arc<ChannelPool>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn ResponseSerializer>,
    registered: bool,
    close_dispatched: bool,
    heart_beat: HeartBeat,
}

impl ConnectionCore {
    /// Identifier of the base registration
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Path handlers are currently resolved against
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Negotiated sub-protocol
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Handshake header bag
    pub fn headers(&self) -> &HeaderBag {
        &self.headers
    }

    /// Shared connection pool
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// This connection's pool handle
    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    pub(crate) fn set_path(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub(crate) fn set_serializer(&mut self, serializer: Arc<dyn ResponseSerializer>) {
        self.serializer = serializer;
    }

    pub(crate) fn set_heart_beat(&mut self, heart_beat: HeartBeat) {
        self.heart_beat = heart_beat;
    }

    /// Heart-beat intervals in effect
    pub fn heart_beat(&self) -> HeartBeat {
        self.heart_beat
    }

    /// Handler-facing view of the connection
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext::new(
            self.id.clone(),
            self.path.clone(),
            self.protocol.clone(),
            self.pool.clone(),
            self.serializer.clone(),
        )
    }

    /// Queue a raw message on the transport
    pub fn send(&self, message: Outbound) -> Result<(), GatewayError> {
        self.transport.send(message)
    }

    /// Render a payload with the connection's serializer and send it
    pub fn respond(&self, payload: Payload, meta: &MessageMeta) -> Result<(), GatewayError> {
        self.transport.send(self.serializer.message(payload, meta))
    }

    /// Report an error to the client without closing
    fn report(&self, error: &GatewayError) {
        if let Err(e) = self.transport.send(self.serializer.error(error)) {
            tracing::debug!(connection_id = %self.id, error = %e, "Could not report error");
        }
    }

    /// Dispatch an event and send the handler's response back
    ///
    /// A missing handler is fatal only for `MESSAGE`; lifecycle events
    /// without a handler are skipped.
    pub async fn deliver_event(
        &mut self,
        kind: EventKind,
        payload: Option<Payload>,
        headers: HeaderBag,
        meta: MessageMeta,
    ) -> Result<(), GatewayError> {
        let ctx = self.context();
        let result = self
            .dispatcher
            .dispatch(&ctx, kind, self.path.as_deref(), payload, headers)
            .await;

        match result {
            Ok(Some(response)) => match self.respond(response, &meta) {
                Ok(()) | Err(GatewayError::TransportClosed) => Ok(()),
                Err(e) => Err(e),
            },
            Ok(None) => Ok(()),
            Err(GatewayError::NoHandler { kind, path }) if kind != EventKind::Message => {
                tracing::debug!(connection_id = %self.id, kind = %kind, path = %path, "No handler for lifecycle event");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Dispatch `CLOSE` unless it already was
    ///
    /// Failures are logged and never propagate.
    pub async fn dispatch_close(&mut self) {
        if self.close_dispatched {
            return;
        }
        self.close_dispatched = true;

        let headers = self.headers.clone();
        if let Err(e) = self
            .deliver_event(EventKind::Close, None, headers, MessageMeta::default())
            .await
        {
            tracing::warn!(connection_id = %self.id, error = %e, "Close handler failed");
        }
    }

    /// Drop the base registration, once
    async fn unregister(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;
        match &self.channel {
            Some(channel) => {
                self.pool
                    .remove_from_channel(&self.handle, channel, &self.id)
                    .await;
            }
            None => {
                self.pool.remove(&self.id).await;
            }
        }
    }

    /// Report a fatal error and close the transport
    fn fail(&mut self, error: &GatewayError) {
        match error {
            GatewayError::Handler { .. } | GatewayError::NoHandler { .. } => {
                tracing::error!(connection_id = %self.id, error = %error, "Handler failure, closing connection");
            }
            _ => {
                tracing::warn!(connection_id = %self.id, error = %error, "Closing connection");
            }
        }
        self.report(error);
        self.state = ConnectionState::Error;
        self.transport
            .force_close(error.close_code(), &close_reason(&error.to_string()));
    }
}

/// A client connection: shared core plus protocol interpreter
pub struct Connection {
    core: ConnectionCore,
    interpreter: Box<dyn FrameInterpreter>,
}

impl Connection {
    /// Register with the pool and dispatch `CONNECT`
    ///
    /// Returns the connection together with the mailbox its worker must
    /// drain. When the pool refuses the registration the transport is closed
    /// and no handler runs.
    pub async fn open(
        host: &GatewayHost,
        handshake: Handshake,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Delivery>), GatewayError> {
        let interpreter = select_interpreter(&host.config, handshake.protocol.as_deref());
        let (handle, mailbox) =
            ClientHandle::new(handshake.path.clone(), handshake.protocol.clone());

        let channel = interpreter.registration_channel(handshake.path.as_deref());
        let registration = match &channel {
            Some(channel) => host.pool.join_channel(handle.clone(), channel).await,
            None => host.pool.join(handle.clone()).await,
        };
        let id = match registration {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Connection refused by pool");
                transport.force_close(e.close_code(), &close_reason(&e.to_string()));
                return Err(e);
            }
        };

        let mut core = ConnectionCore {
            id,
            state: ConnectionState::Connecting,
            protocol: handshake.protocol,
            path: handshake.path,
            channel,
            headers: handshake.headers,
            handle,
            pool: host.pool.clone(),
            dispatcher: host.dispatcher.clone(),
            transport,
            serializer: interpreter.serializer(),
            registered: true,
            close_dispatched: false,
            heart_beat: HeartBeat::default(),
        };

        tracing::info!(
            connection_id = %core.id,
            path = ?core.path,
            interpreter = interpreter.name(),
            "Connection opened"
        );

        core.state = ConnectionState::Open;
        let headers = core.headers.clone();
        let meta = MessageMeta {
            destination: core.path.clone(),
            subscription: None,
        };
        if let Err(e) = core
            .deliver_event(EventKind::Connect, None, headers, meta)
            .await
        {
            core.fail(&e);
        }

        Ok((Self { core, interpreter }, mailbox))
    }

    /// Identifier of the base registration
    pub fn id(&self) -> &str {
        self.core.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Name of the selected interpreter
    pub fn interpreter_name(&self) -> &'static str {
        self.interpreter.name()
    }

    /// Protocol-independent state
    pub fn core(&self) -> &ConnectionCore {
        &self.core
    }

    /// Heart-beat intervals the worker must honour
    pub fn heart_beat(&self) -> HeartBeat {
        self.core.heart_beat
    }

    /// Whether the worker should stop reading
    pub fn is_finished(&self) -> bool {
        matches!(
            self.core.state,
            ConnectionState::Closed | ConnectionState::Error
        ) || self.core.transport.is_closed()
    }

    /// Handle an inbound text message
    pub async fn on_text(&mut self, text: String) {
        if self.core.state != ConnectionState::Open {
            tracing::debug!(connection_id = %self.core.id, state = ?self.core.state, "Ignoring text message");
            return;
        }
        if let Err(e) = self.interpreter.on_text(&mut self.core, text).await {
            self.handle_error(e);
        }
    }

    /// Handle an inbound binary message
    pub async fn on_binary(&mut self, data: Vec<u8>) {
        if self.core.state != ConnectionState::Open {
            tracing::debug!(connection_id = %self.core.id, state = ?self.core.state, "Ignoring binary message");
            return;
        }
        if let Err(e) = self.interpreter.on_binary(&mut self.core, data).await {
            self.handle_error(e);
        }
    }

    /// Render a pool delivery
    pub async fn on_delivery(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Message {
                channel,
                membership_id,
                payload,
            } => {
                if self.core.state != ConnectionState::Open {
                    return;
                }
                let meta = self
                    .interpreter
                    .delivery_meta(channel.as_deref(), &membership_id);
                if let Err(e) = self.core.respond(payload, &meta) {
                    tracing::debug!(connection_id = %self.core.id, error = %e, "Dropped delivery");
                }
            }
            Delivery::Close { code, reason } => {
                tracing::debug!(connection_id = %self.core.id, code, "Close requested through pool");
                if self.core.state == ConnectionState::Open {
                    self.core.state = ConnectionState::Closing;
                }
                self.core.transport.force_close(code, &reason);
            }
        }
    }

    /// The transport failed
    ///
    /// `ERROR` is dispatched best-effort, then the transport is closed.
    pub async fn on_error(&mut self, description: &str) {
        if self.core.state == ConnectionState::Closed {
            return;
        }
        tracing::warn!(connection_id = %self.core.id, error = %description, "Transport error");

        let headers = self.core.headers.clone();
        if let Err(e) = self
            .core
            .deliver_event(
                EventKind::Error,
                Some(Payload::from(description)),
                headers,
                MessageMeta::default(),
            )
            .await
        {
            tracing::warn!(connection_id = %self.core.id, error = %e, "Error handler failed");
        }

        self.core.state = ConnectionState::Error;
        self.core
            .transport
            .force_close(CLOSE_INTERNAL_ERROR, &close_reason(description));
    }

    /// The transport closed
    ///
    /// Dispatches `CLOSE` (at most once per connection), releases every
    /// registration and ends in `Closed`. Safe to call repeatedly.
    pub async fn on_close(&mut self, code: Option<u16>, reason: &str) {
        if self.core.state == ConnectionState::Closed {
            return;
        }
        tracing::info!(connection_id = %self.core.id, code = ?code, reason = %reason, "Connection closed");

        self.core.dispatch_close().await;
        self.interpreter.unwind(&mut self.core).await;
        self.core.unregister().await;
        self.core.state = ConnectionState::Closed;
    }

    fn handle_error(&mut self, error: GatewayError) {
        if error.closes_connection() {
            self.core.fail(&error);
        } else {
            tracing::debug!(connection_id = %self.core.id, error = %error, "Rejected frame");
            self.core.report(&error);
        }
    }
}

/// Trim a reason so it fits a close frame
fn close_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
