//! STOMP command interpreter
//!
//! Maps STOMP client frames onto the pool and the dispatcher:
//!
//! - `CONNECT`/`STOMP` → `CONNECTED` reply (version negotiated)
//! - `SEND` → `MESSAGE` event on the frame's destination
//! - `SUBSCRIBE`/`UNSUBSCRIBE` → channel memberships, one per subscription id
//! - `BEGIN`/`COMMIT`/`ABORT`/`ACK`/`NACK` → optionally forwarded as `MESSAGE`
//! - `DISCONNECT` → `CLOSE` event and release of every subscription
//!
//! Any frame carrying a `receipt` header is acknowledged with `RECEIPT`.
//!
//! Until `CONNECT` negotiates a version, frames follow the version named by
//! the sub-protocol (`v11.stomp` → 1.1).

use super::connection::{ConnectionCore, ConnectionState, HeartBeat};
use super::interpreter::FrameInterpreter;
use super::protocol::{Command, Frame, Version, parse_heart_beat};
use super::serializer::StompSerializer;
use crate::config::StompConfig;
use crate::core::error::GatewayError;
use crate::core::events::{EventKind, Payload, header_names};
use crate::core::serializer::{MessageMeta, Outbound, ResponseSerializer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Subscription {
    destination: String,
    membership_id: String,
}

/// Interpreter for STOMP sub-protocol connections
pub struct StompInterpreter {
    config: StompConfig,
    /// Client subscription id → destination and pool membership
    subscriptions: HashMap<String, Subscription>,
    /// Version implied by the sub-protocol
    wire_version: Version,
    /// Version negotiated by `CONNECT`
    version: Option<Version>,
}

impl StompInterpreter {
    /// Create an interpreter with no subscriptions
    pub fn new(config: StompConfig, protocol: &str) -> Self {
        Self {
            config,
            subscriptions: HashMap::new(),
            wire_version: Version::from_subprotocol(protocol).unwrap_or(Version::V1_2),
            version: None,
        }
    }

    /// Version whose rules apply to the next frame
    fn session_version(&self) -> Version {
        self.version.unwrap_or(self.wire_version)
    }

    fn connect(&mut self, core: &mut ConnectionCore, frame: &Frame) -> Result<(), GatewayError> {
        if self.version.is_some() {
            return Err(GatewayError::Protocol(
                "CONNECT received on an established session".to_string(),
            ));
        }

        let version = negotiate_version(frame.header("accept-version"))?;
        let mut reply = Frame::new(Command::Connected)
            .with_header("version", version.as_str())
            .with_header("session", core.id())
            .with_header("server", self.config.server_name.as_str());

        // 1.0 has no heart-beating
        if version > Version::V1_0 {
            let client = match frame.header("heart-beat") {
                Some(value) => parse_heart_beat(value).ok_or_else(|| {
                    GatewayError::Header(format!("Invalid heart-beat '{}'", value))
                })?,
                None => (0, 0),
            };
            let server = self.config.heart_beat_millis().unwrap_or((0, 0));
            core.set_heart_beat(negotiate_heart_beat(server, client));
            reply = reply.with_header("heart-beat", format!("{},{}", server.0, server.1));
        }

        self.version = Some(version);
        core.set_serializer(Arc::new(StompSerializer::new(version)));
        tracing::debug!(
            connection_id = %core.id(),
            version = %version,
            heart_beat = ?core.heart_beat(),
            "STOMP session established"
        );
        send_frame(core, &reply, version)
    }

    async fn send(&mut self, core: &mut ConnectionCore, frame: Frame) -> Result<(), GatewayError> {
        let destination = frame.require("destination")?.to_string();
        core.set_path(destination.clone());

        let mut headers = core.headers().clone();
        for (key, value) in &frame.headers {
            headers.insert(key.clone(), value.clone());
        }
        headers.insert(
            header_names::STOMP_COMMAND.to_string(),
            frame.command.to_string(),
        );

        let meta = MessageMeta {
            subscription: self.subscription_for(&destination),
            destination: Some(destination),
        };
        core.deliver_event(
            EventKind::Message,
            Some(Payload::Text(frame.body)),
            headers,
            meta,
        )
        .await
    }

    async fn subscribe(&mut self, core: &ConnectionCore, frame: &Frame) -> Result<(), GatewayError> {
        let id = frame.require("id")?;
        let destination = frame.require("destination")?;
        if self.subscriptions.contains_key(id) {
            return Err(GatewayError::Header(format!(
                "Subscription id '{}' is already in use",
                id
            )));
        }

        let membership_id = core
            .pool()
            .join_channel(core.handle().clone(), destination)
            .await?;

        tracing::debug!(
            connection_id = %core.id(),
            subscription = %id,
            destination = %destination,
            "STOMP subscription added"
        );
        self.subscriptions.insert(
            id.to_string(),
            Subscription {
                destination: destination.to_string(),
                membership_id,
            },
        );
        Ok(())
    }

    async fn unsubscribe(&mut self, core: &ConnectionCore, frame: &Frame) -> Result<(), GatewayError> {
        let id = frame.require("id")?;
        let subscription = self
            .subscriptions
            .remove(id)
            .ok_or_else(|| GatewayError::UnknownSubscription { id: id.to_string() })?;

        core.pool()
            .remove_from_channel(
                core.handle(),
                &subscription.destination,
                &subscription.membership_id,
            )
            .await;
        tracing::debug!(connection_id = %core.id(), subscription = %id, "STOMP subscription removed");
        Ok(())
    }

    async fn forward(&mut self, core: &mut ConnectionCore, frame: Frame) -> Result<(), GatewayError> {
        if !self.config.forward_transaction_commands {
            tracing::trace!(connection_id = %core.id(), command = %frame.command, "Ignoring STOMP command");
            return Ok(());
        }

        let mut headers = core.headers().clone();
        for (key, value) in &frame.headers {
            headers.insert(key.clone(), value.clone());
        }
        headers.insert(
            header_names::STOMP_COMMAND.to_string(),
            frame.command.to_string(),
        );

        let meta = MessageMeta {
            destination: core.path().map(str::to_string),
            subscription: None,
        };
        core.deliver_event(
            EventKind::Message,
            Some(Payload::Text(frame.body)),
            headers,
            meta,
        )
        .await
    }

    async fn disconnect(&mut self, core: &mut ConnectionCore) {
        core.dispatch_close().await;
        self.unwind(core).await;
        core.set_state(ConnectionState::Closing);
    }

    fn subscription_for(&self, destination: &str) -> Option<String> {
        self.subscriptions
            .iter()
            .find(|(_, s)| s.destination == destination)
            .map(|(id, _)| id.clone())
    }
}

#[async_trait]
impl FrameInterpreter for StompInterpreter {
    fn name(&self) -> &'static str {
        "stomp"
    }

    fn serializer(&self) -> Arc<dyn ResponseSerializer> {
        Arc::new(StompSerializer::new(self.wire_version))
    }

    fn registration_channel(&self, _path: Option<&str>) -> Option<String> {
        None
    }

    async fn on_text(&mut self, core: &mut ConnectionCore, text: String) -> Result<(), GatewayError> {
        let version = self.session_version();
        let Some(frame) = Frame::parse_as(&text, version)? else {
            return Ok(());
        };
        frame.validate(version)?;

        let receipt = frame.header("receipt").map(str::to_string);
        match frame.command {
            Command::Connect | Command::Stomp => self.connect(core, &frame)?,
            Command::Send => self.send(core, frame).await?,
            Command::Subscribe => self.subscribe(core, &frame).await?,
            Command::Unsubscribe => self.unsubscribe(core, &frame).await?,
            Command::Begin | Command::Commit | Command::Abort | Command::Ack | Command::Nack => {
                self.forward(core, frame).await?
            }
            Command::Disconnect => self.disconnect(core).await,
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                return Err(GatewayError::Protocol(format!(
                    "{} is a server command",
                    frame.command
                )));
            }
        }

        if let Some(receipt) = receipt {
            let reply = Frame::new(Command::Receipt).with_header("receipt-id", receipt);
            send_frame(core, &reply, self.session_version())?;
        }
        Ok(())
    }

    async fn on_binary(
        &mut self,
        core: &mut ConnectionCore,
        _data: Vec<u8>,
    ) -> Result<(), GatewayError> {
        Err(GatewayError::BinaryUnsupported {
            protocol: core.protocol().unwrap_or("stomp").to_string(),
        })
    }

    fn delivery_meta(&self, channel: Option<&str>, membership_id: &str) -> MessageMeta {
        let subscription = self
            .subscriptions
            .iter()
            .find(|(_, s)| s.membership_id == membership_id)
            .map(|(id, _)| id.clone());
        MessageMeta {
            destination: channel.map(str::to_string),
            subscription,
        }
    }

    async fn unwind(&mut self, core: &mut ConnectionCore) {
        for (id, subscription) in self.subscriptions.drain() {
            core.pool()
                .remove_from_channel(
                    core.handle(),
                    &subscription.destination,
                    &subscription.membership_id,
                )
                .await;
            tracing::trace!(connection_id = %core.id(), subscription = %id, "STOMP subscription released");
        }
    }
}

fn send_frame(core: &ConnectionCore, frame: &Frame, version: Version) -> Result<(), GatewayError> {
    match core.send(Outbound::Text(frame.to_text_as(version))) {
        Ok(()) | Err(GatewayError::TransportClosed) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Pick the highest version both sides support
///
/// A `CONNECT` without `accept-version` is a 1.0 client.
fn negotiate_version(accept: Option<&str>) -> Result<Version, GatewayError> {
    let Some(accept) = accept else {
        return Ok(Version::V1_0);
    };
    let offered: Vec<Version> = accept
        .split(',')
        .filter_map(|v| Version::parse(v.trim()))
        .collect();
    offered.into_iter().max().ok_or_else(|| {
        GatewayError::Protocol(format!(
            "No common protocol version in '{}', supported: 1.0,1.1,1.2",
            accept
        ))
    })
}

/// Combine the server offer `(sx, sy)` with the client's `(cx, cy)`
///
/// Each direction runs at the slower of the two rates, or not at all when
/// either side sent `0`.
fn negotiate_heart_beat(server: (u64, u64), client: (u64, u64)) -> HeartBeat {
    let interval = |ours: u64, theirs: u64| {
        (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)))
    };
    HeartBeat {
        outgoing: interval(server.0, client.1),
        incoming: interval(server.1, client.0),
    }
}
