//! WebSocket exposure for the gateway
//!
//! This module provides the WebSocket routes and everything that runs per
//! connection: the state machine, the frame interpreters and the serializers.
//!
//! # Architecture
//!
//! ```text
//! Client ──ws──▶ {mount}/{*path} ──▶ ws_handler() ──▶ Connection ──▶ Dispatcher ──▶ handlers
//!                                                        │  ▲
//!                                         join/remove    │  │  Delivery (mailbox)
//!                                                        ▼  │
//!                                                     ChannelPool ◀── broadcast/emit/send
//! ```
//!
//! # Protocols
//!
//! Without a sub-protocol every text or binary message is a `MESSAGE` event
//! on the request path, and handler responses go back unchanged.
//!
//! With a negotiated STOMP sub-protocol (`v10.stomp`, `v11.stomp`,
//! `v12.stomp`) messages are STOMP frames; see [`protocol`] for the codec.

pub mod connection;
mod handler;
pub mod interpreter;
pub mod protocol;
pub mod serializer;
#[cfg(feature = "stomp")]
pub mod stomp;

use crate::server::host::GatewayHost;
use anyhow::Result;
use axum::{Router, routing::get};
use std::sync::Arc;

pub use connection::{Connection, ConnectionState, Handshake, HeartBeat};

/// WebSocket exposure implementation
///
/// Consumes a [`GatewayHost`] and produces an Axum router accepting upgrades
/// on the configured mount path and every path below it.
///
/// # Example
///
/// ```rust,ignore
/// use gateway::server::exposure::websocket::WebSocketExposure;
///
/// let host = Arc::new(GatewayBuilder::new().with_handlers(handlers).build_host()?);
/// let app = WebSocketExposure::build_router(host)?;
/// ```
pub struct WebSocketExposure;

impl WebSocketExposure {
    /// Build the WebSocket router
    pub fn build_router(host: Arc<GatewayHost>) -> Result<Router> {
        let mount = host.config.mount_path.trim_end_matches('/').to_string();
        let (root, nested) = if mount.is_empty() {
            ("/".to_string(), "/{*path}".to_string())
        } else {
            (mount.clone(), format!("{mount}/{{*path}}"))
        };

        tracing::debug!(mount = %root, "Mounting WebSocket routes");

        let router = Router::new()
            .route(&root, get(handler::ws_handler))
            .route(&nested, get(handler::ws_handler))
            .with_state(host);

        Ok(router)
    }
}
