//! WebSocket upgrade handler and connection worker
//!
//! This module handles the HTTP → WebSocket upgrade and runs one worker task
//! per connection. Each worker owns:
//!
//! 1. a [`Connection`] state machine, fed one event at a time
//! 2. a select loop over socket reads, the connection's pool mailbox and the
//!    negotiated heart-beat timers
//! 3. a write loop that drains the [`ChannelTransport`] into the socket

use super::connection::{Connection, Handshake, HeartBeat};
use crate::config::GatewayConfig;
use crate::core::events::{HeaderBag, header_names};
use crate::core::serializer::Outbound;
use crate::server::host::GatewayHost;
use crate::server::transport::{ChannelTransport, Transport};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, Uri, Version};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// How long the write loop may take to flush after the connection ends
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Silence tolerated on an incoming heart-beat, as a multiple of its interval
const HEART_BEAT_GRACE: u32 = 2;

/// WebSocket upgrade handler
///
/// Mounted on `{mount}` and `{mount}/{*path}`. Offers the configured STOMP
/// sub-protocols and captures the handshake headers before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(host): State<Arc<GatewayHost>>,
    version: Version,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = relative_path(&host.config.mount_path, uri.path());
    let bag = handshake_headers(&host.config, version, &uri, &headers);

    let protocols = if host.config.stomp.enabled {
        host.config.stomp.protocols.clone()
    } else {
        Vec::new()
    };

    ws.protocols(protocols)
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, host, path, bag))
}

/// Run a single WebSocket connection to completion
async fn handle_socket(
    socket: WebSocket,
    host: Arc<GatewayHost>,
    path: Option<String>,
    mut headers: HeaderBag,
) {
    let protocol = socket
        .protocol()
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if let Some(protocol) = &protocol {
        headers.insert(header_names::SUB_PROTOCOL.to_string(), protocol.clone());
    }

    let (mut ws_write, mut ws_read) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new();
    let transport = Arc::new(transport);

    // Write loop: forward outbound messages until a close goes out
    let mut write_handle = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Outbound::Close { .. });
            if ws_write.send(to_message(message)).await.is_err() {
                tracing::debug!("WebSocket write failed, stopping writer");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let handshake = Handshake {
        path,
        protocol,
        headers,
    };
    let opened = Connection::open(&host, handshake, transport.clone()).await;
    let (mut connection, mut mailbox) = match opened {
        Ok(opened) => opened,
        Err(_) => {
            // The close frame is already queued
            let _ = tokio::time::timeout(WRITER_DRAIN, &mut write_handle).await;
            write_handle.abort();
            return;
        }
    };

    let mut close: (Option<u16>, String) = (None, String::new());
    let mut heart_beat = HeartBeat::default();
    let mut ticker: Option<Interval> = None;
    let mut last_read = Instant::now();
    while !connection.is_finished() {
        tokio::select! {
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_read = Instant::now();
                    connection.on_text(text.to_string()).await;
                    if connection.heart_beat() != heart_beat {
                        heart_beat = connection.heart_beat();
                        ticker = heart_beat.outgoing.map(heart_beat_ticker);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    last_read = Instant::now();
                    connection.on_binary(data.to_vec()).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %connection.id(), "Client sent close frame");
                    if let Some(frame) = frame {
                        close = (Some(frame.code), frame.reason.to_string());
                    }
                    break;
                }
                Some(Ok(_)) => {
                    // axum answers pings itself
                    last_read = Instant::now();
                }
                Some(Err(e)) => {
                    connection.on_error(&e.to_string()).await;
                    break;
                }
                None => break,
            },
            Some(delivery) = mailbox.recv() => {
                connection.on_delivery(delivery).await;
            }
            _ = next_beat(&mut ticker) => {
                if transport.send(Outbound::Text("\n".to_string())).is_err() {
                    break;
                }
            }
            _ = client_silence(last_read, heart_beat.incoming) => {
                connection.on_error("No heart-beat received from client").await;
                break;
            }
        }
    }

    connection.on_close(close.0, &close.1).await;

    // Cleanup
    if !transport.is_closed() {
        transport.force_close(crate::core::error::CLOSE_NORMAL, "");
    }
    let _ = tokio::time::timeout(WRITER_DRAIN, &mut write_handle).await;
    write_handle.abort();
}

fn heart_beat_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves when the next outgoing heart-beat is due
async fn next_beat(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves when the client has been silent for too long
async fn client_silence(last_read: Instant, incoming: Option<Duration>) {
    match incoming {
        Some(period) => tokio::time::sleep_until(last_read + period * HEART_BEAT_GRACE).await,
        None => std::future::pending().await,
    }
}

fn to_message(message: Outbound) -> Message {
    match message {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Binary(bytes) => Message::Binary(bytes.into()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

/// Path below the mount point, `None` when the mount itself was requested
fn relative_path(mount: &str, request_path: &str) -> Option<String> {
    let mount = mount.trim_end_matches('/');
    let rest = request_path.strip_prefix(mount).unwrap_or(request_path);
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        None
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        Some(format!("/{rest}"))
    }
}

/// Build the handshake header bag
fn handshake_headers(
    config: &GatewayConfig,
    version: Version,
    uri: &Uri,
    headers: &HeaderMap,
) -> HeaderBag {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let mut bag = HeaderBag::new();
    bag.insert(
        header_names::HTTP_VERSION.to_string(),
        format!("{:?}", version),
    );
    if let Some(origin) = header("origin") {
        bag.insert(header_names::ORIGIN.to_string(), origin);
    }
    if let Some(ws_version) = header("sec-websocket-version") {
        bag.insert(header_names::PROTOCOL_VERSION.to_string(), ws_version);
    }
    if let Some(query) = uri.query() {
        bag.insert(header_names::QUERY_STRING.to_string(), query.to_string());
    }

    let secure = uri.scheme_str() == Some("https")
        || header("x-forwarded-proto").is_some_and(|proto| {
            proto.eq_ignore_ascii_case("https") || proto.eq_ignore_ascii_case("wss")
        });
    bag.insert(header_names::IS_SECURE.to_string(), secure.to_string());

    let request_uri = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    bag.insert(header_names::REQUEST_URI.to_string(), request_uri);

    for name in &config.forwarded_headers {
        let name = name.to_ascii_lowercase();
        if let Some(value) = header(&name) {
            bag.insert(name, value);
        }
    }

    bag
}
