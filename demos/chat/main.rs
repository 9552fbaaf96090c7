//! Chat room example
//!
//! Plain clients connect to `ws://127.0.0.1:3000/ws/chat/{room}` and every
//! text message is broadcast to the room. STOMP clients (sub-protocol
//! `v12.stomp`) connect to `ws://127.0.0.1:3000/ws`, `SUBSCRIBE` to
//! `/chat/{room}` and `SEND` to the same destination.
//!
//! Pass a YAML file path as the first argument to override the defaults.

use gateway::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,gateway=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_yaml_file(&path)?,
        None => GatewayConfig::default_config(),
    };

    let mut handlers = HandlerTable::new();

    handlers.on_connect(
        "/chat/{room}",
        handler_fn(|ctx, event| async move {
            let room = event.param("room").unwrap_or("lobby").to_string();
            let origin = event.header(header_names::ORIGIN).unwrap_or("unknown");
            tracing::info!(connection_id = %ctx.id, room = %room, origin = %origin, "Joined room");
            ctx.pool()
                .set_attribute(&ctx.id, "room", serde_json::Value::String(room))
                .await;
            Ok(None)
        }),
    )?;

    handlers.on_message(
        "/chat/{room}",
        handler_fn(|ctx, event| async move {
            let Some(payload) = event.payload else {
                return Ok(None);
            };
            let Some(path) = ctx.path.clone() else {
                return Ok(None);
            };
            let delivered = ctx.pool().broadcast(&path, payload).await;
            tracing::debug!(connection_id = %ctx.id, channel = %path, delivered, "Broadcast");
            Ok(None)
        }),
    )?;

    handlers.on_message(
        "/echo",
        handler_fn(|_ctx, event| async move { Ok(event.payload) }),
    )?;

    handlers.register_fallback(
        EventKind::Close,
        handler_fn(|ctx, _event| async move {
            tracing::info!(connection_id = %ctx.id, "Left");
            Ok(None)
        }),
    );

    GatewayBuilder::new()
        .with_config(config)
        .with_handlers(handlers)
        .serve("127.0.0.1:3000")
        .await
}
