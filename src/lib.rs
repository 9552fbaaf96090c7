//! # This-Gateway
//!
//! A WebSocket gateway that routes client traffic on named channels to
//! application handlers, with optional STOMP framing.
//!
//! ## Features
//!
//! - **Channel Pool**: Shared registry of connections and channel memberships
//!   with broadcast, direct send and per-connection attributes
//! - **Plain and STOMP Modes**: The negotiated sub-protocol picks the frame
//!   interpreter and the response serializer for the connection
//! - **Path-Routed Handlers**: Handlers registered per event kind under path
//!   templates (`/chat/{room}`)
//! - **Contained Failures**: Handler errors, panics and timeouts close the
//!   affected connection only
//! - **Configuration-Based**: Mount path, limits and STOMP settings from YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gateway::prelude::*;
//!
//! let mut handlers = HandlerTable::new();
//! handlers.on_message(
//!     "/chat/{room}",
//!     handler_fn(|ctx, event| async move {
//!         if let (Some(path), Some(payload)) = (ctx.path.clone(), event.payload) {
//!             ctx.pool().broadcast(&path, payload).await;
//!         }
//!         Ok(None)
//!     }),
//! )?;
//!
//! GatewayBuilder::new()
//!     .with_handlers(handlers)
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod server;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        error::GatewayError,
        events::{Event, EventKind, HeaderBag, Payload, header_names},
        handler::{ConnectionContext, EventHandler, HandlerRegistry, handler_fn},
        serializer::{MessageMeta, Outbound, ResponseSerializer},
    };

    // === Config ===
    pub use crate::config::{GatewayConfig, LimitsConfig, StompConfig};

    // === Server ===
    pub use crate::server::{
        ChannelPool, ConnectionInfo, GatewayBuilder, GatewayHost, HandlerTable,
        exposure::{HealthExposure, WebSocketExposure},
    };

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
}
