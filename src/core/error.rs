//! Typed error handling for the gateway
//!
//! Every failure a connection can run into is expressed as a [`GatewayError`].
//! Each variant knows how it is reported to the client and whether it ends
//! the connection, so the connection state machine can turn any error into
//! the right close path without inspecting messages.
//!
//! # Error Categories
//!
//! - [`GatewayError::Header`]: malformed or missing frame header
//! - [`GatewayError::UnknownSubscription`]: `UNSUBSCRIBE` for an id never subscribed
//! - [`GatewayError::NoHandler`]: no application handler matched an event
//! - [`GatewayError::Handler`]: the application handler failed (cause preserved)
//! - [`GatewayError::Capacity`]: the pool refused a registration
//! - [`GatewayError::Protocol`]: any other sub-protocol violation
//! - [`GatewayError::BinaryUnsupported`]: binary frame on a sub-protocol connection
//!
//! # Example
//!
//! ```rust,ignore
//! match connection.on_text(text).await {
//!     Err(e) if e.closes_connection() => transport.force_close(e.close_code(), &e.to_string()),
//!     Err(e) => transport.send(serializer.error(&e))?,
//!     Ok(()) => {}
//! }
//! ```

use crate::core::events::EventKind;
use axum::http::StatusCode;
use serde::Serialize;

/// WebSocket close code for protocol violations
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// WebSocket close code for server-side failures
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// WebSocket close code used when the pool is full
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// WebSocket close code for an orderly close
pub const CLOSE_NORMAL: u16 = 1000;

/// The main error type for the gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or missing required frame header
    #[error("Malformed frame header: {0}")]
    Header(String),

    /// `UNSUBSCRIBE` referencing an id this connection never subscribed
    #[error("Unknown subscription id '{id}'")]
    UnknownSubscription { id: String },

    /// No application handler matched the event
    #[error("No handler found for {kind} event on path '{path}'")]
    NoHandler { kind: EventKind, path: String },

    /// The application handler failed; the original cause is kept as source
    #[error("Handler failed for {kind} event: {source}")]
    Handler {
        kind: EventKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The pool cannot admit another registration
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Sub-protocol violation other than a header problem
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Binary frames are rejected once a sub-protocol is negotiated
    #[error("Binary frames are not supported on sub-protocol '{protocol}'")]
    BinaryUnsupported { protocol: String },

    /// The outbound side of the transport is gone
    #[error("Transport closed")]
    TransportClosed,

    /// Invalid gateway configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error body sent to plain-mode clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// HTTP-like status of the failure
    pub status: u16,
}

impl GatewayError {
    /// Wrap a handler failure, keeping the original cause
    pub fn handler(kind: EventKind, source: anyhow::Error) -> Self {
        GatewayError::Handler {
            kind,
            source: source.into(),
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Header(_) => "HEADER_ERROR",
            GatewayError::UnknownSubscription { .. } => "UNKNOWN_SUBSCRIPTION",
            GatewayError::NoHandler { .. } => "NO_HANDLER",
            GatewayError::Handler { .. } => "HANDLER_ERROR",
            GatewayError::Capacity(_) => "CAPACITY_EXCEEDED",
            GatewayError::Protocol(_) => "PROTOCOL_ERROR",
            GatewayError::BinaryUnsupported { .. } => "BINARY_UNSUPPORTED",
            GatewayError::TransportClosed => "TRANSPORT_CLOSED",
            GatewayError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Get the HTTP-like status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Header(_)
            | GatewayError::Protocol(_)
            | GatewayError::BinaryUnsupported { .. } => StatusCode::BAD_REQUEST,
            GatewayError::UnknownSubscription { .. } => StatusCode::NOT_FOUND,
            GatewayError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoHandler { .. }
            | GatewayError::Handler { .. }
            | GatewayError::TransportClosed
            | GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// WebSocket close code used when this error ends the connection
    pub fn close_code(&self) -> u16 {
        match self {
            GatewayError::Header(_)
            | GatewayError::UnknownSubscription { .. }
            | GatewayError::Protocol(_)
            | GatewayError::BinaryUnsupported { .. } => CLOSE_PROTOCOL_ERROR,
            GatewayError::Capacity(_) => CLOSE_TRY_AGAIN_LATER,
            GatewayError::NoHandler { .. }
            | GatewayError::Handler { .. }
            | GatewayError::TransportClosed
            | GatewayError::Config(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    /// Whether the connection must be closed after reporting this error
    ///
    /// Only a rejected binary frame leaves the connection usable.
    pub fn closes_connection(&self) -> bool {
        !matches!(self, GatewayError::BinaryUnsupported { .. })
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            status: self.status_code().as_u16(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}
