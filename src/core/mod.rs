//! Core module containing the fundamental types of the gateway

pub mod error;
pub mod events;
pub mod handler;
pub mod serializer;

pub use error::{ErrorResponse, GatewayError};
pub use events::{Event, EventKind, HeaderBag, Payload};
pub use handler::{ConnectionContext, EventHandler, HandlerMatch, HandlerRegistry, handler_fn};
pub use serializer::{MessageMeta, Outbound, ResponseSerializer};
