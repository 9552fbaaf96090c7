//! Server module: connection pool, dispatcher and the HTTP/WebSocket surface
//!
//! This module provides a `GatewayBuilder` that assembles:
//! - the shared `ChannelPool`
//! - the `Dispatcher` in front of the application's handlers
//! - the WebSocket and health routes

pub mod builder;
pub mod dispatcher;
pub mod exposure;
pub mod handler_table;
pub mod host;
pub mod pool;
pub mod transport;

pub use builder::GatewayBuilder;
pub use dispatcher::Dispatcher;
pub use handler_table::{HandlerTable, PathTemplate};
pub use host::GatewayHost;
pub use pool::{ChannelPool, ClientHandle, ConnectionInfo, Delivery, PoolLimits};
pub use transport::{ChannelTransport, Transport};
