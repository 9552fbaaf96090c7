//! Exposure modules
//!
//! Each exposure consumes a `GatewayHost` and produces a Router.

pub mod health;
pub mod websocket;

// Re-export for convenience
pub use health::HealthExposure;
pub use websocket::WebSocketExposure;
