//! Gateway host shared by every connection
//!
//! The host bundles the state a connection worker needs: configuration, the
//! connection pool and the dispatcher. It is built once and handed to the
//! WebSocket exposure behind an `Arc`.

use crate::config::GatewayConfig;
use crate::core::handler::HandlerRegistry;
use crate::server::dispatcher::Dispatcher;
use crate::server::pool::ChannelPool;
use anyhow::Result;
use std::sync::Arc;

/// Host context containing all gateway state
///
/// # Example
///
/// ```rust,ignore
/// let host = GatewayHost::from_builder_components(config, Arc::new(handlers))?;
///
/// let host = Arc::new(host);
/// let ws_app = WebSocketExposure::build_router(host.clone())?;
/// ```
pub struct GatewayHost {
    /// Gateway configuration
    pub config: Arc<GatewayConfig>,

    /// Registry of live connections and channel memberships
    pub pool: Arc<ChannelPool>,

    /// Bridge to application handlers
    pub dispatcher: Arc<Dispatcher>,
}

impl GatewayHost {
    /// Create a host from a configuration and a handler registry
    pub fn new(config: GatewayConfig, handlers: Arc<dyn HandlerRegistry>) -> Self {
        let pool = Arc::new(ChannelPool::with_limits(config.pool_limits()));
        let dispatcher = Arc::new(Dispatcher::new(handlers).with_timeout(config.handler_timeout()));
        Self {
            config: Arc::new(config),
            pool,
            dispatcher,
        }
    }

    /// Build the host from builder components
    ///
    /// Validates the configuration before any state is created.
    pub fn from_builder_components(
        config: GatewayConfig,
        handlers: Arc<dyn HandlerRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config, handlers))
    }

    /// Get the connection pool
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Get the configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handler_table::HandlerTable;

    #[test]
    fn test_from_builder_components_validates_config() {
        let mut config = GatewayConfig::default_config();
        config.mount_path = "ws".to_string();

        let result = GatewayHost::from_builder_components(config, Arc::new(HandlerTable::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pool_uses_configured_limits() {
        let mut config = GatewayConfig::default_config();
        config.limits.max_connections = Some(0);

        let host = GatewayHost::new(config, Arc::new(HandlerTable::new()));
        let (handle, _rx) = crate::server::pool::ClientHandle::new(None, None);
        assert!(host.pool().join(handle).await.is_err());
        assert_eq!(host.config().mount_path, "/ws");
    }
}
