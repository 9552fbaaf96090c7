//! GatewayBuilder for fluent API to build the gateway server

use super::exposure::{HealthExposure, WebSocketExposure};
use super::host::GatewayHost;
use crate::config::GatewayConfig;
use crate::core::handler::HandlerRegistry;
use crate::server::handler_table::HandlerTable;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Builder for the gateway server
///
/// # Example
///
/// ```ignore
/// let mut handlers = HandlerTable::new();
/// handlers.on_message("/echo", handler_fn(|_ctx, event| async move { Ok(event.payload) }))?;
///
/// GatewayBuilder::new()
///     .with_config(GatewayConfig::from_yaml_file("gateway.yaml")?)
///     .with_handlers(handlers)
///     .serve("127.0.0.1:3000")
///     .await?;
/// ```
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    handlers: Option<Arc<dyn HandlerRegistry>>,
    custom_routes: Vec<Router>,
}

impl GatewayBuilder {
    /// Create a new GatewayBuilder
    pub fn new() -> Self {
        Self {
            config: None,
            handlers: None,
            custom_routes: Vec::new(),
        }
    }

    /// Set the configuration (defaults to [`GatewayConfig::default_config`])
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the handler registry
    ///
    /// Without one, every `MESSAGE` event fails with a missing-handler error.
    pub fn with_handlers(mut self, handlers: impl HandlerRegistry + 'static) -> Self {
        self.handlers = Some(Arc::new(handlers));
        self
    }

    /// Add custom HTTP routes next to the gateway routes
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the gateway host
    pub fn build_host(mut self) -> Result<GatewayHost> {
        let config = self.config.take().unwrap_or_default();
        let handlers = self
            .handlers
            .take()
            .unwrap_or_else(|| Arc::new(HandlerTable::new()));

        GatewayHost::from_builder_components(config, handlers)
    }

    /// Build the final router
    ///
    /// Mounts the WebSocket routes, the health routes and any custom routes,
    /// wrapped in a `TraceLayer`.
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        Self::router(host, custom_routes)
    }

    fn router(host: Arc<GatewayHost>, custom_routes: Vec<Router>) -> Result<Router> {
        let mut app = HealthExposure::build_router(host.clone())
            .merge(WebSocketExposure::build_router(host)?);

        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        Ok(app.layer(TraceLayer::new_for_http()))
    }

    /// Serve the gateway with graceful shutdown
    ///
    /// This will:
    /// - Bind to the provided address
    /// - Start serving requests
    /// - Handle SIGTERM and SIGINT (Ctrl+C) for graceful shutdown
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Gateway listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Gateway shutdown complete");
        Ok(())
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down...");
        },
    }
}
