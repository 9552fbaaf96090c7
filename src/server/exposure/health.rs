//! HTTP health check routes

use crate::server::host::GatewayHost;
use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

/// Health check exposure
pub struct HealthExposure;

impl HealthExposure {
    /// Build health check routes
    pub fn build_router(host: Arc<GatewayHost>) -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
            .with_state(host)
    }

    /// Health check endpoint handler
    async fn health_check(State(host): State<Arc<GatewayHost>>) -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "this-gateway",
            "connections": host.pool.connection_count().await,
            "memberships": host.pool.membership_count().await,
        }))
    }
}
