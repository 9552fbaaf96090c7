//! Application handler boundary
//!
//! The gateway never runs application logic itself. It asks a
//! [`HandlerRegistry`] for the handler bound to an (event kind, path) pair
//! and invokes it with a [`ConnectionContext`] and the [`Event`].
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway::prelude::*;
//!
//! let mut handlers = HandlerTable::new();
//! handlers.on_message(
//!     "/chat/{room}",
//!     handler_fn(|ctx, event| async move {
//!         let room = event.param("room").unwrap_or("lobby").to_string();
//!         if let Some(payload) = event.payload {
//!             ctx.pool().broadcast(&format!("/chat/{room}"), payload).await;
//!         }
//!         Ok(None)
//!     }),
//! )?;
//! ```

use crate::core::events::{Event, EventKind, Payload};
use crate::core::serializer::ResponseSerializer;
use crate::server::pool::ChannelPool;
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::future::Future;
use std::sync::Arc;

/// View of a connection handed to handlers
///
/// Cheap to clone. Gives handlers the connection identity and access to the
/// shared pool so they can fan out to channels.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Identifier the pool assigned to the connection
    pub id: String,
    /// Path the connection is currently bound to
    pub path: Option<String>,
    /// Negotiated sub-protocol, `None` in plain mode
    pub protocol: Option<String>,
    pool: Arc<ChannelPool>,
    serializer: Arc<dyn ResponseSerializer>,
}

impl ConnectionContext {
    /// Create a context
    pub fn new(
        id: String,
        path: Option<String>,
        protocol: Option<String>,
        pool: Arc<ChannelPool>,
        serializer: Arc<dyn ResponseSerializer>,
    ) -> Self {
        Self {
            id,
            path,
            protocol,
            pool,
            serializer,
        }
    }

    /// The shared connection pool
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// The serializer selected for this connection
    pub fn serializer(&self) -> &dyn ResponseSerializer {
        self.serializer.as_ref()
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("protocol", &self.protocol)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

/// An application handler
///
/// Returning `Ok(Some(payload))` sends the payload back to the connection
/// through its serializer. Any error ends the connection.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event
    async fn process(&self, ctx: &ConnectionContext, event: &Event) -> Result<Option<Payload>>;
}

/// A handler resolved for an event
#[derive(Clone)]
pub struct HandlerMatch {
    /// The handler to invoke
    pub handler: Arc<dyn EventHandler>,
    /// Values captured by the path template
    pub params: IndexMap<String, String>,
}

/// Lookup of application handlers
pub trait HandlerRegistry: Send + Sync {
    /// Find the most specific handler for an event on a path
    fn find(&self, kind: EventKind, path: Option<&str>) -> Option<HandlerMatch>;
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(ConnectionContext, Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Payload>>> + Send,
{
    async fn process(&self, ctx: &ConnectionContext, event: &Event) -> Result<Option<Payload>> {
        (self.f)(ctx.clone(), event.clone()).await
    }
}

/// Wrap an async closure into a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(ConnectionContext, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Payload>>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
