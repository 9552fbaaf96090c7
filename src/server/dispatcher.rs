//! Bridge between connection events and application handlers
//!
//! The dispatcher resolves exactly one handler for an event and runs it.
//! Whatever goes wrong inside the handler (an error, a panic, a timeout)
//! comes back as a [`GatewayError`] value; nothing unwinds into the
//! connection state machine or the transport.

use crate::core::error::GatewayError;
use crate::core::events::{Event, EventKind, HeaderBag, Payload};
use crate::core::handler::{ConnectionContext, HandlerRegistry};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Resolves and invokes application handlers
pub struct Dispatcher {
    handlers: Arc<dyn HandlerRegistry>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher over a handler registry
    pub fn new(handlers: Arc<dyn HandlerRegistry>) -> Self {
        Self {
            handlers,
            timeout: None,
        }
    }

    /// Bound every handler invocation by a timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dispatch one event
    ///
    /// Returns the handler's response payload, `NoHandler` when nothing
    /// matched, or `Handler` wrapping the failure cause.
    pub async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        kind: EventKind,
        path: Option<&str>,
        payload: Option<Payload>,
        headers: HeaderBag,
    ) -> Result<Option<Payload>, GatewayError> {
        let Some(found) = self.handlers.find(kind, path) else {
            return Err(GatewayError::NoHandler {
                kind,
                path: path.unwrap_or_default().to_string(),
            });
        };

        let mut event = Event::new(kind, path.map(str::to_string), payload, headers);
        event.params = found.params;

        tracing::debug!(connection_id = %ctx.id, kind = %kind, path = ?path, "Dispatching event");

        let invocation = AssertUnwindSafe(found.handler.process(ctx, &event)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(GatewayError::handler(
                        kind,
                        anyhow::anyhow!("handler timed out after {:?}", limit),
                    ));
                }
            },
            None => invocation.await,
        };

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(GatewayError::handler(kind, source)),
            Err(panic) => Err(GatewayError::handler(
                kind,
                anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::handler_fn;
    use crate::server::exposure::websocket::serializer::PlainSerializer;
    use crate::server::handler_table::HandlerTable;
    use crate::server::pool::ChannelPool;
    use std::error::Error;

    fn context(path: Option<&str>) -> ConnectionContext {
        ConnectionContext::new(
            "conn_test".to_string(),
            path.map(str::to_string),
            None,
            Arc::new(ChannelPool::new()),
            Arc::new(PlainSerializer),
        )
    }

    fn dispatcher(table: HandlerTable) -> Dispatcher {
        Dispatcher::new(Arc::new(table))
    }

    #[tokio::test]
    async fn test_dispatch_returns_response() {
        let mut table = HandlerTable::new();
        table
            .on_message(
                "/echo",
                handler_fn(|_ctx, event| async move { Ok(event.payload) }),
            )
            .unwrap();

        let response = dispatcher(table)
            .dispatch(
                &context(Some("/echo")),
                EventKind::Message,
                Some("/echo"),
                Some(Payload::from("ping")),
                HeaderBag::new(),
            )
            .await
            .unwrap();
        assert_eq!(response, Some(Payload::from("ping")));
    }

    #[tokio::test]
    async fn test_dispatch_passes_params_and_headers() {
        let mut table = HandlerTable::new();
        table
            .on_message(
                "/chat/{room}",
                handler_fn(|_ctx, event| async move {
                    let room = event.param("room").unwrap_or_default().to_string();
                    let origin = event.header("Origin").unwrap_or_default().to_string();
                    Ok(Some(Payload::from(format!("{room}@{origin}"))))
                }),
            )
            .unwrap();

        let mut headers = HeaderBag::new();
        headers.insert("Origin".to_string(), "example.org".to_string());

        let response = dispatcher(table)
            .dispatch(
                &context(Some("/chat/lobby")),
                EventKind::Message,
                Some("/chat/lobby"),
                None,
                headers,
            )
            .await
            .unwrap();
        assert_eq!(response, Some(Payload::from("lobby@example.org")));
    }

    #[tokio::test]
    async fn test_no_handler() {
        let err = dispatcher(HandlerTable::new())
            .dispatch(
                &context(Some("/x")),
                EventKind::Message,
                Some("/x"),
                None,
                HeaderBag::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::NoHandler { kind: EventKind::Message, ref path } if path == "/x"
        ));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let mut table = HandlerTable::new();
        table.register_fallback(
            EventKind::Message,
            handler_fn(|_ctx, _event| async move { Err(anyhow::anyhow!("database down")) }),
        );

        let err = dispatcher(table)
            .dispatch(&context(None), EventKind::Message, None, None, HeaderBag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Handler { .. }));
        assert_eq!(err.source().unwrap().to_string(), "database down");
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let mut table = HandlerTable::new();
        table.register_fallback(
            EventKind::Message,
            handler_fn(|_ctx, _event| async move {
                if true {
                    panic!("handler exploded");
                }
                Ok(None)
            }),
        );

        let err = dispatcher(table)
            .dispatch(&context(None), EventKind::Message, None, None, HeaderBag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let mut table = HandlerTable::new();
        table.register_fallback(
            EventKind::Message,
            handler_fn(|_ctx, _event| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }),
        );

        let err = dispatcher(table)
            .with_timeout(Some(Duration::from_millis(20)))
            .dispatch(&context(None), EventKind::Message, None, None, HeaderBag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
