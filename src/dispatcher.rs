//! Method registry and bounded, cancellable request execution (§4.3).
//!
//! The [`Dispatcher`] is built once at startup and shared read-only across
//! every [`crate::connection::Connection`]. Each dispatched request runs in
//! its own child task so a per-request timeout and an external cancellation
//! token can both race the handler without blocking the connection's read
//! loop.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::RichError;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RichError>> + Send>>;

/// A registered method handler: takes the request's decoded `params` (or
/// `Value::Null` if absent) and returns its `result` value.
pub type MethodHandler = Arc<dyn Fn(Option<Value>) -> HandlerFuture + Send + Sync>;

/// Registry of `method -> handler` bindings plus the default per-request
/// timeout (§3 "Method binding", §4.3).
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, MethodHandler>>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Bind a handler to a method name. Intended for startup-time
    /// registration only; the registry is read-only once serving begins.
    pub async fn register(
        &self,
        method: impl Into<String>,
        handler: MethodHandler,
    ) -> Result<(), RichError> {
        let method = method.into();
        if method.is_empty() {
            return Err(RichError::invalid_request("method name must not be empty"));
        }
        self.handlers.write().await.insert(method, handler);
        Ok(())
    }

    /// Register an additional name bound to an already-registered method's
    /// handler (§6 legacy aliases: `list_resources`, `read_resource`,
    /// `list_tools`, `call_tool`).
    pub async fn register_alias(
        &self,
        alias: impl Into<String>,
        canonical: &str,
    ) -> Result<(), RichError> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(canonical)
                .cloned()
                .ok_or_else(|| RichError::invalid_request(format!("no such canonical method `{canonical}`")))?
        };
        self.register(alias, handler).await
    }

    /// Dispatch a request-shaped call: looks up the handler, runs it in a
    /// child task, and enforces `timeout` and `cancel` against that task.
    /// Unregistered methods raise `MethodNotFound`.
    pub async fn dispatch_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Value, RichError> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(method).cloned()
        };
        let Some(handler) = handler else {
            return Err(RichError::method_not_found(method));
        };

        let mut join = tokio::spawn(handler(params));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                join.abort();
                Err(RichError::internal("request cancelled")
                    .with_property("method", serde_json::json!(method))
                    .with_property("reason", serde_json::json!("cancelled")))
            }
            outcome = tokio::time::timeout(timeout, &mut join) => {
                match outcome {
                    Ok(Ok(handler_result)) => handler_result,
                    Ok(Err(join_err)) => {
                        if join_err.is_panic() {
                            let panic = join_err.into_panic();
                            Err(RichError::internal(format!(
                                "handler panicked: {}",
                                panic_message(panic)
                            ))
                            .with_property("method", serde_json::json!(method)))
                        } else {
                            Err(RichError::internal("handler task was aborted")
                                .with_property("method", serde_json::json!(method)))
                        }
                    }
                    Err(_elapsed) => {
                        join.abort();
                        Err(RichError::timeout(method, timeout.as_secs_f64()))
                    }
                }
            }
        }
    }

    /// Dispatch a notification-shaped call: runs the handler if registered,
    /// but never blocks the caller on its completion and never surfaces an
    /// error back to the connection (§4.3 "notifications").
    pub async fn dispatch_notification(&self, method: &str, params: Option<Value>) {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(method).cloned()
        };
        let Some(handler) = handler else {
            tracing::debug!(target: "mcp_server_core::dispatcher", method, "dropping notification for unregistered method");
            return;
        };
        let method = method.to_string();
        tokio::spawn(async move {
            if let Err(err) = handler(params).await {
                err.log_once();
                tracing::debug!(target: "mcp_server_core::dispatcher", method, "notification handler returned an error");
            }
        });
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler_of<F, Fut>(f: F) -> MethodHandler
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RichError>> + Send + 'static,
    {
        Arc::new(move |params| Box::pin(f(params)) as HandlerFuture)
    }

    #[tokio::test]
    async fn dispatches_registered_method() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        dispatcher
            .register(
                "ping",
                handler_of(|_| async { Ok(serde_json::json!({"pong": true})) }),
            )
            .await
            .unwrap();
        let result = dispatcher
            .dispatch_request("ping", None, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"pong": true}));
    }

    #[tokio::test]
    async fn unregistered_method_is_method_not_found() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        let err = dispatcher
            .dispatch_request("nope", None, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), -32601);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        dispatcher
            .register(
                "slow",
                handler_of(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                }),
            )
            .await
            .unwrap();
        let err = dispatcher
            .dispatch_request("slow", None, Duration::from_millis(20), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), -32005);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_internal_error() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        dispatcher
            .register("boom", handler_of(|_| async { panic!("handler exploded") }))
            .await
            .unwrap();
        let err = dispatcher
            .dispatch_request("boom", None, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), -32603);
    }

    #[tokio::test]
    async fn cancellation_token_aborts_in_flight_handler() {
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        dispatcher
            .register(
                "slow",
                handler_of(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                }),
            )
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });
        let err = dispatcher
            .dispatch_request("slow", None, Duration::from_secs(5), cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), -32603);
    }

    #[tokio::test]
    async fn notification_drops_silently_when_unregistered() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        dispatcher.dispatch_notification("unknown/event", None).await;
    }

    #[tokio::test]
    async fn notification_runs_handler_without_blocking_caller() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        dispatcher
            .register(
                "notifications/initialized",
                handler_of(move |_| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
            )
            .await
            .unwrap();
        dispatcher
            .dispatch_notification("notifications/initialized", None)
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn alias_dispatches_to_same_handler_as_canonical() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        dispatcher
            .register(
                "tools/list",
                handler_of(|_| async { Ok(serde_json::json!({"tools": []})) }),
            )
            .await
            .unwrap();
        dispatcher.register_alias("list_tools", "tools/list").await.unwrap();
        let result = dispatcher
            .dispatch_request("list_tools", None, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"tools": []}));
    }
}
