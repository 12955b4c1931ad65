//! Built-in provider-backed method handlers (§6).
//!
//! `initialize`, `ping`, `shutdown`, and the `initialized` notification are
//! handled inline by [`crate::connection::Connection`] because they mutate
//! connection-local state. Everything here is stateless with respect to any
//! one connection and is registered once, at startup, on the shared
//! [`Dispatcher`].

use std::sync::Arc;

use serde_json::Value;

use crate::dispatcher::{Dispatcher, HandlerFuture, MethodHandler};
use crate::error::RichError;
use crate::providers::{ResourceProvider, ToolProvider};

fn handler(
    f: impl Fn(Option<Value>) -> HandlerFuture + Send + Sync + 'static,
) -> MethodHandler {
    Arc::new(f)
}

/// Register `resources/list`, `resources/read`, `resources/subscribe`,
/// `tools/list`, `tools/call`, and their legacy aliases (§6).
pub async fn register_builtin_handlers(
    dispatcher: &Dispatcher,
    resources: Arc<dyn ResourceProvider>,
    tools: Arc<dyn ToolProvider>,
) -> Result<(), RichError> {
    let resources_list = resources.clone();
    dispatcher
        .register(
            "resources/list",
            handler(move |_params| {
                let resources = resources_list.clone();
                Box::pin(async move {
                    let defs = resources.list().await?;
                    Ok(serde_json::json!({ "resources": defs }))
                })
            }),
        )
        .await?;

    let resources_read = resources.clone();
    dispatcher
        .register(
            "resources/read",
            handler(move |params| {
                let resources = resources_read.clone();
                Box::pin(async move {
                    let params = params.unwrap_or(Value::Null);
                    let uri = params
                        .get("uri")
                        .and_then(Value::as_str)
                        .ok_or_else(|| RichError::invalid_params("`uri` is required"))?;
                    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                    let content = resources.read(uri, &args).await?;
                    Ok(serde_json::json!({
                        "content": content.content,
                        "mimeType": content.mime_type,
                    }))
                })
            }),
        )
        .await?;

    let resources_subscribe = resources.clone();
    dispatcher
        .register(
            "resources/subscribe",
            handler(move |params| {
                let resources = resources_subscribe.clone();
                Box::pin(async move {
                    let params = params.unwrap_or(Value::Null);
                    let uri = params
                        .get("uri")
                        .and_then(Value::as_str)
                        .ok_or_else(|| RichError::invalid_params("`uri` is required"))?;
                    resources.subscribe(uri).await?;
                    Ok(serde_json::json!({ "status": "subscribed" }))
                })
            }),
        )
        .await?;

    let tools_list = tools.clone();
    dispatcher
        .register(
            "tools/list",
            handler(move |_params| {
                let tools = tools_list.clone();
                Box::pin(async move {
                    let defs = tools.list().await?;
                    Ok(serde_json::json!({ "tools": defs }))
                })
            }),
        )
        .await?;

    let tools_call = tools.clone();
    dispatcher
        .register(
            "tools/call",
            handler(move |params| {
                let tools = tools_call.clone();
                Box::pin(async move {
                    let params = params.unwrap_or(Value::Null);
                    let name = params
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| RichError::invalid_params("`name` is required"))?;
                    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                    let result = tools.call(name, &arguments).await?;
                    Ok(serde_json::json!({ "result": result }))
                })
            }),
        )
        .await?;

    dispatcher.register_alias("list_resources", "resources/list").await?;
    dispatcher.register_alias("read_resource", "resources/read").await?;
    dispatcher.register_alias("list_tools", "tools/list").await?;
    dispatcher.register_alias("call_tool", "tools/call").await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EmptyResources;

    #[async_trait]
    impl ResourceProvider for EmptyResources {
        async fn list(&self) -> Result<Vec<crate::providers::ResourceDefinition>, RichError> {
            Ok(vec![])
        }

        async fn read(
            &self,
            uri: &str,
            _args: &Value,
        ) -> Result<crate::providers::ResourceContent, RichError> {
            Err(RichError::resource_not_found(uri))
        }

        async fn subscribe(&self, _uri: &str) -> Result<(), RichError> {
            Ok(())
        }
    }

    struct EchoTools;

    #[async_trait]
    impl ToolProvider for EchoTools {
        async fn list(&self) -> Result<Vec<crate::providers::ToolDefinition>, RichError> {
            Ok(vec![crate::providers::ToolDefinition {
                name: "echo".into(),
                description: None,
                input_schema: None,
            }])
        }

        async fn call(&self, name: &str, args: &Value) -> Result<String, RichError> {
            if name != "echo" {
                return Err(RichError::tool_not_found(name));
            }
            Ok(args.to_string())
        }
    }

    #[tokio::test]
    async fn resources_read_missing_uri_is_invalid_params() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        register_builtin_handlers(&dispatcher, Arc::new(EmptyResources), Arc::new(EchoTools))
            .await
            .unwrap();
        let err = dispatcher
            .dispatch_request(
                "resources/read",
                Some(serde_json::json!({})),
                Duration::from_secs(1),
                tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), -32602);
    }

    #[tokio::test]
    async fn tools_call_routes_to_provider_and_wraps_result() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        register_builtin_handlers(&dispatcher, Arc::new(EmptyResources), Arc::new(EchoTools))
            .await
            .unwrap();
        let result = dispatcher
            .dispatch_request(
                "tools/call",
                Some(serde_json::json!({"name": "echo", "arguments": {"x": 1}})),
                Duration::from_secs(1),
                tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["result"], serde_json::json!({"x": 1}).to_string());
    }

    #[tokio::test]
    async fn legacy_alias_list_tools_matches_canonical() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        register_builtin_handlers(&dispatcher, Arc::new(EmptyResources), Arc::new(EchoTools))
            .await
            .unwrap();
        let result = dispatcher
            .dispatch_request(
                "list_tools",
                None,
                Duration::from_secs(1),
                tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");
    }
}
