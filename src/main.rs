use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use mcp_server_core::cli::{Cli, Commands};
use mcp_server_core::config::ServerConfig;
use mcp_server_core::connection::{Connection, ServerInfo};
use mcp_server_core::dispatcher::Dispatcher;
use mcp_server_core::error::RichError;
use mcp_server_core::handlers::register_builtin_handlers;
use mcp_server_core::http::{build_router, HttpState};
use mcp_server_core::providers::{ResourceContent, ResourceDefinition, ResourceProvider, ToolDefinition, ToolProvider};
use mcp_server_core::transport::Transport;

/// A minimal in-memory resource backend, standing in for a real provider
/// (out of scope per §1; the core only needs something implementing the
/// trait to serve requests).
struct InMemoryResources {
    entries: HashMap<String, (String, String)>,
}

#[async_trait]
impl ResourceProvider for InMemoryResources {
    async fn list(&self) -> Result<Vec<ResourceDefinition>, RichError> {
        Ok(self
            .entries
            .keys()
            .map(|uri| ResourceDefinition {
                uri: uri.clone(),
                name: uri.clone(),
                description: None,
                mime_type: None,
            })
            .collect())
    }

    async fn read(&self, uri: &str, _args: &Value) -> Result<ResourceContent, RichError> {
        let (content, mime_type) = self
            .entries
            .get(uri)
            .cloned()
            .ok_or_else(|| RichError::resource_not_found(uri))?;
        Ok(ResourceContent { content, mime_type })
    }

    async fn subscribe(&self, _uri: &str) -> Result<(), RichError> {
        Ok(())
    }
}

struct EchoTools;

#[async_trait]
impl ToolProvider for EchoTools {
    async fn list(&self) -> Result<Vec<ToolDefinition>, RichError> {
        Ok(vec![ToolDefinition {
            name: "echo".to_string(),
            description: Some("echoes its arguments back as a JSON string".to_string()),
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

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config = ServerConfig::load(cli.config.as_deref())?;
    config.validate()?;

    let dispatcher = Arc::new(Dispatcher::new(config.request_timeout()));
    let resources: Arc<dyn ResourceProvider> = Arc::new(InMemoryResources {
        entries: HashMap::from([(
            "memo://welcome".to_string(),
            ("welcome to the connection core".to_string(), "text/plain".to_string()),
        )]),
    });
    let tools: Arc<dyn ToolProvider> = Arc::new(EchoTools);
    register_builtin_handlers(&dispatcher, resources, tools).await?;

    let server_info = ServerInfo {
        name: config.server_info.name.clone(),
        version: config.server_info.version.clone(),
    };

    match cli.command {
        Commands::Stdio => {
            tracing::info!(target: "mcp_server_core::main", dialect = ?config.transport, "serving over stdio");
            let transport = Transport::with_deadlines(
                tokio::io::stdin(),
                tokio::io::stdout(),
                config.transport.into(),
                config.request_timeout(),
                config.request_timeout(),
            );
            Connection::new("stdio", transport, dispatcher, server_info).run().await;
        }
        Commands::Http { bind } => {
            tracing::info!(target: "mcp_server_core::main", %bind, "serving over http");
            let state = HttpState::new(dispatcher, server_info);
            let router = build_router(state);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            axum::serve(listener, router).await?;
        }
    }

    Ok(())
}
