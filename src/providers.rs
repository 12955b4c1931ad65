//! Resource and tool provider collaborator interfaces (§6).
//!
//! Providers are backend integrations outside the connection core's scope;
//! only the shape of their interface to the core lives here, mirrored on the
//! `async_trait` collaborator traits the teacher uses for pluggable
//! backends (e.g. its tenant-authorization interface).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RichError;

/// A resource a `resources/list` call advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A tool a `tools/list` call advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// The content of a read resource, prior to wire wrapping in
/// `{ content, mimeType }` (§6).
#[derive(Debug, Clone)]
pub struct ResourceContent {
    pub content: String,
    pub mime_type: String,
}

/// Backend collaborator for `resources/list`, `resources/read`, and
/// `resources/subscribe`. Out of scope for the core itself (§1); only this
/// interface is consumed by the built-in handlers in [`crate::handlers`].
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<ResourceDefinition>, RichError>;
    async fn read(&self, uri: &str, args: &Value) -> Result<ResourceContent, RichError>;

    /// Accept a subscription request. Push delivery of subsequent updates is
    /// a provider concern and out of scope here (§1 Non-goals).
    async fn subscribe(&self, uri: &str) -> Result<(), RichError>;
}

/// Backend collaborator for `tools/list` and `tools/call`.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<ToolDefinition>, RichError>;
    async fn call(&self, name: &str, args: &Value) -> Result<String, RichError>;
}
