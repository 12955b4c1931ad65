//! Error taxonomy for the MCP connection core
//!
//! This module defines [`RichError`], the single error abstraction that
//! flows through the transport, envelope, dispatcher, and connection-manager
//! layers. It carries a stable numeric wire code, a category tag used for
//! server-side routing and logging, an optional cause chain, and an ordered
//! property map of structured context.
//!
//! `RichError` is deliberately its own type rather than a wrapper around a
//! general-purpose "errors with backtraces" crate: the only behavior the
//! core needs is "preserve the cause for logging, never surface it on the
//! wire". `Display`/`source()` come from `#[derive(thiserror::Error)]`; see
//! [`RichError::log_once`] and [`RichError::to_error_object`] for the parts
//! that are specific to this module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keywords whose presence in a property key (case-insensitive substring)
/// mark the value as sensitive; such properties are dropped from the wire
/// projection but retained in the server-side log.
const SENSITIVE_KEYWORDS: &[&str] = &[
    "token",
    "password",
    "secret",
    "key",
    "auth",
    "credential",
    "session",
    "cookie",
];

/// Internal-only property keys that are never projected to the wire,
/// regardless of sensitivity.
const INTERNAL_KEYS: &[&str] = &["category", "code", "stack"];

/// The kind of a [`RichError`], one-to-one with a canonical JSON-RPC error
/// code (see [`ErrorKind::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ResourceNotFound,
    ToolNotFound,
    InvalidArguments,
    AuthError,
    RTMError,
    TimeoutError,
}

impl ErrorKind {
    /// The canonical JSON-RPC / MCP wire code for this kind (§7 of the spec).
    pub fn code(self) -> i64 {
        match self {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::InternalError => -32603,
            ErrorKind::ResourceNotFound => -32000,
            ErrorKind::ToolNotFound => -32001,
            ErrorKind::InvalidArguments => -32002,
            ErrorKind::AuthError => -32003,
            ErrorKind::RTMError => -32004,
            ErrorKind::TimeoutError => -32005,
        }
    }

    /// The fixed, user-facing message keyed by this kind. Never the raw
    /// internal message and never a cause's message (§4.5 "Projection to the
    /// wire").
    pub fn wire_message(self) -> &'static str {
        match self {
            ErrorKind::ParseError => "Parse error",
            ErrorKind::InvalidRequest => "Invalid request format",
            ErrorKind::MethodNotFound => "Method not found",
            ErrorKind::InvalidParams => "Invalid params",
            ErrorKind::InternalError => "Internal error",
            ErrorKind::ResourceNotFound => "Resource not found",
            ErrorKind::ToolNotFound => "Tool not found",
            ErrorKind::InvalidArguments => "Invalid arguments",
            ErrorKind::AuthError => "Authentication error",
            ErrorKind::RTMError => "Upstream error",
            ErrorKind::TimeoutError => "Request timed out",
        }
    }

    /// Whether this kind should escalate the owning connection to the
    /// `Error` state (§4.4 "a severe handler error", §7). A handler timeout
    /// or a provider's upstream (`RTMError`) failure is reported to the
    /// caller and leaves the connection `Connected`; only an internal
    /// failure is severe enough to tear the connection down. Transport-level
    /// read/write deadlines escalate too, but that's a property of *where*
    /// the timeout occurred, not of `TimeoutError` itself — see
    /// `Connection::run`.
    pub fn is_severe(self) -> bool {
        matches!(self, ErrorKind::InternalError)
    }
}

/// Routing/logging category for a [`RichError`], independent of its wire
/// code. Several kinds can share a category (e.g. `ResourceNotFound` and
/// `ToolNotFound` both live under `resource`/`tool`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Rpc,
    Resource,
    Tool,
    Auth,
    Config,
    Rtm,
}

/// The structured, server-internal error type used throughout the connection
/// core.
///
/// Construct with a kind-specific constructor (e.g. [`RichError::timeout`]),
/// attach context with [`RichError::with_property`], and wrap an upstream
/// failure with [`RichError::wrap`]. Convert to a wire [`ErrorObject`] with
/// [`RichError::to_error_object`] only at the outermost boundary (the
/// connection manager).
#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct RichError {
    kind: ErrorKind,
    category: ErrorCategory,
    message: String,
    #[source]
    cause: Option<Box<RichError>>,
    /// Ordered so sensitivity filtering and logged output are deterministic.
    properties: Vec<(String, serde_json::Value)>,
}

impl RichError {
    /// Construct a new `RichError` with an internal (non-wire) message.
    pub fn new(kind: ErrorKind, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            kind,
            category,
            message: message.into(),
            cause: None,
            properties: Vec::new(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, ErrorCategory::Rpc, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, ErrorCategory::Rpc, message)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        let method = method.into();
        Self::new(
            ErrorKind::MethodNotFound,
            ErrorCategory::Rpc,
            format!("no handler registered for method `{method}`"),
        )
        .with_property("method", serde_json::Value::String(method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, ErrorCategory::Rpc, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, ErrorCategory::Rpc, message)
    }

    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self::new(
            ErrorKind::ResourceNotFound,
            ErrorCategory::Resource,
            format!("no resource at uri `{uri}`"),
        )
        .with_property("uri", serde_json::Value::String(uri))
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorKind::ToolNotFound,
            ErrorCategory::Tool,
            format!("no tool named `{name}`"),
        )
        .with_property("tool", serde_json::Value::String(name))
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, ErrorCategory::Tool, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, ErrorCategory::Auth, message)
    }

    pub fn rtm(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RTMError, ErrorCategory::Rtm, message)
    }

    pub fn timeout(method: impl Into<String>, timeout_secs: f64) -> Self {
        let method = method.into();
        Self::new(
            ErrorKind::TimeoutError,
            ErrorCategory::Rpc,
            format!("method `{method}` exceeded its {timeout_secs}s deadline"),
        )
        .with_property("method", serde_json::Value::String(method))
        .with_property(
            "timeout_seconds",
            serde_json::Value::from(timeout_secs),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Attach a property. Chainable; last write for a given key wins only
    /// insofar as callers avoid duplicate keys (order is preserved either
    /// way since the projection is a simple linear scan).
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.push((key.into(), value));
        self
    }

    /// Wrap an upstream failure, preserving it in the cause chain for
    /// logging. The cause's message never leaks into `self.message` or the
    /// wire projection.
    pub fn wrap(mut self, cause: RichError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// `true` when this error's kind should escalate the owning connection
    /// to the `Error` state (§4.4).
    pub fn is_severe(&self) -> bool {
        self.kind.is_severe()
    }

    /// Project this error onto a wire [`ErrorObject`], filtering sensitive
    /// and internal-only properties (§4.5 "Projection to the wire").
    pub fn to_error_object(&self) -> ErrorObject {
        let mut data = serde_json::Map::new();
        for (key, value) in &self.properties {
            if is_sensitive_key(key) || INTERNAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            data.insert(key.clone(), value.clone());
        }
        ErrorObject {
            code: self.kind.code(),
            message: self.kind.wire_message().to_string(),
            data: if data.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(data))
            },
        }
    }

    /// Log the full chain (internal message, cause, and all properties,
    /// including sensitive ones) exactly once, at the error boundary. Callers
    /// further down the stack must propagate rather than re-log.
    pub fn log_once(&self) {
        tracing::error!(
            target: "mcp_server_core::error",
            kind = ?self.kind,
            category = ?self.category,
            message = %self.message,
            properties = ?self.properties,
            cause = ?self.cause.as_ref().map(|c| c.to_string()),
            "rich error surfaced at boundary"
        );
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// The on-the-wire JSON-RPC 2.0 Error Object (§3 "Error Object").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Convenience alias used throughout the crate for fallible library-level
/// operations that surface a [`RichError`] (as opposed to `anyhow::Result`,
/// which is reserved for the outer binary and config/provider glue).
pub type Result<T> = std::result::Result<T, RichError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_canonical_table() {
        assert_eq!(ErrorKind::ParseError.code(), -32700);
        assert_eq!(ErrorKind::InvalidRequest.code(), -32600);
        assert_eq!(ErrorKind::MethodNotFound.code(), -32601);
        assert_eq!(ErrorKind::InvalidParams.code(), -32602);
        assert_eq!(ErrorKind::InternalError.code(), -32603);
        assert_eq!(ErrorKind::ResourceNotFound.code(), -32000);
        assert_eq!(ErrorKind::ToolNotFound.code(), -32001);
        assert_eq!(ErrorKind::InvalidArguments.code(), -32002);
        assert_eq!(ErrorKind::AuthError.code(), -32003);
        assert_eq!(ErrorKind::RTMError.code(), -32004);
        assert_eq!(ErrorKind::TimeoutError.code(), -32005);
    }

    #[test]
    fn sensitive_properties_are_dropped_from_wire_projection() {
        let err = RichError::auth("token rejected")
            .with_property("session_token", serde_json::json!("abc123"))
            .with_property("user_id", serde_json::json!("u-42"));
        let obj = err.to_error_object();
        let data = obj.data.expect("non-empty data");
        assert!(data.get("session_token").is_none());
        assert_eq!(data.get("user_id"), Some(&serde_json::json!("u-42")));
        assert_eq!(obj.message, "Authentication error");
    }

    #[test]
    fn internal_keys_never_project() {
        let err = RichError::internal("boom")
            .with_property("category", serde_json::json!("rpc"))
            .with_property("stack", serde_json::json!("..."))
            .with_property("detail", serde_json::json!("ok"));
        let obj = err.to_error_object();
        let data = obj.data.expect("non-empty data");
        assert!(data.get("category").is_none());
        assert!(data.get("stack").is_none());
        assert_eq!(data.get("detail"), Some(&serde_json::json!("ok")));
    }

    #[test]
    fn empty_properties_omit_data() {
        let err = RichError::internal("boom");
        assert!(err.to_error_object().data.is_none());
    }

    #[test]
    fn wire_message_never_leaks_internal_message_or_cause() {
        let cause = RichError::internal("disk read failed at /secret/path");
        let err = RichError::new(ErrorKind::ToolNotFound, ErrorCategory::Tool, "internal detail")
            .wrap(cause);
        let obj = err.to_error_object();
        assert_eq!(obj.message, "Tool not found");
        assert!(!obj.message.contains("internal detail"));
        assert!(!obj.message.contains("disk read failed"));
    }

    #[test]
    fn severe_kinds_match_spec() {
        assert!(ErrorKind::InternalError.is_severe());
        assert!(!ErrorKind::TimeoutError.is_severe());
        assert!(!ErrorKind::RTMError.is_severe());
        assert!(!ErrorKind::InvalidRequest.is_severe());
        assert!(!ErrorKind::ParseError.is_severe());
    }

    #[test]
    fn method_not_found_carries_method_property() {
        let err = RichError::method_not_found("does/not/exist");
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32601);
        let data = obj.data.expect("data present");
        assert_eq!(data.get("method"), Some(&serde_json::json!("does/not/exist")));
    }
}
