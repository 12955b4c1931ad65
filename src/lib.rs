//! Model Context Protocol connection core.
//!
//! - [`error`] -- the `RichError` taxonomy all other layers speak through.
//! - [`rpc`] -- JSON-RPC 2.0 envelope parsing, validation, and serialization.
//! - [`transport`] -- framed, concurrency-safe transport over a byte-stream
//!   pair, in both line-delimited and header-framed dialects.
//! - [`dispatcher`] -- the method registry and bounded, cancellable
//!   execution layer.
//! - [`connection`] -- the per-connection lifecycle state machine and
//!   request loop.
//! - [`providers`] -- the `ResourceProvider`/`ToolProvider` collaborator
//!   interfaces consumed by [`handlers`].
//! - [`handlers`] -- built-in provider-backed method handlers.
//! - [`http`] -- a thin `axum` adapter over the core, for the HTTP transport.
//! - [`config`] -- server configuration.
//! - [`cli`] -- the binary's command-line surface.

pub mod cli;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod http;
pub mod providers;
pub mod rpc;
pub mod transport;

pub use connection::{Connection, ServerInfo};
pub use dispatcher::Dispatcher;
pub use error::{ErrorCategory, ErrorKind, ErrorObject, RichError};
