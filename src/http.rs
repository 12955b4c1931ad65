//! Thin HTTP adapter over the connection core (§6 "HTTP transport").
//!
//! Routing, TLS, and graceful shutdown are the host's concern (§1 Non-goals);
//! this module only owns the mapping from one already-accepted HTTP request
//! body to one response body, grounded on the same `axum` request/response
//! shape the pack's reference MCP HTTP transport uses: a single shared
//! session state behind a mutex, a `POST /mcp` handler, and a status-code
//! mapping table for `RichError` kinds.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::{self, ServerInfo, State as LifecycleState, Trigger};
use crate::dispatcher::Dispatcher;
use crate::error::RichError;
use crate::rpc::envelope::{decode_params, Envelope, Id};

/// How long one HTTP request may wait on a handler before the adapter
/// synthesizes a 504 (§6 "request deadline exceeded in the HTTP transport").
pub const HTTP_REQUEST_DEADLINE: Duration = Duration::from_secs(300);

struct Session {
    state: LifecycleState,
    initialized: bool,
    client_capabilities: Option<Value>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: LifecycleState::Unconnected,
            initialized: false,
            client_capabilities: None,
        }
    }
}

/// Shared state behind the `axum::Router` built by [`build_router`].
pub struct HttpState {
    dispatcher: Arc<Dispatcher>,
    server_info: ServerInfo,
    session: Mutex<Session>,
}

impl HttpState {
    pub fn new(dispatcher: Arc<Dispatcher>, server_info: ServerInfo) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            server_info,
            session: Mutex::new(Session::new()),
        })
    }
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_mcp_post(AxumState(state): AxumState<Arc<HttpState>>, body: axum::body::Bytes) -> Response {
    let envelope = match Envelope::parse(&body) {
        Ok(e) => e,
        Err(err) => return rich_error_response(None, err),
    };

    match envelope {
        Envelope::Request { id, method, params } => handle_request(&state, id, method, params).await,
        Envelope::Notification { method, params } => {
            handle_notification(&state, method, params).await;
            StatusCode::OK.into_response()
        }
        Envelope::Response { .. } => {
            (StatusCode::BAD_REQUEST, "unexpected response envelope on request path").into_response()
        }
    }
}

async fn handle_request(state: &HttpState, id: Id, method: String, params: Option<Value>) -> Response {
    let Some(trigger) = connection::method_trigger(&method) else {
        return rich_error_response(Some(id), RichError::method_not_found(&method));
    };

    let (current_state, initialized) = {
        let session = state.session.lock().await;
        (session.state, session.initialized)
    };

    if !connection::is_admissible(current_state, initialized, trigger) {
        let err = RichError::invalid_request(format!(
            "method `{method}` is not admissible in state `{}`",
            current_state.name()
        ))
        .with_property("current_state", serde_json::json!(current_state.name()));
        return rich_error_response(Some(id), err);
    }

    match trigger {
        Trigger::Initialize => handle_initialize(state, id, params).await,
        Trigger::Ping => success_response(id, serde_json::json!({"pong": true})),
        Trigger::Shutdown => {
            let mut session = state.session.lock().await;
            session.state = connection::transition(session.state, Trigger::Shutdown);
            success_response(id, serde_json::json!({"acknowledged": true}))
        }
        _ => {
            let cancel = CancellationToken::new();
            let outcome = tokio::time::timeout(
                HTTP_REQUEST_DEADLINE,
                state
                    .dispatcher
                    .dispatch_request(&method, params, state.dispatcher.default_timeout(), cancel),
            )
            .await;
            match outcome {
                Ok(Ok(value)) => success_response(id, value),
                Ok(Err(err)) => {
                    if err.is_severe() {
                        let mut session = state.session.lock().await;
                        session.state = connection::transition(session.state, Trigger::ErrorOccurred);
                    }
                    rich_error_response(Some(id), err)
                }
                Err(_elapsed) => synthetic_timeout_response(),
            }
        }
    }
}

async fn handle_initialize(state: &HttpState, id: Id, params: Option<Value>) -> Response {
    #[derive(serde::Deserialize)]
    struct InitializeParams {
        #[serde(rename = "protocolVersion")]
        protocol_version: Option<String>,
        capabilities: Option<Value>,
    }

    {
        let mut session = state.session.lock().await;
        session.state = connection::transition(session.state, Trigger::Initialize);
    }

    let decoded: Result<InitializeParams, RichError> = decode_params(params.as_ref());
    let decoded = match decoded {
        Ok(p) => p,
        Err(err) => {
            let mut session = state.session.lock().await;
            session.state = connection::transition(session.state, Trigger::InitFailure);
            return rich_error_response(Some(id), err);
        }
    };

    let protocol_version = decoded.protocol_version.clone().unwrap_or_default();
    if !connection::PROTOCOL_VERSION_WHITELIST.contains(&protocol_version.as_str()) {
        let mut session = state.session.lock().await;
        session.state = connection::transition(session.state, Trigger::InitFailure);
        let err = RichError::invalid_request(format!("unsupported protocolVersion `{protocol_version}`"))
            .with_property("protocol_version", serde_json::json!(protocol_version));
        return rich_error_response(Some(id), err);
    }

    let result = {
        let mut session = state.session.lock().await;
        session.client_capabilities = decoded.capabilities.clone();
        session.initialized = true;
        session.state = connection::transition(session.state, Trigger::InitSuccess);
        serde_json::json!({
            "serverInfo": { "name": state.server_info.name, "version": state.server_info.version },
            "capabilities": decoded.capabilities.unwrap_or(serde_json::json!({})),
            "protocolVersion": protocol_version,
        })
    };
    success_response(id, result)
}

async fn handle_notification(state: &HttpState, method: String, params: Option<Value>) {
    let Some(trigger) = connection::method_trigger(&method) else {
        state.dispatcher.dispatch_notification(&method, params).await;
        return;
    };
    let mut session = state.session.lock().await;
    if trigger == Trigger::InitializedNotification
        && connection::is_admissible(session.state, session.initialized, trigger)
    {
        session.state = connection::transition(session.state, trigger);
    }
}

fn success_response(id: Id, result: Value) -> Response {
    let envelope = Envelope::response_result(id, result);
    (StatusCode::OK, envelope.to_bytes()).into_response()
}

fn rich_error_response(id: Option<Id>, err: RichError) -> Response {
    let status = status_for(&err);
    err.log_once();
    let object = err.to_error_object();
    let envelope = Envelope::response_error(id.unwrap_or(Id::Null), object);
    (status, envelope.to_bytes()).into_response()
}

/// §6 "HTTP status mapping".
fn status_for(err: &RichError) -> StatusCode {
    use crate::error::ErrorKind::*;
    match err.kind() {
        ParseError | InvalidRequest | InvalidParams => StatusCode::BAD_REQUEST,
        MethodNotFound | ResourceNotFound => StatusCode::NOT_FOUND,
        AuthError => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn synthetic_timeout_response() -> Response {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "error": { "code": -32603, "message": "request timed out" },
        "id": Value::Null,
    });
    (StatusCode::GATEWAY_TIMEOUT, serde_json::to_vec(&body).unwrap()).into_response()
}
