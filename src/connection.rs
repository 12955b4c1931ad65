//! Per-connection lifecycle state machine and request loop (§4.4).
//!
//! A [`Connection`] owns exactly one transport stream. It handles the
//! lifecycle methods (`initialize`, `ping`, `shutdown`, `initialized`)
//! inline, since they mutate connection-local state that the shared
//! [`crate::dispatcher::Dispatcher`] has no business touching, and routes
//! every other admitted method to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::{ErrorObject, RichError};
use crate::rpc::envelope::{decode_params, Envelope, Id};
use crate::transport::{ReadOutcome, Transport};

/// The set of lifecycle states a [`Connection`] can occupy (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconnected,
    Initializing,
    Connected,
    Terminating,
    Error,
}

impl State {
    /// The lowercase name used in `InvalidRequest`'s `current_state`
    /// property (§8 scenario 3).
    pub fn name(self) -> &'static str {
        match self {
            State::Unconnected => "unconnected",
            State::Initializing => "initializing",
            State::Connected => "connected",
            State::Terminating => "terminating",
            State::Error => "error",
        }
    }
}

/// The finite set of events that can move a [`Connection`] between states
/// (§4.4 "Triggers").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initialize,
    InitSuccess,
    InitFailure,
    ListResources,
    ReadResource,
    ListTools,
    CallTool,
    Ping,
    Subscribe,
    Shutdown,
    ErrorOccurred,
    Disconnect,
    ShutdownComplete,
    InitializedNotification,
}

/// Pure state transition function. Firing a trigger not admissible from
/// `state` is a no-op; admission is checked separately by [`is_admissible`]
/// before a trigger is ever fired from the request loop.
pub fn transition(state: State, trigger: Trigger) -> State {
    use Trigger::*;
    match (state, trigger) {
        (State::Unconnected, Initialize) => State::Initializing,
        (State::Initializing, InitSuccess) => State::Connected,
        (State::Initializing, InitFailure) => State::Error,
        (
            State::Connected,
            ListResources | ReadResource | ListTools | CallTool | Ping | Subscribe | InitializedNotification,
        ) => State::Connected,
        (State::Connected, Shutdown) => State::Terminating,
        (State::Connected, ErrorOccurred) => State::Error,
        (State::Terminating, ShutdownComplete) => State::Unconnected,
        (State::Terminating, Disconnect) => State::Unconnected,
        (State::Error, Disconnect) => State::Unconnected,
        (s, _) => s,
    }
}

/// Maps a method name to the trigger it would fire if admitted. Accepts
/// both canonical and legacy-aliased names (§6).
pub(crate) fn method_trigger(method: &str) -> Option<Trigger> {
    match method {
        "initialize" => Some(Trigger::Initialize),
        "ping" => Some(Trigger::Ping),
        "resources/list" | "list_resources" => Some(Trigger::ListResources),
        "resources/read" | "read_resource" => Some(Trigger::ReadResource),
        "resources/subscribe" => Some(Trigger::Subscribe),
        "tools/list" | "list_tools" => Some(Trigger::ListTools),
        "tools/call" | "call_tool" => Some(Trigger::CallTool),
        "shutdown" => Some(Trigger::Shutdown),
        "initialized" | "notifications/initialized" => Some(Trigger::InitializedNotification),
        _ => None,
    }
}

/// Whether `trigger` may fire from `state` given the connection's
/// `initialized` flag (§4.4 "From Unconnected..." / "ping is admissible...").
pub(crate) fn is_admissible(state: State, initialized: bool, trigger: Trigger) -> bool {
    match trigger {
        Trigger::Initialize => state == State::Unconnected,
        Trigger::Ping => matches!(state, State::Connected | State::Initializing),
        Trigger::InitializedNotification => state == State::Connected,
        _ => state == State::Connected && initialized,
    }
}

pub(crate) const PROTOCOL_VERSION_WHITELIST: &[&str] = &["2.0", "2024-11-05"];

/// Delay between a `shutdown` reply flushing and the connection actually
/// advancing to `Terminating` (§4.4 "Admission for the shutdown method").
const SHUTDOWN_TRANSITION_DELAY: Duration = Duration::from_millis(30);

/// Delay the `Error` state waits before auto-disconnecting absent an
/// explicit client disconnect (§4.4 "From Error").
const ERROR_AUTO_DISCONNECT_DELAY: Duration = Duration::from_secs(1);

/// Server identity echoed in `initialize`'s response (§6).
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// A single client connection: one transport stream, one lifecycle state
/// machine, sequential request processing (§4.4 "Per-connection
/// concurrency").
pub struct Connection<R, W> {
    id: String,
    transport: Transport<R, W>,
    dispatcher: Arc<Dispatcher>,
    server_info: ServerInfo,
    state: State,
    initialized: bool,
    client_capabilities: Option<Value>,
    root_cancel: CancellationToken,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: impl Into<String>,
        transport: Transport<R, W>,
        dispatcher: Arc<Dispatcher>,
        server_info: ServerInfo,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            dispatcher,
            server_info,
            state: State::Unconnected,
            initialized: false,
            client_capabilities: None,
            root_cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Drive the connection until the peer disconnects or the connection
    /// reaches a terminal `Unconnected` transition.
    pub async fn run(mut self) {
        loop {
            match self.state {
                State::Terminating => {
                    tokio::time::sleep(SHUTDOWN_TRANSITION_DELAY).await;
                    self.state = transition(self.state, Trigger::ShutdownComplete);
                    let _ = self.transport.close().await;
                    break;
                }
                State::Error => {
                    let _ = self.transport.close().await;
                    tokio::time::sleep(ERROR_AUTO_DISCONNECT_DELAY).await;
                    self.state = transition(self.state, Trigger::Disconnect);
                    break;
                }
                State::Unconnected | State::Initializing | State::Connected => {}
            }

            let read = self.transport.read(&self.root_cancel).await;
            match read {
                Ok(ReadOutcome::EndOfStream) => break,
                Err(err) => {
                    err.log_once();
                    // A transport read deadline is always `TimeoutError` here (a
                    // handler timeout never bubbles up through `transport.read`),
                    // and it means the connection itself has stalled, not just one
                    // request, so it escalates even though `TimeoutError` isn't
                    // generally severe (§7, §8 handler-timeout property).
                    let transport_deadline = err.kind() == crate::error::ErrorKind::TimeoutError;
                    if err.is_severe() || transport_deadline {
                        self.state = transition(self.state, Trigger::ErrorOccurred);
                    }
                    continue;
                }
                Ok(ReadOutcome::Message(bytes)) => {
                    self.handle_bytes(&bytes).await;
                }
            }
        }
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) {
        let envelope = match Envelope::parse(bytes) {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(target: "mcp_server_core::connection", connection = %self.id, "envelope parse failed");
                err.log_once();
                return;
            }
        };

        match envelope {
            Envelope::Request { id, method, params } => {
                self.handle_request(id, method, params).await;
            }
            Envelope::Notification { method, params } => {
                self.handle_notification(method, params).await;
            }
            Envelope::Response { .. } => {
                tracing::debug!(target: "mcp_server_core::connection", connection = %self.id, "dropping unsolicited response envelope");
            }
        }
    }

    async fn handle_request(&mut self, id: Id, method: String, params: Option<Value>) {
        let Some(trigger) = method_trigger(&method) else {
            let err = RichError::method_not_found(&method);
            err.log_once();
            self.send_error(id, err).await;
            return;
        };

        if !is_admissible(self.state, self.initialized, trigger) {
            let err = RichError::invalid_request(format!(
                "method `{method}` is not admissible in state `{}`",
                self.state.name()
            ))
            .with_property("current_state", serde_json::json!(self.state.name()));
            self.send_error(id, err).await;
            return;
        }

        match trigger {
            Trigger::Initialize => self.handle_initialize(id, params).await,
            Trigger::Ping => self.handle_ping(id).await,
            Trigger::Shutdown => self.handle_shutdown(id).await,
            _ => self.handle_provider_method(id, &method, params).await,
        }
    }

    async fn handle_notification(&mut self, method: String, params: Option<Value>) {
        let Some(trigger) = method_trigger(&method) else {
            self.dispatcher.dispatch_notification(&method, params).await;
            return;
        };
        if trigger == Trigger::InitializedNotification && is_admissible(self.state, self.initialized, trigger) {
            self.state = transition(self.state, trigger);
            return;
        }
        tracing::debug!(target: "mcp_server_core::connection", connection = %self.id, method, "notification not admissible in current state, dropping");
    }

    async fn handle_initialize(&mut self, id: Id, params: Option<Value>) {
        self.state = transition(self.state, Trigger::Initialize);

        #[derive(serde::Deserialize)]
        struct ClientInfo {
            #[allow(dead_code)]
            name: Option<String>,
            #[allow(dead_code)]
            version: Option<String>,
        }
        #[derive(serde::Deserialize)]
        struct InitializeParams {
            #[serde(rename = "protocolVersion")]
            protocol_version: Option<String>,
            #[serde(rename = "clientInfo")]
            client_info: Option<ClientInfo>,
            server_name: Option<String>,
            server_version: Option<String>,
            capabilities: Option<Value>,
        }

        let decoded: Result<InitializeParams, RichError> = decode_params(params.as_ref());
        let decoded = match decoded {
            Ok(p) => p,
            Err(err) => {
                self.fail_initialize(id, err).await;
                return;
            }
        };

        let protocol_version = decoded.protocol_version.clone().unwrap_or_default();
        if !PROTOCOL_VERSION_WHITELIST.contains(&protocol_version.as_str()) {
            let err = RichError::invalid_request(format!(
                "unsupported protocolVersion `{protocol_version}`"
            ))
            .with_property("protocol_version", serde_json::json!(protocol_version));
            self.fail_initialize(id, err).await;
            return;
        }

        if decoded.client_info.is_none() && (decoded.server_name.is_some() || decoded.server_version.is_some()) {
            tracing::debug!(target: "mcp_server_core::connection", connection = %self.id, "accepting legacy snake_case clientInfo fallback");
        }

        self.client_capabilities = decoded.capabilities.clone();

        let result = serde_json::json!({
            "serverInfo": {
                "name": self.server_info.name,
                "version": self.server_info.version,
            },
            "capabilities": decoded.capabilities.unwrap_or(serde_json::json!({})),
            "protocolVersion": protocol_version,
        });

        self.send_result(id, result).await;
        self.initialized = true;
        self.state = transition(self.state, Trigger::InitSuccess);
    }

    async fn fail_initialize(&mut self, id: Id, err: RichError) {
        err.log_once();
        self.send_error(id, err).await;
        self.state = transition(self.state, Trigger::InitFailure);
    }

    async fn handle_ping(&mut self, id: Id) {
        self.send_result(id, serde_json::json!({"pong": true})).await;
    }

    async fn handle_shutdown(&mut self, id: Id) {
        self.send_result(id, serde_json::json!({"acknowledged": true})).await;
        self.state = transition(self.state, Trigger::Shutdown);
    }

    async fn handle_provider_method(&mut self, id: Id, method: &str, params: Option<Value>) {
        let cancel = self.root_cancel.child_token();
        let result = self
            .dispatcher
            .dispatch_request(method, params, self.dispatcher.default_timeout(), cancel)
            .await;
        match result {
            Ok(value) => self.send_result(id, value).await,
            Err(err) => {
                let severe = err.is_severe();
                err.log_once();
                self.send_error(id, err).await;
                if severe {
                    self.state = transition(self.state, Trigger::ErrorOccurred);
                }
            }
        }
    }

    async fn send_result(&mut self, id: Id, result: Value) {
        let envelope = Envelope::response_result(id, result);
        self.write_envelope(envelope).await;
    }

    async fn send_error(&mut self, id: Id, err: RichError) {
        let object: ErrorObject = err.to_error_object();
        let envelope = Envelope::response_error(id, object);
        self.write_envelope(envelope).await;
    }

    async fn write_envelope(&mut self, envelope: Envelope) {
        let bytes = envelope.to_bytes();
        if let Err(err) = self.transport.write(&bytes, &self.root_cancel).await {
            err.log_once();
            self.state = transition(self.state, Trigger::ErrorOccurred);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, HandlerFuture, MethodHandler};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn test_server_info() -> ServerInfo {
        ServerInfo {
            name: "test-server".into(),
            version: "0.0.0".into(),
        }
    }

    fn handler_of<F, Fut>(f: F) -> MethodHandler
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, RichError>> + Send + 'static,
    {
        Arc::new(move |params| Box::pin(f(params)) as HandlerFuture)
    }

    struct Harness {
        client: DuplexStream,
    }

    impl Harness {
        async fn send_line(&mut self, value: Value) {
            let mut bytes = serde_json::to_vec(&value).unwrap();
            bytes.push(b'\n');
            self.client.write_all(&bytes).await.unwrap();
        }

        async fn read_line(&mut self) -> Value {
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                self.client.read_exact(&mut byte).await.unwrap();
                if byte[0] == b'\n' {
                    break;
                }
                buf.push(byte[0]);
            }
            serde_json::from_slice(&buf).unwrap()
        }
    }

    fn spawn_connection(dispatcher: Arc<Dispatcher>) -> Harness {
        let (client, server) = duplex(1024 * 1024);
        let (server_r, server_w) = tokio::io::split(server);
        let transport = Transport::new(server_r, server_w, crate::transport::Dialect::LineDelimited);
        let connection = Connection::new("test", transport, dispatcher, test_server_info());
        tokio::spawn(connection.run());
        Harness { client }
    }

    #[tokio::test]
    async fn request_before_initialize_is_invalid_request_with_state() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1)));
        let mut harness = spawn_connection(dispatcher);
        harness
            .send_line(serde_json::json!({"jsonrpc":"2.0","id":3,"method":"resources/list"}))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["error"]["data"]["current_state"], "unconnected");
    }

    #[tokio::test]
    async fn happy_initialize_then_ping() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1)));
        let mut harness = spawn_connection(dispatcher);
        harness
            .send_line(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2.0", "clientInfo": {"name": "X", "version": "1"}, "capabilities": {}}
            }))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["result"]["protocolVersion"], "2.0");
        assert_eq!(response["result"]["serverInfo"]["name"], "test-server");

        harness
            .send_line(serde_json::json!({"jsonrpc":"2.0","id":2,"method":"ping"}))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["result"]["pong"], true);
    }

    #[tokio::test]
    async fn unknown_method_after_init_is_method_not_found() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1)));
        let mut harness = spawn_connection(dispatcher);
        harness
            .send_line(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2.0", "clientInfo": {"name": "X", "version": "1"}}
            }))
            .await;
        let _ = harness.read_line().await;
        harness
            .send_line(serde_json::json!({"jsonrpc":"2.0","id":2,"method":"does/not/exist"}))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn wrong_protocol_version_is_invalid_request() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1)));
        let mut harness = spawn_connection(dispatcher);
        harness
            .send_line(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "0.9", "clientInfo": {"name": "X", "version": "1"}}
            }))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn sequential_requests_respond_in_order() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1)));
        dispatcher
            .register("tools/list", handler_of(|_| async { Ok(serde_json::json!({"tools": []})) }))
            .await
            .unwrap();
        let mut harness = spawn_connection(dispatcher);
        harness
            .send_line(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2.0", "clientInfo": {"name": "X", "version": "1"}}
            }))
            .await;
        let _ = harness.read_line().await;

        for i in 2..6 {
            harness
                .send_line(serde_json::json!({"jsonrpc":"2.0","id":i,"method":"tools/list"}))
                .await;
        }
        for i in 2..6 {
            let response = harness.read_line().await;
            assert_eq!(response["id"], i);
        }
    }

    #[tokio::test]
    async fn handler_timeout_keeps_connection_connected() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_millis(20)));
        dispatcher
            .register(
                "tools/list",
                handler_of(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                }),
            )
            .await
            .unwrap();
        let mut harness = spawn_connection(dispatcher);
        harness
            .send_line(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2.0", "clientInfo": {"name": "X", "version": "1"}}
            }))
            .await;
        let _ = harness.read_line().await;
        harness
            .send_line(serde_json::json!({"jsonrpc":"2.0","id":2,"method":"tools/list"}))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["error"]["code"], -32005);

        harness
            .send_line(serde_json::json!({"jsonrpc":"2.0","id":3,"method":"ping"}))
            .await;
        let response = harness.read_line().await;
        assert_eq!(response["result"]["pong"], true);
    }

    #[test]
    fn admission_table_matches_spec() {
        assert!(is_admissible(State::Unconnected, false, Trigger::Initialize));
        assert!(!is_admissible(State::Connected, true, Trigger::Initialize));
        assert!(is_admissible(State::Initializing, false, Trigger::Ping));
        assert!(is_admissible(State::Connected, true, Trigger::Ping));
        assert!(!is_admissible(State::Unconnected, false, Trigger::Ping));
        assert!(!is_admissible(State::Connected, false, Trigger::ListTools));
        assert!(is_admissible(State::Connected, true, Trigger::ListTools));
        assert!(!is_admissible(State::Terminating, true, Trigger::Shutdown));
    }

    #[test]
    fn transition_table_matches_spec() {
        assert_eq!(transition(State::Unconnected, Trigger::Initialize), State::Initializing);
        assert_eq!(transition(State::Initializing, Trigger::InitSuccess), State::Connected);
        assert_eq!(transition(State::Initializing, Trigger::InitFailure), State::Error);
        assert_eq!(transition(State::Connected, Trigger::Shutdown), State::Terminating);
        assert_eq!(transition(State::Connected, Trigger::ErrorOccurred), State::Error);
        assert_eq!(transition(State::Terminating, Trigger::ShutdownComplete), State::Unconnected);
        assert_eq!(transition(State::Error, Trigger::Disconnect), State::Unconnected);
    }
}
