//! JSON‑RPC 2.0 over newline-delimited TCP, on a dedicated OS thread.
//!
//! ```text
//! client ──line──▶ reader loop ──▶ RpcService::handle ──▶ ToolDispatcher
//!        ◀─line── writer task ◀── Response
//! ```
//!
//! The thread runs its own current-thread tokio runtime, so nothing here
//! ever runs on (or blocks) the host thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bridge_protocol::jsonrpc::{
    self, Id, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    RESOURCE_NOT_FOUND, Request, Response, RpcMethod, TOOL_EXECUTION_ERROR,
};
use bridge_protocol::message::{
    InitializeResult, PromptGetParams, PromptsListResult, ResourceDescriptor, ResourceReadParams,
    ResourceReadResult, ResourcesListResult, ToolCallParams, ToolCallResult, ToolDescriptor,
    ToolsListResult,
};
use crossbeam_channel::RecvTimeoutError;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bridge::Arguments;
use crate::config::BridgeConfig;
use crate::gateway::ToolDispatcher;
use crate::prompts::PromptSet;

pub const SERVER_NAME: &str = "cardbridge";
pub const SERVER_THREAD_NAME: &str = "cardbridge-rpc";

/// Upper bound on how long the runtime waits for leftover blocking tasks.
const RUNTIME_DRAIN: Duration = Duration::from_millis(500);
/// Upper bound on how long shutdown waits for open connections to close.
const CONNECTION_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not build server runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("could not spawn server thread: {0}")]
    Spawn(#[source] std::io::Error),
}

// -----------------------------------------------------------------------------
// Method dispatch
// -----------------------------------------------------------------------------

/// Everything the host side publishes. Resources name the operation that reads them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}

/// Stateless request handler shared by all connections.
pub struct RpcService<D: ?Sized> {
    dispatcher: Arc<D>,
    catalog: Arc<Catalog>,
    prompts: PromptSet,
}

impl<D: ?Sized> Clone for RpcService<D> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            catalog: self.catalog.clone(),
            prompts: self.prompts,
        }
    }
}

impl<D: ToolDispatcher + ?Sized> RpcService<D> {
    pub fn new(dispatcher: Arc<D>, catalog: Catalog) -> Self {
        Self {
            dispatcher,
            catalog: Arc::new(catalog),
            prompts: PromptSet,
        }
    }

    /// Handle one raw line. `None` means nothing should be written back.
    pub async fn handle_line(&self, line: &str) -> Option<Response> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Some(Response::fail(
                    Id::Null,
                    PARSE_ERROR,
                    "Parse error",
                    Some(json!(e.to_string())),
                ));
            }
        };

        match serde_json::from_value::<Request>(value.clone()) {
            Ok(req) => self.handle(req).await,
            Err(e) => {
                let id = value
                    .get("id")
                    .and_then(|id| serde_json::from_value::<Id>(id.clone()).ok())
                    .unwrap_or(Id::Null);
                Some(Response::fail(
                    id,
                    INVALID_REQUEST,
                    "Invalid Request",
                    Some(json!(e.to_string())),
                ))
            }
        }
    }

    pub async fn handle(&self, req: Request) -> Option<Response> {
        let Some(id) = req.id else {
            debug!(method = %req.method, "notification");
            return None;
        };

        let result = match req.method.parse::<RpcMethod>() {
            Ok(RpcMethod::Initialize) => {
                to_result(InitializeResult::new(SERVER_NAME, env!("CARGO_PKG_VERSION")))
            }
            Ok(RpcMethod::Initialized) | Ok(RpcMethod::Ping) => Ok(json!({})),
            Ok(RpcMethod::ToolsList) => to_result(ToolsListResult {
                tools: self.catalog.tools.clone(),
            }),
            Ok(RpcMethod::ToolsCall) => self.call_tool(req.params).await,
            Ok(RpcMethod::ResourcesList) => to_result(ResourcesListResult {
                resources: self.catalog.resources.clone(),
            }),
            Ok(RpcMethod::ResourcesRead) => self.read_resource(req.params).await,
            Ok(RpcMethod::PromptsList) => to_result(PromptsListResult {
                prompts: self.prompts.list(),
            }),
            Ok(RpcMethod::PromptsGet) => self.get_prompt(req.params),
            Err(unknown) => Err(jsonrpc::Error::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", unknown.0),
            )),
        };

        Some(match result {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::from_error(id, err),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, jsonrpc::Error> {
        let params: ToolCallParams = parse_params(params)?;

        // resources share the operation table but are not callable as tools
        if self.catalog.resources.iter().any(|r| r.name == params.name) {
            return Err(jsonrpc::Error::new(
                TOOL_EXECUTION_ERROR,
                format!("unknown operation: {}", params.name),
            )
            .with_data(json!({ "tool": params.name })));
        }

        debug!(tool = %params.name, "tools/call");
        match self.dispatcher.call_tool(&params.name, params.arguments).await {
            Ok(value) => to_result(ToolCallResult::from_value(value)),
            Err(err) => Err(jsonrpc::Error::new(TOOL_EXECUTION_ERROR, err.to_string())
                .with_data(json!({ "tool": params.name }))),
        }
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value, jsonrpc::Error> {
        let params: ResourceReadParams = parse_params(params)?;
        let Some(resource) = self.catalog.resources.iter().find(|r| r.uri == params.uri) else {
            return Err(jsonrpc::Error::new(
                RESOURCE_NOT_FOUND,
                format!("Resource not found: {}", params.uri),
            )
            .with_data(json!({ "uri": params.uri })));
        };

        debug!(uri = %resource.uri, "resources/read");
        match self.dispatcher.call_tool(&resource.name, Arguments::new()).await {
            Ok(value) => to_result(ResourceReadResult::json(resource.uri.clone(), &value)),
            Err(err) => Err(jsonrpc::Error::new(TOOL_EXECUTION_ERROR, err.to_string())
                .with_data(json!({ "uri": resource.uri }))),
        }
    }

    fn get_prompt(&self, params: Option<Value>) -> Result<Value, jsonrpc::Error> {
        let params: PromptGetParams = parse_params(params)?;
        debug!(prompt = %params.name, "prompts/get");
        let result = self
            .prompts
            .get(&params.name, &params.arguments)
            .map_err(|e| jsonrpc::Error::new(INVALID_PARAMS, e.to_string()))?;
        to_result(result)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, jsonrpc::Error> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| jsonrpc::Error::new(INVALID_PARAMS, "Invalid params").with_data(json!(e.to_string())))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, jsonrpc::Error> {
    serde_json::to_value(value).map_err(|e| jsonrpc::Error::new(INTERNAL_ERROR, e.to_string()))
}

// -----------------------------------------------------------------------------
// Server thread
// -----------------------------------------------------------------------------

/// Handle to the running server thread.
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    exited: crossbeam_channel::Receiver<()>,
    thread: Option<JoinHandle<()>>,
    grace: Duration,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RpcServer {
    /// Bind synchronously (so bind errors surface here), then serve on a new thread.
    pub fn start<D>(
        config: &BridgeConfig,
        dispatcher: Arc<D>,
        catalog: Catalog,
    ) -> Result<Self, ServerError>
    where
        D: ToolDispatcher + ?Sized + 'static,
    {
        let addr = config.bind_addr();
        let bind_err = |source: std::io::Error| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let std_listener = std::net::TcpListener::bind(&addr).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = std_listener.local_addr().map_err(bind_err)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let shutdown_rx = shutdown_tx.subscribe();
        let (exit_tx, exited) = crossbeam_channel::bounded(1);
        let service = RpcService::new(dispatcher, catalog);

        let thread = thread::Builder::new()
            .name(SERVER_THREAD_NAME.into())
            .spawn(move || {
                runtime.block_on(async move {
                    match TcpListener::from_std(std_listener) {
                        Ok(listener) => accept_loop(listener, service, shutdown_rx).await,
                        Err(e) => error!(error = %e, "could not register listener"),
                    }
                });
                runtime.shutdown_timeout(RUNTIME_DRAIN);
                let _ = exit_tx.send(());
            })
            .map_err(ServerError::Spawn)?;

        info!(%local_addr, "server listening");
        Ok(Self {
            local_addr,
            shutdown_tx,
            exited,
            thread: Some(thread),
            grace: config.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread and wait up to the grace period.
    ///
    /// Returns `false` if the thread did not exit in time and was detached.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.thread.take() else {
            return true;
        };
        let _ = self.shutdown_tx.send(());

        match self.exited.recv_timeout(self.grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("server thread panicked");
                }
                info!(local_addr = %self.local_addr, "server stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(grace = ?self.grace, "server thread still running, detaching it");
                false
            }
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop<D>(
    listener: TcpListener,
    service: RpcService<D>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    D: ToolDispatcher + ?Sized + 'static,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("accept loop shutting down");
                break;
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "connection task failed");
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");
                    connections.spawn(serve_connection(stream, peer, service.clone(), shutdown_rx.resubscribe()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    // each connection finishes the call it is serving, then sees the signal
    debug!(open = connections.len(), "waiting for connections to close");
    let drained = tokio::time::timeout(CONNECTION_DRAIN, async {
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "connection task failed");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(open = connections.len(), "aborting connections that did not close");
        connections.shutdown().await;
    }
}

async fn serve_connection<D>(
    stream: TcpStream,
    peer: SocketAddr,
    service: RpcService<D>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    D: ToolDispatcher + ?Sized + 'static,
{
    let (reader, writer) = stream.into_split();

    // writer task: one response per line
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        let mut w = BufWriter::new(writer);
        while let Some(line) = rx.recv().await {
            if w.write_all(line.as_bytes()).await.is_err() || w.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = service.handle_line(&line).await {
            match serde_json::to_string(&response) {
                Ok(mut out) => {
                    out.push('\n');
                    if tx.send(out).is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "could not serialise response"),
            }
        }
    }

    drop(tx);
    let _ = writer_task.await;
    info!(%peer, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Arguments, BridgeError};
    use crate::gateway::GatewayError;
    use async_trait::async_trait;
    use std::io::{BufRead, Write};
    use std::time::Instant;

    struct MockDispatcher;

    #[async_trait]
    impl ToolDispatcher for MockDispatcher {
        async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<Value, GatewayError> {
            match name {
                "echo" => Ok(Value::Object(arguments)),
                "info" => Ok(json!({ "version": 1 })),
                "closed" | "offline" => Err(GatewayError::Bridge(BridgeError::ShuttingDown)),
                _ => Err(GatewayError::Operation(format!("unknown operation: {name}"))),
            }
        }
    }

    fn resource(uri: &str, name: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: uri.into(),
            name: name.into(),
            title: None,
            description: String::new(),
            mime_type: "application/json".into(),
        }
    }

    fn service() -> RpcService<MockDispatcher> {
        RpcService::new(
            Arc::new(MockDispatcher),
            Catalog {
                tools: vec![ToolDescriptor {
                    name: "echo".into(),
                    description: "Echo arguments".into(),
                    input_schema: json!({"type": "object"}),
                }],
                resources: vec![resource("test://info", "info"), resource("test://offline", "offline")],
            },
        )
    }

    async fn roundtrip(line: &str) -> Value {
        let resp = service().handle_line(line).await.expect("expected a response");
        serde_json::to_value(resp).unwrap()
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error_with_null_id() {
        let v = roundtrip("{not json").await;
        assert_eq!(v["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(v["id"], Value::Null);
    }

    #[tokio::test]
    async fn missing_method_is_invalid_request() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":4}"#).await;
        assert_eq!(v["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(v["id"], json!(4));
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":1,"method":"sampling/createMessage"}"#).await;
        assert_eq!(v["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn initialize_announces_tools_capability() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":"init","method":"initialize","params":{}}"#).await;
        assert_eq!(v["id"], json!("init"));
        assert_eq!(v["result"]["serverInfo"]["name"], json!(SERVER_NAME));
        assert!(v["result"]["capabilities"]["tools"].is_object());
        assert!(v["result"]["capabilities"]["resources"].is_object());
        assert!(v["result"]["capabilities"]["prompts"].is_object());
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let resp = service()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn tools_list_publishes_catalog() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
        assert_eq!(v["result"]["tools"][0]["name"], json!("echo"));
        assert_eq!(v["result"]["tools"][0]["inputSchema"]["type"], json!("object"));
    }

    #[tokio::test]
    async fn tools_call_wraps_value_in_content() {
        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"a":1}}}"#,
        )
        .await;
        assert_eq!(v["result"]["structuredContent"], json!({"a": 1}));
        assert_eq!(v["result"]["isError"], json!(false));
    }

    #[tokio::test]
    async fn tool_failures_use_execution_error_code() {
        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"nope"}}"#,
        )
        .await;
        assert_eq!(v["error"]["code"], json!(TOOL_EXECUTION_ERROR));
        assert_eq!(v["error"]["message"], json!("unknown operation: nope"));

        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"closed"}}"#,
        )
        .await;
        assert_eq!(v["error"]["message"], json!("Bridge is shutting down"));
    }

    #[tokio::test]
    async fn resources_are_listed_and_read_through_the_dispatcher() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":8,"method":"resources/list"}"#).await;
        assert_eq!(v["result"]["resources"][0]["uri"], json!("test://info"));
        assert_eq!(v["result"]["resources"][0]["mimeType"], json!("application/json"));

        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":9,"method":"resources/read","params":{"uri":"test://info"}}"#,
        )
        .await;
        let contents = &v["result"]["contents"][0];
        assert_eq!(contents["uri"], json!("test://info"));
        let text = contents["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"version": 1}));
    }

    #[tokio::test]
    async fn resource_failures_are_reported() {
        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":10,"method":"resources/read","params":{"uri":"test://missing"}}"#,
        )
        .await;
        assert_eq!(v["error"]["code"], json!(RESOURCE_NOT_FOUND));
        assert_eq!(v["error"]["data"]["uri"], json!("test://missing"));

        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":11,"method":"resources/read","params":{"uri":"test://offline"}}"#,
        )
        .await;
        assert_eq!(v["error"]["code"], json!(TOOL_EXECUTION_ERROR));
        assert_eq!(v["error"]["message"], json!("Bridge is shutting down"));

        let v = roundtrip(r#"{"jsonrpc":"2.0","id":12,"method":"resources/read","params":{}}"#).await;
        assert_eq!(v["error"]["code"], json!(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn resources_cannot_be_called_as_tools() {
        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":13,"method":"tools/call","params":{"name":"info"}}"#,
        )
        .await;
        assert_eq!(v["error"]["code"], json!(TOOL_EXECUTION_ERROR));
        assert_eq!(v["error"]["message"], json!("unknown operation: info"));
    }

    #[tokio::test]
    async fn prompts_are_listed_and_rendered() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":14,"method":"prompts/list"}"#).await;
        assert_eq!(v["result"]["prompts"][0]["name"], json!("twenty_rules"));
        assert_eq!(v["result"]["prompts"][1]["name"], json!("review_session"));

        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":15,"method":"prompts/get","params":{"name":"review_session","arguments":{"deck_name":"Spanish"}}}"#,
        )
        .await;
        let message = &v["result"]["messages"][0];
        assert_eq!(message["role"], json!("user"));
        assert!(message["content"]["text"].as_str().unwrap().contains("\"Spanish\""));

        let v = roundtrip(
            r#"{"jsonrpc":"2.0","id":16,"method":"prompts/get","params":{"name":"nope"}}"#,
        )
        .await;
        assert_eq!(v["error"]["code"], json!(INVALID_PARAMS));
        assert_eq!(v["error"]["message"], json!("unknown prompt: nope"));
    }

    #[tokio::test]
    async fn tools_call_without_name_is_invalid_params() {
        let v = roundtrip(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{}}"#).await;
        assert_eq!(v["error"]["code"], json!(INVALID_PARAMS));
    }

    fn ephemeral_config() -> BridgeConfig {
        BridgeConfig {
            port: 0,
            shutdown_grace_ms: 2_000,
            ..Default::default()
        }
    }

    #[test]
    fn serves_lines_over_tcp_and_stops_promptly() {
        let mut server =
            RpcServer::start(&ephemeral_config(), Arc::new(MockDispatcher), Catalog::default()).unwrap();
        assert!(server.is_running());

        let stream = std::net::TcpStream::connect(server.local_addr()).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = std::io::BufReader::new(stream);

        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["result"], json!({}));
        assert_eq!(v["id"], json!(1));

        let started = Instant::now();
        assert!(server.stop());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!server.is_running());
        assert!(server.stop());

        // the connection task was joined, so its socket is closed
        let mut rest = String::new();
        assert_eq!(reader.read_line(&mut rest).unwrap(), 0);
    }

    #[test]
    fn second_bind_on_same_port_fails() {
        let first = RpcServer::start(&ephemeral_config(), Arc::new(MockDispatcher), Catalog::default()).unwrap();
        let taken = BridgeConfig {
            port: first.local_addr().port(),
            ..ephemeral_config()
        };
        let err = RpcServer::start(&taken, Arc::new(MockDispatcher), Catalog::default()).unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
