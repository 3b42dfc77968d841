use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON‑RPC 2.0 core types for the tool-calling protocol served by cardbridge.
///
/// These structs mirror the [JSON‑RPC 2.0 spec](https://www.jsonrpc.org/specification)
/// and are **transport‑agnostic**: the server frames them as one JSON document per line.
///
/// Usage example (with `serde_json`):
/// ```ignore
/// use serde_json::json;
/// use bridge_protocol::jsonrpc::{Id, Request, RpcMethod};
///
/// let req = Request::call(Id::Number(1), RpcMethod::ToolsCall, Some(json!({"name": "list_decks"})));
/// let s = serde_json::to_string(&req).unwrap();
/// ```
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// A tool ran and failed (domain error, timeout, shutdown, unknown tool).
pub const TOOL_EXECUTION_ERROR: i64 = -32000;
/// `resources/read` named a URI nobody serves.
pub const RESOURCE_NOT_FOUND: i64 = -32002;

/// `id` MAY be a string, number or null. We support all forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
    Null,
}

/// JSON‑RPC 2.0 Request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Omitted for *notifications*.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// JSON‑RPC 2.0 Error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Error {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// JSON‑RPC 2.0 Response object.
/// Exactly one of `result` or `error` **must** be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    pub id: Id,
}

/// Convenience enum so callers can `serde_json::from_str::<Message>()` without inspecting the type first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

// -----------------------------------------------------------------------------
// Helper constructors
// -----------------------------------------------------------------------------
impl Request {
    /// Create a *notification* (no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Create a *call* expecting a response.
    pub fn call(id: Id, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl Response {
    /// Convenience helper for a successful result.
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Convenience helper for an error result.
    pub fn fail(id: Id, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::from_error(
            id,
            Error {
                code,
                message: message.into(),
                data,
            },
        )
    }

    pub fn from_error(id: Id, error: Error) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown JSON-RPC method `{0}`")]
pub struct UnknownMethod(pub String);

/// Strongly‑typed list of the JSON‑RPC methods the bridge server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesRead,
    PromptsList,
    PromptsGet,
}

impl RpcMethod {
    /// Returns the canonical JSON‑RPC method string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::Initialize => "initialize",
            RpcMethod::Initialized => "notifications/initialized",
            RpcMethod::Ping => "ping",
            RpcMethod::ToolsList => "tools/list",
            RpcMethod::ToolsCall => "tools/call",
            RpcMethod::ResourcesList => "resources/list",
            RpcMethod::ResourcesRead => "resources/read",
            RpcMethod::PromptsList => "prompts/list",
            RpcMethod::PromptsGet => "prompts/get",
        }
    }
}

impl From<RpcMethod> for String {
    fn from(m: RpcMethod) -> Self {
        m.as_str().to_owned()
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RpcMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(RpcMethod::Initialize),
            "notifications/initialized" => Ok(RpcMethod::Initialized),
            "ping" => Ok(RpcMethod::Ping),
            "tools/list" => Ok(RpcMethod::ToolsList),
            "tools/call" => Ok(RpcMethod::ToolsCall),
            "resources/list" => Ok(RpcMethod::ResourcesList),
            "resources/read" => Ok(RpcMethod::ResourcesRead),
            "prompts/list" => Ok(RpcMethod::PromptsList),
            "prompts/get" => Ok(RpcMethod::PromptsGet),
            other => Err(UnknownMethod(other.to_owned())),
        }
    }
}
