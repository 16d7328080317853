//! JSON-RPC 2.0 framing and the tool-server method set shared by the HTTP
//! and stdio transports.
//!
//! A transport only has to move one request and its response; the
//! handshake, paginated listing and tool invocation live here once.

use async_trait::async_trait;
use pollbridge_core::error::ToolServerError;
use pollbridge_core::tool::{ToolDescriptor, ToolResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on `tools/list` pages, in case a server keeps returning a cursor.
const MAX_LIST_PAGES: usize = 100;

#[derive(Debug, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A request without an id; servers never answer these.
#[derive(Debug, Serialize)]
pub struct Notification {
    jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl Response {
    /// Servers may echo a numeric id as a string.
    pub fn id_matches(&self, expected: u64) -> bool {
        match &self.id {
            Value::Number(n) => n.as_u64() == Some(expected),
            Value::String(s) => s.parse::<u64>().ok() == Some(expected),
            _ => false,
        }
    }

    pub fn into_result(self, method: &str) -> Result<Value, ToolServerError> {
        if let Some(err) = self.error {
            return Err(ToolServerError::Protocol(format!(
                "{method}: [{}] {}",
                err.code, err.message
            )));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Find the response to request `id` in an HTTP body.
///
/// Streamable-HTTP servers may answer with plain JSON or with an SSE body
/// whose `data:` lines carry JSON-RPC messages (possibly interleaved with
/// notifications).
pub fn parse_body(body: &str, event_stream: bool, id: u64) -> Result<Response, ToolServerError> {
    if !event_stream {
        return serde_json::from_str(body.trim())
            .map_err(|e| ToolServerError::Protocol(format!("invalid JSON-RPC response: {e}")));
    }

    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Response>(data.trim()).ok())
        .find(|resp| resp.id_matches(id))
        .ok_or_else(|| {
            ToolServerError::Protocol(format!("event stream carried no response for request {id}"))
        })
}

#[derive(Debug, Deserialize)]
struct ListToolsPage {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

/// One JSON-RPC exchange over some transport.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolServerError>;

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolServerError>;
}

/// `initialize` followed by `notifications/initialized`.
pub async fn handshake(channel: &dyn RpcChannel, server: &str) -> Result<(), ToolServerError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": "pollbridge", "version": env!("CARGO_PKG_VERSION") }
    });
    let result = channel.request("initialize", Some(params)).await?;
    let negotiated = result
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if negotiated != PROTOCOL_VERSION {
        tracing::debug!(server, negotiated, "Tool server negotiated a different protocol version");
    }
    channel.notify("notifications/initialized", None).await
}

/// `tools/list`, following pagination cursors.
pub async fn list_all_tools(channel: &dyn RpcChannel) -> Result<Vec<ToolDescriptor>, ToolServerError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = channel.request("tools/list", params).await?;
        let page: ListToolsPage = serde_json::from_value(result)
            .map_err(|e| ToolServerError::Protocol(format!("invalid tools/list result: {e}")))?;
        tools.extend(page.tools);

        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => return Ok(tools),
        }
    }
    Err(ToolServerError::Protocol(
        "tools/list pagination did not terminate".into(),
    ))
}

/// `tools/call`. A JSON-RPC error becomes an invocation failure.
pub async fn call_tool(
    channel: &dyn RpcChannel,
    name: &str,
    arguments: Value,
) -> Result<ToolResponse, ToolServerError> {
    let params = json!({ "name": name, "arguments": arguments });
    let result = channel
        .request("tools/call", Some(params))
        .await
        .map_err(|e| match e {
            ToolServerError::Protocol(reason) => ToolServerError::Invocation {
                tool_name: name.to_string(),
                reason,
            },
            other => other,
        })?;
    serde_json::from_value(result)
        .map_err(|e| ToolServerError::Protocol(format!("invalid tools/call result: {e}")))
}
