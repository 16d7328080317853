//! Streamable-HTTP tool-server transport.
//!
//! Every JSON-RPC message is a POST to the server endpoint. The server may
//! assign a session id during `initialize`; it is echoed on every later
//! request and released with a DELETE on close.

use crate::protocol::{self, Notification, Request, RpcChannel};
use async_trait::async_trait;
use pollbridge_core::error::ToolServerError;
use pollbridge_core::tool::{ToolConnector, ToolDescriptor, ToolResponse, ToolServer};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Opens sessions against one HTTP tool server.
pub struct HttpConnector {
    name: String,
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ToolServerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ToolServerError::Connection(format!("HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ToolConnector for HttpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Arc<dyn ToolServer>, ToolServerError> {
        let session = HttpSession {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            client: self.client.clone(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };
        protocol::handshake(&session, &self.name).await?;
        debug!(server = %self.name, endpoint = %self.endpoint, "HTTP tool server session opened");
        Ok(Arc::new(session))
    }
}

/// One initialized session with an HTTP tool server.
pub struct HttpSession {
    name: String,
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpSession {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_session(&self, headers: &HeaderMap) {
        if let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
        }
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response, ToolServerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ToolServerError::Connection(format!(
                "session with '{}' is closed",
                self.name
            )));
        }

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(id) = self.session_id() {
            builder = builder.header(SESSION_HEADER, id);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            self.remember_session(response.headers());
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let reason = format!("HTTP {status}: {}", text.trim());
        // 404 on a live session means the server forgot it; rebuild
        if status.is_server_error() || status.as_u16() == 404 {
            Err(ToolServerError::Connection(reason))
        } else {
            Err(ToolServerError::Protocol(reason))
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> ToolServerError {
    if e.is_timeout() {
        ToolServerError::Timeout {
            operation: "HTTP request".into(),
            timeout_ms: 0,
        }
    } else {
        ToolServerError::Connection(e.to_string())
    }
}

#[async_trait]
impl RpcChannel for HttpSession {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolServerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.post(&Request::new(id, method, params)).await?;

        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await.map_err(map_transport_error)?;

        protocol::parse_body(&body, event_stream, id)?.into_result(method)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolServerError> {
        self.post(&Notification::new(method, params)).await?;
        Ok(())
    }
}

#[async_trait]
impl ToolServer for HttpSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        protocol::list_all_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResponse, ToolServerError> {
        protocol::call_tool(self, name, arguments).await
    }

    async fn close(&self) -> Result<(), ToolServerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(id) = self.session_id() else {
            return Ok(());
        };
        let mut builder = self.client.delete(&self.endpoint).header(SESSION_HEADER, id);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        // Servers are free to refuse session termination
        if let Err(e) = builder.send().await {
            debug!(server = %self.name, error = %e, "Session DELETE failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        // Port 9 (discard) is essentially never listening on loopback
        let connector = HttpConnector::new(
            "nowhere",
            "http://127.0.0.1:9/mcp",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = match connector.connect().await {
            Err(e) => e,
            Ok(_) => panic!("connect should fail"),
        };
        assert!(err.is_connection_failure(), "unexpected error: {err}");
    }

    #[test]
    fn empty_token_is_ignored() {
        let connector =
            HttpConnector::new("x", "http://localhost/mcp", Some(String::new()), Duration::from_secs(1))
                .unwrap();
        assert!(connector.token.is_none());
        assert_eq!(connector.endpoint(), "http://localhost/mcp");
    }
}
