//! Stdio tool-server transport: spawn a child process and exchange
//! newline-delimited JSON-RPC over its stdin/stdout.

use crate::protocol::{self, Notification, Request, Response, RpcChannel};
use async_trait::async_trait;
use pollbridge_core::error::ToolServerError;
use pollbridge_core::tool::{ToolConnector, ToolDescriptor, ToolResponse, ToolServer};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Spawns a fresh server process per connection.
pub struct StdioConnector {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioConnector {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env,
        }
    }
}

#[async_trait]
impl ToolConnector for StdioConnector {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self), fields(server = %self.name, command = %self.command))]
    async fn connect(&self) -> Result<Arc<dyn ToolServer>, ToolServerError> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolServerError::Connection(format!("failed to spawn {}: {e}", self.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolServerError::Connection("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolServerError::Connection("child has no stdout".into()))?;

        let session = StdioSession {
            name: self.name.clone(),
            io: Mutex::new(StdioIo {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
        };
        protocol::handshake(&session, &self.name).await?;
        debug!("Stdio tool server started");
        Ok(Arc::new(session))
    }
}

struct StdioIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioIo {
    async fn write_line(&mut self, message: &impl serde::Serialize) -> Result<(), ToolServerError> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| ToolServerError::Protocol(format!("serialize: {e}")))?;
        line.push(b'\n');
        self.stdin.write_all(&line).await.map_err(io_error)?;
        self.stdin.flush().await.map_err(io_error)
    }
}

fn io_error(e: std::io::Error) -> ToolServerError {
    ToolServerError::Connection(format!("stdio: {e}"))
}

/// One running server process.
pub struct StdioSession {
    name: String,
    io: Mutex<StdioIo>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
}

#[async_trait]
impl RpcChannel for StdioSession {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolServerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut io = self.io.lock().await;
        io.write_line(&Request::new(id, method, params)).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = io.stdout.read_line(&mut line).await.map_err(io_error)?;
            if n == 0 {
                return Err(ToolServerError::Connection(format!(
                    "'{}' closed its stdout",
                    self.name
                )));
            }
            match serde_json::from_str::<Response>(&line) {
                Ok(resp) if resp.id_matches(id) => return resp.into_result(method),
                // notifications, logs, responses to abandoned requests
                _ => trace!(server = %self.name, line = %line.trim_end(), "Skipping stdout line"),
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolServerError> {
        self.io
            .lock()
            .await
            .write_line(&Notification::new(method, params))
            .await
    }
}

#[async_trait]
impl ToolServer for StdioSession {
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
        if let Some(mut child) = self.child.lock().await.take() {
            child.kill().await.map_err(io_error)?;
            debug!(server = %self.name, "Stdio tool server stopped");
        }
        Ok(())
    }
}
