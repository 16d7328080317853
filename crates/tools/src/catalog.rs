//! ToolCatalog: the tools of several servers behind one name space.
//!
//! The agent loop uses this to:
//! 1. Get tool definitions to send to the LLM
//! 2. Route a requested tool call to the server that advertised it

use pollbridge_core::error::ToolServerError;
use pollbridge_core::provider::ToolDefinition;
use pollbridge_core::tool::{ToolDescriptor, ToolResponse, ToolServer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// What the LLM sees of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallOutcome {
    pub output: String,
    pub success: bool,
}

#[derive(Default)]
pub struct ToolCatalog {
    servers: Vec<Arc<dyn ToolServer>>,
    /// tool name -> index into `servers`
    routes: RwLock<HashMap<String, usize>>,
}

impl ToolCatalog {
    pub fn new(servers: Vec<Arc<dyn ToolServer>>) -> Self {
        Self {
            servers,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn servers(&self) -> &[Arc<dyn ToolServer>] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Tools of every reachable server, in server order. A server that
    /// fails to list is skipped; when two servers share a tool name the
    /// first one wins.
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut routes = HashMap::new();
        let mut tools = Vec::new();

        for (index, server) in self.servers.iter().enumerate() {
            match server.list_tools().await {
                Ok(listed) => {
                    for tool in listed {
                        if routes.contains_key(&tool.name) {
                            warn!(server = %server.name(), tool = %tool.name, "Duplicate tool name, keeping the first");
                            continue;
                        }
                        routes.insert(tool.name.clone(), index);
                        tools.push(tool);
                    }
                }
                Err(e) => {
                    warn!(server = %server.name(), error = %e, "Skipping tool server that failed to list tools");
                }
            }
        }

        *self.routes.write().await = routes;
        tools
    }

    /// Definitions for the LLM.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .await
            .iter()
            .map(ToolDescriptor::to_definition)
            .collect()
    }

    async fn route(&self, name: &str) -> Option<Arc<dyn ToolServer>> {
        if let Some(&index) = self.routes.read().await.get(name) {
            return self.servers.get(index).cloned();
        }
        debug!(tool = name, "Tool not routed yet, refreshing catalog");
        self.descriptors().await;
        let index = *self.routes.read().await.get(name)?;
        self.servers.get(index).cloned()
    }

    /// Invoke a tool and hand back the raw response.
    pub async fn call_raw(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError> {
        let server = self.route(name).await.ok_or_else(|| ToolServerError::Invocation {
            tool_name: name.to_string(),
            reason: "no tool server provides this tool".into(),
        })?;
        server.call_tool(name, arguments).await
    }

    /// Invoke a tool, turning every failure into an `Error: ...` result
    /// the model can read.
    pub async fn call(&self, name: &str, arguments: serde_json::Value) -> ToolCallOutcome {
        match self.call_raw(name, arguments).await {
            Ok(response) if response.is_error => ToolCallOutcome {
                output: format!("Error: {}", response.text()),
                success: false,
            },
            Ok(response) => ToolCallOutcome {
                output: response.text(),
                success: true,
            },
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                ToolCallOutcome {
                    output: format!("Error: {e}"),
                    success: false,
                }
            }
        }
    }

    /// Close every server. Errors are logged, not returned.
    pub async fn close_all(&self) {
        for server in &self.servers {
            if let Err(e) = server.close().await {
                warn!(server = %server.name(), error = %e, "Failed to close tool server");
            }
        }
    }
}
