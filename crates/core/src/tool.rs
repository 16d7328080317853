//! Tool server capability: the abstraction over external tool-calling servers.
//!
//! A [`ToolConnector`] knows how to open a link to a tool server; the link
//! itself is a [`ToolServer`]. Managed and supervised connections implement
//! [`ToolServer`] too, so they can be dropped in wherever a raw link is
//! expected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::error::ToolServerError;
use crate::provider::ToolDefinition;

/// A tool advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name, unique within its server
    pub name: String,

    /// What the tool does (sent to the LLM)
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's arguments
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    /// Convert this descriptor into a ToolDefinition for sending to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// One content item of a tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    /// Any content type this client does not understand.
    #[serde(other)]
    Unsupported,
}

/// The result of invoking a tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub content: Vec<ToolContent>,

    /// Set when the tool itself reported a failure
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResponse {
    /// A response holding a single text item.
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Join all text items with newlines, ignoring other content types.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A live link to a tool server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// A human-readable name for this server (from configuration).
    fn name(&self) -> &str;

    /// List the tools this server exposes. Also used as the liveness probe.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError>;

    /// Invoke a tool by name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError>;

    /// Release the link. Safe to call more than once.
    async fn close(&self) -> Result<(), ToolServerError>;
}

/// Opens links to one tool server.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// The server name this connector targets.
    fn name(&self) -> &str;

    /// Create a fresh, initialized link.
    async fn connect(&self) -> Result<Arc<dyn ToolServer>, ToolServerError>;
}
