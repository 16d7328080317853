//! Agent capability: an opaque async generator of text increments.
//!
//! The generation worker only sees this trait. `StreamingAgent` in the
//! agent crate is the production implementation; tests plug in scripted
//! agents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GenerationError;
use crate::provider::Usage;

/// Events emitted by an agent during streaming generation.
///
/// - `chunk`       partial answer text
/// - `summary`     text from a final summarization pass after tool use
/// - `tool_call`   agent is invoking a tool
/// - `tool_result` tool execution completed
/// - `done`        stream is complete
/// - `error`       an error occurred
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Chunk { content: String },

    /// Text produced by the redundant "summarize what you did" pass.
    Summary { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The stream is complete.
    Done {
        usage: Option<Usage>,
        iterations: usize,
        tool_calls_made: usize,
    },

    /// An error occurred mid-stream.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Summary { .. } => "summary",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// One conversational session able to answer questions.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Start generating an answer; events arrive on the returned channel.
    ///
    /// Agents without streaming support return
    /// [`GenerationError::StreamingUnsupported`] and callers fall back to
    /// [`Agent::generate`].
    async fn generate_stream(
        &self,
        question: &str,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>, GenerationError>;

    /// Generate a complete answer.
    ///
    /// The default drains `generate_stream`, keeping chunks and falling back
    /// to summary text only when no chunk was produced.
    async fn generate(&self, question: &str) -> Result<String, GenerationError> {
        let mut rx = self.generate_stream(question).await?;
        let mut answer = String::new();
        let mut summary = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                AgentStreamEvent::Chunk { content } => answer.push_str(&content),
                AgentStreamEvent::Summary { content } => summary.push_str(&content),
                AgentStreamEvent::Error { message } => return Err(GenerationError::Failed(message)),
                AgentStreamEvent::Done { .. } => break,
                _ => {}
            }
        }
        if answer.is_empty() {
            answer = summary;
        }
        Ok(answer)
    }
}
