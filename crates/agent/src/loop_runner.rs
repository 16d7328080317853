//! The streaming agent: one conversation's memory, an LLM provider and a
//! tool catalog, driven through a tool-calling loop.
//!
//! Each turn:
//!
//! 1. Set the system prompt, append the question
//! 2. Stream a completion, forwarding text as `chunk` events
//! 3. If the model asked for tools: run them through the catalog, append
//!    the results, go back to 2
//! 4. Otherwise record the answer and emit `done`
//!
//! After `max_iterations` tool rounds one last request is made without
//! tools; its text is emitted as `summary` events so a consumer that has
//! already shown content can drop it.

use async_trait::async_trait;
use pollbridge_config::AgentConfig;
use pollbridge_core::agent::{Agent, AgentStreamEvent};
use pollbridge_core::error::GenerationError;
use pollbridge_core::message::{Conversation, ConversationId, Message, MessageToolCall};
use pollbridge_core::provider::{Provider, ProviderRequest, ToolDefinition, Usage};
use pollbridge_tools::ToolCatalog;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::sessions::SessionFactory;

const EVENT_BUFFER: usize = 64;

struct Settings {
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: usize,
    max_history: usize,
    system_prompt: String,
}

struct Shared {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolCatalog>,
    settings: Settings,
    /// Held for a whole turn, so turns on one session never interleave
    conversation: Mutex<Conversation>,
}

/// The per-session [`Agent`] implementation.
pub struct StreamingAgent {
    name: String,
    shared: Arc<Shared>,
}

impl StreamingAgent {
    pub fn new(
        conversation_key: &str,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolCatalog>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            name: conversation_key.to_string(),
            shared: Arc::new(Shared {
                provider,
                tools,
                settings: Settings {
                    model: model.into(),
                    temperature: config.temperature,
                    max_tokens: config.max_tokens,
                    max_iterations: config.max_iterations.max(1),
                    max_history: config.max_history,
                    system_prompt: config.system_prompt.clone(),
                },
                conversation: Mutex::new(Conversation::new(ConversationId::from(conversation_key))),
            }),
        }
    }

    /// A copy of the conversation so far.
    pub async fn history(&self) -> Vec<Message> {
        self.shared.conversation.lock().await.messages.clone()
    }
}

#[async_trait]
impl Agent for StreamingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_stream(
        &self,
        question: &str,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>, GenerationError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let shared = self.shared.clone();
        let question = question.to_string();
        tokio::spawn(async move {
            let mut conversation = shared.conversation.lock().await;
            let turn = Turn {
                shared: &shared,
                tx: &tx,
            };
            if let Err(e) = turn.run(&mut conversation, question).await {
                warn!(conversation = %conversation.id, error = %e, "Agent turn failed");
                let _ = tx.send(AgentStreamEvent::Error { message: e.to_string() }).await;
            }
        });
        Ok(rx)
    }
}

/// Why a turn stopped early.
enum Stop {
    /// The receiver went away
    Abandoned,
    Failed(GenerationError),
}

impl From<GenerationError> for Stop {
    fn from(e: GenerationError) -> Self {
        Self::Failed(e)
    }
}

struct Turn<'a> {
    shared: &'a Shared,
    tx: &'a mpsc::Sender<AgentStreamEvent>,
}

/// What one streamed completion produced.
struct Completion {
    content: String,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

impl Turn<'_> {
    async fn emit(&self, event: AgentStreamEvent) -> Result<(), Stop> {
        self.tx.send(event).await.map_err(|_| Stop::Abandoned)
    }

    async fn run(&self, conversation: &mut Conversation, question: String) -> Result<(), GenerationError> {
        let settings = &self.shared.settings;
        conversation.set_system_prompt(&settings.system_prompt);
        let start = conversation.messages.len();

        match self.run_inner(conversation, question).await {
            Ok(()) => Ok(()),
            Err(Stop::Abandoned) => {
                debug!(conversation = %conversation.id, "Event receiver dropped, abandoning turn");
                conversation.trim_history(settings.max_history);
                Ok(())
            }
            Err(Stop::Failed(e)) => {
                // A failed turn leaves no trace in the session
                conversation.messages.truncate(start);
                Err(e)
            }
        }
    }

    async fn run_inner(&self, conversation: &mut Conversation, question: String) -> Result<(), Stop> {
        let settings = &self.shared.settings;
        conversation.push(Message::user(question));

        let tools = self.shared.tools.definitions().await;
        info!(
            conversation = %conversation.id,
            messages = conversation.messages.len(),
            tools = tools.len(),
            "Processing turn"
        );

        let mut tool_calls_made = 0;
        let mut usage = None;

        for iteration in 1..=settings.max_iterations {
            debug!(conversation = %conversation.id, iteration, "Agent loop iteration");

            let completion = self
                .complete(conversation, tools.clone(), |content| AgentStreamEvent::Chunk { content })
                .await?;
            usage = completion.usage.or(usage);

            if completion.tool_calls.is_empty() {
                conversation.push(Message::assistant(completion.content));
                conversation.trim_history(settings.max_history);
                return self
                    .emit(AgentStreamEvent::Done {
                        usage,
                        iterations: iteration,
                        tool_calls_made,
                    })
                    .await;
            }

            let calls = completion.tool_calls.clone();
            conversation.push(Message::assistant_with_tools(completion.content, completion.tool_calls));
            for call in calls {
                self.execute(conversation, call).await?;
                tool_calls_made += 1;
            }
        }

        warn!(
            conversation = %conversation.id,
            iterations = settings.max_iterations,
            "Max tool iterations reached, requesting a closing summary"
        );
        let summary = self
            .complete(conversation, Vec::new(), |content| AgentStreamEvent::Summary { content })
            .await?;
        conversation.push(Message::assistant(summary.content));
        conversation.trim_history(settings.max_history);
        self.emit(AgentStreamEvent::Done {
            usage: summary.usage.or(usage),
            iterations: settings.max_iterations,
            tool_calls_made,
        })
        .await
    }

    /// Stream one completion, emitting its text through `wrap`.
    async fn complete(
        &self,
        conversation: &Conversation,
        tools: Vec<ToolDefinition>,
        wrap: fn(String) -> AgentStreamEvent,
    ) -> Result<Completion, Stop> {
        let settings = &self.shared.settings;
        let request = ProviderRequest {
            model: settings.model.clone(),
            messages: conversation.messages.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            tools,
            stream: true,
        };

        let mut rx = self
            .shared
            .provider
            .stream(request)
            .await
            .map_err(GenerationError::from)?;

        let mut completion = Completion {
            content: String::new(),
            tool_calls: Vec::new(),
            usage: None,
        };
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(GenerationError::from)?;
            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                completion.content.push_str(&text);
                self.emit(wrap(text)).await?;
            }
            completion.tool_calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                completion.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }
        Ok(completion)
    }

    async fn execute(&self, conversation: &mut Conversation, call: MessageToolCall) -> Result<(), Stop> {
        let input = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool arguments are not valid JSON");
                    let output = format!("Error: arguments are not valid JSON: {e}");
                    conversation.push(Message::tool_result(&call.id, &output));
                    return self
                        .emit(AgentStreamEvent::ToolResult {
                            id: call.id,
                            name: call.name,
                            output,
                            success: false,
                        })
                        .await;
                }
            }
        };

        self.emit(AgentStreamEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: input.clone(),
        })
        .await?;

        let outcome = self.shared.tools.call(&call.name, input).await;
        debug!(tool = %call.name, success = outcome.success, "Tool call finished");
        conversation.push(Message::tool_result(&call.id, &outcome.output));

        self.emit(AgentStreamEvent::ToolResult {
            id: call.id,
            name: call.name,
            output: outcome.output,
            success: outcome.success,
        })
        .await
    }
}

/// Builds a [`StreamingAgent`] per conversation, all sharing one provider
/// and one tool catalog.
pub struct StreamingAgentFactory {
    provider: Arc<dyn Provider>,
    model: String,
    tools: Arc<ToolCatalog>,
    config: AgentConfig,
}

impl StreamingAgentFactory {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolCatalog>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            tools,
            config,
        }
    }
}

#[async_trait]
impl SessionFactory for StreamingAgentFactory {
    async fn create(&self, conversation_key: &str) -> Result<Arc<dyn Agent>, GenerationError> {
        Ok(Arc::new(StreamingAgent::new(
            conversation_key,
            self.provider.clone(),
            self.model.clone(),
            self.tools.clone(),
            &self.config,
        )))
    }
}
