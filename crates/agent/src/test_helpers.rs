//! Scripted agents and providers shared by the agent crate's tests.

use async_trait::async_trait;
use pollbridge_core::agent::{Agent, AgentStreamEvent};
use pollbridge_core::error::{GenerationError, ProviderError};
use pollbridge_core::message::{Message, MessageToolCall};
use pollbridge_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use crate::sessions::SessionFactory;

pub fn chunks(parts: &[&str]) -> Vec<AgentStreamEvent> {
    parts
        .iter()
        .map(|p| AgentStreamEvent::Chunk {
            content: (*p).to_string(),
        })
        .collect()
}

/// Replays a fixed event script for every question.
pub struct ScriptedAgent {
    script: Vec<AgentStreamEvent>,
    /// When set, each event waits for one `release` permit
    gate: Option<Arc<Notify>>,
    delay: Duration,
    streaming: bool,
}

impl ScriptedAgent {
    pub fn new(script: Vec<AgentStreamEvent>) -> Self {
        Self {
            script,
            gate: None,
            delay: Duration::ZERO,
            streaming: true,
        }
    }

    pub fn gated(script: Vec<AgentStreamEvent>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_stream(
        &self,
        _question: &str,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>, GenerationError> {
        if !self.streaming {
            return Err(GenerationError::StreamingUnsupported);
        }
        let (tx, rx) = mpsc::channel(16);
        let script = self.script.clone();
        let gate = self.gate.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            for event in script {
                if let Some(gate) = &gate {
                    gate.notified().await;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn generate(&self, _question: &str) -> Result<String, GenerationError> {
        Ok(self
            .script
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect())
    }
}

/// Hands out [`ScriptedAgent`]s and counts how many it built.
pub struct ScriptedFactory {
    script: Vec<AgentStreamEvent>,
    created: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl ScriptedFactory {
    pub fn new(script: Vec<AgentStreamEvent>) -> Arc<Self> {
        Arc::new(Self {
            script,
            created: AtomicUsize::new(0),
            failure: Mutex::new(None),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn create(&self, _conversation_key: &str) -> Result<Arc<dyn Agent>, GenerationError> {
        if let Some(reason) = self.failure.lock().unwrap().take() {
            return Err(GenerationError::Session(reason));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedAgent::new(self.script.clone())))
    }
}

/// One scripted provider turn.
#[derive(Clone)]
pub enum Turn {
    Text(Vec<&'static str>),
    Tools(Vec<(&'static str, &'static str)>),
    Fail(&'static str),
}

/// Streams a queue of turns and records every request it sees.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let mut rx = self.stream(request).await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            content.push_str(chunk.content.as_deref().unwrap_or_default());
            tool_calls.extend(chunk.tool_calls);
        }
        Ok(ProviderResponse {
            message: Message::assistant_with_tools(content, tool_calls),
            usage: None,
            model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Turn::Text(vec!["(no more turns)"]));

        let (tx, rx) = mpsc::channel(16);
        match turn {
            Turn::Fail(reason) => return Err(ProviderError::Network(reason.into())),
            Turn::Text(parts) => {
                for part in parts {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: Some(part.into()),
                            ..Default::default()
                        }))
                        .await;
                }
                let _ = tx
                    .send(Ok(StreamChunk {
                        done: true,
                        ..Default::default()
                    }))
                    .await;
            }
            Turn::Tools(calls) => {
                let tool_calls = calls
                    .iter()
                    .enumerate()
                    .map(|(i, (name, args))| MessageToolCall {
                        id: format!("call_{i}"),
                        name: (*name).to_string(),
                        arguments: (*args).to_string(),
                    })
                    .collect();
                let _ = tx
                    .send(Ok(StreamChunk {
                        tool_calls,
                        done: true,
                        ..Default::default()
                    }))
                    .await;
            }
        }
        Ok(rx)
    }
}
