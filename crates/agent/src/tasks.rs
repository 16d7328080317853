//! GenerationTaskRegistry: background generation behind a poll interface.
//!
//! `start` registers a task and returns its id at once; one detached
//! worker per task streams the agent's answer into the task's
//! [`StreamBuffer`]. Callers then poll with `get_increment` /
//! `is_finished` (or both at once with `poll`) until the task reports
//! finished, and remove it.
//!
//! Tasks are never expired on their own. Owners bound their lifetime
//! with `remove` or `expire_older_than`.

use crate::buffer::{Increment, StreamBuffer};
use crate::sessions::ConversationSessionCache;
use chrono::Utc;
use pollbridge_config::{ReadMode, TaskConfig};
use pollbridge_core::agent::AgentStreamEvent;
use pollbridge_core::error::{GenerationError, TaskError};
use pollbridge_core::event::{DomainEvent, EventBus};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TASK_ID_LEN: usize = 10;

/// Lifecycle of one task. `Finished` needs both the producer to stop
/// and a poll to drain what it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Finished,
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

pub struct GenerationTask {
    id: String,
    question: String,
    conversation_key: String,
    buffer: StreamBuffer,
    created_at: Instant,
    worker: AtomicU8,
}

impl GenerationTask {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn conversation_key(&self) -> &str {
        &self.conversation_key
    }

    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> TaskState {
        if self.buffer.is_finished() {
            return TaskState::Finished;
        }
        match self.worker.load(Ordering::Acquire) {
            PENDING => TaskState::Pending,
            _ => TaskState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.load(Ordering::Acquire) == RUNNING
    }
}

fn generate_task_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TASK_ID_LEN)
        .map(char::from)
        .collect()
}

pub struct GenerationTaskRegistry {
    sessions: Arc<ConversationSessionCache>,
    tasks: RwLock<HashMap<String, Arc<GenerationTask>>>,
    read_mode: ReadMode,
    echo_question: bool,
    events: Option<Arc<EventBus>>,
}

impl GenerationTaskRegistry {
    pub fn new(sessions: Arc<ConversationSessionCache>, config: &TaskConfig) -> Self {
        Self {
            sessions,
            tasks: RwLock::new(HashMap::new()),
            read_mode: config.read_mode,
            echo_question: config.echo_question,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn sessions(&self) -> &Arc<ConversationSessionCache> {
        &self.sessions
    }

    fn read_tasks(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<GenerationTask>>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tasks(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<GenerationTask>>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task and launch its worker. Returns before any content
    /// exists. Must be called from within a tokio runtime.
    pub fn start(&self, question: &str, conversation_key: &str) -> String {
        let task = {
            let mut tasks = self.write_tasks();
            let mut id = generate_task_id();
            while tasks.contains_key(&id) {
                id = generate_task_id();
            }
            let task = Arc::new(GenerationTask {
                id: id.clone(),
                question: question.to_string(),
                conversation_key: conversation_key.to_string(),
                buffer: StreamBuffer::new(self.read_mode),
                created_at: Instant::now(),
                worker: AtomicU8::new(PENDING),
            });
            tasks.insert(id, task.clone());
            task
        };

        info!(task_id = %task.id, conversation = conversation_key, "Generation task created");
        let worker = Worker {
            task: task.clone(),
            sessions: self.sessions.clone(),
            echo_question: self.echo_question,
            events: self.events.clone(),
        };
        tokio::spawn(worker.run());
        task.id.clone()
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<GenerationTask>> {
        self.read_tasks().get(task_id).cloned()
    }

    fn task(&self, task_id: &str) -> Result<Arc<GenerationTask>, TaskError> {
        self.get(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Text produced since the last read (consuming mode) or so far
    /// (accumulating mode).
    pub fn get_increment(&self, task_id: &str) -> Result<String, TaskError> {
        Ok(self.task(task_id)?.buffer.read_increment().text)
    }

    pub fn is_finished(&self, task_id: &str) -> Result<bool, TaskError> {
        Ok(self.task(task_id)?.buffer.is_finished())
    }

    /// One poll: read and report completion under the same lock.
    pub fn poll(&self, task_id: &str) -> Result<Increment, TaskError> {
        Ok(self.task(task_id)?.buffer.read_increment())
    }

    pub fn remove(&self, task_id: &str) -> bool {
        let removed = self.write_tasks().remove(task_id).is_some();
        if removed {
            debug!(task_id, "Generation task removed");
        }
        removed
    }

    /// Drop tasks created more than `ttl` ago. Their workers, if still
    /// running, finish into a buffer nobody reads.
    pub fn expire_older_than(&self, ttl: Duration) -> usize {
        let mut tasks = self.write_tasks();
        let before = tasks.len();
        tasks.retain(|_, task| task.age() <= ttl);
        let expired = before - tasks.len();
        if expired > 0 {
            info!(expired, remaining = tasks.len(), "Expired generation tasks");
        }
        expired
    }

    /// Tasks not yet finished.
    pub fn active_count(&self) -> usize {
        self.read_tasks()
            .values()
            .filter(|t| t.state() != TaskState::Finished)
            .count()
    }

    pub fn len(&self) -> usize {
        self.read_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Feeds one task's buffer from its conversation's agent.
struct Worker {
    task: Arc<GenerationTask>,
    sessions: Arc<ConversationSessionCache>,
    echo_question: bool,
    events: Option<Arc<EventBus>>,
}

impl Worker {
    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Append to the task's buffer. A rejected push is logged and reported
    /// as `false`; it never happens while this worker owns the task.
    fn push(&self, text: impl Into<String>) -> bool {
        match self.task.buffer.push(text) {
            Ok(()) => true,
            Err(e) => {
                error!(task_id = %self.task.id, error = %e, "Increment pushed after the producer finished");
                false
            }
        }
    }

    async fn run(self) {
        let task = &self.task;
        task.worker.store(RUNNING, Ordering::Release);
        self.publish(DomainEvent::TaskStarted {
            task_id: task.id.clone(),
            conversation_key: task.conversation_key.clone(),
            timestamp: Utc::now(),
        });

        if self.echo_question {
            self.push(format!("Question: {}\n\n", task.question));
        }

        let failed = match self.generate().await {
            Ok(()) => false,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Generation failed");
                self.push(format!("Generation failed: {e}"));
                true
            }
        };

        task.buffer.set_producer_done();
        task.worker.store(STOPPED, Ordering::Release);
        info!(task_id = %task.id, chunks = task.buffer.len(), failed, "Generation task finished producing");
        self.publish(DomainEvent::TaskFinished {
            task_id: task.id.clone(),
            chunks: task.buffer.len(),
            failed,
            timestamp: Utc::now(),
        });
    }

    async fn generate(&self) -> Result<(), GenerationError> {
        let task = &self.task;
        let agent = self.sessions.get_or_create(&task.conversation_key).await?;

        let mut rx = match agent.generate_stream(&task.question).await {
            Ok(rx) => rx,
            Err(GenerationError::StreamingUnsupported) => {
                debug!(task_id = %task.id, agent = agent.name(), "Falling back to non-streaming generation");
                let answer = agent.generate(&task.question).await?;
                self.push(answer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut produced = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentStreamEvent::Chunk { content } => {
                    if !content.is_empty() {
                        produced = true;
                        self.push(content);
                    }
                }
                AgentStreamEvent::Summary { content } if produced => {
                    debug!(task_id = %task.id, len = content.len(), "Dropping redundant summary increment");
                }
                AgentStreamEvent::Summary { content } => {
                    self.push(content);
                }
                AgentStreamEvent::ToolCall { name, .. } => {
                    debug!(task_id = %task.id, tool = %name, "Agent calling tool");
                }
                AgentStreamEvent::ToolResult { name, success, .. } => {
                    debug!(task_id = %task.id, tool = %name, success, "Tool returned");
                }
                AgentStreamEvent::Error { message } => {
                    return Err(GenerationError::Failed(message));
                }
                AgentStreamEvent::Done { .. } => break,
            }
        }
        Ok(())
    }
}
