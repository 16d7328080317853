//! # pollbridge core
//!
//! Domain types, traits, and error definitions for pollbridge, a bridge
//! between long-lived tool-server connections, an incrementally generating
//! agent, and request/response-only polling protocols.
//! This crate has **no framework dependencies**: it defines the domain
//! model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external capability is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Substituting a managed or supervised connection wherever a raw tool
//!   server is expected
//! - Easy testing with mock connectors, providers and agents
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentStreamEvent};
pub use error::{Error, GenerationError, ProviderError, Result, TaskError, ToolServerError};
pub use event::{DomainEvent, EventBus, HealthState};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{ToolConnector, ToolContent, ToolDescriptor, ToolResponse, ToolServer};
