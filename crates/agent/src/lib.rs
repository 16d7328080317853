//! The streaming-to-polling bridge.
//!
//! An agent produces its answer incrementally; a polling protocol can only
//! ask "what do you have so far, are you done?". This crate sits between:
//!
//! - [`StreamBuffer`] turns pushed increments into pollable reads
//! - [`GenerationTaskRegistry`] runs one background worker per request
//!   and exposes `start` / `get_increment` / `is_finished`
//! - [`ConversationSessionCache`] keeps one agent session per conversation
//! - [`StreamingAgent`] is the production agent: provider streaming plus a
//!   tool-calling loop over a [`ToolCatalog`](pollbridge_tools::ToolCatalog)

pub mod buffer;
pub mod loop_runner;
pub mod sessions;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use buffer::{Increment, StreamBuffer};
pub use loop_runner::{StreamingAgent, StreamingAgentFactory};
pub use sessions::{ConversationSessionCache, SessionFactory};
pub use tasks::{GenerationTask, GenerationTaskRegistry, TaskState};
