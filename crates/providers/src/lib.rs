//! LLM provider implementations for pollbridge.
//!
//! All providers implement the `pollbridge_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::{OpenAiCompatProvider, SseDecoder};
pub use router::{ProviderRouter, build_from_config};
