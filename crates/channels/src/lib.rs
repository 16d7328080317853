//! Polling webhook adapter for pollbridge.
//!
//! The platform posts messages and then re-polls with `msgtype: stream`
//! refreshes. This crate parses those calls, drops retried message ids,
//! verifies signatures and answers each call from the task registry.

pub mod dedup;
pub mod message;
pub mod webhook;

pub use dedup::MessageDedup;
pub use message::{ChatType, InboundMessage, MsgType, Reply, StreamReply};
pub use webhook::{HmacVerifier, PollingBridge, SignatureVerifier, Unsigned, verifier_for};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Signature rejected: {0}")]
    Signature(String),
}
