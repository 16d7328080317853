//! Error types for the pollbridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all pollbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool server errors ---
    #[error("Tool server error: {0}")]
    ToolServer(#[from] ToolServerError),

    // --- Generation errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Task registry errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures observed while talking to an external tool server.
///
/// `Connection` and `Timeout` are the signals that make a managed
/// connection tear down and rebuild; `Unavailable` is what a supervised
/// connection reports once its wait window has passed without recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolServerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Tool server unavailable: {0}")]
    Unavailable(String),

    #[error("Tool call failed: {tool_name}: {reason}")]
    Invocation { tool_name: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl ToolServerError {
    /// Whether this failure means the underlying link is no longer usable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Streaming generation is not supported by this agent")]
    StreamingUnsupported,

    #[error("Generation failed: {0}")]
    Failed(String),

    #[error("Provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("Session could not be created: {0}")]
    Session(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Content pushed after the producer finished")]
    ProducerFinished,
}
