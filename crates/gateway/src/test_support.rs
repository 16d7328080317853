use async_trait::async_trait;
use pollbridge_agent::GenerationTaskRegistry;
use pollbridge_config::AppConfig;
use pollbridge_core::error::ProviderError;
use pollbridge_core::event::EventBus;
use pollbridge_core::message::Message;
use pollbridge_core::provider::{Provider, ProviderRequest, ProviderResponse};
use pollbridge_tools::ToolServers;
use std::sync::Arc;

use crate::runtime::Runtime;

/// Answers every request with the same text.
pub struct FixedProvider {
    answer: String,
}

#[async_trait]
impl Provider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(&self.answer),
            usage: None,
            model: request.model,
        })
    }
}

pub fn runtime_with(config: AppConfig, answer: &str) -> Runtime {
    let provider = Arc::new(FixedProvider {
        answer: answer.to_string(),
    });
    Runtime::assemble(
        config,
        provider,
        "fixed-model".into(),
        ToolServers::default(),
        Arc::new(EventBus::default()),
    )
}

pub fn registry_with_answer(answer: &str) -> Arc<GenerationTaskRegistry> {
    runtime_with(AppConfig::default(), answer).registry
}
