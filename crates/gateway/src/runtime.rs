//! Assembly of the long-lived subsystems shared by the HTTP server and the
//! CLI: provider, tool servers, session cache and task registry.

use pollbridge_agent::{ConversationSessionCache, GenerationTaskRegistry, StreamingAgentFactory};
use pollbridge_config::AppConfig;
use pollbridge_core::error::{Error, Result};
use pollbridge_core::event::EventBus;
use pollbridge_core::provider::Provider;
use pollbridge_tools::ToolServers;
use std::sync::Arc;
use tracing::info;

pub struct Runtime {
    pub config: AppConfig,
    pub events: Arc<EventBus>,
    pub tools: Arc<ToolServers>,
    pub registry: Arc<GenerationTaskRegistry>,
    pub model: String,
}

impl Runtime {
    /// Build everything once from configuration and connect the tool
    /// servers.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let router = pollbridge_providers::router::build_from_config(&config)?;
        let (provider, default_model) =
            router.default_provider().ok_or_else(|| Error::Config {
                message: format!(
                    "default provider '{}' is not configured; set an API key",
                    config.default_provider
                ),
            })?;
        let model = config.agent.model.clone().unwrap_or(default_model);

        let events = Arc::new(EventBus::default());
        let mut tools = ToolServers::from_config(&config, Some(events.clone()));
        tools.start().await;

        Ok(Self::assemble(config, provider, model, tools, events))
    }

    /// Wire already-built parts together.
    pub fn assemble(
        config: AppConfig,
        provider: Arc<dyn Provider>,
        model: String,
        tools: ToolServers,
        events: Arc<EventBus>,
    ) -> Self {
        let catalog = Arc::new(tools.catalog());
        let factory =
            StreamingAgentFactory::new(provider.clone(), model.clone(), catalog, config.agent.clone());
        let sessions = Arc::new(ConversationSessionCache::new(Arc::new(factory)));
        let registry = Arc::new(
            GenerationTaskRegistry::new(sessions, &config.tasks).with_events(events.clone()),
        );

        info!(
            provider = %provider.name(),
            model = %model,
            tool_servers = tools.handles().len(),
            read_mode = ?config.tasks.read_mode,
            "Runtime assembled"
        );

        Self {
            config,
            events,
            tools: Arc::new(tools),
            registry,
            model,
        }
    }

    pub async fn shutdown(&self) {
        self.tools.close().await;
    }
}
