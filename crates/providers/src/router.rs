//! Provider router: selects the LLM provider named by configuration.

use crate::openai_compat::OpenAiCompatProvider;
use pollbridge_config::AppConfig;
use pollbridge_core::error::ProviderError;
use pollbridge_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds every configured provider and knows which one is the default.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    models: HashMap<String, String>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            models: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider together with the model it should use.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) {
        let name = name.into();
        self.models.insert(name.clone(), model.into());
        self.providers.insert(name, provider);
    }

    /// The default provider and its model.
    pub fn default_provider(&self) -> Option<(Arc<dyn Provider>, String)> {
        self.get(&self.default_provider)
    }

    /// A specific provider and its model.
    pub fn get(&self, name: &str) -> Option<(Arc<dyn Provider>, String)> {
        let provider = self.providers.get(name)?.clone();
        let model = self.models.get(name).cloned().unwrap_or_default();
        Some((provider, model))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every `[providers.<name>]` section becomes an OpenAI-compatible provider;
/// the default provider is added from well-known settings when it has no
/// section of its own.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));
        let model = provider_config
            .default_model
            .clone()
            .unwrap_or_else(|| default_model(name));

        let provider = OpenAiCompatProvider::new(name, &base_url, &api_key)?;
        router.register(name.clone(), Arc::new(provider), model);
    }

    if router.get(&config.default_provider).is_none() {
        let name = &config.default_provider;
        let api_key = config.api_key.clone().unwrap_or_default();
        let provider = OpenAiCompatProvider::new(name, default_base_url(name), &api_key)?;
        router.register(name.clone(), Arc::new(provider), default_model(name));
    }

    // An explicit agent model wins over the provider default
    if let Some(model) = &config.agent.model {
        router
            .models
            .insert(config.default_provider.clone(), model.clone());
    }

    Ok(router)
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "qwen" => "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

fn default_model(provider_name: &str) -> String {
    match provider_name {
        "qwen" => "qwen-max".into(),
        "openai" => "gpt-4o-mini".into(),
        "ollama" => "qwen3:32b".into(),
        "deepseek" => "deepseek-chat".into(),
        "openrouter" => "qwen/qwen-max".into(),
        _ => "default".into(),
    }
}
