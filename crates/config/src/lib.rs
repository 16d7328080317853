//! Configuration loading, validation, and management for pollbridge.
//!
//! Loads configuration from `~/.pollbridge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Provider names that work without a `[providers.<name>]` section because
/// their endpoint is well known.
pub const KNOWN_PROVIDERS: &[&str] = &["qwen", "openai", "ollama", "deepseek", "openrouter"];

/// The root configuration structure.
///
/// Maps directly to `~/.pollbridge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fallback API key for providers that do not set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// External tool servers
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,

    /// Managed connection reuse policy
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Optional health supervision of tool servers
    #[serde(default)]
    pub health: HealthConfig,

    /// Agent behavior
    #[serde(default)]
    pub agent: AgentConfig,

    /// Generation task registry
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Conversation session cache
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "qwen".into()
}
fn default_true() -> bool {
    true
}

/// Mask a secret for display: `****` for short values, otherwise the first
/// and last four characters around `****`.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".into();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

fn redact(s: &Option<String>) -> String {
    match s {
        Some(v) => mask_secret(v),
        None => "None".into(),
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("providers", &self.providers)
            .field("tool_servers", &self.tool_servers)
            .field("connection", &self.connection)
            .field("health", &self.health)
            .field("agent", &self.agent)
            .field("tasks", &self.tasks)
            .field("sessions", &self.sessions)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// How a tool server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolServerKind {
    #[default]
    Http,
    Stdio,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: ToolServerKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP: server root, e.g. `http://localhost:9000`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// HTTP: endpoint path appended to `base_url`
    #[serde(default = "default_tool_path")]
    pub path: String,

    /// HTTP: bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Stdio: program to spawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_tool_path() -> String {
    "/mcp".into()
}

impl ToolServerConfig {
    /// An enabled HTTP server with default path.
    pub fn http(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ToolServerKind::Http,
            enabled: true,
            base_url: Some(base_url.into()),
            path: default_tool_path(),
            token: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Full endpoint URL for HTTP servers.
    pub fn endpoint(&self) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        if self.path.is_empty() {
            return Some(base.to_string());
        }
        let path = self.path.trim_start_matches('/');
        Some(format!("{base}/{path}"))
    }
}

impl std::fmt::Debug for ToolServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .field("token", &redact(&self.token))
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Idle time after which a connection is rebuilt instead of probed
    #[serde(default = "default_reuse_window")]
    pub reuse_window_secs: u64,

    /// Deadline of the liveness probe run before reuse
    #[serde(default = "default_connection_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_reuse_window() -> u64 {
    120
}
fn default_connection_probe_timeout() -> u64 {
    3
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reuse_window_secs: default_reuse_window(),
            probe_timeout_secs: default_connection_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_health_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long `get_connection` waits for recovery before giving up
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
}

fn default_probe_interval() -> u64 {
    30
}
fn default_health_probe_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    10
}
fn default_wait_timeout() -> u64 {
    10
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_health_probe_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_attempts: default_max_attempts(),
            wait_timeout_secs: default_wait_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Overrides the provider's default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool-call rounds per turn before the closing summary request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Messages of history kept per session, not counting the system prompt
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_iterations() -> usize {
    5
}
fn default_max_history() -> usize {
    6
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Tool results are real data: quote concrete values, never placeholders."
        .into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: None,
            max_iterations: default_max_iterations(),
            max_history: default_max_history(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// What a poll returns from a task's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Only the text produced since the previous poll
    Consuming,
    /// Everything produced so far, replacing what was shown before
    #[default]
    Accumulating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub read_mode: ReadMode,

    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Prefix every answer with the question it answers
    #[serde(default)]
    pub echo_question: bool,
}

fn default_task_ttl() -> u64 {
    600
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::default(),
            task_ttl_secs: default_task_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            echo_question: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 0 keeps sessions forever
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// HMAC-SHA256 secret for webhook signatures; unsigned when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_dedup_capacity() -> usize {
    1000
}
fn default_dedup_window() -> u64 {
    3600
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            webhook_secret: None,
            dedup_capacity: default_dedup_capacity(),
            dedup_window_secs: default_dedup_window(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("dedup_capacity", &self.dedup_capacity)
            .field("dedup_window_secs", &self.dedup_window_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pollbridge/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load a file, then apply `${VAR}` substitution and env overrides from
    /// the process environment.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment substitution and overrides using `lookup`.
    ///
    /// - whole-value `${VAR}` references in keys, URLs, tokens and env maps
    /// - `LLM_PROVIDER` / `POLLBRIDGE_PROVIDER` replace the default provider
    /// - `POLLBRIDGE_API_KEY` fills a missing fallback key
    /// - `MCP_DISABLE_<NAME>=true` disables a tool server
    /// - `MCP_EXTRA_SERVER=<url>` appends an http server named `extra`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let subst = |value: &mut String| {
            if let Some(var) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
                *value = lookup(var).unwrap_or_default();
            }
        };
        let subst_opt = |value: &mut Option<String>| {
            if let Some(v) = value.as_mut() {
                subst(v);
            }
        };

        subst_opt(&mut self.api_key);
        for provider in self.providers.values_mut() {
            subst_opt(&mut provider.api_key);
            subst_opt(&mut provider.api_url);
        }
        for server in &mut self.tool_servers {
            subst_opt(&mut server.base_url);
            subst_opt(&mut server.token);
            for value in server.env.values_mut() {
                subst(value);
            }
        }
        subst_opt(&mut self.gateway.webhook_secret);

        if let Some(provider) = lookup("LLM_PROVIDER").or_else(|| lookup("POLLBRIDGE_PROVIDER")) {
            if !provider.is_empty() {
                self.default_provider = provider;
            }
        }
        if self.api_key.as_deref().is_none_or(str::is_empty) {
            self.api_key = lookup("POLLBRIDGE_API_KEY").filter(|k| !k.is_empty());
        }

        for server in &mut self.tool_servers {
            let var = format!("MCP_DISABLE_{}", server.name.to_uppercase().replace('-', "_"));
            if lookup(&var).is_some_and(|v| v.eq_ignore_ascii_case("true")) {
                tracing::info!(server = %server.name, "Tool server disabled by {var}");
                server.enabled = false;
            }
        }
        if let Some(url) = lookup("MCP_EXTRA_SERVER").filter(|u| !u.is_empty()) {
            tracing::info!(url = %url, "Adding extra tool server from MCP_EXTRA_SERVER");
            self.tool_servers.push(ToolServerConfig::http("extra", url));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pollbridge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.default_provider.is_empty() {
            return Err(ConfigError::ValidationError(
                "default_provider must not be empty".into(),
            ));
        }
        if !self.providers.contains_key(&self.default_provider)
            && !KNOWN_PROVIDERS.contains(&self.default_provider.as_str())
        {
            return Err(ConfigError::ValidationError(format!(
                "default provider '{}' is neither configured under [providers] nor a known provider",
                self.default_provider
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.tool_servers {
            if server.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool server name must not be empty".into(),
                ));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool server name '{}'",
                    server.name
                )));
            }
            if !server.enabled {
                continue;
            }
            match server.kind {
                ToolServerKind::Http if server.base_url.as_deref().is_none_or(str::is_empty) => {
                    return Err(ConfigError::ValidationError(format!(
                        "http tool server '{}' requires base_url",
                        server.name
                    )));
                }
                ToolServerKind::Stdio if server.command.as_deref().is_none_or(str::is_empty) => {
                    return Err(ConfigError::ValidationError(format!(
                        "stdio tool server '{}' requires command",
                        server.name
                    )));
                }
                _ => {}
            }
        }

        if self.health.max_attempts == 0 || self.health.initial_backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "health.max_attempts and health.initial_backoff_ms must be > 0".into(),
            ));
        }

        if self.gateway.dedup_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.dedup_capacity must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// The configuration for the default provider, if any.
    pub fn default_provider_config(&self) -> Option<&ProviderConfig> {
        self.providers.get(&self.default_provider)
    }

    /// Tool servers that are enabled.
    pub fn enabled_tool_servers(&self) -> impl Iterator<Item = &ToolServerConfig> {
        self.tool_servers.iter().filter(|s| s.enabled)
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.providers.insert(
            "qwen".into(),
            ProviderConfig {
                api_key: Some("${DASHSCOPE_API_KEY}".into()),
                api_url: None,
                default_model: Some("qwen-max".into()),
            },
        );
        config
            .tool_servers
            .push(ToolServerConfig::http("local-tools", "http://localhost:9000"));
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            providers: HashMap::new(),
            tool_servers: Vec::new(),
            connection: ConnectionConfig::default(),
            health: HealthConfig::default(),
            agent: AgentConfig::default(),
            tasks: TaskConfig::default(),
            sessions: SessionConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
