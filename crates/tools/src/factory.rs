//! Building tool-server connections from configuration.

use crate::catalog::ToolCatalog;
use crate::http::HttpConnector;
use crate::managed::{ConnectionPolicy, ManagedConnection};
use crate::stdio::StdioConnector;
use crate::supervisor::{HealthSupervisor, SupervisorPolicy};
use pollbridge_config::{AppConfig, ToolServerConfig, ToolServerKind};
use pollbridge_core::error::ToolServerError;
use pollbridge_core::event::{EventBus, HealthState};
use pollbridge_core::tool::{ToolConnector, ToolServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-request deadline for HTTP tool servers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Open links to the server `config` describes.
pub fn connector_for(config: &ToolServerConfig) -> Result<Arc<dyn ToolConnector>, ToolServerError> {
    match config.kind {
        ToolServerKind::Http => {
            let endpoint = config.endpoint().ok_or_else(|| {
                ToolServerError::Connection(format!("'{}' has no base_url", config.name))
            })?;
            Ok(Arc::new(HttpConnector::new(
                config.name.clone(),
                endpoint,
                config.token.clone(),
                REQUEST_TIMEOUT,
            )?))
        }
        ToolServerKind::Stdio => {
            let command = config.command.clone().ok_or_else(|| {
                ToolServerError::Connection(format!("'{}' has no command", config.name))
            })?;
            Ok(Arc::new(StdioConnector::new(
                config.name.clone(),
                command,
                config.args.clone(),
                config.env.clone(),
            )))
        }
    }
}

/// A one-line remediation hint for a failed connection, if the failure
/// looks familiar.
pub fn failure_hint(error: &ToolServerError) -> Option<&'static str> {
    let text = error.to_string().to_lowercase();
    if text.contains("connection refused") {
        Some("server not running or wrong port; start it or fix base_url")
    } else if matches!(error, ToolServerError::Timeout { .. }) || text.contains("timed out") {
        Some("network timeout or slow server; check connectivity or raise the timeouts")
    } else if text.contains("dns")
        || text.contains("no such host")
        || text.contains("failed to lookup address")
    {
        Some("host name does not resolve; check the spelling or use an IP address")
    } else if text.contains("404") {
        Some("endpoint path not found; check the server's path setting")
    } else {
        None
    }
}

fn describe_failure(error: &ToolServerError) -> String {
    match failure_hint(error) {
        Some(hint) => format!("{error} (hint: {hint})"),
        None => error.to_string(),
    }
}

/// One configured server with its connection strategy.
#[derive(Clone)]
pub enum ServerHandle {
    Managed(Arc<ManagedConnection>),
    Supervised(Arc<HealthSupervisor>),
}

impl ServerHandle {
    pub fn name(&self) -> &str {
        match self {
            Self::Managed(m) => m.name(),
            Self::Supervised(s) => s.name(),
        }
    }

    pub fn as_server(&self) -> Arc<dyn ToolServer> {
        match self {
            Self::Managed(m) => m.clone() as Arc<dyn ToolServer>,
            Self::Supervised(s) => s.clone() as Arc<dyn ToolServer>,
        }
    }

    /// Supervised servers report their health state; managed ones report
    /// whether a link is currently open.
    pub async fn status(&self) -> String {
        match self {
            Self::Managed(m) if m.is_connected().await => "connected".into(),
            Self::Managed(_) => "idle".into(),
            Self::Supervised(s) => s.state().to_string(),
        }
    }

    pub fn health(&self) -> Option<HealthState> {
        match self {
            Self::Managed(_) => None,
            Self::Supervised(s) => Some(s.state()),
        }
    }
}

/// Every enabled tool server of an [`AppConfig`].
#[derive(Default)]
pub struct ToolServers {
    handles: Vec<ServerHandle>,
}

impl ToolServers {
    /// Wrap each enabled server in a [`ManagedConnection`], or in a
    /// [`HealthSupervisor`] when `[health] enabled = true`. Servers whose
    /// connector cannot be built are logged and skipped. Nothing connects
    /// until [`start`](Self::start).
    pub fn from_config(config: &AppConfig, events: Option<Arc<EventBus>>) -> Self {
        let mut handles = Vec::new();

        for server in config.enabled_tool_servers() {
            let connector = match connector_for(server) {
                Ok(c) => c,
                Err(e) => {
                    warn!(server = %server.name, error = %e, "Skipping tool server");
                    continue;
                }
            };

            let handle = if config.health.enabled {
                let mut supervisor =
                    HealthSupervisor::new(connector, SupervisorPolicy::from(&config.health));
                if let Some(bus) = &events {
                    supervisor = supervisor.with_events(bus.clone());
                }
                ServerHandle::Supervised(Arc::new(supervisor))
            } else {
                let mut managed =
                    ManagedConnection::new(connector, ConnectionPolicy::from(&config.connection));
                if let Some(bus) = &events {
                    managed = managed.with_events(bus.clone());
                }
                ServerHandle::Managed(Arc::new(managed))
            };
            handles.push(handle);
        }

        Self { handles }
    }

    pub fn from_handles(handles: Vec<ServerHandle>) -> Self {
        Self { handles }
    }

    /// Connect everything. Supervisors keep retrying in the background;
    /// a managed server that fails its first connection test is dropped.
    pub async fn start(&mut self) {
        let mut kept = Vec::with_capacity(self.handles.len());

        for handle in self.handles.drain(..) {
            match &handle {
                ServerHandle::Supervised(s) => {
                    s.start().await;
                    info!(server = %s.name(), state = %s.state(), "Supervised tool server configured");
                    kept.push(handle);
                }
                ServerHandle::Managed(m) => match m.list_tools().await {
                    Ok(tools) => {
                        info!(server = %m.name(), tools = tools.len(), "Tool server configured");
                        kept.push(handle);
                    }
                    Err(e) => {
                        warn!(
                            server = %m.name(),
                            error = %describe_failure(&e),
                            "Tool server failed its connection test and will be skipped"
                        );
                    }
                },
            }
        }

        self.handles = kept;
    }

    pub fn handles(&self) -> &[ServerHandle] {
        &self.handles
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// A catalog over all servers.
    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::new(self.handles.iter().map(ServerHandle::as_server).collect())
    }

    /// `(name, status)` for every server.
    pub async fn status_report(&self) -> Vec<(String, String)> {
        let mut report = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            report.push((handle.name().to_string(), handle.status().await));
        }
        report
    }

    pub async fn close(&self) {
        for handle in &self.handles {
            if let Err(e) = handle.as_server().close().await {
                warn!(server = %handle.name(), error = %e, "Failed to close tool server");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockConnector;

    #[test]
    fn http_connector_uses_joined_endpoint() {
        let config = ToolServerConfig::http("kb", "http://localhost:8000/");
        let connector = connector_for(&config).unwrap();
        assert_eq!(connector.name(), "kb");
    }

    #[test]
    fn stdio_without_command_is_rejected() {
        let config = ToolServerConfig {
            kind: ToolServerKind::Stdio,
            base_url: None,
            ..ToolServerConfig::http("local", "")
        };
        assert!(connector_for(&config).is_err());
    }

    #[test]
    fn hints_classify_common_failures() {
        let refused = ToolServerError::Connection("tcp connect error: Connection refused (os error 111)".into());
        assert!(failure_hint(&refused).unwrap().contains("not running"));

        let timeout = ToolServerError::Timeout {
            operation: "connect".into(),
            timeout_ms: 15_000,
        };
        assert!(failure_hint(&timeout).unwrap().contains("timeout"));

        let dns = ToolServerError::Connection("dns error: failed to lookup address information".into());
        assert!(failure_hint(&dns).unwrap().contains("resolve"));

        let missing = ToolServerError::Connection("HTTP 404 Not Found".into());
        assert!(failure_hint(&missing).unwrap().contains("path"));

        assert!(failure_hint(&ToolServerError::Protocol("bad json".into())).is_none());
    }

    #[test]
    fn builds_one_handle_per_enabled_server() {
        let mut config = AppConfig::default();
        config.tool_servers = vec![
            ToolServerConfig::http("kb", "http://localhost:8000"),
            ToolServerConfig {
                enabled: false,
                ..ToolServerConfig::http("off", "http://localhost:8001")
            },
        ];
        let servers = ToolServers::from_config(&config, None);
        assert_eq!(servers.handles().len(), 1);
        assert!(matches!(servers.handles()[0], ServerHandle::Managed(_)));

        config.health.enabled = true;
        let servers = ToolServers::from_config(&config, None);
        assert!(matches!(servers.handles()[0], ServerHandle::Supervised(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn start_drops_unreachable_managed_servers() {
        let up = MockConnector::new("up");
        let down = MockConnector::new("down");
        down.set_reachable(false);
        let mut servers = ToolServers::from_handles(vec![
            ServerHandle::Managed(Arc::new(ManagedConnection::new(up.clone(), ConnectionPolicy::default()))),
            ServerHandle::Managed(Arc::new(ManagedConnection::new(down, ConnectionPolicy::default()))),
        ]);

        servers.start().await;
        assert_eq!(servers.handles().len(), 1);
        assert_eq!(servers.handles()[0].name(), "up");

        let report = servers.status_report().await;
        assert_eq!(report, vec![("up".to_string(), "connected".to_string())]);

        let catalog = servers.catalog();
        assert_eq!(catalog.definitions().await.len(), 1);
        servers.close().await;
        assert_eq!(up.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supervised_servers_survive_a_failed_start() {
        let down = MockConnector::new("down");
        down.set_reachable(false);
        let supervisor = Arc::new(HealthSupervisor::new(down, SupervisorPolicy::default()));
        let mut servers = ToolServers::from_handles(vec![ServerHandle::Supervised(supervisor)]);

        servers.start().await;
        assert_eq!(servers.handles().len(), 1);
        assert_eq!(servers.handles()[0].health(), Some(HealthState::Reconnecting));
        servers.close().await;
    }
}
