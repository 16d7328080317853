//! ManagedConnection: one long-lived, self-healing link to a tool server.
//!
//! The link is created lazily, reused while it stays active, probed before
//! reuse and rebuilt when the probe fails or the reuse window has passed.
//! Identical concurrent calls (same tool name and arguments) reach the
//! server once; every caller receives the same response.

use async_trait::async_trait;
use chrono::Utc;
use pollbridge_config::ConnectionConfig;
use pollbridge_core::error::ToolServerError;
use pollbridge_core::event::{DomainEvent, EventBus};
use pollbridge_core::tool::{ToolConnector, ToolDescriptor, ToolResponse, ToolServer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// When to reuse and how to validate an existing link.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPolicy {
    /// Idle time after which the link is rebuilt without probing
    pub reuse_window: Duration,
    /// Deadline for the `list_tools` liveness probe
    pub probe_timeout: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionPolicy {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            reuse_window: Duration::from_secs(config.reuse_window_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }
}

struct Live {
    server: Arc<dyn ToolServer>,
    last_activity: Instant,
}

type CallRecord = Arc<OnceCell<ToolResponse>>;

pub struct ManagedConnection {
    connector: Arc<dyn ToolConnector>,
    policy: ConnectionPolicy,
    live: Mutex<Option<Live>>,
    calls: StdMutex<HashMap<String, CallRecord>>,
    connects: AtomicU64,
    events: Option<Arc<EventBus>>,
}

/// Stable key for a call: SHA-256 over the tool name and the canonical
/// (key-sorted) JSON of its arguments.
pub fn fingerprint(name: &str, arguments: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical(arguments).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Sort object keys recursively; map ordering depends on serde_json features.
fn canonical(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn same_link(a: &Arc<dyn ToolServer>, b: &Arc<dyn ToolServer>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ManagedConnection {
    pub fn new(connector: Arc<dyn ToolConnector>, policy: ConnectionPolicy) -> Self {
        Self {
            connector,
            policy,
            live: Mutex::new(None),
            calls: StdMutex::new(HashMap::new()),
            connects: AtomicU64::new(0),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// How many links have been opened so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        self.live.lock().await.is_some()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, CallRecord>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Return a usable link, creating or rebuilding it as needed.
    ///
    /// Runs entirely under the connection lock, so concurrent callers
    /// never open more than one link.
    pub async fn ensure_connection(&self) -> Result<Arc<dyn ToolServer>, ToolServerError> {
        let mut live = self.live.lock().await;

        let rebuild_reason = match live.as_mut() {
            None => None,
            Some(current) if current.last_activity.elapsed() >= self.policy.reuse_window => {
                Some("reuse window elapsed".to_string())
            }
            Some(current) => {
                match timeout(self.policy.probe_timeout, current.server.list_tools()).await {
                    Ok(Ok(_)) => {
                        current.last_activity = Instant::now();
                        return Ok(Arc::clone(&current.server));
                    }
                    Ok(Err(e)) => Some(format!("liveness probe failed: {e}")),
                    Err(_) => Some(format!(
                        "liveness probe timed out after {}ms",
                        self.policy.probe_timeout.as_millis()
                    )),
                }
            }
        };

        if let Some(reason) = &rebuild_reason {
            if let Some(stale) = live.take() {
                self.teardown(stale.server, reason).await;
            }
        }

        let server = self.connector.connect().await?;
        self.connects.fetch_add(1, Ordering::Relaxed);
        *live = Some(Live {
            server: Arc::clone(&server),
            last_activity: Instant::now(),
        });

        match rebuild_reason {
            Some(reason) => {
                info!(server = %self.connector.name(), %reason, "Tool server connection rebuilt");
                self.publish(DomainEvent::ConnectionRebuilt {
                    server: self.connector.name().to_string(),
                    reason,
                    timestamp: Utc::now(),
                });
            }
            None => debug!(server = %self.connector.name(), "Tool server connection opened"),
        }
        Ok(server)
    }

    async fn teardown(&self, server: Arc<dyn ToolServer>, reason: &str) {
        debug!(server = %self.connector.name(), reason, "Tearing down tool server connection");
        if let Err(e) = server.close().await {
            debug!(server = %self.connector.name(), error = %e, "Close during teardown failed");
        }
        // In-flight callers hold their own record; results from this link
        // never reach calls made on the next one
        self.records().clear();
    }

    async fn touch(&self, server: &Arc<dyn ToolServer>) {
        if let Some(current) = self.live.lock().await.as_mut() {
            if same_link(&current.server, server) {
                current.last_activity = Instant::now();
            }
        }
    }

    /// Drop `server` if it is still the live link.
    async fn discard(&self, server: &Arc<dyn ToolServer>, reason: &str) {
        let mut live = self.live.lock().await;
        if live
            .as_ref()
            .is_some_and(|current| same_link(&current.server, server))
        {
            if let Some(stale) = live.take() {
                self.teardown(stale.server, reason).await;
            }
        }
    }

    /// Invoke a tool, deduplicating identical calls.
    pub async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError> {
        let key = fingerprint(name, &arguments);
        let record = Arc::clone(self.records().entry(key.clone()).or_default());

        if let Some(cached) = record.get() {
            debug!(server = %self.connector.name(), tool = name, "Returning deduplicated result");
            self.publish_invocation(name, true, Duration::ZERO, true);
            return Ok(cached.clone());
        }

        let started = Instant::now();
        let mut executed = false;
        let result = record
            .get_or_try_init(|| {
                executed = true;
                self.invoke(name, arguments)
            })
            .await
            .cloned();

        match &result {
            Ok(_) => self.publish_invocation(name, true, started.elapsed(), !executed),
            Err(e) => {
                warn!(server = %self.connector.name(), tool = name, error = %e, "Tool call failed");
                self.publish_invocation(name, false, started.elapsed(), false);
                let mut records = self.records();
                if records.get(&key).is_some_and(|r| {
                    Arc::ptr_eq(r, &record) && !r.initialized() && Arc::strong_count(r) <= 2
                })
                {
                    records.remove(&key);
                }
            }
        }
        result
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError> {
        let server = self.ensure_connection().await?;
        match server.call_tool(name, arguments).await {
            Ok(response) => {
                self.touch(&server).await;
                Ok(response)
            }
            Err(e) => {
                if e.is_connection_failure() {
                    self.discard(&server, &format!("call failed: {e}")).await;
                }
                Err(e)
            }
        }
    }

    fn publish_invocation(&self, tool: &str, success: bool, elapsed: Duration, deduplicated: bool) {
        self.publish(DomainEvent::ToolInvoked {
            server: self.connector.name().to_string(),
            tool_name: tool.to_string(),
            success,
            duration_ms: elapsed.as_millis() as u64,
            deduplicated,
            timestamp: Utc::now(),
        });
    }

    /// Tear down the link and forget every call record. No-op when idle.
    pub async fn close(&self) -> Result<(), ToolServerError> {
        let stale = self.live.lock().await.take();
        self.records().clear();
        match stale {
            Some(live) => live.server.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ToolServer for ManagedConnection {
    fn name(&self) -> &str {
        self.connector.name()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        let server = self.ensure_connection().await?;
        match server.list_tools().await {
            Ok(tools) => {
                self.touch(&server).await;
                Ok(tools)
            }
            Err(e) => {
                if e.is_connection_failure() {
                    self.discard(&server, &format!("listing failed: {e}")).await;
                }
                Err(e)
            }
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError> {
        self.call(name, arguments).await
    }

    async fn close(&self) -> Result<(), ToolServerError> {
        ManagedConnection::close(self).await
    }
}
