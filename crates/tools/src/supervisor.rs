//! HealthSupervisor: background liveness probing with bounded,
//! exponentially backed-off reconnection.
//!
//! State machine:
//!
//! ```text
//! Healthy --probe/call failure--> Unhealthy --(immediately)--> Reconnecting
//! Reconnecting --connect + test ok--> Healthy
//! Reconnecting --attempts exhausted--> Unhealthy (until the next failure)
//! ```
//!
//! Callers never block indefinitely: [`HealthSupervisor::get_connection`]
//! waits at most `wait_timeout` for recovery and then reports
//! [`ToolServerError::Unavailable`].

use async_trait::async_trait;
use chrono::Utc;
use pollbridge_config::HealthConfig;
use pollbridge_core::error::ToolServerError;
use pollbridge_core::event::{DomainEvent, EventBus, HealthState};
use pollbridge_core::tool::{ToolConnector, ToolDescriptor, ToolResponse, ToolServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorPolicy {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    pub wait_timeout: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for SupervisorPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            probe_interval: Duration::from_secs(config.probe_interval_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            max_attempts: config.max_attempts,
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
        }
    }
}

impl SupervisorPolicy {
    /// Wait before the reconnect attempt that follows `failures` failed ones:
    /// `min(initial * 2^failures, max_backoff)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.min(30);
        let initial_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(initial_ms.saturating_mul(1u64 << exp));
        delay.min(self.max_backoff)
    }
}

struct Inner {
    connector: Arc<dyn ToolConnector>,
    policy: SupervisorPolicy,
    link: RwLock<Option<Arc<dyn ToolServer>>>,
    health: watch::Sender<HealthState>,
    reconnecting: AtomicBool,
    shutdown: watch::Sender<bool>,
    events: Option<Arc<EventBus>>,
}

/// A [`ToolServer`] whose link is watched and restored in the background.
pub struct HealthSupervisor {
    inner: Arc<Inner>,
    started: AtomicBool,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthSupervisor {
    pub fn new(connector: Arc<dyn ToolConnector>, policy: SupervisorPolicy) -> Self {
        Self::build(connector, policy, None)
    }

    /// Publish `HealthChanged` events on `events`. Call before [`start`](Self::start).
    pub fn with_events(self, events: Arc<EventBus>) -> Self {
        let inner = &self.inner;
        Self::build(Arc::clone(&inner.connector), inner.policy, Some(events))
    }

    fn build(
        connector: Arc<dyn ToolConnector>,
        policy: SupervisorPolicy,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        let (health, _) = watch::channel(HealthState::Unhealthy);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                link: RwLock::new(None),
                health,
                reconnecting: AtomicBool::new(false),
                shutdown,
                events,
            }),
            started: AtomicBool::new(false),
            probe_task: Mutex::new(None),
        }
    }

    /// Connect and launch the probe loop. A failed first connect starts
    /// the reconnect sequence instead of failing.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = &self.inner;

        match inner.try_connect().await {
            Ok(server) => {
                let mut link = inner.link.write().await;
                if inner.is_stopped() {
                    drop(link);
                    let _ = server.close().await;
                    return;
                }
                *link = Some(server);
                drop(link);
                inner.set_state(HealthState::Healthy);
            }
            Err(e) => {
                warn!(server = %inner.connector.name(), error = %e, "Initial tool server connect failed");
                inner.mark_unhealthy(&e.to_string());
            }
        }

        let probe = tokio::spawn(Arc::clone(inner).probe_loop());
        *self
            .probe_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(probe);
        info!(server = %inner.connector.name(), "Health supervisor started");
    }

    /// Stop probing and reconnecting, and close the current link.
    pub async fn stop(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        if let Some(task) = self
            .probe_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(server) = self.inner.link.write().await.take() {
            let _ = server.close().await;
        }
        self.inner.set_state(HealthState::Unhealthy);
        info!(server = %self.inner.connector.name(), "Health supervisor stopped");
    }

    pub fn state(&self) -> HealthState {
        *self.inner.health.borrow()
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// Observe health transitions.
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.inner.health.subscribe()
    }

    /// The current link, waiting up to `wait_timeout` for recovery when
    /// unhealthy.
    pub async fn get_connection(&self) -> Result<Arc<dyn ToolServer>, ToolServerError> {
        if self.inner.is_stopped() {
            return Err(ToolServerError::Unavailable(format!(
                "'{}' is stopped",
                self.inner.connector.name()
            )));
        }
        if !self.is_healthy() {
            let mut health = self.inner.health.subscribe();
            let mut shutdown = self.inner.shutdown.subscribe();
            let recovered = async {
                tokio::select! {
                    r = health.wait_for(|s| *s == HealthState::Healthy) => r.is_ok(),
                    _ = shutdown.wait_for(|stopped| *stopped) => false,
                }
            };
            let wait = self.inner.policy.wait_timeout;
            if !matches!(timeout(wait, recovered).await, Ok(true)) {
                return Err(ToolServerError::Unavailable(format!(
                    "'{}' did not recover within {}s",
                    self.inner.connector.name(),
                    wait.as_secs()
                )));
            }
        }

        self.inner.link.read().await.clone().ok_or_else(|| {
            ToolServerError::Unavailable(format!("'{}' has no link", self.inner.connector.name()))
        })
    }

    fn observe<T>(&self, result: &Result<T, ToolServerError>) {
        if let Err(e) = result {
            // A tool rejecting its arguments says nothing about the link
            if !matches!(e, ToolServerError::Invocation { .. }) {
                self.inner.mark_unhealthy(&e.to_string());
            }
        }
    }
}

impl Inner {
    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn set_state(&self, state: HealthState) {
        if state == HealthState::Healthy && self.is_stopped() {
            return;
        }
        let previous = self.health.send_replace(state);
        if previous != state {
            info!(server = %self.connector.name(), from = %previous, to = %state, "Tool server health changed");
            self.publish(DomainEvent::HealthChanged {
                server: self.connector.name().to_string(),
                state,
                timestamp: Utc::now(),
            });
        }
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn mark_unhealthy(self: &Arc<Self>, reason: &str) {
        if self.is_stopped() {
            return;
        }
        if *self.health.borrow() == HealthState::Healthy {
            warn!(server = %self.connector.name(), reason, "Tool server marked unhealthy");
            self.set_state(HealthState::Unhealthy);
        }
        self.trigger_reconnect();
    }

    /// Start a reconnect sequence unless one is already running.
    fn trigger_reconnect(self: &Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.set_state(HealthState::Reconnecting);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.reconnect_loop().await;
            inner.reconnecting.store(false, Ordering::Release);
        });
    }

    async fn reconnect_loop(&self) {
        let name = self.connector.name();
        let mut shutdown = self.shutdown.subscribe();

        for failures in 0..self.policy.max_attempts {
            let delay = self.policy.backoff(failures);
            debug!(server = %name, attempt = failures + 1, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => return,
            }

            match self.try_connect().await {
                Ok(server) => {
                    let mut link = self.link.write().await;
                    // stop() may have run while the attempt was connecting
                    if self.is_stopped() {
                        drop(link);
                        let _ = server.close().await;
                        debug!(server = %name, "Discarding link opened after stop");
                        return;
                    }
                    let previous = link.replace(server);
                    drop(link);
                    if let Some(old) = previous {
                        let _ = old.close().await;
                    }
                    info!(server = %name, attempt = failures + 1, "Tool server reconnected");
                    self.set_state(HealthState::Healthy);
                    return;
                }
                Err(e) => {
                    warn!(server = %name, attempt = failures + 1, error = %e, "Reconnect attempt failed");
                }
            }
        }

        error!(
            server = %name,
            attempts = self.policy.max_attempts,
            "Reconnect attempts exhausted; waiting for the next failure to retry"
        );
        self.set_state(HealthState::Unhealthy);
    }

    /// Open a fresh link and prove it works before accepting it.
    async fn try_connect(&self) -> Result<Arc<dyn ToolServer>, ToolServerError> {
        let connect_timeout = self.policy.connect_timeout;
        let server = timeout(connect_timeout, self.connector.connect())
            .await
            .map_err(|_| ToolServerError::Timeout {
                operation: "connect".into(),
                timeout_ms: connect_timeout.as_millis() as u64,
            })??;

        let test = timeout(self.policy.probe_timeout, server.list_tools()).await;
        match test {
            Ok(Ok(_)) => Ok(server),
            Ok(Err(e)) => {
                let _ = server.close().await;
                Err(e)
            }
            Err(_) => {
                let _ = server.close().await;
                Err(ToolServerError::Timeout {
                    operation: "connection test".into(),
                    timeout_ms: self.policy.probe_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut ticker = interval(self.policy.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stopped| *stopped) => return,
            }
            if self.reconnecting.load(Ordering::Acquire) {
                continue;
            }

            let link = self.link.read().await.clone();
            let outcome = match link {
                Some(server) => match timeout(self.policy.probe_timeout, server.list_tools()).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(format!("probe failed: {e}")),
                    Err(_) => Err("probe timed out".to_string()),
                },
                None => Err("no link".to_string()),
            };

            match outcome {
                Ok(()) => debug!(server = %self.connector.name(), "Liveness probe ok"),
                Err(reason) => self.mark_unhealthy(&reason),
            }
        }
    }
}

impl Drop for HealthSupervisor {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        if let Some(task) = self
            .probe_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[async_trait]
impl ToolServer for HealthSupervisor {
    fn name(&self) -> &str {
        self.inner.connector.name()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        let server = self.get_connection().await?;
        let result = server.list_tools().await;
        self.observe(&result);
        result
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError> {
        let server = self.get_connection().await?;
        let result = server.call_tool(name, arguments).await;
        self.observe(&result);
        result
    }

    async fn close(&self) -> Result<(), ToolServerError> {
        self.stop().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockConnector;
    use serde_json::json;
    use tokio::time::sleep;

    fn policy() -> SupervisorPolicy {
        SupervisorPolicy::default()
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(4), Duration::from_secs(16));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(60), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn starts_healthy_when_server_is_up() {
        let connector = MockConnector::new("kb");
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;

        assert!(sup.is_healthy());
        let response = sup.call_tool("lookup", json!({"id": 1})).await.unwrap();
        assert_eq!(response.text(), "lookup #1");
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_triggers_reconnect_with_backoff() {
        let connector = MockConnector::new("kb");
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;

        connector.break_live_links();
        connector.set_reachable(false);

        // probe at t=30s fails
        sleep(Duration::from_millis(30_500)).await;
        assert_eq!(sup.state(), HealthState::Reconnecting);

        // attempt 1 at t=31s fails, attempt 2 waits a further 2s
        sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.connects(), 1);
        connector.set_reachable(true);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.connects(), 1);
        assert_eq!(sup.state(), HealthState::Reconnecting);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.connects(), 2);
        assert!(sup.is_healthy());
        assert_eq!(connector.closes(), 1);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn call_failure_marks_unhealthy_and_recovers() {
        let connector = MockConnector::new("kb");
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;

        connector.fail_next_call(ToolServerError::Connection("reset".into()));
        assert!(sup.call_tool("lookup", json!({"id": 1})).await.is_err());
        assert_eq!(sup.state(), HealthState::Reconnecting);

        // waits for the reconnect instead of failing
        let server = sup.get_connection().await.unwrap();
        assert!(sup.is_healthy());
        let response = server.call_tool("lookup", json!({"id": 2})).await.unwrap();
        assert_eq!(response.text(), "lookup #2");
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invocation_errors_do_not_mark_unhealthy() {
        let connector = MockConnector::new("kb");
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;

        connector.fail_next_call(ToolServerError::Invocation {
            tool_name: "lookup".into(),
            reason: "id must be positive".into(),
        });
        assert!(sup.call_tool("lookup", json!({"id": -1})).await.is_err());
        assert!(sup.is_healthy());
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn get_connection_times_out_as_unavailable() {
        let connector = MockConnector::new("kb");
        connector.set_reachable(false);
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;
        assert_eq!(sup.state(), HealthState::Reconnecting);

        let started = tokio::time::Instant::now();
        let err = match sup.get_connection().await {
            Err(e) => e,
            Ok(_) => panic!("server is unreachable"),
        };
        assert!(matches!(err, ToolServerError::Unavailable(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_leaves_unhealthy_until_next_failure() {
        let connector = MockConnector::new("kb");
        connector.set_reachable(false);
        let p = SupervisorPolicy {
            max_attempts: 3,
            ..policy()
        };
        let sup = HealthSupervisor::new(connector.clone(), p);
        sup.start().await;

        // attempts at t=1s, 3s and 7s
        sleep(Duration::from_millis(7_500)).await;
        assert_eq!(sup.state(), HealthState::Unhealthy);

        connector.set_reachable(true);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(sup.state(), HealthState::Unhealthy);

        // the probe at t=30s finds no link and restarts the cycle
        sleep(Duration::from_secs(13)).await;
        assert_eq!(sup.state(), HealthState::Reconnecting);
        sleep(Duration::from_secs(1)).await;
        assert!(sup.is_healthy());
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_health_transitions() {
        let connector = MockConnector::new("kb");
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let sup = HealthSupervisor::new(connector.clone(), policy()).with_events(bus);
        sup.start().await;

        let event = events.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::HealthChanged { server, state, .. } => {
                assert_eq!(server, "kb");
                assert_eq!(*state, HealthState::Healthy);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_link_and_refuses_callers() {
        let connector = MockConnector::new("kb");
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;
        sup.stop().await;
        sup.stop().await;
        assert_eq!(connector.closes(), 1);

        let err = match sup.get_connection().await {
            Err(e) => e,
            Ok(_) => panic!("stopped supervisor has no link"),
        };
        assert!(matches!(err, ToolServerError::Unavailable(_)));
        assert!(!sup.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_slow_reconnect_discards_the_new_link() {
        let connector = MockConnector::new("kb");
        connector.set_reachable(false);
        let sup = HealthSupervisor::new(connector.clone(), policy());
        sup.start().await;
        assert_eq!(sup.state(), HealthState::Reconnecting);

        // attempt 1 starts at t=1s and takes until t=3s to connect
        connector.set_reachable(true);
        connector.set_connect_delay(Duration::from_secs(2));
        sleep(Duration::from_millis(1_500)).await;
        sup.stop().await;

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
        assert!(!sup.is_healthy());
        assert!(sup.get_connection().await.is_err());
    }
}
