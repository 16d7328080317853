//! Scriptable in-memory tool server for connection tests.

use async_trait::async_trait;
use pollbridge_core::error::ToolServerError;
use pollbridge_core::tool::{ToolConnector, ToolDescriptor, ToolResponse, ToolServer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    connects: AtomicU64,
    invocations: AtomicU64,
    closes: AtomicU64,
    /// Links with an id below this fail every request
    broken_below: AtomicU64,
    /// Links with an id below this never answer
    hung_below: AtomicU64,
    unreachable: AtomicBool,
    call_delay: Mutex<Duration>,
    connect_delay: Mutex<Duration>,
    next_failure: Mutex<Option<ToolServerError>>,
}

pub struct MockConnector {
    name: String,
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Arc::new(MockState::default()),
        })
    }

    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> u64 {
        self.state.invocations.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Every link opened so far starts failing.
    pub fn break_live_links(&self) {
        self.state
            .broken_below
            .store(self.connects() + 1, Ordering::SeqCst);
    }

    /// Every link opened so far stops answering.
    pub fn hang_live_links(&self) {
        self.state
            .hung_below
            .store(self.connects() + 1, Ordering::SeqCst);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.state.call_delay.lock().unwrap() = delay;
    }

    /// Each successful connect takes this long.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = delay;
    }

    pub fn fail_next_call(&self, error: ToolServerError) {
        *self.state.next_failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl ToolConnector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Arc<dyn ToolServer>, ToolServerError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(ToolServerError::Connection("connection refused".into()));
        }
        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(MockServer {
            id,
            name: self.name.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MockServer {
    id: u64,
    name: String,
    state: Arc<MockState>,
}

impl MockServer {
    async fn check(&self) -> Result<(), ToolServerError> {
        if self.id < self.state.hung_below.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.id < self.state.broken_below.load(Ordering::SeqCst) {
            return Err(ToolServerError::Connection("broken pipe".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolServer for MockServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        self.check().await?;
        Ok(vec![ToolDescriptor {
            name: "lookup".into(),
            description: "Look up a record".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"]
            }),
        }])
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolServerError> {
        self.check().await?;
        let n = self.state.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.state.call_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.state.next_failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(ToolResponse::text_only(format!("{name} #{n}")))
    }

    async fn close(&self) -> Result<(), ToolServerError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
