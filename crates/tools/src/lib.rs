//! Tool-server connectivity for pollbridge.
//!
//! Raw links come from the HTTP and stdio transports. On top of them sit
//! two strategies that keep a link usable across many independent calls:
//!
//! - [`ManagedConnection`]: lazy connect, reuse window, liveness probe on
//!   reuse, and de-duplication of identical in-flight calls.
//! - [`HealthSupervisor`]: background probing and bounded reconnection
//!   with exponential backoff.
//!
//! Both implement [`ToolServer`](pollbridge_core::tool::ToolServer), as
//! does every raw session, so they can be used interchangeably.
//! [`ToolCatalog`] puts several servers behind one tool name space.

pub mod catalog;
pub mod factory;
pub mod http;
pub mod managed;
pub mod protocol;
pub mod schema;
pub mod stdio;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use catalog::{ToolCallOutcome, ToolCatalog};
pub use factory::{ServerHandle, ToolServers, connector_for, failure_hint};
pub use http::HttpConnector;
pub use managed::{ConnectionPolicy, ManagedConnection, fingerprint};
pub use schema::SchemaNode;
pub use stdio::StdioConnector;
pub use supervisor::{HealthSupervisor, SupervisorPolicy};
