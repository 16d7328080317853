//! HTTP gateway for pollbridge.
//!
//! Serves the polling webhook (`POST /webhook`), a health report
//! (`GET /health`) and the JSON task API under `/v1`. A background sweep
//! expires old tasks and idle sessions.
//!
//! Built on Axum.

pub mod api_v1;
pub mod runtime;
pub mod sweep;

#[cfg(test)]
pub(crate) mod test_support;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use pollbridge_channels::{PollingBridge, WebhookError};
pub use runtime::Runtime;
use sweep::{SweepPolicy, spawn_sweeper};

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runtime: Runtime,
    pub bridge: PollingBridge,
}

impl GatewayState {
    pub fn new(runtime: Runtime) -> Self {
        let bridge = PollingBridge::new(runtime.registry.clone(), &runtime.config.gateway);
        Self { runtime, bridge }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server and its housekeeping sweep.
pub async fn start(runtime: Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", runtime.config.gateway.host, runtime.config.gateway.port);
    let policy = SweepPolicy::from_config(&runtime.config.tasks, &runtime.config.sessions);

    let state = Arc::new(GatewayState::new(runtime));
    let sweeper = spawn_sweeper(state.runtime.registry.clone(), policy);
    let app = build_router(state.clone());

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    state.runtime.shutdown().await;
    info!("Gateway stopped");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolServerHealth {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: i64,
    pub active_tasks: usize,
    pub sessions: usize,
    pub dedup_cache_size: usize,
    pub tool_servers: Vec<ToolServerHealth>,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let tool_servers = state
        .runtime
        .tools
        .status_report()
        .await
        .into_iter()
        .map(|(name, status)| ToolServerHealth { name, status })
        .collect();

    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().timestamp(),
        active_tasks: state.runtime.registry.active_count(),
        sessions: state.runtime.registry.sessions().len().await,
        dedup_cache_size: state.bridge.dedup_len(),
        tool_servers,
    })
}

async fn webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.bridge.handle_body(&body, signature) {
        Ok(Some(reply)) => Json(reply).into_response(),
        // acknowledged, nothing to say
        Ok(None) => (StatusCode::OK, "success").into_response(),
        Err(e @ WebhookError::Signature(_)) => {
            warn!(error = %e, "Webhook rejected");
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
        Err(e @ WebhookError::InvalidMessage(_)) => {
            warn!(error = %e, "Webhook rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::runtime_with;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pollbridge_channels::{HmacVerifier, Reply, StreamReply};
    use pollbridge_config::AppConfig;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(config: AppConfig) -> SharedState {
        Arc::new(GatewayState::new(runtime_with(config, "It is 14:05.")))
    }

    fn webhook(body: &serde_json::Value, signature: Option<&str>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            req = req.header(SIGNATURE_HEADER, sig);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    async fn stream_reply(response: Response) -> StreamReply {
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        match serde_json::from_slice::<Reply>(&body).unwrap() {
            Reply::Stream { stream } => stream,
            other => panic!("expected stream reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(AppConfig::default()));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_tasks, 0);
        assert_eq!(health.sessions, 0);
        assert!(health.tool_servers.is_empty());
    }

    #[tokio::test]
    async fn webhook_question_and_refresh() {
        let state = test_state(AppConfig::default());
        let app = build_router(state.clone());

        let first = stream_reply(
            app.clone()
                .oneshot(webhook(
                    &json!({
                        "msgid": "m1",
                        "chattype": "single",
                        "from": {"userid": "alice"},
                        "msgtype": "text",
                        "text": {"content": "What time is it?"}
                    }),
                    None,
                ))
                .await
                .unwrap(),
        )
        .await;
        assert!(!first.id.is_empty());

        let mut finished = first.finish.then_some(first.clone());
        for n in 0..100 {
            if finished.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            let reply = stream_reply(
                app.clone()
                    .oneshot(webhook(
                        &json!({
                            "msgid": format!("refresh-{n}"),
                            "from": {"userid": "alice"},
                            "msgtype": "stream",
                            "stream": {"id": first.id}
                        }),
                        None,
                    ))
                    .await
                    .unwrap(),
            )
            .await;
            if reply.finish {
                finished = Some(reply);
            }
        }
        assert_eq!(finished.expect("never finished").content, "It is 14:05.");
        assert!(state.runtime.registry.is_empty());
        assert_eq!(state.runtime.registry.sessions().len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_message_acknowledged_without_reply() {
        let app = build_router(test_state(AppConfig::default()));
        let msg = json!({
            "msgid": "dup",
            "from": {"userid": "alice"},
            "msgtype": "text",
            "text": {"content": "hello"}
        });
        app.clone().oneshot(webhook(&msg, None)).await.unwrap();

        let response = app.oneshot(webhook(&msg, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"success");
    }

    #[tokio::test]
    async fn malformed_webhook_is_400() {
        let app = build_router(test_state(AppConfig::default()));
        let response = app
            .oneshot(webhook(&json!({"msgtype": "text"}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signed_webhook() {
        let mut config = AppConfig::default();
        config.gateway.webhook_secret = Some("hook-secret".into());
        let app = build_router(test_state(config));
        let msg = json!({
            "msgid": "m1",
            "from": {"userid": "alice"},
            "msgtype": "text",
            "text": {"content": "hello"}
        });

        let response = app.clone().oneshot(webhook(&msg, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let signature = HmacVerifier::new("hook-secret")
            .sign(msg.to_string().as_bytes())
            .unwrap();
        let reply = stream_reply(app.oneshot(webhook(&msg, Some(&signature))).await.unwrap()).await;
        assert!(!reply.id.is_empty());
    }
}
