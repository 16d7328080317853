//! Plain JSON task API for clients that are not the messaging platform.
//!
//! - `POST /v1/tasks`       start a generation, returns its id
//! - `GET  /v1/tasks/{id}`  poll it; a finished task is removed

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::SharedState;
use pollbridge_core::error::TaskError;

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/tasks", post(create_task_handler))
        .route("/tasks/{id}", get(poll_task_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub conversation_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub task_id: String,
    pub content: String,
    pub finished: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

async fn create_task_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    if req.question.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "question must not be empty"));
    }
    let key = req
        .conversation_key
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| "api_default".to_string());

    let task_id = state.runtime.registry.start(&req.question, &key);
    info!(task_id = %task_id, conversation = %key, "Task started over API");
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateTaskResponse {
            task_id,
            conversation_key: key,
        }),
    ))
}

async fn poll_task_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PollResponse>, ApiError> {
    let registry = &state.runtime.registry;
    match registry.poll(&id) {
        Ok(increment) => {
            if increment.finished {
                registry.remove(&id);
            }
            Ok(Json(PollResponse {
                task_id: id,
                content: increment.text,
                finished: increment.finished,
            }))
        }
        Err(e @ TaskError::NotFound(_)) => Err(api_error(StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
