//! Task handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::api::AppState;
use crate::error::Error;
use crate::model::{NewTask, TaskId};

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// POST /tasks - Submit a task
pub async fn submit_task(
    State(state): State<AppState>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Response {
    let Json(new) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!("rejected submit body: {rejection}");
            return error_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    match state.ingestion.submit(new).await {
        Ok(task) => (StatusCode::ACCEPTED, Json(task)).into_response(),
        Err(Error::Scheduling { .. }) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to schedule task")
        }
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to store task"),
    }
}

/// GET /tasks/:id - Get a task's latest status
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    // Ids that do not parse were never issued.
    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!("{e}");
            return error_response(StatusCode::NOT_FOUND, format!("task not found: {id}"));
        }
    };

    match state.ingestion.get_status(id).await {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(e @ Error::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => {
            tracing::error!(task.id = %id, "failed to read task status: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read task status")
        }
    }
}

/// GET /health - Liveness check
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
