//! Task status endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::queue::{TaskId, TaskStatus};

use super::{error_response, ApiError, AppState};

/// Response for a task status poll.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    #[serde(flatten)]
    pub status: TaskStatus,
}

/// Get the status of a queued task.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task_id = TaskId::new(id);
    let status = state
        .queue
        .status(&task_id)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("task not found: {task_id}")))?;

    Ok(Json(TaskResponse { task_id, status }))
}
