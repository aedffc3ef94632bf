//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Queueing deploys and teardowns
//! - Polling task status
//! - Querying deployment records
//! - Health checks

mod deployments;
mod tasks;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::deployment::DeploymentManager;
use crate::error::ControlError;
use crate::queue::TaskQueue;

pub use deployments::{
    CreateDeploymentRequest, DeploymentResponse, ListDeploymentsQuery, TaskAccepted,
    TeardownRequest,
};
pub use tasks::TaskResponse;

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Deployment manager for record queries.
    pub manager: Arc<DeploymentManager>,
    /// Queue deploy and teardown work is submitted to.
    pub queue: Arc<TaskQueue>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/deployments",
            post(deployments::create_deployment).get(deployments::list_deployments),
        )
        .route("/deployments/{id}", get(deployments::get_deployment))
        .route(
            "/deployments/{id}/teardown",
            post(deployments::teardown_deployment),
        )
        .route("/tasks/{id}", get(tasks::get_task))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        pending_tasks: state.queue.pending_count().await,
    })
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    pending_tasks: usize,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn from_control_error(error: &ControlError) -> ApiError {
    error_response(error_to_status(error), error.to_string())
}

const fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::DeploymentNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        ControlError::ConfigParse(_) | ControlError::InvalidBotName { .. } => {
            StatusCode::BAD_REQUEST
        }
        ControlError::DeploymentAlreadyActive { .. }
        | ControlError::NameCollision { .. }
        | ControlError::OperationInFlight { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
