//! Deployment endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ControlError;
use crate::queue::{TaskId, TaskKind};
use crate::store::DeploymentFilter;
use crate::types::{DeploymentId, DeploymentRecord, DeploymentRequest, DeploymentStatus, UserId};

use super::{error_response, from_control_error, ApiError, AppState};

/// Request to deploy a bot.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Owning user.
    pub user_id: u64,
    /// Raw bot configuration document.
    pub config: String,
    /// Reference to the stored configuration this deploy came from.
    #[serde(default)]
    pub config_ref: Option<String>,
    /// Overrides the `bot_name` in the configuration.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Request to tear down a deployment.
#[derive(Debug, Deserialize)]
pub struct TeardownRequest {
    /// User the deployment must belong to.
    pub user_id: u64,
}

/// Query parameters for listing deployments.
#[derive(Debug, Default, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Filter by owning user.
    pub user_id: Option<u64>,
    /// Filter by status.
    pub status: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

/// Response for a queued task.
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    /// Identifier to poll with.
    pub task_id: TaskId,
    /// Initial state.
    pub state: &'static str,
}

/// Response for a deployment.
#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    /// Deployment ID.
    pub id: String,
    /// Owning user.
    pub user_id: u64,
    /// Bot name as configured.
    pub bot_name: String,
    /// Function backing the bot.
    pub function_name: String,
    /// Public endpoint.
    pub endpoint_url: String,
    /// Stored configuration reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    /// Current status.
    pub status: String,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Queue a deploy.
///
/// An empty configuration is accepted; the bot deploys under its default
/// name.
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let user_id = UserId::new(req.user_id);
    let request = DeploymentRequest {
        config: req.config.into_bytes(),
        config_ref: req.config_ref,
        display_name: req.display_name,
    };

    let task_id = state
        .queue
        .submit(TaskKind::Deploy { user_id, request })
        .await
        .map_err(|e| from_control_error(&e))?;

    info!(user_id = %user_id, task_id = %task_id, "deploy accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id,
            state: "queued",
        }),
    ))
}

/// Queue a teardown.
///
/// Unknown deployments, and deployments owned by another user, are
/// rejected before anything is queued.
pub async fn teardown_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TeardownRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let user_id = UserId::new(req.user_id);
    let deployment_id = DeploymentId::new(id);

    let record = state
        .manager
        .get_deployment(&deployment_id)
        .await
        .map_err(|e| from_control_error(&e))?;
    if record.user_id != user_id {
        return Err(from_control_error(&ControlError::DeploymentNotFound(
            deployment_id.to_string(),
        )));
    }

    let task_id = state
        .queue
        .submit(TaskKind::Teardown {
            user_id,
            deployment_id: deployment_id.clone(),
            function_name: record.function_name,
        })
        .await
        .map_err(|e| from_control_error(&e))?;

    info!(deployment_id = %deployment_id, task_id = %task_id, "teardown accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id,
            state: "queued",
        }),
    ))
}

/// Get a deployment by ID.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let record = state
        .manager
        .get_deployment(&DeploymentId::new(id))
        .await
        .map_err(|e| from_control_error(&e))?;

    Ok(Json(record_to_response(record)))
}

/// List deployments with optional filters.
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<Vec<DeploymentResponse>>, ApiError> {
    let mut filter = DeploymentFilter::new();

    if let Some(user_id) = query.user_id {
        filter = filter.with_user(UserId::new(user_id));
    }
    if let Some(status) = &query.status {
        let status: DeploymentStatus = status
            .parse()
            .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_status(status);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(offset) = query.offset {
        filter = filter.with_offset(offset);
    }

    let records = state
        .manager
        .list_deployments(&filter)
        .await
        .map_err(|e| from_control_error(&e))?;

    Ok(Json(records.into_iter().map(record_to_response).collect()))
}

fn record_to_response(record: DeploymentRecord) -> DeploymentResponse {
    DeploymentResponse {
        id: record.id.to_string(),
        user_id: record.user_id.get(),
        bot_name: record.bot_name,
        function_name: record.function_name,
        endpoint_url: record.endpoint_url,
        config_ref: record.config_ref,
        status: record.status.to_string(),
        error: record.error,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::api::tests::make_app_state;
    use crate::naming::{NamingConfig, ResolvedBotIdentity};
    use crate::store::DeploymentStore;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn seed(state: &AppState, user: u64, bot: &str) -> DeploymentRecord {
        let identity =
            ResolvedBotIdentity::resolve(UserId::new(user), bot, &NamingConfig::default())
                .unwrap();
        let record = DeploymentRecord::active(
            &identity,
            "https://example.test/prod/user/x".to_owned(),
            None,
        );
        state.manager.store().insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn create_deployment_is_queued() {
        let state = make_app_state(10);
        let app = router(state.clone());

        let response = app
            .oneshot(post(
                "/deployments",
                serde_json::json!({ "user_id": 42, "config": "bot_name: support\n" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["state"], "queued");
        assert_eq!(state.queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn empty_config_is_queued() {
        let state = make_app_state(10);
        let app = router(state.clone());

        let response = app
            .oneshot(post(
                "/deployments",
                serde_json::json!({ "user_id": 42, "config": "  " }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_config_ref_conflicts_while_queued() {
        let state = make_app_state(10);
        let body = serde_json::json!({
            "user_id": 42,
            "config": "bot_name: support\n",
            "config_ref": "configs/42/support.yaml",
        });

        let first = router(state.clone())
            .oneshot(post("/deployments", body.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = router(state.clone())
            .oneshot(post("/deployments", body))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let json = body_json(second).await;
        assert!(json["error"].as_str().unwrap().contains("in flight"));
        assert_eq!(state.queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn teardown_conflicts_with_queued_deploy_of_same_bot() {
        let state = make_app_state(10);
        let record = seed(&state, 7, "support").await;

        let deploy = router(state.clone())
            .oneshot(post(
                "/deployments",
                serde_json::json!({ "user_id": 7, "config": "bot_name: support\n" }),
            ))
            .await
            .unwrap();
        assert_eq!(deploy.status(), StatusCode::ACCEPTED);

        let response = router(state.clone())
            .oneshot(post(
                &format!("/deployments/{}/teardown", record.id),
                serde_json::json!({ "user_id": 7 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn full_queue_returns_unavailable() {
        let app = router(make_app_state(0));

        let response = app
            .oneshot(post(
                "/deployments",
                serde_json::json!({ "user_id": 42, "config": "bot_name: support\n" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn teardown_of_unknown_deployment_is_not_found() {
        let app = router(make_app_state(10));

        let response = app
            .oneshot(post(
                "/deployments/missing/teardown",
                serde_json::json!({ "user_id": 42 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn teardown_of_other_users_deployment_is_not_found() {
        let state = make_app_state(10);
        let record = seed(&state, 7, "support").await;
        let app = router(state.clone());

        let response = app
            .oneshot(post(
                &format!("/deployments/{}/teardown", record.id),
                serde_json::json!({ "user_id": 8 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn teardown_of_owned_deployment_is_queued() {
        let state = make_app_state(10);
        let record = seed(&state, 7, "support").await;
        let app = router(state.clone());

        let response = app
            .oneshot(post(
                &format!("/deployments/{}/teardown", record.id),
                serde_json::json!({ "user_id": 7 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn get_deployment_returns_record() {
        let state = make_app_state(10);
        let record = seed(&state, 7, "my bot").await;
        let app = router(state);

        let response = app
            .oneshot(get(&format!("/deployments/{}", record.id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["bot_name"], "my bot");
        assert_eq!(json["function_name"], "user-app-7-mybot");
        assert_eq!(json["status"], "active");
    }

    #[tokio::test]
    async fn list_deployments_filters_by_user() {
        let state = make_app_state(10);
        seed(&state, 7, "support").await;
        seed(&state, 8, "sales").await;
        let app = router(state);

        let response = app
            .oneshot(get("/deployments?user_id=8&status=active"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["bot_name"], "sales");
    }

    #[tokio::test]
    async fn list_with_unknown_status_is_bad_request() {
        let app = router(make_app_state(10));

        let response = app
            .oneshot(get("/deployments?status=sleeping"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
