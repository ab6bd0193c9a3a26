//! REST API.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | POST | `/api/v1/deploys` | Create a deploy |
//! | GET | `/api/v1/deploys/{id}/status` | Effective deploy status |
//! | POST | `/api/v1/deploys/{id}/stop` | Stop a deploy |
//! | GET | `/api/v1/clusters` | List clusters |
//! | GET | `/api/v1/clusters/{id}` | Cluster view with reservations applied |
//! | GET | `/api/v1/clusters/{id}/usage` | Cluster usage summary |
//! | POST | `/api/v1/callbacks/build` | Image builder status callback |

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use hubdeploy_deployer::{DeployRequest, DeployerError};
use hubdeploy_scheduler::SchedulerError;
use hubdeploy_workflow::{BuildCallback, WorkflowError, apply_build_callback};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::AppContext;

#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<AppContext>,
}

pub fn build_router(app: Arc<AppContext>) -> Router {
    let state = ApiState { app };
    let api_routes = Router::new()
        .route("/deploys", post(create_deploy))
        .route("/deploys/{id}/status", get(deploy_status))
        .route("/deploys/{id}/stop", post(stop_deploy))
        .route("/clusters", get(list_clusters))
        .route("/clusters/{id}", get(get_cluster))
        .route("/clusters/{id}/usage", get(cluster_usage))
        .route("/callbacks/build", post(build_callback))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", api_routes)
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn deployer_status(e: &DeployerError) -> StatusCode {
    match e {
        DeployerError::DeployNotFound(_)
        | DeployerError::ClusterNotFound(_)
        | DeployerError::OrderDetailNotFound(_) => StatusCode::NOT_FOUND,
        DeployerError::InvalidInput(_) | DeployerError::NoCluster => StatusCode::BAD_REQUEST,
        DeployerError::OrderDetailInUse(_)
        | DeployerError::DeployRunning(_)
        | DeployerError::NotEnoughResource(_) => StatusCode::CONFLICT,
        DeployerError::ClusterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DeployerError::Remote(_) | DeployerError::ServiceCheckFailed(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn deployer_error(e: DeployerError) -> axum::response::Response {
    let status = deployer_status(&e);
    if status.is_server_error() {
        warn!(error = %e, "request failed");
    }
    error_response(&e.to_string(), status)
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Deploys ────────────────────────────────────────────────────

#[derive(Serialize)]
struct Created {
    deploy_id: u64,
}

/// POST /api/v1/deploys
async fn create_deploy(
    State(state): State<ApiState>,
    Json(req): Json<DeployRequest>,
) -> impl IntoResponse {
    match state.app.deployer.deploy(&req).await {
        Ok(deploy_id) => (StatusCode::CREATED, ApiResponse::ok(Created { deploy_id })).into_response(),
        Err(e) => deployer_error(e),
    }
}

/// GET /api/v1/deploys/{id}/status
async fn deploy_status(State(state): State<ApiState>, Path(id): Path<u64>) -> impl IntoResponse {
    match state.app.deployer.status(id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => deployer_error(e),
    }
}

/// POST /api/v1/deploys/{id}/stop
async fn stop_deploy(State(state): State<ApiState>, Path(id): Path<u64>) -> impl IntoResponse {
    match state.app.deployer.stop(id).await {
        Ok(()) => ApiResponse::ok("stopped").into_response(),
        Err(e) => deployer_error(e),
    }
}

// ── Clusters ───────────────────────────────────────────────────

/// GET /api/v1/clusters
async fn list_clusters(State(state): State<ApiState>) -> impl IntoResponse {
    match state.app.deployer.list_cluster().await {
        Ok(clusters) => ApiResponse::ok(clusters).into_response(),
        Err(e) => deployer_error(e),
    }
}

/// GET /api/v1/clusters/{id}
async fn get_cluster(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.app.deployer.get_cluster_by_id(&id).await {
        Ok(cluster) => ApiResponse::ok(cluster).into_response(),
        Err(e) => deployer_error(e),
    }
}

/// GET /api/v1/clusters/{id}/usage
async fn cluster_usage(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.app.deployer.get_cluster_usage_by_id(&id).await {
        Ok(usage) => ApiResponse::ok(usage).into_response(),
        Err(e) => deployer_error(e),
    }
}

// ── Callbacks ──────────────────────────────────────────────────

/// POST /api/v1/callbacks/build
async fn build_callback(
    State(state): State<ApiState>,
    Json(callback): Json<BuildCallback>,
) -> impl IntoResponse {
    match apply_build_callback(&state.app.runner_ctx, &callback) {
        Ok((deploy, task)) => {
            info!(
                deploy_id = deploy.id,
                task_id = task.id,
                status = %deploy.status,
                "build callback applied"
            );
            ApiResponse::ok(deploy.status.code()).into_response()
        }
        Err(e) => {
            let status = match &e {
                WorkflowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                WorkflowError::TaskTerminal { .. } => StatusCode::CONFLICT,
                WorkflowError::Scheduler(SchedulerError::TaskNotFound(_) | SchedulerError::DeployNotFound(_)) => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(&e.to_string(), status)
        }
    }
}
