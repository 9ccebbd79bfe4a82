use crate::{
    auth::CallingService,
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use cws_orchestrator::{CreateWorkspaceRequest, LifecycleState, Workspace, WorkspaceSummary};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWorkspace {
    pub workspace_id: String,
    pub status: LifecycleState,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceList {
    pub workspaces: Vec<WorkspaceSummary>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceStatus {
    pub status: LifecycleState,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Success {
    pub status: String,
}

impl Success {
    fn json() -> Json<Self> {
        Json(Self {
            status: "success".to_string(),
        })
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace).delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/status", get(get_workspace_status))
        .route("/api/v1/workspaces/{id}/start", post(start_workspace))
        .route("/api/v1/workspaces/{id}/stop", post(stop_workspace))
        .route("/api/v1/workspaces/{id}/restart", post(restart_workspace))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces",
    request_body = CreateWorkspaceRequest,
    responses(
        (status = 201, description = "Workspace provisioned", body = CreatedWorkspace),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "Workspace is in a failed state", body = ErrorBody),
        (status = 503, description = "Cluster unavailable", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(caller): Extension<CallingService>,
    payload: Result<Json<CreateWorkspaceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedWorkspace>)> {
    let Json(req) = payload?;
    info!(service = %caller.id, workspace = %req.workspace_id, "create requested");

    let workspace = state.orchestrator.create_workspace(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedWorkspace {
            workspace_id: workspace.workspace_id,
            status: workspace.status,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    responses((status = 200, description = "Every known workspace", body = WorkspaceList)),
    tag = "workspaces"
)]
pub async fn list_workspaces(State(state): State<AppState>) -> ApiResult<Json<WorkspaceList>> {
    let workspaces = state.orchestrator.list_workspaces_with_status().await?;
    Ok(Json(WorkspaceList { workspaces }))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace details", body = Workspace),
        (status = 404, description = "Unknown workspace", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.describe_workspace(&id).await?;
    Ok(Json(workspace))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/status",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, description = "Derived lifecycle state", body = WorkspaceStatus)),
    tag = "workspaces"
)]
pub async fn get_workspace_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceStatus>> {
    let status = state.orchestrator.get_status(&id).await?;
    Ok(Json(WorkspaceStatus { status }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, description = "Workspace deleted", body = Success)),
    tag = "workspaces"
)]
pub async fn delete_workspace(
    State(state): State<AppState>,
    Extension(caller): Extension<CallingService>,
    Path(id): Path<String>,
) -> ApiResult<Json<Success>> {
    info!(service = %caller.id, workspace = %id, "delete requested");
    state.orchestrator.delete_workspace(&id).await?;
    Ok(Success::json())
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/start",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Scaled to one replica", body = Success),
        (status = 404, description = "Unknown workspace", body = ErrorBody),
        (status = 409, description = "Workspace is in a failed state", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn start_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Success>> {
    state.orchestrator.start_workspace(&id).await?;
    Ok(Success::json())
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/stop",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Scaled to zero replicas", body = Success),
        (status = 404, description = "Unknown workspace", body = ErrorBody),
        (status = 409, description = "Workspace is in a failed state", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn stop_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Success>> {
    state.orchestrator.stop_workspace(&id).await?;
    Ok(Success::json())
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/restart",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Deployment recreated", body = Success),
        (status = 404, description = "Unknown workspace", body = ErrorBody),
        (status = 409, description = "Workspace is in a failed state", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn restart_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Success>> {
    state.orchestrator.restart_workspace(&id).await?;
    Ok(Success::json())
}
