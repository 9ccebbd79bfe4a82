use crate::error::ErrorBody;
use crate::routes::workspaces::{CreatedWorkspace, Success, WorkspaceList, WorkspaceStatus};
use cws_orchestrator::{
    CreateWorkspaceRequest, LifecycleState, ResourceRequest, Workspace, WorkspaceSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::workspaces::create_workspace,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::get_workspace_status,
        crate::routes::workspaces::delete_workspace,
        crate::routes::workspaces::start_workspace,
        crate::routes::workspaces::stop_workspace,
        crate::routes::workspaces::restart_workspace,
    ),
    components(
        schemas(
            CreateWorkspaceRequest,
            ResourceRequest,
            Workspace,
            WorkspaceSummary,
            LifecycleState,
            CreatedWorkspace,
            WorkspaceList,
            WorkspaceStatus,
            Success,
            ErrorBody
        )
    ),
    tags(
        (name = "workspaces", description = "Workspace lifecycle"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;
