use crate::{CreateWorkspaceRequest, OrchestratorConfig, WorkspaceOrchestrator};
use cws_cluster::mock::MockCluster;
use std::sync::Arc;
use std::time::Duration;

/// Config with short timeouts so failure paths resolve quickly in tests.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        operation_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// An orchestrator over an in-memory cluster, returning both.
pub fn mock_orchestrator(cluster: MockCluster) -> (WorkspaceOrchestrator, Arc<MockCluster>) {
    let cluster = Arc::new(cluster);
    let orchestrator = WorkspaceOrchestrator::new(cluster.clone(), fast_config());
    (orchestrator, cluster)
}

pub fn create_request(id: &str, template: &str, language: &str) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest {
        workspace_id: id.to_string(),
        template: template.to_string(),
        language: language.to_string(),
        libraries: Vec::new(),
        resources: None,
    }
}
