use cws_orchestrator::WorkspaceOrchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: WorkspaceOrchestrator,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(orchestrator: WorkspaceOrchestrator, api_key: &str) -> Self {
        Self {
            orchestrator,
            api_key: Arc::from(api_key),
        }
    }
}
