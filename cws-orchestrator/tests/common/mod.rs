//! Shared helpers for orchestrator integration tests.

#![allow(dead_code)]

use cws_cluster::mock::MockCluster;
use cws_orchestrator::test_utils::create_request;
use cws_orchestrator::CreateWorkspaceRequest;

pub use cws_orchestrator::test_utils::mock_orchestrator as setup;

/// A node/javascript workspace with no extra libraries.
pub fn request(id: &str) -> CreateWorkspaceRequest {
    create_request(id, "node", "javascript")
}

pub fn namespace(id: &str) -> String {
    format!("workspace-{id}")
}

pub fn deployment_name(id: &str) -> String {
    format!("{id}-deployment")
}

pub fn claim_uid(cluster: &MockCluster, id: &str) -> String {
    cluster
        .claim(&namespace(id), &format!("{id}-pvc"))
        .and_then(|claim| claim.metadata.uid)
        .expect("claim should exist")
}

pub fn deployment_uid(cluster: &MockCluster, id: &str) -> String {
    cluster
        .deployment(&namespace(id), &deployment_name(id))
        .and_then(|deployment| deployment.metadata.uid)
        .expect("deployment should exist")
}

pub fn set_ready(cluster: &MockCluster, id: &str, ready: i32) {
    cluster.set_ready_replicas(&namespace(id), &deployment_name(id), ready);
}
