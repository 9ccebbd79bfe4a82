//! Workspace lifecycle orchestration
//!
//! Provisions, scales, restarts and deletes the cluster objects backing a
//! workspace, and derives its lifecycle state from what the cluster reports.
//! Consumed by the `cws-api` HTTP service.

pub mod config;
pub mod error;
pub mod manifests;
pub mod operation;
pub mod status;
pub mod template;
pub mod validation;
pub mod workspace;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::{
    ComputeDefaults, ContainerSettings, ImageCatalog, OrchestratorConfig, StorageSettings,
};
pub use error::{OrchestratorError, Result};
pub use operation::Operation;
pub use status::LifecycleState;
pub use workspace::{
    CreateWorkspaceRequest, ResourceRequest, Workspace, WorkspaceOrchestrator, WorkspaceSummary,
};
