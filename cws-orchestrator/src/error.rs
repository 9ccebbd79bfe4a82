use cws_cluster::ClusterError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("Cluster error: {0}")]
    Cluster(ClusterError),
}

impl From<ClusterError> for OrchestratorError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound { .. } => Self::NotFound(err.to_string()),
            ClusterError::AlreadyExists { .. } | ClusterError::Conflict(_) => {
                Self::ResourceConflict(err.to_string())
            }
            ClusterError::Unavailable(msg) => Self::ClusterUnavailable(msg),
            other => Self::Cluster(other),
        }
    }
}
