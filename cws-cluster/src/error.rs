//! Error types for cluster API calls.

use crate::resources::ResourceKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Failure of a single cluster API call.
///
/// The client never retries; callers decide what a given variant means for
/// the workspace lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("cluster API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode cluster response: {0}")]
    Decode(String),

    #[error("cluster client configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
