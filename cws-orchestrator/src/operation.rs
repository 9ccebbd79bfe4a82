use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// A mutating lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Start,
    Stop,
    Restart,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual cluster call within an operation, used as the `step` log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateNamespace,
    CreateClaim,
    CreateDeployment,
    CreateService,
    ReadNamespace,
    ReadDeployment,
    ReplaceDeployment,
    DeleteDeployment,
    AwaitDeploymentGone,
    DeleteService,
    DeleteClaim,
    DeleteNamespace,
    ListNamespaces,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateNamespace => "create_namespace",
            Self::CreateClaim => "create_claim",
            Self::CreateDeployment => "create_deployment",
            Self::CreateService => "create_service",
            Self::ReadNamespace => "read_namespace",
            Self::ReadDeployment => "read_deployment",
            Self::ReplaceDeployment => "replace_deployment",
            Self::DeleteDeployment => "delete_deployment",
            Self::AwaitDeploymentGone => "await_deployment_gone",
            Self::DeleteService => "delete_service",
            Self::DeleteClaim => "delete_claim",
            Self::DeleteNamespace => "delete_namespace",
            Self::ListNamespaces => "list_namespaces",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
