//! Cluster resource client.
//!
//! A thin adapter over the Kubernetes API exposing exactly the calls the
//! workspace orchestrator makes. It does not retry, cache, or time out on
//! its own; every failure is surfaced as a [`ClusterError`].

use async_trait::async_trait;

pub mod error;
pub mod kube;
pub mod resources;

// When the `test-helpers` feature is enabled, include the in-memory cluster.
#[cfg(feature = "test-helpers")]
pub mod mock;

pub use error::{ClusterError, Result};
pub use kube::{KubeClient, KubeConfig};
pub use resources::{
    Deployment, Namespace, ObjectMeta, PersistentVolumeClaim, ResourceKind, Service,
};

/// One async method per cluster API call.
///
/// Namespaced objects take the namespace explicitly; the object's own
/// `metadata.name` is used for creates and replaces.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;
    async fn read_namespace(&self, name: &str) -> Result<Namespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;
    /// Namespaces matching a label selector such as `app=cloudcode`.
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>>;

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;
    async fn read_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim>;
    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> Result<Deployment>;
    async fn read_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    async fn read_service(&self, namespace: &str, name: &str) -> Result<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
}
