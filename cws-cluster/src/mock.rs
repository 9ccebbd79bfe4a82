//! In-memory cluster for tests.
//!
//! Behaves like a tiny API server: assigns uids and resource versions,
//! cascades namespace deletion, and reports deployment readiness either
//! automatically or as set by the test. Failures and latency can be injected
//! per operation.

use crate::error::{ClusterError, Result};
use crate::resources::{
    Deployment, DeploymentStatus, Namespace, NamespaceStatus, ObjectMeta, PersistentVolumeClaim,
    ResourceKind, Service,
};
use crate::ClusterClient;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Operations that can be observed, failed, or slowed down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateNamespace,
    ReadNamespace,
    DeleteNamespace,
    ListNamespaces,
    CreateClaim,
    ReadClaim,
    DeleteClaim,
    CreateDeployment,
    ReadDeployment,
    ReplaceDeployment,
    DeleteDeployment,
    CreateService,
    ReadService,
    DeleteService,
}

type Key = (String, String);

#[derive(Default)]
struct MockState {
    namespaces: BTreeMap<String, Namespace>,
    claims: BTreeMap<Key, PersistentVolumeClaim>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    failures: HashMap<MockOp, VecDeque<ClusterError>>,
    latency: HashMap<MockOp, Duration>,
    calls: Vec<MockOp>,
    auto_ready: bool,
    hold_termination: bool,
    version: u64,
}

impl MockState {
    fn stamp(&mut self, meta: &mut ObjectMeta, namespace: Option<&str>) {
        self.version += 1;
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(self.version.to_string());
        meta.creation_timestamp = Some(chrono::Utc::now().to_rfc3339());
        meta.deletion_timestamp = None;
        meta.namespace = namespace.map(str::to_string);
    }

    fn require_active_namespace(&self, namespace: &str) -> Result<()> {
        match self.namespaces.get(namespace) {
            None => Err(ClusterError::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace.to_string(),
            }),
            Some(ns) if ns.is_terminating() => Err(ClusterError::Api {
                status: 403,
                message: format!("namespace {namespace} is being terminated"),
            }),
            Some(_) => Ok(()),
        }
    }

    fn purge_namespace(&mut self, namespace: &str) {
        self.namespaces.remove(namespace);
        self.claims.retain(|(ns, _), _| ns != namespace);
        self.deployments.retain(|(ns, _), _| ns != namespace);
        self.services.retain(|(ns, _), _| ns != namespace);
    }

    fn observe(&self, mut deployment: Deployment) -> Deployment {
        if self.auto_ready {
            let desired = deployment.desired_replicas();
            deployment.status = Some(DeploymentStatus {
                replicas: Some(desired),
                ready_replicas: Some(desired),
                available_replicas: Some(desired),
            });
        }
        deployment
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn not_found(kind: ResourceKind, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn already_exists(kind: ResourceKind, name: &str) -> ClusterError {
    ClusterError::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    /// Deployments report zero ready replicas until [`set_ready_replicas`](Self::set_ready_replicas).
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployments report ready == desired on every read.
    pub fn with_auto_ready() -> Self {
        let cluster = Self::default();
        cluster.state().auto_ready = true;
        cluster
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and consume an injected failure, returning the delay to apply.
    fn enter(&self, op: MockOp) -> Result<Duration> {
        let mut state = self.state();
        state.calls.push(op);
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state.latency.get(&op).copied().unwrap_or_default())
    }

    async fn begin(&self, op: MockOp) -> Result<()> {
        let delay = self.enter(op)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    pub fn set_auto_ready(&self, enabled: bool) {
        self.state().auto_ready = enabled;
    }

    /// Make the next call of `op` fail with `err`. Repeated calls queue up.
    pub fn fail_next(&self, op: MockOp, err: ClusterError) {
        self.state().failures.entry(op).or_default().push_back(err);
    }

    /// Delay every call of `op` before it is applied.
    pub fn set_latency(&self, op: MockOp, delay: Duration) {
        self.state().latency.insert(op, delay);
    }

    /// Keep deleted namespaces in the `Terminating` phase until
    /// [`finish_terminations`](Self::finish_terminations).
    pub fn hold_termination(&self, hold: bool) {
        self.state().hold_termination = hold;
    }

    pub fn finish_terminations(&self) {
        let mut state = self.state();
        let terminating: Vec<String> = state
            .namespaces
            .iter()
            .filter(|(_, ns)| ns.is_terminating())
            .map(|(name, _)| name.clone())
            .collect();
        for name in terminating {
            state.purge_namespace(&name);
        }
    }

    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready: i32) {
        let mut state = self.state();
        if let Some(deployment) = state.deployments.get_mut(&key(namespace, name)) {
            let status = deployment.status.get_or_insert_with(Default::default);
            status.ready_replicas = Some(ready);
            status.available_replicas = Some(ready);
        }
    }

    pub fn calls(&self) -> Vec<MockOp> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.state().namespaces.get(name).cloned()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state().claims.get(&key(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        let state = self.state();
        state
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .map(|d| state.observe(d))
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state().services.get(&key(namespace, name)).cloned()
    }

    /// Total number of stored objects of every kind.
    pub fn object_count(&self) -> usize {
        let state = self.state();
        state.namespaces.len() + state.claims.len() + state.deployments.len() + state.services.len()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        self.begin(MockOp::CreateNamespace).await?;
        let name = namespace.metadata.name_or_empty().to_string();
        let mut state = self.state();
        if state.namespaces.contains_key(&name) {
            return Err(already_exists(ResourceKind::Namespace, &name));
        }
        let mut created = namespace.clone();
        state.stamp(&mut created.metadata, None);
        created.status = Some(NamespaceStatus {
            phase: Some("Active".to_string()),
        });
        state.namespaces.insert(name, created.clone());
        Ok(created)
    }

    async fn read_namespace(&self, name: &str) -> Result<Namespace> {
        self.begin(MockOp::ReadNamespace).await?;
        self.state()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Namespace, name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.begin(MockOp::DeleteNamespace).await?;
        let mut state = self.state();
        match state.namespaces.get(name) {
            None => return Err(not_found(ResourceKind::Namespace, name)),
            Some(ns) if ns.is_terminating() => {
                return Err(ClusterError::Conflict(format!(
                    "Operation cannot be fulfilled on namespaces \"{name}\": The system is ensuring all content is removed from this namespace.  Upon completion, this namespace will automatically be purged by the system."
                )))
            }
            Some(_) => {}
        }
        if state.hold_termination {
            if let Some(ns) = state.namespaces.get_mut(name) {
                ns.metadata.deletion_timestamp = Some(chrono::Utc::now().to_rfc3339());
                ns.status = Some(NamespaceStatus {
                    phase: Some("Terminating".to_string()),
                });
            }
        } else {
            state.purge_namespace(name);
        }
        Ok(())
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>> {
        self.begin(MockOp::ListNamespaces).await?;
        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| {
                wanted
                    .iter()
                    .all(|(k, v)| ns.metadata.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        self.begin(MockOp::CreateClaim).await?;
        let name = claim.metadata.name_or_empty().to_string();
        let mut state = self.state();
        state.require_active_namespace(namespace)?;
        if state.claims.contains_key(&key(namespace, &name)) {
            return Err(already_exists(ResourceKind::PersistentVolumeClaim, &name));
        }
        let mut created = claim.clone();
        state.stamp(&mut created.metadata, Some(namespace));
        state.claims.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn read_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim> {
        self.begin(MockOp::ReadClaim).await?;
        self.state()
            .claims
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::PersistentVolumeClaim, name))
    }

    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin(MockOp::DeleteClaim).await?;
        self.state()
            .claims
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::PersistentVolumeClaim, name))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        self.begin(MockOp::CreateDeployment).await?;
        let name = deployment.metadata.name_or_empty().to_string();
        let mut state = self.state();
        state.require_active_namespace(namespace)?;
        if state.deployments.contains_key(&key(namespace, &name)) {
            return Err(already_exists(ResourceKind::Deployment, &name));
        }
        let mut created = deployment.clone();
        state.stamp(&mut created.metadata, Some(namespace));
        created.status = Some(DeploymentStatus {
            replicas: Some(created.desired_replicas()),
            ready_replicas: Some(0),
            available_replicas: Some(0),
        });
        state
            .deployments
            .insert(key(namespace, &name), created.clone());
        Ok(state.observe(created))
    }

    async fn read_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.begin(MockOp::ReadDeployment).await?;
        let state = self.state();
        state
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .map(|d| state.observe(d))
            .ok_or_else(|| not_found(ResourceKind::Deployment, name))
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        self.begin(MockOp::ReplaceDeployment).await?;
        let name = deployment.metadata.name_or_empty().to_string();
        let mut state = self.state();
        let Some(current) = state.deployments.get(&key(namespace, &name)).cloned() else {
            return Err(not_found(ResourceKind::Deployment, &name));
        };
        if let Some(expected) = &deployment.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(expected) {
                return Err(ClusterError::Conflict(format!(
                    "deployment {name} has been modified"
                )));
            }
        }

        state.version += 1;
        let mut replaced = deployment.clone();
        replaced.metadata.uid = current.metadata.uid.clone();
        replaced.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        replaced.metadata.namespace = Some(namespace.to_string());
        replaced.metadata.resource_version = Some(state.version.to_string());
        let mut status = current.status.clone().unwrap_or_default();
        status.replicas = Some(replaced.desired_replicas());
        replaced.status = Some(status);

        state
            .deployments
            .insert(key(namespace, &name), replaced.clone());
        Ok(state.observe(replaced))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin(MockOp::DeleteDeployment).await?;
        self.state()
            .deployments
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::Deployment, name))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        self.begin(MockOp::CreateService).await?;
        let name = service.metadata.name_or_empty().to_string();
        let mut state = self.state();
        state.require_active_namespace(namespace)?;
        if state.services.contains_key(&key(namespace, &name)) {
            return Err(already_exists(ResourceKind::Service, &name));
        }
        let mut created = service.clone();
        state.stamp(&mut created.metadata, Some(namespace));
        state.services.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn read_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.begin(MockOp::ReadService).await?;
        self.state()
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Service, name))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin(MockOp::DeleteService).await?;
        self.state()
            .services
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::Service, name))
    }
}
