use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::manifests::{self, WorkspaceNames};
use crate::operation::{Operation, Step};
use crate::status::{derive_state, state_without_deployment, LifecycleState};
use crate::validation::{validate_create_request, validate_workspace_id};
use chrono::Utc;
use cws_cluster::{ClusterClient, ClusterError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

/// Compute override. Each value applies to both the request and the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub workspace_id: String,
    pub template: String,
    pub language: String,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub workspace_id: String,
    pub template: String,
    pub language: String,
    pub libraries: Vec<String>,
    pub resources: Option<ResourceRequest>,
    pub status: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Workspace {
    fn from_request(req: CreateWorkspaceRequest, status: LifecycleState) -> Self {
        Self {
            workspace_id: req.workspace_id,
            template: req.template,
            language: req.language,
            libraries: req.libraries,
            resources: req.resources,
            status,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub workspace_id: String,
    pub status: LifecycleState,
}

/// A failed operation, kept until the workspace is deleted.
#[derive(Debug, Clone)]
struct FailureRecord {
    operation: Operation,
    cause: String,
    request: Option<CreateWorkspaceRequest>,
}

/// Objects created by the current Create call, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Created {
    Namespace,
    Claim,
    Deployment,
    Service,
}

struct Inner {
    cluster: Arc<dyn ClusterClient>,
    config: OrchestratorConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    failures: DashMap<String, FailureRecord>,
    in_flight: DashMap<String, Operation>,
}

/// Drives the workspace lifecycle against a cluster.
///
/// Mutating operations on one workspace id are serialized in arrival order;
/// different ids proceed independently. Status is derived from the cluster on
/// every query.
#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    inner: Arc<Inner>,
}

impl WorkspaceOrchestrator {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cluster,
                config,
                locks: DashMap::new(),
                failures: DashMap::new(),
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Name of the underlying cluster client.
    pub fn cluster_name(&self) -> &'static str {
        self.inner.cluster.name()
    }

    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = self.inner.locks.entry(id.to_string()).or_default().clone();
        mutex.lock_owned().await
    }

    fn release_lock(&self, id: &str) {
        self.inner
            .locks
            .remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    fn is_busy(&self, id: &str) -> bool {
        self.inner
            .locks
            .get(id)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Run one cluster call under the operation timeout.
    async fn call<T, F>(&self, step: Step, fut: F) -> cws_cluster::Result<T>
    where
        F: Future<Output = cws_cluster::Result<T>>,
    {
        let limit = self.inner.config.operation_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Unavailable(format!(
                "{step} timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Log a failed step, record the workspace as failed, and convert the error.
    fn fail(&self, id: &str, operation: Operation, step: Step, err: ClusterError) -> OrchestratorError {
        self.inner.in_flight.remove(id);
        if err.is_not_found() {
            warn!(workspace_id = id, %operation, step = %step, error = %err, "workspace object missing");
            return OrchestratorError::NotFound(id.to_string());
        }

        error!(workspace_id = id, %operation, step = %step, error = %err, "workspace operation failed");
        let request = self
            .inner
            .failures
            .get(id)
            .and_then(|record| record.request.clone());
        self.inner.failures.insert(
            id.to_string(),
            FailureRecord {
                operation,
                cause: err.to_string(),
                request,
            },
        );
        err.into()
    }

    fn ensure_not_failed(&self, id: &str, operation: Operation) -> Result<()> {
        match self.inner.failures.get(id) {
            Some(record) => Err(OrchestratorError::InvalidState(format!(
                "cannot {operation} workspace {id}: {} failed ({}); delete it first",
                record.operation, record.cause
            ))),
            None => Ok(()),
        }
    }

    /// Provision the namespace, claim, deployment and service, in that order.
    ///
    /// Objects that already exist are adopted. If any step fails, the objects
    /// created by this call are deleted in reverse order and the workspace is
    /// reported `Failed` until it is deleted.
    #[instrument(skip(self, req), fields(workspace_id = %req.workspace_id))]
    pub async fn create_workspace(&self, req: CreateWorkspaceRequest) -> Result<Workspace> {
        validate_create_request(&req)?;
        let id = req.workspace_id.clone();
        let guard = self.lock(&id).await;

        if let Some(record) = self.inner.failures.get(&id) {
            return Err(OrchestratorError::ResourceConflict(format!(
                "workspace {id} is in failed state ({}); delete it before retrying",
                record.cause
            )));
        }

        self.inner.in_flight.insert(id.clone(), Operation::Create);
        let names = WorkspaceNames::new(&id);
        let mut created = Vec::new();

        if let Err((step, err)) = self.provision(&req, &names, &mut created).await {
            self.roll_back(&id, &names, created).await;
            error!(workspace_id = %id, operation = %Operation::Create, step = %step, error = %err, "workspace operation failed");

            self.inner.in_flight.remove(&id);
            self.inner.failures.insert(
                id.clone(),
                FailureRecord {
                    operation: Operation::Create,
                    cause: format!("{step}: {err}"),
                    request: Some(req),
                },
            );
            // A parent vanishing mid-provisioning is not a missing workspace.
            return Err(if err.is_not_found() {
                OrchestratorError::Cluster(err)
            } else {
                err.into()
            });
        }
        drop(guard);

        info!(workspace_id = %id, "workspace provisioned");
        let status = self.get_status(&id).await?;
        Ok(Workspace::from_request(req, status))
    }

    async fn provision(
        &self,
        req: &CreateWorkspaceRequest,
        names: &WorkspaceNames,
        created: &mut Vec<Created>,
    ) -> std::result::Result<(), (Step, ClusterError)> {
        let id = req.workspace_id.as_str();
        let config = &self.inner.config;
        let cluster = &self.inner.cluster;

        let namespace = manifests::namespace_manifest(id, Utc::now());
        if self
            .create_step(id, Step::CreateNamespace, cluster.create_namespace(&namespace))
            .await?
        {
            created.push(Created::Namespace);
        }

        let claim = manifests::claim_manifest(id, &config.storage);
        if self
            .create_step(id, Step::CreateClaim, cluster.create_persistent_volume_claim(&names.namespace, &claim))
            .await?
        {
            created.push(Created::Claim);
        }

        let deployment = manifests::deployment_manifest(req, config);
        if self
            .create_step(id, Step::CreateDeployment, cluster.create_deployment(&names.namespace, &deployment))
            .await?
        {
            created.push(Created::Deployment);
        }

        let service = manifests::service_manifest(id, &config.container);
        if self
            .create_step(id, Step::CreateService, cluster.create_service(&names.namespace, &service))
            .await?
        {
            created.push(Created::Service);
        }

        Ok(())
    }

    /// `Ok(true)` if the object was created, `Ok(false)` if it already existed.
    async fn create_step<T, F>(
        &self,
        id: &str,
        step: Step,
        fut: F,
    ) -> std::result::Result<bool, (Step, ClusterError)>
    where
        F: Future<Output = cws_cluster::Result<T>>,
    {
        match self.call(step, fut).await {
            Ok(_) => {
                debug!(workspace_id = id, step = %step, "created");
                Ok(true)
            }
            Err(err) if err.is_already_exists() => {
                info!(workspace_id = id, step = %step, "adopting existing object");
                Ok(false)
            }
            Err(err) => Err((step, err)),
        }
    }

    async fn roll_back(&self, id: &str, names: &WorkspaceNames, created: Vec<Created>) {
        let cluster = &self.inner.cluster;
        let ns = names.namespace.as_str();

        for object in created.into_iter().rev() {
            let (step, result) = match object {
                Created::Service => (
                    Step::DeleteService,
                    self.call(Step::DeleteService, cluster.delete_service(ns, &names.service))
                        .await,
                ),
                Created::Deployment => (
                    Step::DeleteDeployment,
                    self.call(
                        Step::DeleteDeployment,
                        cluster.delete_deployment(ns, &names.deployment),
                    )
                    .await,
                ),
                Created::Claim => (
                    Step::DeleteClaim,
                    self.call(
                        Step::DeleteClaim,
                        cluster.delete_persistent_volume_claim(ns, &names.claim),
                    )
                    .await,
                ),
                Created::Namespace => (
                    Step::DeleteNamespace,
                    self.call(Step::DeleteNamespace, cluster.delete_namespace(ns))
                        .await,
                ),
            };

            match result {
                Ok(()) => debug!(workspace_id = id, step = %step, "rolled back"),
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(workspace_id = id, step = %step, error = %err, "rollback step failed")
                }
            }
        }
    }

    pub async fn start_workspace(&self, id: &str) -> Result<()> {
        self.scale(id, Operation::Start, 1).await
    }

    pub async fn stop_workspace(&self, id: &str) -> Result<()> {
        self.scale(id, Operation::Stop, 0).await
    }

    #[instrument(skip(self))]
    async fn scale(&self, id: &str, operation: Operation, replicas: i32) -> Result<()> {
        validate_workspace_id(id)?;
        let _guard = self.lock(id).await;
        self.ensure_not_failed(id, operation)?;

        let names = WorkspaceNames::new(id);
        let cluster = &self.inner.cluster;

        let mut deployment = self
            .call(
                Step::ReadDeployment,
                cluster.read_deployment(&names.namespace, &names.deployment),
            )
            .await
            .map_err(|e| self.fail(id, operation, Step::ReadDeployment, e))?;

        self.inner.in_flight.insert(id.to_string(), operation);
        deployment.set_replicas(replicas);
        self.call(
            Step::ReplaceDeployment,
            cluster.replace_deployment(&names.namespace, &deployment),
        )
        .await
        .map_err(|e| self.fail(id, operation, Step::ReplaceDeployment, e))?;

        info!(workspace_id = id, %operation, replicas, "deployment scaled");
        Ok(())
    }

    /// Delete and recreate the deployment. The claim and service are left
    /// alone, so files persist while the deployment gets a new identity.
    #[instrument(skip(self))]
    pub async fn restart_workspace(&self, id: &str) -> Result<()> {
        validate_workspace_id(id)?;
        let _guard = self.lock(id).await;
        self.ensure_not_failed(id, Operation::Restart)?;

        let op = Operation::Restart;
        let names = WorkspaceNames::new(id);
        let cluster = &self.inner.cluster;

        let previous = self
            .call(
                Step::ReadDeployment,
                cluster.read_deployment(&names.namespace, &names.deployment),
            )
            .await
            .map_err(|e| self.fail(id, op, Step::ReadDeployment, e))?;

        self.inner.in_flight.insert(id.to_string(), op);
        match self
            .call(
                Step::DeleteDeployment,
                cluster.delete_deployment(&names.namespace, &names.deployment),
            )
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(self.fail(id, op, Step::DeleteDeployment, err)),
        }

        self.await_deployment_gone(&names)
            .await
            .map_err(|e| self.fail(id, op, Step::AwaitDeploymentGone, e))?;

        let fresh = manifests::recreatable(previous);
        self.call(
            Step::CreateDeployment,
            cluster.create_deployment(&names.namespace, &fresh),
        )
        .await
        .map_err(|e| self.fail(id, op, Step::CreateDeployment, e))?;

        info!(workspace_id = id, "deployment recreated");
        Ok(())
    }

    async fn await_deployment_gone(&self, names: &WorkspaceNames) -> cws_cluster::Result<()> {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.operation_timeout;

        loop {
            match self
                .call(
                    Step::AwaitDeploymentGone,
                    self.inner
                        .cluster
                        .read_deployment(&names.namespace, &names.deployment),
                )
                .await
            {
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
                Ok(_) if Instant::now() >= deadline => {
                    return Err(ClusterError::Unavailable(format!(
                        "deployment {} still present after {}ms",
                        names.deployment,
                        config.operation_timeout.as_millis()
                    )))
                }
                Ok(_) => tokio::time::sleep(config.poll_interval).await,
            }
        }
    }

    /// Delete the namespace and everything in it. Deleting a workspace that
    /// does not exist, or is already terminating, succeeds.
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, id: &str) -> Result<()> {
        validate_workspace_id(id)?;
        let guard = self.lock(id).await;
        let names = WorkspaceNames::new(id);

        match self
            .call(
                Step::DeleteNamespace,
                self.inner.cluster.delete_namespace(&names.namespace),
            )
            .await
        {
            Ok(()) => info!(workspace_id = id, "workspace deleted"),
            Err(err) if err.is_not_found() => {
                debug!(workspace_id = id, "workspace already absent")
            }
            // The API server answers 409 while a namespace is terminating.
            Err(err) if err.is_conflict() => {
                debug!(workspace_id = id, error = %err, "workspace already being deleted")
            }
            Err(err) => return Err(self.fail(id, Operation::Delete, Step::DeleteNamespace, err)),
        }

        self.inner.failures.remove(id);
        self.inner.in_flight.remove(id);
        drop(guard);
        self.release_lock(id);
        Ok(())
    }

    /// Current lifecycle state, derived from the cluster.
    ///
    /// Cluster errors other than "not found" are reported as `Failed` without
    /// being recorded.
    pub async fn get_status(&self, id: &str) -> Result<LifecycleState> {
        validate_workspace_id(id)?;
        if self.inner.failures.contains_key(id) {
            return Ok(LifecycleState::Failed);
        }

        let names = WorkspaceNames::new(id);
        let cluster = &self.inner.cluster;

        let namespace = match self
            .call(Step::ReadNamespace, cluster.read_namespace(&names.namespace))
            .await
        {
            Ok(namespace) => namespace,
            Err(err) if err.is_not_found() => return Ok(LifecycleState::NotFound),
            Err(err) => {
                warn!(workspace_id = id, step = %Step::ReadNamespace, error = %err, "status query failed");
                return Ok(LifecycleState::Failed);
            }
        };
        if namespace.is_terminating() {
            return Ok(LifecycleState::Deleting);
        }

        let in_flight = self.inner.in_flight.get(id).map(|op| *op);
        let state = match self
            .call(
                Step::ReadDeployment,
                cluster.read_deployment(&names.namespace, &names.deployment),
            )
            .await
        {
            Ok(deployment) => derive_state(
                deployment.desired_replicas(),
                deployment.ready_replicas(),
                in_flight,
            ),
            Err(err) if err.is_not_found() => state_without_deployment(in_flight),
            Err(err) => {
                warn!(workspace_id = id, step = %Step::ReadDeployment, error = %err, "status query failed");
                return Ok(LifecycleState::Failed);
            }
        };

        if state.is_settled() && in_flight.is_some() && !self.is_busy(id) {
            self.inner.in_flight.remove(id);
        }
        Ok(state)
    }

    /// Workspace ids with a namespace in the cluster, plus failed ones awaiting
    /// deletion. Sorted.
    pub async fn list_workspaces(&self) -> Result<Vec<String>> {
        let namespaces = self
            .call(
                Step::ListNamespaces,
                self.inner
                    .cluster
                    .list_namespaces(&manifests::namespace_selector()),
            )
            .await?;

        let mut ids: Vec<String> = namespaces
            .iter()
            .filter_map(|ns| ns.metadata.name.as_deref())
            .filter_map(manifests::workspace_id_from_namespace)
            .map(str::to_string)
            .chain(self.inner.failures.iter().map(|entry| entry.key().clone()))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub async fn list_workspaces_with_status(&self) -> Result<Vec<WorkspaceSummary>> {
        let mut summaries = Vec::new();
        for workspace_id in self.list_workspaces().await? {
            let status = self.get_status(&workspace_id).await?;
            summaries.push(WorkspaceSummary {
                workspace_id,
                status,
            });
        }
        Ok(summaries)
    }

    /// Provisioning inputs and status of a workspace, recovered from its deployment.
    pub async fn describe_workspace(&self, id: &str) -> Result<Workspace> {
        let status = self.get_status(id).await?;
        if status == LifecycleState::NotFound {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        if let Some(record) = self.inner.failures.get(id).map(|r| r.value().clone()) {
            let request = record.request.unwrap_or_else(|| empty_request(id));
            let mut workspace = Workspace::from_request(request, status);
            workspace.error_message = Some(record.cause);
            return Ok(workspace);
        }

        let names = WorkspaceNames::new(id);
        let request = match self
            .call(
                Step::ReadDeployment,
                self.inner
                    .cluster
                    .read_deployment(&names.namespace, &names.deployment),
            )
            .await
        {
            Ok(deployment) => manifests::request_from_deployment(id, &deployment),
            Err(err) if err.is_not_found() => empty_request(id),
            Err(err) => return Err(err.into()),
        };
        Ok(Workspace::from_request(request, status))
    }

    /// Poll the status until it equals `target` or `timeout` elapses, returning
    /// the last observed state either way.
    pub async fn wait_for_status(
        &self,
        id: &str,
        target: LifecycleState,
        timeout: Duration,
    ) -> Result<LifecycleState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.get_status(id).await?;
            let now = Instant::now();
            if state == target || now >= deadline {
                return Ok(state);
            }
            let pause = self.inner.config.poll_interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }
}

fn empty_request(id: &str) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest {
        workspace_id: id.to_string(),
        template: String::new(),
        language: String::new(),
        libraries: Vec::new(),
        resources: None,
    }
}
