//! Naming convention and manifests for the four objects backing a workspace.

use crate::config::{ContainerSettings, OrchestratorConfig, StorageSettings};
use crate::template;
use crate::workspace::{CreateWorkspaceRequest, ResourceRequest};
use chrono::{DateTime, SecondsFormat, Utc};
use cws_cluster::resources::{
    Container, ContainerPort, DeploymentSpec, EnvVar, HttpGetAction, IntOrString, LabelSelector,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use cws_cluster::{Deployment, Namespace, ObjectMeta, PersistentVolumeClaim, Service};
use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "cloudcode";
pub const WORKSPACE_LABEL: &str = "workspace";
pub const CREATED_AT_ANNOTATION: &str = "cloudcode.dev/created-at";
pub const NAMESPACE_PREFIX: &str = "workspace-";
pub const VOLUME_NAME: &str = "workspace-storage";
pub const PORT_NAME: &str = "http";
pub const HEALTH_PATH: &str = "/health";
pub const SEED_CONTAINER: &str = "seed-workspace";

const ENV_WORKSPACE_ID: &str = "WORKSPACE_ID";
const ENV_TEMPLATE: &str = "TEMPLATE";
const ENV_LANGUAGE: &str = "LANGUAGE";
const ENV_LIBRARIES: &str = "LIBRARIES";
const ENV_WORKSPACE_DIR: &str = "WORKSPACE_DIR";
const ENV_TEMPLATES_PATH: &str = "TEMPLATES_PATH";

/// Label selector matching every workspace namespace.
pub fn namespace_selector() -> String {
    format!("{APP_LABEL}={APP_LABEL_VALUE}")
}

/// Object names derived from a workspace id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceNames {
    pub namespace: String,
    pub claim: String,
    pub deployment: String,
    pub service: String,
}

impl WorkspaceNames {
    pub fn new(id: &str) -> Self {
        Self {
            namespace: format!("{NAMESPACE_PREFIX}{id}"),
            claim: format!("{id}-pvc"),
            deployment: format!("{id}-deployment"),
            service: format!("{id}-service"),
        }
    }
}

/// Inverse of the namespace naming rule.
pub fn workspace_id_from_namespace(namespace: &str) -> Option<&str> {
    namespace
        .strip_prefix(NAMESPACE_PREFIX)
        .filter(|id| !id.is_empty())
}

pub fn workspace_labels(id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
        (WORKSPACE_LABEL.to_string(), id.to_string()),
    ])
}

fn pod_labels(id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), id.to_string())])
}

pub fn namespace_manifest(id: &str, created_at: DateTime<Utc>) -> Namespace {
    let mut meta = ObjectMeta::named(WorkspaceNames::new(id).namespace).with_labels(workspace_labels(id));
    meta.annotations.insert(
        CREATED_AT_ANNOTATION.to_string(),
        created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    Namespace::new(meta)
}

pub fn claim_manifest(id: &str, storage: &StorageSettings) -> PersistentVolumeClaim {
    PersistentVolumeClaim::new(
        ObjectMeta::named(WorkspaceNames::new(id).claim).with_labels(workspace_labels(id)),
        PersistentVolumeClaimSpec {
            access_modes: vec!["ReadWriteOnce".to_string()],
            resources: ResourceRequirements {
                requests: BTreeMap::from([("storage".to_string(), storage.size.clone())]),
                limits: BTreeMap::new(),
            },
            storage_class_name: Some(storage.class_name.clone()),
        },
    )
}

fn compute_requirements(
    requested: Option<&ResourceRequest>,
    config: &OrchestratorConfig,
) -> ResourceRequirements {
    let defaults = &config.compute;
    let cpu = requested.and_then(|r| r.cpu.clone());
    let memory = requested.and_then(|r| r.memory.clone());

    // An override applies to both the request and the limit.
    ResourceRequirements {
        requests: BTreeMap::from([
            ("cpu".to_string(), cpu.clone().unwrap_or_else(|| defaults.cpu_request.clone())),
            (
                "memory".to_string(),
                memory.clone().unwrap_or_else(|| defaults.memory_request.clone()),
            ),
        ]),
        limits: BTreeMap::from([
            ("cpu".to_string(), cpu.unwrap_or_else(|| defaults.cpu_limit.clone())),
            (
                "memory".to_string(),
                memory.unwrap_or_else(|| defaults.memory_limit.clone()),
            ),
        ]),
    }
}

fn health_probe(port_name: &str, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HttpGetAction {
            path: HEALTH_PATH.to_string(),
            port: IntOrString::String(port_name.to_string()),
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
    }
}

fn workspace_env(req: &CreateWorkspaceRequest) -> Vec<EnvVar> {
    vec![
        EnvVar::new(ENV_WORKSPACE_ID, &req.workspace_id),
        EnvVar::new(ENV_TEMPLATE, &req.template),
        EnvVar::new(ENV_LANGUAGE, &req.language),
        EnvVar::new(ENV_LIBRARIES, req.libraries.join(",")),
    ]
}

fn storage_mount(mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: VOLUME_NAME.to_string(),
        mount_path: mount_path.to_string(),
    }
}

/// Init container that seeds the claim from the template on first start.
fn seed_container(req: &CreateWorkspaceRequest, image: &str, container: &ContainerSettings) -> Container {
    let mut env = workspace_env(req);
    env.push(EnvVar::new(ENV_WORKSPACE_DIR, &container.mount_path));
    env.push(EnvVar::new(ENV_TEMPLATES_PATH, &container.templates_path));

    Container {
        name: SEED_CONTAINER.to_string(),
        image: Some(image.to_string()),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            template::seed_script(&req.language),
        ],
        volume_mounts: vec![storage_mount(&container.mount_path)],
        env,
        ..Default::default()
    }
}

pub fn deployment_manifest(req: &CreateWorkspaceRequest, config: &OrchestratorConfig) -> Deployment {
    let id = req.workspace_id.as_str();
    let names = WorkspaceNames::new(id);
    let image = config.images.image_for(&req.template, &req.language);

    let container = Container {
        name: id.to_string(),
        image: Some(image.to_string()),
        command: Vec::new(),
        resources: Some(compute_requirements(req.resources.as_ref(), config)),
        volume_mounts: vec![storage_mount(&config.container.mount_path)],
        ports: vec![ContainerPort {
            container_port: config.container.port,
            name: Some(PORT_NAME.to_string()),
            protocol: None,
        }],
        env: workspace_env(req),
        readiness_probe: Some(health_probe(PORT_NAME, 10, 10)),
        liveness_probe: Some(health_probe(PORT_NAME, 15, 20)),
    };

    Deployment::new(
        ObjectMeta::named(names.deployment).with_labels(workspace_labels(id)),
        DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: pod_labels(id),
            },
            template: PodTemplateSpec {
                metadata: ObjectMeta::default().with_labels(pod_labels(id)),
                spec: Some(PodSpec {
                    init_containers: vec![seed_container(req, image, &config.container)],
                    containers: vec![container],
                    volumes: vec![Volume {
                        name: VOLUME_NAME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: names.claim,
                        }),
                    }],
                }),
            },
        },
    )
}

pub fn service_manifest(id: &str, container: &ContainerSettings) -> Service {
    Service::new(
        ObjectMeta::named(WorkspaceNames::new(id).service).with_labels(workspace_labels(id)),
        ServiceSpec {
            selector: pod_labels(id),
            ports: vec![ServicePort {
                port: 80,
                target_port: Some(IntOrString::Int(container.port)),
                protocol: Some("TCP".to_string()),
            }],
            type_: Some("ClusterIP".to_string()),
        },
    )
}

/// A previously read deployment, stripped of server-populated fields so it
/// can be submitted as a fresh create.
pub fn recreatable(mut deployment: Deployment) -> Deployment {
    deployment.metadata.clear_server_fields();
    deployment.status = None;
    deployment
}

/// Provisioning inputs recovered from a deployment's container.
pub fn request_from_deployment(id: &str, deployment: &Deployment) -> CreateWorkspaceRequest {
    let container = deployment.primary_container();
    let env = |name: &str| {
        container
            .and_then(|c| c.env_value(name))
            .unwrap_or_default()
            .to_string()
    };
    let libraries = env(ENV_LIBRARIES)
        .split(',')
        .filter(|lib| !lib.is_empty())
        .map(str::to_string)
        .collect();
    let resources = container
        .and_then(|c| c.resources.as_ref())
        .map(|r| ResourceRequest {
            cpu: r.limits.get("cpu").cloned(),
            memory: r.limits.get("memory").cloned(),
        });

    CreateWorkspaceRequest {
        workspace_id: id.to_string(),
        template: env(ENV_TEMPLATE),
        language: env(ENV_LANGUAGE),
        libraries,
        resources,
    }
}
