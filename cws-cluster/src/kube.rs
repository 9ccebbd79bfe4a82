//! REST client for the Kubernetes API server.

use crate::error::{ClusterError, Result};
use crate::resources::{
    Deployment, Namespace, ObjectList, PersistentVolumeClaim, ResourceKind, Service, Status,
};
use crate::ClusterClient;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Connection settings for [`KubeClient`].
#[derive(Clone, Default)]
pub struct KubeConfig {
    /// Base URL of the API server, e.g. `https://10.0.0.1:443`.
    pub api_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// PEM-encoded CA bundle trusted in addition to the system roots.
    pub ca_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for KubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.as_ref().map(|pem| pem.len()))
            .finish()
    }
}

impl KubeConfig {
    /// Configuration from the pod's mounted service account.
    pub fn in_cluster() -> Result<Self> {
        let host = env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterError::Config("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Ok(Self {
            api_url: format!("https://{host}:{port}"),
            token: Some(read_token(&dir.join("token"))?),
            ca_pem: Some(read_file(&dir.join("ca.crt"))?),
        })
    }

    /// Explicit `CWS_KUBE_*` settings, falling back to the in-cluster service account.
    pub fn from_env() -> Result<Self> {
        let Ok(api_url) = env::var("CWS_KUBE_API_URL") else {
            return Self::in_cluster();
        };

        let token = match env::var("CWS_KUBE_TOKEN_PATH") {
            Ok(path) => Some(read_token(&PathBuf::from(path))?),
            Err(_) => None,
        };
        let ca_pem = match env::var("CWS_KUBE_CA_PATH") {
            Ok(path) => Some(read_file(&PathBuf::from(path))?),
            Err(_) => None,
        };

        Ok(Self {
            api_url,
            token,
            ca_pem,
        })
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| ClusterError::Config(format!("failed to read {}: {e}", path.display())))
}

fn read_token(path: &Path) -> Result<String> {
    let raw = read_file(path)?;
    let token = String::from_utf8(raw)
        .map_err(|_| ClusterError::Config(format!("{} is not valid UTF-8", path.display())))?;
    Ok(token.trim().to_string())
}

/// [`ClusterClient`] speaking JSON over HTTPS to a real API server.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(config: KubeConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| ClusterError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base: config.api_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    fn collection_url(&self, kind: ResourceKind, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!(
                "{}{}/namespaces/{ns}/{}",
                self.base,
                kind.api_prefix(),
                kind.plural()
            ),
            None => format!("{}{}/{}", self.base, kind.api_prefix(), kind.plural()),
        }
    }

    fn object_url(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{name}", self.collection_url(kind, namespace))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        kind: ResourceKind,
        name: &str,
    ) -> Result<T> {
        let body = self.execute_raw(req, kind, name).await?;
        serde_json::from_str(&body).map_err(|e| ClusterError::Decode(format!("{kind} {name}: {e}")))
    }

    async fn execute_raw(&self, req: RequestBuilder, kind: ResourceKind, name: &str) -> Result<String> {
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        debug!(%status, %kind, name, "cluster API response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(error_from_response(status, &body, kind, name))
        }
    }

    async fn create<T: Serialize + DeserializeOwned>(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        object: &T,
    ) -> Result<T> {
        let url = self.collection_url(kind, namespace);
        self.execute(self.request(Method::POST, url).json(object), kind, name)
            .await
    }

    async fn read<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<T> {
        let url = self.object_url(kind, namespace, name);
        self.execute(self.request(Method::GET, url), kind, name).await
    }

    async fn delete(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let url = self.object_url(kind, namespace, name);
        self.execute_raw(self.request(Method::DELETE, url), kind, name)
            .await
            .map(|_| ())
    }
}

fn transport_error(err: reqwest::Error) -> ClusterError {
    if err.is_decode() {
        ClusterError::Decode(err.to_string())
    } else {
        ClusterError::Unavailable(err.to_string())
    }
}

/// Map a non-2xx response onto the error taxonomy.
pub fn error_from_response(
    status: StatusCode,
    body: &str,
    kind: ResourceKind,
    name: &str,
) -> ClusterError {
    let parsed: Option<Status> = serde_json::from_str(body).ok();
    let reason = parsed.as_ref().and_then(|s| s.reason.clone());
    let message = parsed
        .and_then(|s| s.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    match status {
        StatusCode::NOT_FOUND => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        StatusCode::CONFLICT if reason.as_deref() == Some("AlreadyExists") => {
            ClusterError::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        StatusCode::CONFLICT => ClusterError::Conflict(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ClusterError::Unavailable(message)
        }
        _ => ClusterError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn object_name(meta_name: Option<&str>) -> &str {
    meta_name.unwrap_or_default()
}

#[async_trait]
impl ClusterClient for KubeClient {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    #[instrument(skip_all)]
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let name = object_name(namespace.metadata.name.as_deref());
        self.create(ResourceKind::Namespace, None, name, namespace)
            .await
    }

    async fn read_namespace(&self, name: &str) -> Result<Namespace> {
        self.read(ResourceKind::Namespace, None, name).await
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.delete(ResourceKind::Namespace, None, name).await
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>> {
        let url = self.collection_url(ResourceKind::Namespace, None);
        let req = self
            .request(Method::GET, url)
            .query(&[("labelSelector", label_selector)]);
        let list: ObjectList<Namespace> = self
            .execute(req, ResourceKind::Namespace, label_selector)
            .await?;
        Ok(list.items)
    }

    #[instrument(skip(self, claim))]
    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = object_name(claim.metadata.name.as_deref());
        self.create(ResourceKind::PersistentVolumeClaim, Some(namespace), name, claim)
            .await
    }

    async fn read_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim> {
        self.read(ResourceKind::PersistentVolumeClaim, Some(namespace), name)
            .await
    }

    #[instrument(skip(self))]
    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(ResourceKind::PersistentVolumeClaim, Some(namespace), name)
            .await
    }

    #[instrument(skip(self, deployment))]
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let name = object_name(deployment.metadata.name.as_deref());
        self.create(ResourceKind::Deployment, Some(namespace), name, deployment)
            .await
    }

    async fn read_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.read(ResourceKind::Deployment, Some(namespace), name)
            .await
    }

    #[instrument(skip(self, deployment))]
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let name = object_name(deployment.metadata.name.as_deref());
        let url = self.object_url(ResourceKind::Deployment, Some(namespace), name);
        self.execute(
            self.request(Method::PUT, url).json(deployment),
            ResourceKind::Deployment,
            name,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(ResourceKind::Deployment, Some(namespace), name)
            .await
    }

    #[instrument(skip(self, service))]
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let name = object_name(service.metadata.name.as_deref());
        self.create(ResourceKind::Service, Some(namespace), name, service)
            .await
    }

    async fn read_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.read(ResourceKind::Service, Some(namespace), name).await
    }

    #[instrument(skip(self))]
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(ResourceKind::Service, Some(namespace), name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_body(reason: &str, message: &str) -> String {
        serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "reason": reason,
            "message": message,
        })
        .to_string()
    }

    #[test]
    fn conflict_with_already_exists_reason_is_adoptable() {
        let err = error_from_response(
            StatusCode::CONFLICT,
            &status_body("AlreadyExists", "namespaces \"workspace-a\" already exists"),
            ResourceKind::Namespace,
            "workspace-a",
        );
        assert!(err.is_already_exists());
    }

    #[test]
    fn other_conflicts_keep_the_server_message() {
        let err = error_from_response(
            StatusCode::CONFLICT,
            &status_body("Conflict", "the object has been modified"),
            ResourceKind::Deployment,
            "a-deployment",
        );
        assert_eq!(
            err,
            ClusterError::Conflict("the object has been modified".into())
        );
    }

    #[test]
    fn non_status_bodies_fall_back_to_reason_phrase() {
        let err = error_from_response(
            StatusCode::FORBIDDEN,
            "<html>nope</html>",
            ResourceKind::Service,
            "a-service",
        );
        assert_eq!(
            err,
            ClusterError::Api {
                status: 403,
                message: "Forbidden".into()
            }
        );
    }

    #[test]
    fn object_urls_use_the_kind_api_group() {
        let client = KubeClient::new(KubeConfig {
            api_url: "https://cluster.local:6443/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.object_url(ResourceKind::Deployment, Some("workspace-a"), "a-deployment"),
            "https://cluster.local:6443/apis/apps/v1/namespaces/workspace-a/deployments/a-deployment"
        );
        assert_eq!(
            client.collection_url(ResourceKind::Namespace, None),
            "https://cluster.local:6443/api/v1/namespaces"
        );
    }
}
